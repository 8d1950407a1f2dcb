// pipeline/ — the node graph model and its execution engine.

pub mod message;
pub mod node;
pub mod port;
pub mod scheduler;

pub use message::Message;
pub use node::Node;
pub use port::{Expectation, ImageFormat, InputRef, MessageKind, NodeId, OutputRef, PortSpec};
pub use scheduler::{Pipeline, SinkOutput};
