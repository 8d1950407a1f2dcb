// pipeline/port.rs — typed ports and the connection contract.
//
// A port carries a message kind, checked at wiring time: connecting an
// Image output to a Keypoints input fails at `connect`, never at run.
// Ports may additionally carry an expectation — a refinement the static
// kind cannot express (a detector wants *greyscale* images) — checked
// when the message actually arrives.

/// The static type of a message, and therefore of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Image,
    Keypoints,
    Matrix,
    Vector2,
}

/// Semantic pixel layout of an image message. Both variants are RGBA8
/// textures; greyscale means the color channels replicate one luma value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Rgba,
    Greyscale,
}

/// A run-time refinement on what a port accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expectation {
    ImageFormat(ImageFormat),
}

/// Declaration of one input or output port. Direction is positional: a
/// node declares separate input and output lists.
#[derive(Debug, Clone, Copy)]
pub struct PortSpec {
    pub name: &'static str,
    pub kind: MessageKind,
    pub expect: Option<Expectation>,
}

impl PortSpec {
    pub const fn new(name: &'static str, kind: MessageKind) -> Self {
        PortSpec {
            name,
            kind,
            expect: None,
        }
    }

    pub const fn expecting(name: &'static str, kind: MessageKind, expect: Expectation) -> Self {
        PortSpec {
            name,
            kind,
            expect: Some(expect),
        }
    }
}

/// Identifier of a node within its pipeline, returned by
/// `Pipeline::add`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    /// Refer to one of this node's output ports by name.
    pub fn output(self, port: &'static str) -> OutputRef {
        OutputRef { node: self, port }
    }

    /// Refer to one of this node's input ports by name.
    pub fn input(self, port: &'static str) -> InputRef {
        InputRef { node: self, port }
    }
}

/// An output port reference used for wiring.
#[derive(Debug, Clone, Copy)]
pub struct OutputRef {
    pub node: NodeId,
    pub port: &'static str,
}

/// An input port reference used for wiring.
#[derive(Debug, Clone, Copy)]
pub struct InputRef {
    pub node: NodeId,
    pub port: &'static str,
}

/// A resolved connection record, owned by the pipeline.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Connection {
    pub from_node: usize,
    pub from_port: usize,
    pub to_node: usize,
    pub to_port: usize,
}
