// error.rs — crate-wide error taxonomy.
//
// Validation errors are raised synchronously by the API call that
// introduced the defect (add, connect, init). Runtime errors fail the
// run() that hit them and leave the pipeline consistent: scratch textures
// returned, pending reads cancelled. Nothing is recovered silently inside
// the engine — recovery is the caller's responsibility.

/// Specialized result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// All errors produced by the engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // --- Validation: graph wiring and init ---
    /// An output port was connected to an input port of a different
    /// message kind. Rejected at wiring time, never at run time.
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// An input port was left unconnected at init().
    #[error("unconnected input: {0}")]
    UnconnectedInput(String),

    /// An input port already has an upstream connection.
    #[error("input port already connected: {0}")]
    PortAlreadyConnected(String),

    /// The connection graph contains a cycle.
    #[error("pipeline has a cycle involving node '{0}'")]
    Cycle(String),

    /// More than one sink node was added to the pipeline.
    #[error("pipeline has multiple sinks: '{0}' and '{1}'")]
    MultipleSinks(String, String),

    /// The pipeline has no sink node.
    #[error("pipeline has no sink")]
    NoSink,

    /// Two nodes share the same name.
    #[error("duplicate node name '{0}'")]
    DuplicateNodeName(String),

    // --- Runtime ---
    /// Wrong message on a port, read before write, run before init,
    /// dangling portal reference, and similar protocol violations.
    #[error("illegal operation: {0}")]
    IllegalOperation(String),

    /// GPU allocation failure or texture pool exhaustion.
    #[error("resource error: {0}")]
    Resource(String),

    /// A pending asynchronous result was invalidated by pipeline teardown.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// The device lacks a required capability.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// A run() was issued while another run was in flight and the
    /// pipeline was configured to reject rather than queue.
    #[error("pipeline is busy")]
    Busy,
}
