// pipeline/node.rs — the node model.
//
// A node is a name, a port signature, and a kind. Kinds form a tagged
// enumeration dispatched here — the capability set is small (run, export,
// release) and a closed enum keeps ownership simple: the pipeline owns
// nodes, nodes own their private state, nothing points back up.

use crate::error::Result;
use crate::gpu::DeviceContext;
use crate::nodes::{image, keypoint, portal};
use crate::pipeline::message::Message;
use crate::pipeline::port::PortSpec;
use crate::pipeline::SinkOutput;

/// A pipeline node: fixed ports, a kind, private parameters and state.
///
/// Construct through the factory functions in [`crate::nodes`]; the
/// pipeline takes ownership at `add`.
pub struct Node {
    pub(crate) name: String,
    pub(crate) kind: NodeKind,
    pub(crate) inputs: Vec<PortSpec>,
    pub(crate) outputs: Vec<PortSpec>,
}

impl Node {
    pub(crate) fn new(
        name: impl Into<String>,
        kind: NodeKind,
        inputs: Vec<PortSpec>,
        outputs: Vec<PortSpec>,
    ) -> Self {
        Node {
            name: name.into(),
            kind,
            inputs,
            outputs,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Give the node a caller-chosen name (factories assign generated
    /// ones). Names must be unique within a pipeline.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Closed set of node behaviors.
pub(crate) enum NodeKind {
    ImageSource(image::Source),
    ImageSink(image::Sink),
    Greyscale(image::Greyscale),
    ImageMixer(image::Mixer),
    FastDetector(keypoint::FastDetector),
    HarrisDetector(keypoint::HarrisDetector),
    OrbDescriptor(keypoint::OrbDescriptor),
    LkTracker(keypoint::LkTracker),
    Clipper(keypoint::Clipper),
    KeypointBuffer(keypoint::Buffer),
    KeypointMixer(keypoint::KeypointMixer),
    Multiplexer(keypoint::Multiplexer),
    Transformer(keypoint::Transformer),
    SubpixelRefiner(keypoint::SubpixelRefiner),
    KeypointSink(keypoint::KeypointSink),
    PortalSource(portal::PortalSource),
    PortalSink(portal::PortalSink),
}

impl NodeKind {
    /// Execute the node's task for this run. `inputs` holds one message
    /// per input port, in declaration order; the returned vector holds
    /// one message per output port.
    pub(crate) fn run(
        &mut self,
        ctx: &mut DeviceContext,
        inputs: &[&Message],
    ) -> Result<Vec<Message>> {
        match self {
            NodeKind::ImageSource(n) => n.run(ctx),
            NodeKind::ImageSink(n) => n.run(ctx, inputs),
            NodeKind::Greyscale(n) => n.run(ctx, inputs),
            NodeKind::ImageMixer(n) => n.run(ctx, inputs),
            NodeKind::FastDetector(n) => n.run(ctx, inputs),
            NodeKind::HarrisDetector(n) => n.run(ctx, inputs),
            NodeKind::OrbDescriptor(n) => n.run(ctx, inputs),
            NodeKind::LkTracker(n) => n.run(ctx, inputs),
            NodeKind::Clipper(n) => n.run(ctx, inputs),
            NodeKind::KeypointBuffer(n) => n.run(ctx, inputs),
            NodeKind::KeypointMixer(n) => n.run(ctx, inputs),
            NodeKind::Multiplexer(n) => n.run(inputs),
            NodeKind::Transformer(n) => n.run(ctx, inputs),
            NodeKind::SubpixelRefiner(n) => n.run(ctx, inputs),
            NodeKind::KeypointSink(n) => n.run(ctx, inputs),
            NodeKind::PortalSource(n) => n.run(),
            NodeKind::PortalSink(n) => n.run(ctx, inputs),
        }
    }

    /// Whether this node is the pipeline's terminal export sink.
    /// Portal sinks retain state but export nothing, so they don't count
    /// toward the one-sink rule.
    pub(crate) fn is_export_sink(&self) -> bool {
        matches!(self, NodeKind::ImageSink(_) | NodeKind::KeypointSink(_))
    }

    /// Collect the result assembled by a sink during the run just
    /// finished.
    pub(crate) fn take_export(&mut self) -> Option<SinkOutput> {
        match self {
            NodeKind::ImageSink(n) => n.take_export(),
            NodeKind::KeypointSink(n) => n.take_export(),
            _ => None,
        }
    }

    /// Free any persistent resources the node retains across runs.
    pub(crate) fn release(&mut self, ctx: &mut DeviceContext) {
        match self {
            NodeKind::KeypointBuffer(n) => n.release(ctx),
            NodeKind::PortalSink(n) => n.release(ctx),
            _ => {}
        }
    }
}
