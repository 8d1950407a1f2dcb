// nodes/image.rs — image nodes: source, sink, greyscale, mixer, portals.

use bytemuck::{Pod, Zeroable};

use crate::error::{Error, Result};
use crate::gpu::{DeviceContext, KernelSpec, TextureFormat};
use crate::media::Media;
use crate::nodes::portal::{PortalHandle, PortalSink, PortalSource};
use crate::nodes::{auto_name, expect_image};
use crate::pipeline::message::Message;
use crate::pipeline::node::{Node, NodeKind};
use crate::pipeline::port::{ImageFormat, MessageKind, PortSpec};
use crate::pipeline::SinkOutput;

// ---------------------------------------------------------------------------
// Factories
// ---------------------------------------------------------------------------

/// Frame source. Uploads the media's current frame each run and emits it
/// on `out`.
pub fn source(media: Box<dyn Media>) -> Node {
    Node::new(
        auto_name("image-source"),
        NodeKind::ImageSource(Source { media }),
        vec![],
        vec![PortSpec::new("out", MessageKind::Image)],
    )
}

/// Terminal sink. Reads its input back to host memory; the run returns
/// [`SinkOutput::Image`].
pub fn sink() -> Node {
    Node::new(
        auto_name("image-sink"),
        NodeKind::ImageSink(Sink { export: None }),
        vec![PortSpec::new("in", MessageKind::Image)],
        vec![],
    )
}

/// Greyscale conversion (Rec. 601 luma). Detectors require its output.
pub fn greyscale() -> Node {
    Node::new(
        auto_name("greyscale"),
        NodeKind::Greyscale(Greyscale),
        vec![PortSpec::new("in", MessageKind::Image)],
        vec![PortSpec::new("out", MessageKind::Image)],
    )
}

/// Blend two equally sized images: `alpha * in0 + beta * in1 + gamma`.
pub fn mixer(params: MixerParams) -> Node {
    Node::new(
        auto_name("image-mixer"),
        NodeKind::ImageMixer(Mixer { params }),
        vec![
            PortSpec::new("in0", MessageKind::Image),
            PortSpec::new("in1", MessageKind::Image),
        ],
        vec![PortSpec::new("out", MessageKind::Image)],
    )
}

/// Portal sink: retains the last image seen for portal sources to read,
/// possibly from another pipeline.
pub fn portal_sink() -> (Node, PortalHandle) {
    let handle = PortalHandle::new(MessageKind::Image);
    let node = Node::new(
        auto_name("image-portal-sink"),
        NodeKind::PortalSink(PortalSink::new(&handle)),
        vec![PortSpec::new("in", MessageKind::Image)],
        vec![],
    );
    (node, handle)
}

/// Portal source: republishes the referenced portal sink's last image.
///
/// # Panics
/// Panics if the handle comes from a keypoint portal.
pub fn portal_source(handle: &PortalHandle) -> Node {
    assert_eq!(
        handle.kind(),
        MessageKind::Image,
        "image portal source wired to a {:?} portal",
        handle.kind()
    );
    Node::new(
        auto_name("image-portal-source"),
        NodeKind::PortalSource(PortalSource::new(handle)),
        vec![],
        vec![PortSpec::new("out", MessageKind::Image)],
    )
}

/// Blend knobs for [`mixer`].
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MixerParams {
    pub alpha: f32,
    pub beta: f32,
    /// Additive constant in normalized [0, 1] units.
    pub gamma: f32,
}

impl Default for MixerParams {
    fn default() -> Self {
        MixerParams {
            alpha: 0.5,
            beta: 0.5,
            gamma: 0.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Kernels and uniforms
// ---------------------------------------------------------------------------

const GREYSCALE_KERNEL: KernelSpec = KernelSpec {
    name: "greyscale",
    source: include_str!("../shaders/greyscale.wgsl"),
    inputs: 1,
    output: TextureFormat::Rgba8,
};

const MIXER_KERNEL: KernelSpec = KernelSpec {
    name: "image-mixer",
    source: include_str!("../shaders/mixer.wgsl"),
    inputs: 2,
    output: TextureFormat::Rgba8,
};

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub(crate) struct SizeUniforms {
    pub width: u32,
    pub height: u32,
    pub _pad0: u32,
    pub _pad1: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct MixUniforms {
    width: u32,
    height: u32,
    _pad0: u32,
    _pad1: u32,
    alpha: f32,
    beta: f32,
    gamma: f32,
    _pad2: f32,
}

// ---------------------------------------------------------------------------
// Node state
// ---------------------------------------------------------------------------

pub(crate) struct Source {
    media: Box<dyn Media>,
}

impl Source {
    pub(crate) fn run(&mut self, ctx: &mut DeviceContext) -> Result<Vec<Message>> {
        let (width, height) = (self.media.width(), self.media.height());
        let texture = ctx.alloc_scratch(width, height, TextureFormat::Rgba8)?;
        self.media.upload(ctx, texture)?;
        Ok(vec![Message::Image {
            texture,
            format: ImageFormat::Rgba,
        }])
    }
}

pub(crate) struct Sink {
    export: Option<SinkOutput>,
}

impl Sink {
    pub(crate) fn run(
        &mut self,
        ctx: &mut DeviceContext,
        inputs: &[&Message],
    ) -> Result<Vec<Message>> {
        let (texture, _) = expect_image(inputs[0])?;
        let (width, height) = {
            let t = ctx.texture(texture);
            (t.width(), t.height())
        };
        let pending = ctx.read_texture(texture);
        let pixels = ctx.wait_read(pending)?;
        self.export = Some(SinkOutput::Image {
            width,
            height,
            pixels,
        });
        Ok(Vec::new())
    }

    pub(crate) fn take_export(&mut self) -> Option<SinkOutput> {
        self.export.take()
    }
}

pub(crate) struct Greyscale;

impl Greyscale {
    pub(crate) fn run(
        &mut self,
        ctx: &mut DeviceContext,
        inputs: &[&Message],
    ) -> Result<Vec<Message>> {
        let (source, _) = expect_image(inputs[0])?;
        let (width, height) = {
            let t = ctx.texture(source);
            (t.width(), t.height())
        };
        let out = ctx.alloc_scratch(width, height, TextureFormat::Rgba8)?;
        let uniforms = SizeUniforms {
            width,
            height,
            _pad0: 0,
            _pad1: 0,
        };
        ctx.run_kernel(&GREYSCALE_KERNEL, out, &[source], bytemuck::bytes_of(&uniforms))?;
        Ok(vec![Message::Image {
            texture: out,
            format: ImageFormat::Greyscale,
        }])
    }
}

pub(crate) struct Mixer {
    params: MixerParams,
}

impl Mixer {
    pub(crate) fn run(
        &mut self,
        ctx: &mut DeviceContext,
        inputs: &[&Message],
    ) -> Result<Vec<Message>> {
        let (a, format_a) = expect_image(inputs[0])?;
        let (b, format_b) = expect_image(inputs[1])?;
        let size = ctx.texture(a).size();
        if ctx.texture(b).size() != size {
            return Err(Error::IllegalOperation(format!(
                "mixer inputs differ in size: {:?} vs {:?}",
                size,
                ctx.texture(b).size()
            )));
        }
        let (width, height) = (size.width, size.height);

        let out = ctx.alloc_scratch(width, height, TextureFormat::Rgba8)?;
        let uniforms = MixUniforms {
            width,
            height,
            _pad0: 0,
            _pad1: 0,
            alpha: self.params.alpha,
            beta: self.params.beta,
            gamma: self.params.gamma,
            _pad2: 0.0,
        };
        ctx.run_kernel(&MIXER_KERNEL, out, &[a, b], bytemuck::bytes_of(&uniforms))?;

        // Blending two greyscale images stays greyscale.
        let format = if format_a == ImageFormat::Greyscale && format_b == ImageFormat::Greyscale {
            ImageFormat::Greyscale
        } else {
            ImageFormat::Rgba
        };
        Ok(vec![Message::Image {
            texture: out,
            format,
        }])
    }
}
