// nodes/keypoint.rs — keypoint nodes: detectors, descriptor, tracker,
// and the list-manipulation family (clipper, buffer, mixer, multiplexer,
// transformer, refiner, sink, portals).
//
// Detectors write the sparse raw encoding, then run the shared skip +
// encoder passes to produce a packed keypoint message. Everything
// downstream operates on packed textures; only the sink decodes.

use bytemuck::{Pod, Zeroable};

use crate::codec::{cell_count, decode_keypoints, encoder_length_for, pixels_per_keypoint};
use crate::error::{Error, Result};
use crate::gpu::{DeviceContext, KernelSpec, TextureFormat, TextureHandle};
use crate::matrix::Matrix;
use crate::nodes::portal::{PortalHandle, PortalSink, PortalSource};
use crate::nodes::{auto_name, expect_image, expect_keypoints};
use crate::pipeline::message::Message;
use crate::pipeline::node::{Node, NodeKind};
use crate::pipeline::port::{Expectation, ImageFormat, MessageKind, PortSpec};
use crate::pipeline::SinkOutput;

/// Cells per encoder dispatch. Bounds how much sparse-image scanning a
/// single submission performs; the passes tile over ranges of the
/// keypoint index.
const ENCODER_TILE_CELLS: usize = 256;

/// Fixed descriptor width of the binary descriptor node.
pub const ORB_DESCRIPTOR_SIZE: usize = 32;

fn greyscale_port(name: &'static str) -> PortSpec {
    PortSpec::expecting(
        name,
        MessageKind::Image,
        Expectation::ImageFormat(ImageFormat::Greyscale),
    )
}

// ---------------------------------------------------------------------------
// Factories
// ---------------------------------------------------------------------------

pub mod detector {
    use super::*;

    /// FAST-9 corner detector over a greyscale image.
    pub fn fast(params: FastParams) -> Node {
        Node::new(
            auto_name("fast-detector"),
            NodeKind::FastDetector(FastDetector { params }),
            vec![greyscale_port("in")],
            vec![PortSpec::new("out", MessageKind::Keypoints)],
        )
    }

    /// Harris corner detector over a greyscale image.
    pub fn harris(params: HarrisParams) -> Node {
        Node::new(
            auto_name("harris-detector"),
            NodeKind::HarrisDetector(HarrisDetector { params }),
            vec![greyscale_port("in")],
            vec![PortSpec::new("out", MessageKind::Keypoints)],
        )
    }
}

pub mod descriptor {
    use super::*;

    /// Rotation-aware 256-bit binary descriptor. Input keypoints must not
    /// already carry a descriptor.
    pub fn orb() -> Node {
        Node::new(
            auto_name("orb-descriptor"),
            NodeKind::OrbDescriptor(OrbDescriptor { patch_radius: 15 }),
            vec![
                PortSpec::new("in", MessageKind::Keypoints),
                greyscale_port("image"),
            ],
            vec![PortSpec::new("out", MessageKind::Keypoints)],
        )
    }
}

pub mod tracker {
    use super::*;

    /// Pyramidal Lucas-Kanade tracker: updates keypoint positions from
    /// the previous frame to the next. Lost tracks become empty slots.
    pub fn lk(params: LkParams) -> Node {
        Node::new(
            auto_name("lk-tracker"),
            NodeKind::LkTracker(LkTracker { params }),
            vec![
                PortSpec::new("in", MessageKind::Keypoints),
                greyscale_port("prev"),
                greyscale_port("next"),
            ],
            vec![PortSpec::new("out", MessageKind::Keypoints)],
        )
    }
}

/// Keep the `size` best keypoints, ordered by descending score.
pub fn clipper(size: usize) -> Node {
    assert!(size > 0, "clipper size must be > 0");
    Node::new(
        auto_name("keypoint-clipper"),
        NodeKind::Clipper(Clipper { size }),
        vec![PortSpec::new("in", MessageKind::Keypoints)],
        vec![PortSpec::new("out", MessageKind::Keypoints)],
    )
}

/// One-frame delay: emits the keypoints received on the previous run
/// (an empty list on the first).
pub fn buffer() -> Node {
    Node::new(
        auto_name("keypoint-buffer"),
        NodeKind::KeypointBuffer(Buffer {
            front: None,
            back: None,
            meta: None,
        }),
        vec![PortSpec::new("in", MessageKind::Keypoints)],
        vec![PortSpec::new("out", MessageKind::Keypoints)],
    )
}

/// Concatenate two keypoint lists. Payload sizes must agree.
pub fn mixer() -> Node {
    Node::new(
        auto_name("keypoint-mixer"),
        NodeKind::KeypointMixer(KeypointMixer),
        vec![
            PortSpec::new("in0", MessageKind::Keypoints),
            PortSpec::new("in1", MessageKind::Keypoints),
        ],
        vec![PortSpec::new("out", MessageKind::Keypoints)],
    )
}

/// Forward one of two keypoint inputs, selected at construction.
///
/// # Panics
/// Panics if `select` is not 0 or 1.
pub fn multiplexer(select: usize) -> Node {
    assert!(select < 2, "multiplexer selects input 0 or 1");
    Node::new(
        auto_name("keypoint-multiplexer"),
        NodeKind::Multiplexer(Multiplexer { select }),
        vec![
            PortSpec::new("in0", MessageKind::Keypoints),
            PortSpec::new("in1", MessageKind::Keypoints),
        ],
        vec![PortSpec::new("out", MessageKind::Keypoints)],
    )
}

/// Apply a 3x3 homography to every keypoint position.
///
/// # Panics
/// Panics if the matrix is not 3x3.
pub fn transformer(homography: Matrix<f32>) -> Node {
    assert!(
        homography.rows() == 3 && homography.cols() == 3,
        "keypoint transformer takes a 3x3 matrix (got {}x{})",
        homography.rows(),
        homography.cols()
    );
    Node::new(
        auto_name("keypoint-transformer"),
        NodeKind::Transformer(Transformer { homography }),
        vec![PortSpec::new("in", MessageKind::Keypoints)],
        vec![PortSpec::new("out", MessageKind::Keypoints)],
    )
}

/// Refine keypoint positions to sub-pixel precision against a greyscale
/// image.
pub fn subpixel_refiner() -> Node {
    Node::new(
        auto_name("subpixel-refiner"),
        NodeKind::SubpixelRefiner(SubpixelRefiner),
        vec![
            PortSpec::new("in", MessageKind::Keypoints),
            greyscale_port("image"),
        ],
        vec![PortSpec::new("out", MessageKind::Keypoints)],
    )
}

/// Terminal sink: reads the encoded list back and decodes it. The run
/// returns [`SinkOutput::Keypoints`].
pub fn sink() -> Node {
    Node::new(
        auto_name("keypoint-sink"),
        NodeKind::KeypointSink(KeypointSink { export: None }),
        vec![PortSpec::new("in", MessageKind::Keypoints)],
        vec![],
    )
}

/// Portal sink for keypoint messages.
pub fn portal_sink() -> (Node, PortalHandle) {
    let handle = PortalHandle::new(MessageKind::Keypoints);
    let node = Node::new(
        auto_name("keypoint-portal-sink"),
        NodeKind::PortalSink(PortalSink::new(&handle)),
        vec![PortSpec::new("in", MessageKind::Keypoints)],
        vec![],
    );
    (node, handle)
}

/// Portal source republishing a keypoint portal sink's last message.
///
/// # Panics
/// Panics if the handle comes from an image portal.
pub fn portal_source(handle: &PortalHandle) -> Node {
    assert_eq!(
        handle.kind(),
        MessageKind::Keypoints,
        "keypoint portal source wired to a {:?} portal",
        handle.kind()
    );
    Node::new(
        auto_name("keypoint-portal-source"),
        NodeKind::PortalSource(PortalSource::new(handle)),
        vec![],
        vec![PortSpec::new("out", MessageKind::Keypoints)],
    )
}

// ---------------------------------------------------------------------------
// Knobs
// ---------------------------------------------------------------------------

/// FAST detector knobs.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FastParams {
    /// Intensity threshold on the same scale as u8 pixels. Typical 20-40.
    pub threshold: u8,
    /// Most keypoints the encoded output can carry.
    pub capacity: usize,
}

impl Default for FastParams {
    fn default() -> Self {
        FastParams {
            threshold: 20,
            capacity: 2048,
        }
    }
}

/// Harris detector knobs.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HarrisParams {
    /// Response threshold in normalized-luma units.
    pub threshold: f32,
    /// The Harris k parameter. Typical 0.04-0.06.
    pub sensitivity: f32,
    /// Most keypoints the encoded output can carry.
    pub capacity: usize,
}

impl Default for HarrisParams {
    fn default() -> Self {
        HarrisParams {
            threshold: 0.1,
            sensitivity: 0.05,
            capacity: 2048,
        }
    }
}

/// Lucas-Kanade tracker knobs.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LkParams {
    /// Patch half-size; the window is (2w+1) squared.
    pub window_size: u32,
    /// Gauss-Newton iterations per pyramid level.
    pub iterations: u32,
    /// Coarse-to-fine levels.
    pub pyramid_levels: u32,
}

impl Default for LkParams {
    fn default() -> Self {
        LkParams {
            window_size: 7,
            iterations: 8,
            pyramid_levels: 3,
        }
    }
}

// ---------------------------------------------------------------------------
// Kernels and uniforms
// ---------------------------------------------------------------------------

const FAST_KERNEL: KernelSpec = KernelSpec {
    name: "fast-detector",
    source: include_str!("../shaders/fast.wgsl"),
    inputs: 1,
    output: TextureFormat::Rgba8,
};

const HARRIS_KERNEL: KernelSpec = KernelSpec {
    name: "harris-detector",
    source: include_str!("../shaders/harris.wgsl"),
    inputs: 1,
    output: TextureFormat::Rgba8,
};

const SKIP_KERNEL: KernelSpec = KernelSpec {
    name: "skip-offsets",
    source: include_str!("../shaders/skip.wgsl"),
    inputs: 1,
    output: TextureFormat::Rgba8,
};

const ENCODER_KERNEL: KernelSpec = KernelSpec {
    name: "keypoint-encoder",
    source: include_str!("../shaders/encoder.wgsl"),
    inputs: 1,
    output: TextureFormat::Rgba8,
};

const CLIPPER_KERNEL: KernelSpec = KernelSpec {
    name: "keypoint-clipper",
    source: include_str!("../shaders/clipper.wgsl"),
    inputs: 1,
    output: TextureFormat::Rgba8,
};

const KPMIX_KERNEL: KernelSpec = KernelSpec {
    name: "keypoint-mixer",
    source: include_str!("../shaders/kpmix.wgsl"),
    inputs: 2,
    output: TextureFormat::Rgba8,
};

const TRANSFORM_KERNEL: KernelSpec = KernelSpec {
    name: "keypoint-transform",
    source: include_str!("../shaders/transform.wgsl"),
    inputs: 1,
    output: TextureFormat::Rgba8,
};

const REFINE_KERNEL: KernelSpec = KernelSpec {
    name: "subpixel-refine",
    source: include_str!("../shaders/refine.wgsl"),
    inputs: 2,
    output: TextureFormat::Rgba8,
};

const LK_KERNEL: KernelSpec = KernelSpec {
    name: "lk-tracker",
    source: include_str!("../shaders/lk.wgsl"),
    inputs: 3,
    output: TextureFormat::Rgba8,
};

const ORB_KERNEL: KernelSpec = KernelSpec {
    name: "orb-descriptor",
    source: include_str!("../shaders/orb.wgsl"),
    inputs: 2,
    output: TextureFormat::Rgba8,
};

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct DetectorUniforms {
    width: u32,
    height: u32,
    threshold: f32,
    aux: f32,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct EncoderUniforms {
    img_width: u32,
    img_height: u32,
    encoder_length: u32,
    pixels_per_cell: u32,
    tile_first: u32,
    tile_cells: u32,
    max_scan: u32,
    capacity: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct ClipUniforms {
    in_length: u32,
    out_length: u32,
    pixels_per_cell: u32,
    size: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct KpMixUniforms {
    a_length: u32,
    b_length: u32,
    out_length: u32,
    pixels_per_cell: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct TransformUniforms {
    length: u32,
    pixels_per_cell: u32,
    _pad0: u32,
    _pad1: u32,
    col0: [f32; 4],
    col1: [f32; 4],
    col2: [f32; 4],
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct RefineUniforms {
    length: u32,
    pixels_per_cell: u32,
    img_width: u32,
    img_height: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct LkUniforms {
    length: u32,
    pixels_per_cell: u32,
    img_width: u32,
    img_height: u32,
    window: u32,
    iterations: u32,
    levels: u32,
    _pad: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct OrbUniforms {
    in_length: u32,
    out_length: u32,
    in_pixels_per_cell: u32,
    out_pixels_per_cell: u32,
    img_width: u32,
    img_height: u32,
    patch_radius: u32,
    _pad: u32,
}

// ---------------------------------------------------------------------------
// Shared detector tail: skip offsets + tiled encoder
// ---------------------------------------------------------------------------

/// Turn a sparse raw image into a packed keypoint texture: fill the skip
/// hints, then run the encoder tile by tile.
fn encode_sparse(
    ctx: &mut DeviceContext,
    sparse: TextureHandle,
    width: u32,
    height: u32,
    capacity: usize,
) -> Result<(TextureHandle, usize)> {
    let hinted = ctx.alloc_scratch(width, height, TextureFormat::Rgba8)?;
    let uniforms = super::image::SizeUniforms {
        width,
        height,
        _pad0: 0,
        _pad1: 0,
    };
    ctx.run_kernel(&SKIP_KERNEL, hinted, &[sparse], bytemuck::bytes_of(&uniforms))?;

    let length = encoder_length_for(capacity, 0, 0);
    let encoded = ctx.alloc_scratch(length as u32, length as u32, TextureFormat::Rgba8)?;
    let cells = cell_count(length, 0, 0);

    let mut first = 0;
    while first < cells {
        let tile = ENCODER_TILE_CELLS.min(cells - first);
        let uniforms = EncoderUniforms {
            img_width: width,
            img_height: height,
            encoder_length: length as u32,
            pixels_per_cell: pixels_per_keypoint(0, 0) as u32,
            tile_first: first as u32,
            tile_cells: tile as u32,
            max_scan: width * height,
            capacity: capacity as u32,
        };
        ctx.run_kernel(&ENCODER_KERNEL, encoded, &[hinted], bytemuck::bytes_of(&uniforms))?;
        first += tile;
    }

    ctx.release_scratch(hinted);
    Ok((encoded, length))
}

// ---------------------------------------------------------------------------
// Node state
// ---------------------------------------------------------------------------

pub(crate) struct FastDetector {
    params: FastParams,
}

impl FastDetector {
    pub(crate) fn run(
        &mut self,
        ctx: &mut DeviceContext,
        inputs: &[&Message],
    ) -> Result<Vec<Message>> {
        let (image, _) = expect_image(inputs[0])?;
        let (width, height) = {
            let t = ctx.texture(image);
            (t.width(), t.height())
        };

        let sparse = ctx.alloc_scratch(width, height, TextureFormat::Rgba8)?;
        let uniforms = DetectorUniforms {
            width,
            height,
            threshold: f32::from(self.params.threshold) / 255.0,
            // lod byte for the base level: encodes lod = 0.
            aux: 51.0 / 255.0,
        };
        ctx.run_kernel(&FAST_KERNEL, sparse, &[image], bytemuck::bytes_of(&uniforms))?;

        let (encoded, length) = encode_sparse(ctx, sparse, width, height, self.params.capacity)?;
        ctx.release_scratch(sparse);
        Ok(vec![Message::Keypoints {
            encoded,
            descriptor_size: 0,
            extra_size: 0,
            encoder_length: length,
        }])
    }
}

pub(crate) struct HarrisDetector {
    params: HarrisParams,
}

impl HarrisDetector {
    pub(crate) fn run(
        &mut self,
        ctx: &mut DeviceContext,
        inputs: &[&Message],
    ) -> Result<Vec<Message>> {
        let (image, _) = expect_image(inputs[0])?;
        let (width, height) = {
            let t = ctx.texture(image);
            (t.width(), t.height())
        };

        let sparse = ctx.alloc_scratch(width, height, TextureFormat::Rgba8)?;
        let uniforms = DetectorUniforms {
            width,
            height,
            threshold: self.params.threshold,
            aux: self.params.sensitivity,
        };
        ctx.run_kernel(&HARRIS_KERNEL, sparse, &[image], bytemuck::bytes_of(&uniforms))?;

        let (encoded, length) = encode_sparse(ctx, sparse, width, height, self.params.capacity)?;
        ctx.release_scratch(sparse);
        Ok(vec![Message::Keypoints {
            encoded,
            descriptor_size: 0,
            extra_size: 0,
            encoder_length: length,
        }])
    }
}

pub(crate) struct OrbDescriptor {
    patch_radius: u32,
}

impl OrbDescriptor {
    pub(crate) fn run(
        &mut self,
        ctx: &mut DeviceContext,
        inputs: &[&Message],
    ) -> Result<Vec<Message>> {
        let (encoded, descriptor_size, extra_size, in_length) = expect_keypoints(inputs[0])?;
        let (image, _) = expect_image(inputs[1])?;
        if descriptor_size != 0 || extra_size != 0 {
            return Err(Error::IllegalOperation(
                "descriptor node wants bare keypoints (no descriptor or extra bytes)".into(),
            ));
        }

        let (img_width, img_height) = {
            let t = ctx.texture(image);
            (t.width(), t.height())
        };
        let in_cells = cell_count(in_length, 0, 0);
        let out_length = encoder_length_for(in_cells.saturating_sub(1), ORB_DESCRIPTOR_SIZE, 0);
        let out =
            ctx.alloc_scratch(out_length as u32, out_length as u32, TextureFormat::Rgba8)?;

        let uniforms = OrbUniforms {
            in_length: in_length as u32,
            out_length: out_length as u32,
            in_pixels_per_cell: pixels_per_keypoint(0, 0) as u32,
            out_pixels_per_cell: pixels_per_keypoint(ORB_DESCRIPTOR_SIZE, 0) as u32,
            img_width,
            img_height,
            patch_radius: self.patch_radius,
            _pad: 0,
        };
        ctx.run_kernel(
            &ORB_KERNEL,
            out,
            &[encoded, image],
            bytemuck::bytes_of(&uniforms),
        )?;
        Ok(vec![Message::Keypoints {
            encoded: out,
            descriptor_size: ORB_DESCRIPTOR_SIZE,
            extra_size: 0,
            encoder_length: out_length,
        }])
    }
}

pub(crate) struct LkTracker {
    params: LkParams,
}

impl LkTracker {
    pub(crate) fn run(
        &mut self,
        ctx: &mut DeviceContext,
        inputs: &[&Message],
    ) -> Result<Vec<Message>> {
        let (encoded, descriptor_size, extra_size, length) = expect_keypoints(inputs[0])?;
        let (prev, _) = expect_image(inputs[1])?;
        let (next, _) = expect_image(inputs[2])?;

        let (img_width, img_height) = {
            let t = ctx.texture(prev);
            (t.width(), t.height())
        };
        {
            let t = ctx.texture(next);
            if (t.width(), t.height()) != (img_width, img_height) {
                return Err(Error::IllegalOperation(
                    "tracker frames differ in size".into(),
                ));
            }
        }

        let out = ctx.alloc_scratch(length as u32, length as u32, TextureFormat::Rgba8)?;
        let uniforms = LkUniforms {
            length: length as u32,
            pixels_per_cell: pixels_per_keypoint(descriptor_size, extra_size) as u32,
            img_width,
            img_height,
            window: self.params.window_size,
            iterations: self.params.iterations,
            levels: self.params.pyramid_levels.max(1),
            _pad: 0,
        };
        ctx.run_kernel(
            &LK_KERNEL,
            out,
            &[encoded, prev, next],
            bytemuck::bytes_of(&uniforms),
        )?;
        Ok(vec![Message::Keypoints {
            encoded: out,
            descriptor_size,
            extra_size,
            encoder_length: length,
        }])
    }
}

pub(crate) struct Clipper {
    size: usize,
}

impl Clipper {
    pub(crate) fn run(
        &mut self,
        ctx: &mut DeviceContext,
        inputs: &[&Message],
    ) -> Result<Vec<Message>> {
        let (encoded, descriptor_size, extra_size, in_length) = expect_keypoints(inputs[0])?;
        let out_length = encoder_length_for(self.size, descriptor_size, extra_size);
        let out =
            ctx.alloc_scratch(out_length as u32, out_length as u32, TextureFormat::Rgba8)?;

        let uniforms = ClipUniforms {
            in_length: in_length as u32,
            out_length: out_length as u32,
            pixels_per_cell: pixels_per_keypoint(descriptor_size, extra_size) as u32,
            size: self.size as u32,
        };
        ctx.run_kernel(&CLIPPER_KERNEL, out, &[encoded], bytemuck::bytes_of(&uniforms))?;
        Ok(vec![Message::Keypoints {
            encoded: out,
            descriptor_size,
            extra_size,
            encoder_length: out_length,
        }])
    }
}

pub(crate) struct Buffer {
    front: Option<TextureHandle>,
    back: Option<TextureHandle>,
    meta: Option<(usize, usize, usize)>,
}

impl Buffer {
    pub(crate) fn run(
        &mut self,
        ctx: &mut DeviceContext,
        inputs: &[&Message],
    ) -> Result<Vec<Message>> {
        let (encoded, descriptor_size, extra_size, length) = expect_keypoints(inputs[0])?;
        let meta = (descriptor_size, extra_size, length);

        // Upstream layout changed: previous state is meaningless.
        if self.meta != Some(meta) {
            self.release_textures(ctx);
            let side = length as u32;
            let front = ctx.create_texture(side, side, TextureFormat::Rgba8)?;
            // A texture of FF bytes decodes as an empty list.
            ctx.fill_bytes(front, 0xFF)?;
            self.front = Some(front);
            self.back = Some(ctx.create_texture(side, side, TextureFormat::Rgba8)?);
            self.meta = Some(meta);
        }

        let front = self.front.expect("allocated above");
        let back = self.back.expect("allocated above");

        // Emit last frame's list, then stage the current one for the
        // next run.
        let out = Message::Keypoints {
            encoded: front,
            descriptor_size,
            extra_size,
            encoder_length: length,
        };
        ctx.copy_texture(encoded, back)?;
        self.front = Some(back);
        self.back = Some(front);
        Ok(vec![out])
    }

    pub(crate) fn release(&mut self, ctx: &mut DeviceContext) {
        self.release_textures(ctx);
    }

    fn release_textures(&mut self, ctx: &mut DeviceContext) {
        if let Some(h) = self.front.take() {
            ctx.release_persistent(h);
        }
        if let Some(h) = self.back.take() {
            ctx.release_persistent(h);
        }
        self.meta = None;
    }
}

pub(crate) struct KeypointMixer;

impl KeypointMixer {
    pub(crate) fn run(
        &mut self,
        ctx: &mut DeviceContext,
        inputs: &[&Message],
    ) -> Result<Vec<Message>> {
        let (a, da, ea, la) = expect_keypoints(inputs[0])?;
        let (b, db, eb, lb) = expect_keypoints(inputs[1])?;
        if da != db || ea != eb {
            return Err(Error::IllegalOperation(format!(
                "keypoint mixer payload sizes differ: {da}+{ea} vs {db}+{eb}"
            )));
        }

        let capacity =
            cell_count(la, da, ea).saturating_sub(1) + cell_count(lb, da, ea).saturating_sub(1);
        let out_length = encoder_length_for(capacity, da, ea);
        let out =
            ctx.alloc_scratch(out_length as u32, out_length as u32, TextureFormat::Rgba8)?;

        let uniforms = KpMixUniforms {
            a_length: la as u32,
            b_length: lb as u32,
            out_length: out_length as u32,
            pixels_per_cell: pixels_per_keypoint(da, ea) as u32,
        };
        ctx.run_kernel(&KPMIX_KERNEL, out, &[a, b], bytemuck::bytes_of(&uniforms))?;
        Ok(vec![Message::Keypoints {
            encoded: out,
            descriptor_size: da,
            extra_size: ea,
            encoder_length: out_length,
        }])
    }
}

pub(crate) struct Multiplexer {
    select: usize,
}

impl Multiplexer {
    pub(crate) fn run(&mut self, inputs: &[&Message]) -> Result<Vec<Message>> {
        Ok(vec![inputs[self.select].clone()])
    }
}

pub(crate) struct Transformer {
    homography: Matrix<f32>,
}

impl Transformer {
    pub(crate) fn run(
        &mut self,
        ctx: &mut DeviceContext,
        inputs: &[&Message],
    ) -> Result<Vec<Message>> {
        let (encoded, descriptor_size, extra_size, length) = expect_keypoints(inputs[0])?;
        let out = ctx.alloc_scratch(length as u32, length as u32, TextureFormat::Rgba8)?;

        let col = |j: usize| {
            [
                self.homography.get(0, j),
                self.homography.get(1, j),
                self.homography.get(2, j),
                0.0,
            ]
        };
        let uniforms = TransformUniforms {
            length: length as u32,
            pixels_per_cell: pixels_per_keypoint(descriptor_size, extra_size) as u32,
            _pad0: 0,
            _pad1: 0,
            col0: col(0),
            col1: col(1),
            col2: col(2),
        };
        ctx.run_kernel(
            &TRANSFORM_KERNEL,
            out,
            &[encoded],
            bytemuck::bytes_of(&uniforms),
        )?;
        Ok(vec![Message::Keypoints {
            encoded: out,
            descriptor_size,
            extra_size,
            encoder_length: length,
        }])
    }
}

pub(crate) struct SubpixelRefiner;

impl SubpixelRefiner {
    pub(crate) fn run(
        &mut self,
        ctx: &mut DeviceContext,
        inputs: &[&Message],
    ) -> Result<Vec<Message>> {
        let (encoded, descriptor_size, extra_size, length) = expect_keypoints(inputs[0])?;
        let (image, _) = expect_image(inputs[1])?;
        let (img_width, img_height) = {
            let t = ctx.texture(image);
            (t.width(), t.height())
        };

        let out = ctx.alloc_scratch(length as u32, length as u32, TextureFormat::Rgba8)?;
        let uniforms = RefineUniforms {
            length: length as u32,
            pixels_per_cell: pixels_per_keypoint(descriptor_size, extra_size) as u32,
            img_width,
            img_height,
        };
        ctx.run_kernel(
            &REFINE_KERNEL,
            out,
            &[encoded, image],
            bytemuck::bytes_of(&uniforms),
        )?;
        Ok(vec![Message::Keypoints {
            encoded: out,
            descriptor_size,
            extra_size,
            encoder_length: length,
        }])
    }
}

pub(crate) struct KeypointSink {
    export: Option<SinkOutput>,
}

impl KeypointSink {
    pub(crate) fn run(
        &mut self,
        ctx: &mut DeviceContext,
        inputs: &[&Message],
    ) -> Result<Vec<Message>> {
        let (encoded, descriptor_size, extra_size, _) = expect_keypoints(inputs[0])?;
        let pending = ctx.read_texture(encoded);
        let bytes = ctx.wait_read(pending)?;
        let keypoints = decode_keypoints(&bytes, descriptor_size, extra_size);
        self.export = Some(SinkOutput::Keypoints(keypoints));
        Ok(Vec::new())
    }

    pub(crate) fn take_export(&mut self) -> Option<SinkOutput> {
        self.export.take()
    }
}
