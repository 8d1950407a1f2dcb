// gpu/device.rs — the device context: adapter, device, queue, kernels.
//
// One `DeviceContext` is created explicitly per process (or per test) and
// shared by every pipeline. It owns the texture arena and the read-back
// ring, caches compiled kernel programs, and exposes the dispatch
// primitive every node uses.
//
// ADAPTER SELECTION:
// `request_adapter`'s power-preference heuristics may grab a software
// rasterizer where one is installed (llvmpipe shows up as a valid Vulkan
// device). Adapters are enumerated explicitly and picked in tiers: real
// hardware first, virtual/other second, anything at all as a logged last
// resort.
//
// KERNEL DISPATCH:
// Every kernel is a compute shader executing once per output pixel —
// workgroups of 8×8 cover the output with ceiling division and the WGSL
// entry point guards the overhang. Bind group convention, fixed across
// all kernels:
//
//   @binding(0) uniforms        (uniform buffer)
//   @binding(1) output          (write-only storage texture)
//   @binding(2+) inputs         (sampled texture_2d<f32>, one per input)
//
// Dispatches submitted on the one queue execute in submission order, so a
// kernel reading a texture observes every write submitted before it.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::gpu::pool::{TextureArena, TextureHandle};
use crate::gpu::reader::{PendingRead, TextureReader};
use crate::gpu::texture::{Texture, TextureFormat};

/// Workgroup side length for all 2D dispatches.
const WORKGROUP_SIZE: u32 = 8;

/// A kernel's identity: entry source plus its binding shape. Nodes keep
/// these as statics; the context compiles and caches on first dispatch.
#[derive(Debug, Clone, Copy)]
pub struct KernelSpec {
    /// Cache key and debug label. Unique per kernel.
    pub name: &'static str,
    /// WGSL source with a `main` compute entry point.
    pub source: &'static str,
    /// Number of input texture bindings.
    pub inputs: usize,
    /// Storage format of the output binding.
    pub output: TextureFormat,
}

struct Program {
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
}

/// The process-wide GPU context.
pub struct DeviceContext {
    pub(crate) device: wgpu::Device,
    pub(crate) queue: wgpu::Queue,
    arena: TextureArena,
    reader: TextureReader,
    programs: HashMap<&'static str, Program>,
    /// Keeps the instance alive until device and queue drop.
    _instance: wgpu::Instance,
}

impl DeviceContext {
    /// Initialize the GPU context on the best available adapter.
    ///
    /// # Errors
    /// [`Error::NotSupported`] when no adapter exists or the device
    /// request fails.
    pub fn new() -> Result<Self> {
        pollster::block_on(Self::init_async())
    }

    async fn init_async() -> Result<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let mut adapters = instance.enumerate_adapters(wgpu::Backends::PRIMARY);
        if adapters.is_empty() {
            return Err(Error::NotSupported("no GPU adapter found".into()));
        }
        for a in &adapters {
            let i = a.get_info();
            debug!(name = %i.name, backend = ?i.backend, kind = ?i.device_type, "adapter");
        }

        // Tier 1: real hardware. Tier 2: virtual / other. Last resort:
        // whatever enumerated first (software rasterizer included).
        let pick = |adapters: &mut Vec<wgpu::Adapter>, tiers: &[wgpu::DeviceType]| {
            adapters
                .iter()
                .position(|a| tiers.contains(&a.get_info().device_type))
                .map(|i| adapters.swap_remove(i))
        };
        let mut adapter = pick(
            &mut adapters,
            &[wgpu::DeviceType::DiscreteGpu, wgpu::DeviceType::IntegratedGpu],
        );
        if adapter.is_none() {
            adapter = pick(
                &mut adapters,
                &[wgpu::DeviceType::VirtualGpu, wgpu::DeviceType::Other],
            );
        }
        if adapter.is_none() {
            warn!("no hardware GPU adapter; falling back to a software device");
            adapter = adapters.pop();
        }
        let adapter =
            adapter.ok_or_else(|| Error::NotSupported("no usable GPU adapter".into()))?;

        let adapter_info = adapter.get_info();
        info!(
            name = %adapter_info.name,
            backend = ?adapter_info.backend,
            "selected adapter"
        );

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("visionflow"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: wgpu::MemoryHints::default(),
                },
                None,
            )
            .await
            .map_err(|e| Error::NotSupported(format!("device request failed: {e}")))?;

        Ok(DeviceContext {
            device,
            queue,
            arena: TextureArena::new(),
            reader: TextureReader::new(),
            programs: HashMap::new(),
            _instance: instance,
        })
    }

    // -----------------------------------------------------------------------
    // Textures
    // -----------------------------------------------------------------------

    /// Allocate a persistent texture (portal/buffer state). The caller
    /// owns the handle until [`DeviceContext::release_persistent`].
    pub fn create_texture(
        &mut self,
        width: u32,
        height: u32,
        format: TextureFormat,
    ) -> Result<TextureHandle> {
        self.arena.create(&self.device, width, height, format)
    }

    /// Borrow a scratch texture for the current run.
    pub fn alloc_scratch(
        &mut self,
        width: u32,
        height: u32,
        format: TextureFormat,
    ) -> Result<TextureHandle> {
        self.arena.alloc_scratch(&self.device, width, height, format)
    }

    /// Return a scratch texture to the pool.
    pub fn release_scratch(&mut self, handle: TextureHandle) {
        self.arena.release_scratch(handle);
    }

    /// Hand a persistent texture back to the pool inventory.
    pub fn release_persistent(&mut self, handle: TextureHandle) {
        self.arena.release_persistent(handle);
    }

    /// Resolve a handle to its texture.
    pub fn texture(&self, handle: TextureHandle) -> &Texture {
        self.arena.get(handle)
    }

    /// Upload tightly packed RGBA8 bytes into a texture.
    ///
    /// # Errors
    /// [`Error::IllegalOperation`] on format or size mismatch.
    pub fn upload_rgba8(&mut self, handle: TextureHandle, bytes: &[u8]) -> Result<()> {
        let texture = self.arena.get(handle);
        if texture.format() != TextureFormat::Rgba8 {
            return Err(Error::IllegalOperation(
                "upload_rgba8 needs an RGBA8 texture".into(),
            ));
        }
        let expected = (texture.width() * texture.height() * 4) as usize;
        if bytes.len() != expected {
            return Err(Error::IllegalOperation(format!(
                "upload of {} bytes into a {}x{} texture (expected {expected})",
                bytes.len(),
                texture.width(),
                texture.height()
            )));
        }
        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &texture.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            bytes,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(texture.width() * 4),
                rows_per_image: Some(texture.height()),
            },
            wgpu::Extent3d {
                width: texture.width(),
                height: texture.height(),
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    /// Fill every byte of a texture with a constant. Used to reset
    /// encoded-keypoint state textures to the end-of-list sentinel (0xFF).
    pub fn fill_bytes(&mut self, handle: TextureHandle, value: u8) -> Result<()> {
        let texture = self.arena.get(handle);
        let size =
            (texture.width() * texture.height() * texture.format().bytes_per_pixel()) as usize;
        let bytes = vec![value; size];
        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &texture.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &bytes,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(texture.width() * texture.format().bytes_per_pixel()),
                rows_per_image: Some(texture.height()),
            },
            wgpu::Extent3d {
                width: texture.width(),
                height: texture.height(),
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    /// Copy `src` into `dst`. Dimensions and formats must match.
    pub fn copy_texture(&mut self, src: TextureHandle, dst: TextureHandle) -> Result<()> {
        let (s, d) = (self.arena.get(src), self.arena.get(dst));
        if s.width() != d.width() || s.height() != d.height() || s.format() != d.format() {
            return Err(Error::IllegalOperation(format!(
                "copy between mismatched textures {}x{} -> {}x{}",
                s.width(),
                s.height(),
                d.width(),
                d.height()
            )));
        }
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("DeviceContext::copy_texture"),
            });
        encoder.copy_texture_to_texture(
            wgpu::ImageCopyTexture {
                texture: &s.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyTexture {
                texture: &d.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::Extent3d {
                width: s.width(),
                height: s.height(),
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Kernel dispatch
    // -----------------------------------------------------------------------

    /// Run a kernel: one invocation per pixel of `output`.
    ///
    /// A texture may appear at most once across `output` and `inputs` —
    /// the single-writer rule is enforced here rather than left to the
    /// device's binding validation.
    ///
    /// # Errors
    /// [`Error::IllegalOperation`] on binding-shape mismatches.
    pub fn run_kernel(
        &mut self,
        spec: &KernelSpec,
        output: TextureHandle,
        inputs: &[TextureHandle],
        uniforms: &[u8],
    ) -> Result<()> {
        if inputs.len() != spec.inputs {
            return Err(Error::IllegalOperation(format!(
                "kernel '{}' takes {} input(s), got {}",
                spec.name,
                spec.inputs,
                inputs.len()
            )));
        }
        if inputs.contains(&output) {
            return Err(Error::IllegalOperation(format!(
                "kernel '{}' binds its output as an input",
                spec.name
            )));
        }
        let out_tex = self.arena.get(output);
        if out_tex.format() != spec.output {
            return Err(Error::IllegalOperation(format!(
                "kernel '{}' writes {:?}, output texture is {:?}",
                spec.name,
                spec.output,
                out_tex.format()
            )));
        }

        self.ensure_program(spec);
        let program = &self.programs[spec.name];

        let uniform_buf = {
            use wgpu::util::DeviceExt;
            self.device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(spec.name),
                    contents: uniforms,
                    usage: wgpu::BufferUsages::UNIFORM,
                })
        };

        let mut entries = vec![
            wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buf.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::TextureView(&self.arena.get(output).view),
            },
        ];
        for (i, &handle) in inputs.iter().enumerate() {
            entries.push(wgpu::BindGroupEntry {
                binding: 2 + i as u32,
                resource: wgpu::BindingResource::TextureView(&self.arena.get(handle).view),
            });
        }
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(spec.name),
            layout: &program.bind_group_layout,
            entries: &entries,
        });

        let (width, height) = {
            let t = self.arena.get(output);
            (t.width(), t.height())
        };
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some(spec.name),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(spec.name),
                timestamp_writes: None,
            });
            pass.set_pipeline(&program.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(
                (width + WORKGROUP_SIZE - 1) / WORKGROUP_SIZE,
                (height + WORKGROUP_SIZE - 1) / WORKGROUP_SIZE,
                1,
            );
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn ensure_program(&mut self, spec: &KernelSpec) {
        if self.programs.contains_key(spec.name) {
            return;
        }
        debug!(kernel = spec.name, "compiling kernel program");

        let shader = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(spec.name),
                source: wgpu::ShaderSource::Wgsl(spec.source.into()),
            });

        let mut entries = vec![
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::StorageTexture {
                    access: wgpu::StorageTextureAccess::WriteOnly,
                    format: spec.output.to_wgpu(),
                    view_dimension: wgpu::TextureViewDimension::D2,
                },
                count: None,
            },
        ];
        for i in 0..spec.inputs {
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: 2 + i as u32,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Texture {
                    multisampled: false,
                    view_dimension: wgpu::TextureViewDimension::D2,
                    sample_type: wgpu::TextureSampleType::Float { filterable: false },
                },
                count: None,
            });
        }
        let bind_group_layout =
            self.device
                .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some(spec.name),
                    entries: &entries,
                });
        let layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(spec.name),
                bind_group_layouts: &[&bind_group_layout],
                push_constant_ranges: &[],
            });
        let pipeline = self
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(spec.name),
                layout: Some(&layout),
                module: &shader,
                entry_point: "main",
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                cache: None,
            });

        self.programs.insert(
            spec.name,
            Program {
                pipeline,
                bind_group_layout,
            },
        );
    }

    // -----------------------------------------------------------------------
    // Read-back and frame control
    // -----------------------------------------------------------------------

    /// Schedule an asynchronous read-back of a texture's pixels.
    pub fn read_texture(&mut self, handle: TextureHandle) -> PendingRead {
        let texture = self.arena.get(handle);
        self.reader.read(&self.device, &self.queue, texture)
    }

    /// Block on a pending read-back and return its bytes. This is the
    /// engine's suspension point; everything else completes eagerly.
    pub fn wait_read(&self, pending: PendingRead) -> Result<Vec<u8>> {
        pending.wait(&self.device)
    }

    /// Cancel every pending read-back. Called by pipeline teardown.
    pub fn cancel_reads(&mut self) {
        self.reader.cancel_all();
    }

    pub(crate) fn begin_frame(&mut self) {
        self.arena.begin_frame();
    }

    pub(crate) fn end_frame(&mut self) -> usize {
        self.arena.end_frame()
    }

    /// Reclaim everything after a failed run: outstanding scratch returns
    /// to the pool and pending reads are cancelled, leaving the context
    /// consistent for the next run.
    pub(crate) fn abort_frame(&mut self) {
        self.arena.end_frame();
        self.reader.cancel_all();
    }

    /// Textures currently available for recycling. Exposed for resource
    /// conservation checks.
    pub fn free_texture_count(&self) -> usize {
        self.arena.free_count()
    }

    /// Scratch textures lent out in the open frame.
    pub fn outstanding_scratch_count(&self) -> usize {
        self.arena.outstanding_count()
    }
}
