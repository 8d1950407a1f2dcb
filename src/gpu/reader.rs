// gpu/reader.rs — asynchronous texture read-back.
//
// Read-back is the engine's only true suspension point: a sink schedules a
// device-to-host copy and resumes when the staging buffer maps. The reader
// owns a small ring of staging buffers so back-to-back reads do not
// allocate, and an epoch counter so pipeline teardown can invalidate every
// pending read in one step.
//
// wgpu requires `bytes_per_row` in a texture→buffer copy to be a multiple
// of COPY_BYTES_PER_ROW_ALIGNMENT (256); rows are padded in the staging
// buffer and the padding is stripped while assembling the host bytes.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc};

use tracing::debug;

use crate::error::{Error, Result};
use crate::gpu::texture::Texture;

/// Staging buffers kept warm in the ring. Reads beyond this run
/// concurrently by growing the ring; the extras stay pooled afterwards.
const RING_SIZE: usize = 4;

struct StagingSlot {
    buffer: Arc<wgpu::Buffer>,
    capacity: u64,
    busy: Arc<AtomicBool>,
}

/// Schedules device-to-host pixel copies.
pub struct TextureReader {
    slots: Vec<StagingSlot>,
    /// Bumped on cancellation; pending reads from an older epoch fail
    /// with [`Error::Cancelled`] instead of touching their buffer.
    epoch: Arc<AtomicU64>,
}

impl TextureReader {
    pub fn new() -> Self {
        TextureReader {
            slots: Vec::with_capacity(RING_SIZE),
            epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Schedule a read of `texture` into a staging buffer.
    ///
    /// Returns immediately; the copy runs on the device timeline. Await
    /// the bytes with [`PendingRead::wait`]. A read scheduled after a
    /// kernel dispatch observes that dispatch's writes — submissions on
    /// the one queue execute in order.
    pub fn read(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        texture: &Texture,
    ) -> PendingRead {
        let bytes_per_pixel = texture.format().bytes_per_pixel();
        let unpadded_bytes_per_row = texture.width() * bytes_per_pixel;
        let aligned_bytes_per_row =
            align_to(unpadded_bytes_per_row, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);
        let size = u64::from(aligned_bytes_per_row) * u64::from(texture.height());

        let slot_index = self.acquire_slot(device, size);
        let slot = &self.slots[slot_index];
        slot.busy.store(true, Ordering::SeqCst);

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("TextureReader::read"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &texture.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &slot.buffer,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(aligned_bytes_per_row),
                    rows_per_image: Some(texture.height()),
                },
            },
            wgpu::Extent3d {
                width: texture.width(),
                height: texture.height(),
                depth_or_array_layers: 1,
            },
        );
        queue.submit(std::iter::once(encoder.finish()));

        let (tx, rx) = mpsc::channel();
        slot.buffer
            .slice(..size)
            .map_async(wgpu::MapMode::Read, move |result| {
                // Receiver may be gone if the read was cancelled; that is
                // fine, the result is discarded either way.
                let _ = tx.send(result);
            });

        PendingRead {
            buffer: Arc::clone(&slot.buffer),
            busy: Arc::clone(&slot.busy),
            rx,
            epoch: Arc::clone(&self.epoch),
            epoch_at_submit: self.epoch.load(Ordering::SeqCst),
            mapped_size: size,
            unpadded_bytes_per_row: unpadded_bytes_per_row as usize,
            aligned_bytes_per_row: aligned_bytes_per_row as usize,
            rows: texture.height() as usize,
        }
    }

    /// Invalidate every pending read and drop the ring.
    ///
    /// Shader-side work already in flight completes on the device; its
    /// results are discarded with the buffers.
    pub fn cancel_all(&mut self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.slots.clear();
    }

    fn acquire_slot(&mut self, device: &wgpu::Device, size: u64) -> usize {
        let found = self
            .slots
            .iter()
            .position(|s| !s.busy.load(Ordering::SeqCst) && s.capacity >= size);
        match found {
            Some(index) => index,
            None => {
                if self.slots.len() >= RING_SIZE {
                    debug!(slots = self.slots.len(), "staging ring grew past its target");
                }
                let buffer = device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some("TextureReader staging"),
                    size,
                    usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                });
                self.slots.push(StagingSlot {
                    buffer: Arc::new(buffer),
                    capacity: size,
                    busy: Arc::new(AtomicBool::new(false)),
                });
                self.slots.len() - 1
            }
        }
    }
}

impl Default for TextureReader {
    fn default() -> Self {
        Self::new()
    }
}

/// A scheduled read-back that has not been awaited yet.
pub struct PendingRead {
    buffer: Arc<wgpu::Buffer>,
    busy: Arc<AtomicBool>,
    rx: mpsc::Receiver<std::result::Result<(), wgpu::BufferAsyncError>>,
    epoch: Arc<AtomicU64>,
    epoch_at_submit: u64,
    mapped_size: u64,
    unpadded_bytes_per_row: usize,
    aligned_bytes_per_row: usize,
    rows: usize,
}

impl PendingRead {
    /// Block until the copy completes and return the pixel bytes in
    /// row-major order, alignment padding stripped.
    ///
    /// # Errors
    /// [`Error::Cancelled`] if the owning pipeline was released first;
    /// [`Error::Resource`] if the device failed the map.
    pub fn wait(self, device: &wgpu::Device) -> Result<Vec<u8>> {
        if self.cancelled() {
            return Err(Error::Cancelled("pipeline released".into()));
        }

        device.poll(wgpu::Maintain::Wait);
        match self.rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.busy.store(false, Ordering::SeqCst);
                return Err(Error::Resource(format!("buffer map failed: {e}")));
            }
            // Sender dropped without firing: the device went away.
            Err(_) => return Err(Error::Cancelled("device dropped pending read".into())),
        }

        // Cancellation may have landed between the map and the recv.
        if self.cancelled() {
            self.buffer.unmap();
            return Err(Error::Cancelled("pipeline released".into()));
        }

        let mapped = self.buffer.slice(..self.mapped_size).get_mapped_range();
        let mut out = vec![0u8; self.unpadded_bytes_per_row * self.rows];
        for row in 0..self.rows {
            let src = row * self.aligned_bytes_per_row;
            let dst = row * self.unpadded_bytes_per_row;
            out[dst..dst + self.unpadded_bytes_per_row]
                .copy_from_slice(&mapped[src..src + self.unpadded_bytes_per_row]);
        }
        drop(mapped);
        self.buffer.unmap();
        self.busy.store(false, Ordering::SeqCst);

        Ok(out)
    }

    fn cancelled(&self) -> bool {
        self.epoch.load(Ordering::SeqCst) != self.epoch_at_submit
    }
}

/// Round `value` up to the next multiple of `alignment`.
#[inline]
pub(crate) fn align_to(value: u32, alignment: u32) -> u32 {
    (value + alignment - 1) / alignment * alignment
}
