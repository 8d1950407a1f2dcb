// gpu/pool.rs — texture arena with scratch recycling.
//
// Reallocating GPU textures per frame is prohibitive, so intermediate
// buffers come from a pool with exact-dimension matching: one free list
// per (width, height, format) key. Scratch acquisition is frame-scoped —
// the scheduler opens a frame before the first node runs and closes it
// after the sink, at which point every scratch handle must have been
// returned. A handle still outstanding at frame close is a leak; it is
// logged and reclaimed so the pool stays balanced across runs.
//
// The arena also owns persistent textures (portal and buffer nodes retain
// state across runs). Those are exempt from frame accounting and live
// until their owning node releases them.

use std::collections::HashMap;

use tracing::warn;

use crate::error::{Error, Result};
use crate::gpu::texture::{Texture, TextureFormat};

/// Upper bound on arena slots. Far above any real pipeline; a backstop
/// against runaway allocation loops.
const MAX_SLOTS: usize = 1024;

/// An opaque reference to an arena texture. Handles are frame-borrowed
/// for scratch textures and long-lived for persistent ones; messages
/// carry handles, never textures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    /// In a free list, available for `alloc_scratch`.
    Free,
    /// Lent out for the current frame.
    Lent,
    /// Owned by a node across frames; exempt from frame accounting.
    Persistent,
}

struct Slot {
    texture: Texture,
    state: SlotState,
}

type PoolKey = (u32, u32, TextureFormat);

/// Arena of engine textures plus the per-dimension free lists.
#[derive(Default)]
pub struct TextureArena {
    slots: Vec<Slot>,
    free: HashMap<PoolKey, Vec<usize>>,
    /// Scratch handles lent out since the last `begin_frame`.
    outstanding: Vec<usize>,
}

impl TextureArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a persistent texture, owned by the caller until
    /// [`TextureArena::release_persistent`].
    pub fn create(
        &mut self,
        device: &wgpu::Device,
        width: u32,
        height: u32,
        format: TextureFormat,
    ) -> Result<TextureHandle> {
        let index = self.new_slot(device, width, height, format, SlotState::Persistent)?;
        Ok(TextureHandle(index))
    }

    /// Borrow a scratch texture for the current frame, recycling a free
    /// one with the exact same dimensions and format when available.
    pub fn alloc_scratch(
        &mut self,
        device: &wgpu::Device,
        width: u32,
        height: u32,
        format: TextureFormat,
    ) -> Result<TextureHandle> {
        let key = (width, height, format);
        let index = match self.free.get_mut(&key).and_then(Vec::pop) {
            Some(index) => {
                self.slots[index].state = SlotState::Lent;
                index
            }
            None => self.new_slot(device, width, height, format, SlotState::Lent)?,
        };
        self.outstanding.push(index);
        Ok(TextureHandle(index))
    }

    /// Return a scratch texture to its free list.
    ///
    /// Releasing a handle twice, or a persistent handle, is a no-op: a
    /// message forwarded through a pass-through node appears in more than
    /// one published cell, and the scheduler releases each cell.
    pub fn release_scratch(&mut self, handle: TextureHandle) {
        let slot = &mut self.slots[handle.0];
        if slot.state != SlotState::Lent {
            return;
        }
        slot.state = SlotState::Free;
        let key = (
            slot.texture.width(),
            slot.texture.height(),
            slot.texture.format(),
        );
        self.free.entry(key).or_default().push(handle.0);
        self.outstanding.retain(|&i| i != handle.0);
    }

    /// Hand a persistent texture back to the pool inventory.
    pub fn release_persistent(&mut self, handle: TextureHandle) {
        let slot = &mut self.slots[handle.0];
        if slot.state != SlotState::Persistent {
            return;
        }
        slot.state = SlotState::Free;
        let key = (
            slot.texture.width(),
            slot.texture.height(),
            slot.texture.format(),
        );
        self.free.entry(key).or_default().push(handle.0);
    }

    /// Reset per-frame accounting. Called by the scheduler at the start of
    /// every run.
    pub fn begin_frame(&mut self) {
        debug_assert!(
            self.outstanding.is_empty(),
            "frame opened with {} scratch textures outstanding",
            self.outstanding.len()
        );
        self.outstanding.clear();
    }

    /// Close the frame, reclaiming any leaked scratch handles.
    ///
    /// Returns the number of leaks. The scheduler treats a nonzero count
    /// as a node bug worth logging, not a fatal error — the pool is
    /// balanced either way.
    pub fn end_frame(&mut self) -> usize {
        let leaked: Vec<usize> = self.outstanding.drain(..).collect();
        if !leaked.is_empty() {
            warn!(count = leaked.len(), "scratch textures leaked at frame end");
        }
        for index in leaked.iter() {
            self.slots[*index].state = SlotState::Free;
            let key = (
                self.slots[*index].texture.width(),
                self.slots[*index].texture.height(),
                self.slots[*index].texture.format(),
            );
            self.free.entry(key).or_default().push(*index);
        }
        leaked.len()
    }

    /// Resolve a handle.
    pub fn get(&self, handle: TextureHandle) -> &Texture {
        &self.slots[handle.0].texture
    }

    /// Number of textures currently sitting in free lists.
    pub fn free_count(&self) -> usize {
        self.free.values().map(Vec::len).sum()
    }

    /// Number of scratch textures lent out in the open frame.
    pub fn outstanding_count(&self) -> usize {
        self.outstanding.len()
    }

    fn new_slot(
        &mut self,
        device: &wgpu::Device,
        width: u32,
        height: u32,
        format: TextureFormat,
        state: SlotState,
    ) -> Result<usize> {
        if self.slots.len() >= MAX_SLOTS {
            return Err(Error::Resource(format!(
                "texture pool exhausted ({MAX_SLOTS} slots)"
            )));
        }
        if width == 0 || height == 0 {
            return Err(Error::Resource(format!(
                "refusing to allocate a {width}x{height} texture"
            )));
        }
        let label = format!("arena[{}] {width}x{height}", self.slots.len());
        let texture = Texture::new(device, width, height, format, &label);
        self.slots.push(Slot { texture, state });
        Ok(self.slots.len() - 1)
    }
}
