// gpu/ — device context, texture arena, and asynchronous read-back.
//
// Everything GPU-facing lives here. The rest of the crate talks to this
// layer through `DeviceContext` methods and `TextureHandle` values; raw
// wgpu objects never cross the module boundary.

pub mod device;
pub mod pool;
pub mod reader;
pub mod texture;

pub use device::{DeviceContext, KernelSpec};
pub use pool::{TextureArena, TextureHandle};
pub use reader::PendingRead;
pub use texture::{Texture, TextureFormat};
