// media.rs — the frame ingestion seam.
//
// The engine never touches image files, cameras, or windowing systems; it
// only needs something that knows its dimensions and can upload its
// current frame into a texture it is handed. Browser-style adapters
// (video elements, canvases) are external implementors of this trait.

use crate::error::Result;
use crate::gpu::{DeviceContext, TextureHandle};

/// A frame source a source node can ingest from.
pub trait Media {
    fn width(&self) -> u32;
    fn height(&self) -> u32;

    /// Upload the current frame into `target`, an RGBA8 texture with this
    /// media's dimensions.
    fn upload(&self, ctx: &mut DeviceContext, target: TextureHandle) -> Result<()>;
}

/// The in-memory media implementation: a host-side RGBA buffer.
///
/// Mutate between runs with [`BufferMedia::update`] to feed a pipeline a
/// stream of frames.
pub struct BufferMedia {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl BufferMedia {
    /// Wrap an RGBA byte buffer.
    ///
    /// # Panics
    /// Panics if `pixels.len() != width * height * 4`.
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        assert_eq!(
            pixels.len(),
            (width * height * 4) as usize,
            "pixel buffer length must be width * height * 4"
        );
        BufferMedia {
            width,
            height,
            pixels,
        }
    }

    /// A frame with every pixel set to `rgba`.
    pub fn uniform(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let pixels = rgba
            .iter()
            .copied()
            .cycle()
            .take((width * height * 4) as usize)
            .collect();
        Self::new(width, height, pixels)
    }

    /// Replace the frame contents. Dimensions are fixed at construction.
    ///
    /// # Panics
    /// Panics if the new buffer has the wrong length.
    pub fn update(&mut self, pixels: Vec<u8>) {
        assert_eq!(pixels.len(), self.pixels.len());
        self.pixels = pixels;
    }

    /// Set one pixel. Convenient for synthesizing test patterns.
    ///
    /// # Panics
    /// Panics if (x, y) is out of bounds.
    pub fn set_pixel(&mut self, x: u32, y: u32, rgba: [u8; 4]) {
        assert!(x < self.width && y < self.height);
        let i = ((y * self.width + x) * 4) as usize;
        self.pixels[i..i + 4].copy_from_slice(&rgba);
    }
}

impl Media for BufferMedia {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn upload(&self, ctx: &mut DeviceContext, target: TextureHandle) -> Result<()> {
        ctx.upload_rgba8(target, &self.pixels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_frame_layout() {
        let media = BufferMedia::uniform(2, 2, [1, 2, 3, 4]);
        assert_eq!(media.pixels.len(), 16);
        assert_eq!(&media.pixels[4..8], &[1, 2, 3, 4]);
    }

    #[test]
    fn set_pixel_addresses_row_major() {
        let mut media = BufferMedia::uniform(4, 4, [0, 0, 0, 255]);
        media.set_pixel(3, 1, [9, 9, 9, 9]);
        let i = (1 * 4 + 3) * 4;
        assert_eq!(&media.pixels[i..i + 4], &[9, 9, 9, 9]);
    }
}
