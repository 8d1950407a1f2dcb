// nodes/ — the node library.
//
// Factory functions build `Node` values with preset port signatures;
// the pipeline takes ownership at `add`. Factories are grouped the way
// users think about them: `nodes::image::*` and `nodes::keypoint::*`
// (with `detector`, `descriptor`, and `tracker` subgroups).

pub mod image;
pub mod keypoint;
pub mod portal;

pub use portal::PortalHandle;

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{Error, Result};
use crate::gpu::TextureHandle;
use crate::pipeline::message::Message;
use crate::pipeline::port::ImageFormat;

/// Generated default names; override with [`crate::pipeline::Node::named`].
pub(crate) fn auto_name(prefix: &str) -> String {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    format!("{prefix}-{}", COUNTER.fetch_add(1, Ordering::Relaxed))
}

/// Unwrap an image message. The scheduler's kind checks make a mismatch
/// here a protocol violation, not a wiring error.
pub(crate) fn expect_image(message: &Message) -> Result<(TextureHandle, ImageFormat)> {
    match message {
        Message::Image { texture, format } => Ok((*texture, *format)),
        other => Err(Error::IllegalOperation(format!(
            "expected an image message, got {:?}",
            other.kind()
        ))),
    }
}

/// Unwrap a keypoint message as (texture, descriptor size, extra size,
/// encoder length).
pub(crate) fn expect_keypoints(message: &Message) -> Result<(TextureHandle, usize, usize, usize)> {
    match message {
        Message::Keypoints {
            encoded,
            descriptor_size,
            extra_size,
            encoder_length,
        } => Ok((*encoded, *descriptor_size, *extra_size, *encoder_length)),
        other => Err(Error::IllegalOperation(format!(
            "expected a keypoint message, got {:?}",
            other.kind()
        ))),
    }
}
