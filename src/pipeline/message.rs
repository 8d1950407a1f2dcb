// pipeline/message.rs — values published on output ports.
//
// Messages are immutable once published. Image and keypoint messages
// carry texture handles into the shared arena; the scheduler, not the
// message, decides when those textures return to the pool. The leaf
// variants (Matrix, Vector2) carry host values by copy.

use crate::geometry::Vector2;
use crate::gpu::TextureHandle;
use crate::matrix::Matrix;
use crate::pipeline::port::{Expectation, ImageFormat, MessageKind};

/// A value published by a node on one of its output ports.
#[derive(Debug, Clone)]
pub enum Message {
    /// A frame or intermediate image.
    Image {
        texture: TextureHandle,
        format: ImageFormat,
    },
    /// A packed keypoint list (see the codec module for the layout).
    Keypoints {
        encoded: TextureHandle,
        descriptor_size: usize,
        extra_size: usize,
        /// Side length of the square encoded texture, in pixels.
        encoder_length: usize,
    },
    /// A host-side matrix for geometric nodes.
    Matrix(Matrix<f32>),
    /// A host-side 2D vector.
    Vector2(Vector2),
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Image { .. } => MessageKind::Image,
            Message::Keypoints { .. } => MessageKind::Keypoints,
            Message::Matrix(_) => MessageKind::Matrix,
            Message::Vector2(_) => MessageKind::Vector2,
        }
    }

    /// The texture this message owns, if any.
    pub(crate) fn texture(&self) -> Option<TextureHandle> {
        match self {
            Message::Image { texture, .. } => Some(*texture),
            Message::Keypoints { encoded, .. } => Some(*encoded),
            _ => None,
        }
    }

    /// Whether this message satisfies a port's run-time expectation.
    pub(crate) fn satisfies(&self, expect: &Expectation) -> bool {
        match (expect, self) {
            (Expectation::ImageFormat(want), Message::Image { format, .. }) => format == want,
            // An expectation on a non-image port is a wiring defect the
            // kind check already rejected; be strict if it slips through.
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expectation_matches_format() {
        let grey = Message::Image {
            texture: TextureHandle(0),
            format: ImageFormat::Greyscale,
        };
        let want_grey = Expectation::ImageFormat(ImageFormat::Greyscale);
        let want_rgba = Expectation::ImageFormat(ImageFormat::Rgba);
        assert!(grey.satisfies(&want_grey));
        assert!(!grey.satisfies(&want_rgba));
    }

    #[test]
    fn kinds() {
        assert_eq!(
            Message::Vector2(Vector2::new(0.0, 0.0)).kind(),
            MessageKind::Vector2
        );
        assert_eq!(
            Message::Matrix(Matrix::new(2, 2)).kind(),
            MessageKind::Matrix
        );
    }
}
