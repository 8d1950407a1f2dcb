// keypoint.rs — the host-side keypoint value type.
//
// A keypoint is what the codec decodes out of an encoded texture: a
// distinguished image location with score, continuous pyramid level,
// orientation, and optional descriptor/extra payloads. The descriptor
// length is fixed per pipeline (by the descriptor node), not per keypoint.

use crate::geometry::Point2;

/// A detected feature point decoded from an encoded keypoint texture.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Keypoint {
    /// Sub-pixel position, quantized to the codec's fixed-point grid.
    pub position: Point2,
    /// Continuous pyramid level (0 = base image, 1 = half resolution, ...).
    pub lod: f32,
    /// Orientation in radians, in [-π, π].
    pub orientation: f32,
    /// Detector response. Higher is stronger.
    pub score: u16,
    /// Descriptor bytes. Length is fixed per pipeline; empty when no
    /// descriptor node ran.
    pub descriptor: Vec<u8>,
    /// User-defined extra bytes riding along with the keypoint.
    pub extra: Vec<u8>,
}

impl Keypoint {
    /// A keypoint at the given position with defaults everywhere else.
    pub fn at(x: f32, y: f32) -> Self {
        Keypoint {
            position: Point2::new(x, y),
            ..Default::default()
        }
    }

    /// Scale factor implied by the level of detail: `2^lod`.
    pub fn scale(&self) -> f32 {
        self.lod.exp2()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scale_follows_lod() {
        assert_eq!(Keypoint::at(0.0, 0.0).scale(), 1.0);
        let kp = Keypoint {
            lod: 2.0,
            ..Keypoint::at(1.0, 1.0)
        };
        assert_eq!(kp.scale(), 4.0);
    }
}
