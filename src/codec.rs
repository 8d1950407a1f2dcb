// codec.rs — the keypoint wire format.
//
// Shader kernels produce a variable-length list of feature points, but a
// kernel can only write to a fixed-size texture. This module defines the
// two pixel-packed layouts that bridge that gap, plus the host-side
// decoder and a CPU mirror of the GPU encoder kernel (`encoder.wgsl`).
//
//
// SPARSE RAW ENCODING (detector output)
// ──────────────────────────────────────
// One RGBA8 pixel per image pixel:
//
//   R — corner score byte (0 means "not a keypoint")
//   G — greyscale intensity
//   B — skip offset / 255: the next keypoint is at least 1 + round(B·255)
//       pixels ahead in row-major order (a hint that lets the encoder
//       leap over runs of non-keypoint pixels)
//   A — scale byte (quantized level of detail)
//
//
// DENSE PACKED ENCODING (encoder output)
// ───────────────────────────────────────
// A square RGBA8 texture of side `encoder_length`, partitioned into cells
// of `pixels_per_keypoint` consecutive pixels in row-major order, one cell
// per keypoint:
//
//   pixel 0:  xLo xHi yLo yHi   position, 16-bit fixed point (×FIX_RESOLUTION)
//   pixel 1:  lod orient sLo sHi  level of detail, orientation, score (u16 LE)
//   pixel 2…: descriptor bytes, then extra bytes, zero padded
//
// A cell whose position bytes are FF FF FF FF is the end-of-list sentinel.
// A cell with raw x + y == 0 and score low byte 0 is an empty slot the
// decoder skips (a keypoint discarded mid-pipeline, e.g. a lost track).

use crate::error::{Error, Result};
use crate::geometry::Point2;
use crate::keypoint::Keypoint;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Bytes occupied by the position + attributes header of every cell
/// (two pixels).
pub const MIN_KEYPOINT_SIZE: usize = 8;

/// Sub-pixel position resolution: positions are stored as
/// `round(coord * FIX_RESOLUTION)` in 16 bits. With 3 fractional bits the
/// representable range covers images up to 8192 pixels per side.
pub const FIX_BITS: u32 = 3;
pub const FIX_RESOLUTION: f32 = (1 << FIX_BITS) as f32;

/// Level-of-detail quantization range. A lod byte b < 255 decodes to
/// `-LOG2_PYRAMID_MAX_SCALE + (LOG2_PYRAMID_MAX_SCALE + PYRAMID_MAX_LEVELS) * b / 255`;
/// b == 255 decodes to 0.
pub const LOG2_PYRAMID_MAX_SCALE: f32 = 2.0;
pub const PYRAMID_MAX_LEVELS: f32 = 8.0;

/// Raw position value reserved for the end-of-list sentinel.
const SENTINEL: u16 = 0xFFFF;

/// Orientation byte written by detectors, which do not estimate
/// orientation. Decodes to π/255 ≈ 0.012 rad, inside one quantization step
/// of zero.
pub(crate) const ORIENTATION_BYTE_NONE: u8 = 128;

// ---------------------------------------------------------------------------
// Cell geometry
// ---------------------------------------------------------------------------

/// Number of pixels occupied by one keypoint cell.
#[inline]
pub fn pixels_per_keypoint(descriptor_size: usize, extra_size: usize) -> usize {
    (MIN_KEYPOINT_SIZE + descriptor_size + extra_size + 3) / 4
}

/// Smallest square texture side able to hold `capacity` keypoints plus the
/// end-of-list sentinel cell.
pub fn encoder_length_for(capacity: usize, descriptor_size: usize, extra_size: usize) -> usize {
    let pixels = (capacity + 1) * pixels_per_keypoint(descriptor_size, extra_size);
    let mut side = 1usize;
    while side * side < pixels {
        side += 1;
    }
    side
}

/// Number of whole cells in a square encoded texture of the given side.
#[inline]
pub fn cell_count(encoder_length: usize, descriptor_size: usize, extra_size: usize) -> usize {
    encoder_length * encoder_length / pixels_per_keypoint(descriptor_size, extra_size)
}

// ---------------------------------------------------------------------------
// Scalar quantizers (shared by encoder and decoder)
// ---------------------------------------------------------------------------

#[inline]
fn encode_fixed(coord: f32) -> u16 {
    // 0xFFFF is reserved for the sentinel.
    (coord * FIX_RESOLUTION).round().clamp(0.0, 65_534.0) as u16
}

#[inline]
fn decode_lod(byte: u8) -> f32 {
    let m = LOG2_PYRAMID_MAX_SCALE;
    let h = PYRAMID_MAX_LEVELS;
    if byte < 255 {
        -m + (m + h) * f32::from(byte) / 255.0
    } else {
        0.0
    }
}

#[inline]
fn encode_lod(lod: f32) -> u8 {
    let m = LOG2_PYRAMID_MAX_SCALE;
    let h = PYRAMID_MAX_LEVELS;
    // 255 is the "no lod" escape; clamp to 254 so every encoded byte
    // round-trips through decode_lod.
    (((lod + m) * 255.0 / (m + h)).round()).clamp(0.0, 254.0) as u8
}

#[inline]
fn decode_orientation(byte: u8) -> f32 {
    (2.0 * f32::from(byte) - 255.0) * std::f32::consts::PI / 255.0
}

#[inline]
fn encode_orientation(radians: f32) -> u8 {
    let b = (radians * 255.0 / std::f32::consts::PI + 255.0) / 2.0;
    b.round().clamp(0.0, 255.0) as u8
}

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

/// Decode a packed keypoint texture read back to host memory.
///
/// `bytes` is the flat row-major RGBA buffer of the encoded texture.
/// Decoding walks cells in order and stops at the end-of-list sentinel,
/// at the end of the buffer, or at a cell whose descriptor/extra payload
/// would run past the end of the buffer (truncation).
pub fn decode_keypoints(bytes: &[u8], descriptor_size: usize, extra_size: usize) -> Vec<Keypoint> {
    let cell_bytes = pixels_per_keypoint(descriptor_size, extra_size) * 4;
    let mut keypoints = Vec::new();
    let mut off = 0;

    while off + MIN_KEYPOINT_SIZE <= bytes.len() {
        let x_raw = u16::from_le_bytes([bytes[off], bytes[off + 1]]);
        let y_raw = u16::from_le_bytes([bytes[off + 2], bytes[off + 3]]);

        if x_raw == SENTINEL && y_raw == SENTINEL {
            break;
        }

        let score = u16::from_le_bytes([bytes[off + 6], bytes[off + 7]]);

        // Empty slot: a keypoint discarded mid-pipeline. Skip, don't stop.
        if u32::from(x_raw) + u32::from(y_raw) == 0 && score & 0xFF == 0 {
            off += cell_bytes;
            continue;
        }

        // Truncated cell: not enough payload bytes left in the buffer.
        if off + MIN_KEYPOINT_SIZE + descriptor_size + extra_size > bytes.len() {
            break;
        }

        let payload = off + MIN_KEYPOINT_SIZE;
        keypoints.push(Keypoint {
            position: Point2::new(
                f32::from(x_raw) / FIX_RESOLUTION,
                f32::from(y_raw) / FIX_RESOLUTION,
            ),
            lod: decode_lod(bytes[off + 4]),
            orientation: decode_orientation(bytes[off + 5]),
            score,
            descriptor: bytes[payload..payload + descriptor_size].to_vec(),
            extra: bytes[payload + descriptor_size..payload + descriptor_size + extra_size]
                .to_vec(),
        });

        off += cell_bytes;
    }

    keypoints
}

// ---------------------------------------------------------------------------
// Encoder (CPU mirror of encoder.wgsl)
// ---------------------------------------------------------------------------

/// Pack a keypoint list into the dense encoded layout.
///
/// Produces the flat RGBA buffer of a square `encoder_length²` texture.
/// Cells beyond the list carry the end-of-list sentinel. This is the host
/// mirror of the GPU encoder kernel; tests use it to verify round-trips
/// and to build fixtures.
///
/// # Errors
/// Returns [`Error::Resource`] if the texture cannot hold every keypoint
/// plus the sentinel cell, and [`Error::IllegalOperation`] if a keypoint's
/// payload sizes disagree with `descriptor_size`/`extra_size`.
pub fn encode_keypoints(
    keypoints: &[Keypoint],
    descriptor_size: usize,
    extra_size: usize,
    encoder_length: usize,
) -> Result<Vec<u8>> {
    let ppk = pixels_per_keypoint(descriptor_size, extra_size);
    let cells = cell_count(encoder_length, descriptor_size, extra_size);
    if keypoints.len() + 1 > cells {
        return Err(Error::Resource(format!(
            "encoder texture {encoder_length}x{encoder_length} holds {cells} cells, \
             need {} + sentinel",
            keypoints.len()
        )));
    }

    let mut bytes = vec![0u8; encoder_length * encoder_length * 4];
    for (q, cell) in bytes.chunks_exact_mut(ppk * 4).enumerate() {
        match keypoints.get(q) {
            Some(kp) => {
                if kp.descriptor.len() != descriptor_size || kp.extra.len() != extra_size {
                    return Err(Error::IllegalOperation(format!(
                        "keypoint {q} carries {}+{} payload bytes, cell expects {}+{}",
                        kp.descriptor.len(),
                        kp.extra.len(),
                        descriptor_size,
                        extra_size
                    )));
                }
                cell[0..2].copy_from_slice(&encode_fixed(kp.position.x).to_le_bytes());
                cell[2..4].copy_from_slice(&encode_fixed(kp.position.y).to_le_bytes());
                cell[4] = encode_lod(kp.lod);
                cell[5] = encode_orientation(kp.orientation);
                cell[6..8].copy_from_slice(&kp.score.to_le_bytes());
                let payload = &mut cell[MIN_KEYPOINT_SIZE..];
                payload[..descriptor_size].copy_from_slice(&kp.descriptor);
                payload[descriptor_size..descriptor_size + extra_size]
                    .copy_from_slice(&kp.extra);
            }
            None => {
                // Null keypoint: FF FF FF FF position, zeros elsewhere.
                cell[0..4].fill(0xFF);
            }
        }
    }

    Ok(bytes)
}

// ---------------------------------------------------------------------------
// Sparse scan (CPU mirror of the per-thread walk in encoder.wgsl)
// ---------------------------------------------------------------------------

/// A keypoint as it sits in the sparse raw encoding: integer position plus
/// the raw score and scale bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SparseKeypoint {
    pub x: u32,
    pub y: u32,
    pub score: u8,
    pub scale: u8,
}

/// Walk a sparse raw image in row-major order using the B-channel skip
/// hints, returning the q-th keypoint if at least q + 1 exist.
///
/// This replicates exactly what one encoder-kernel invocation does: start
/// at pixel 0, count keypoints, leap `1 + skip` pixels after every visit.
/// The hint only promises the *absence* of keypoints in the skipped span,
/// so a zero hint degrades to a dense scan, never to a miss.
pub fn find_qth_sparse(rgba: &[u8], width: u32, height: u32, q: usize) -> Option<SparseKeypoint> {
    debug_assert_eq!(rgba.len(), (width * height * 4) as usize);
    let total = (width * height) as usize;
    let mut i = 0usize;
    let mut count = 0usize;

    while i < total {
        let px = &rgba[i * 4..i * 4 + 4];
        if px[0] > 0 {
            if count == q {
                return Some(SparseKeypoint {
                    x: i as u32 % width,
                    y: i as u32 / width,
                    score: px[0],
                    scale: px[3],
                });
            }
            count += 1;
        }
        i += 1 + px[2] as usize;
    }

    None
}

/// Collect every keypoint of a sparse raw image, in row-major order.
pub fn scan_sparse(rgba: &[u8], width: u32, height: u32) -> Vec<SparseKeypoint> {
    let mut out = Vec::new();
    let mut q = 0;
    while let Some(kp) = find_qth_sparse(rgba, width, height, q) {
        out.push(kp);
        q += 1;
    }
    out
}

/// Pack a sparse raw image into the dense encoded layout, as the encoder
/// kernel does right after detection: no descriptor, no extra bytes, the
/// scale byte carried into the lod byte, no orientation estimate yet.
/// Detections beyond the texture's capacity are dropped, exactly like the
/// kernel's overflow clamp.
pub fn encode_from_sparse(
    rgba: &[u8],
    width: u32,
    height: u32,
    encoder_length: usize,
) -> Result<Vec<u8>> {
    let capacity = cell_count(encoder_length, 0, 0).saturating_sub(1);
    let detected: Vec<Keypoint> = scan_sparse(rgba, width, height)
        .into_iter()
        .take(capacity)
        .map(|s| Keypoint {
            position: Point2::new(s.x as f32, s.y as f32),
            lod: decode_lod(s.scale),
            orientation: decode_orientation(ORIENTATION_BYTE_NONE),
            score: u16::from(s.score),
            descriptor: Vec::new(),
            extra: Vec::new(),
        })
        .collect();
    encode_keypoints(&detected, 0, 0, encoder_length)
}

// ---------------------------------------------------------------------------
// Score ranking (CPU mirror of clipper.wgsl)
// ---------------------------------------------------------------------------

/// Keep the `size` best keypoints, ordered by descending score.
///
/// Ties break by list position, matching the rank the clipper kernel
/// computes (earlier cell wins), so CPU and GPU clip identically.
pub fn clip_by_score(keypoints: &[Keypoint], size: usize) -> Vec<Keypoint> {
    let mut order: Vec<usize> = (0..keypoints.len()).collect();
    order.sort_by(|&a, &b| {
        keypoints[b]
            .score
            .cmp(&keypoints[a].score)
            .then(a.cmp(&b))
    });
    order
        .into_iter()
        .take(size)
        .map(|i| keypoints[i].clone())
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
