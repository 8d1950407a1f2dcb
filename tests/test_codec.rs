// tests/test_codec.rs — keypoint wire format, host side.
//
// Round-trips through the packed layout and the decoder's structural
// rules (sentinel, empty slots, truncation), using the CPU mirror of the
// encoder kernel. No GPU involved.

use visionflow::codec::{
    cell_count, clip_by_score, decode_keypoints, encode_keypoints, encoder_length_for,
    pixels_per_keypoint, scan_sparse, FIX_RESOLUTION, LOG2_PYRAMID_MAX_SCALE, PYRAMID_MAX_LEVELS,
};
use visionflow::geometry::Point2;
use visionflow::keypoint::Keypoint;

// Deterministic bytes, same generator family the GPU tests use.
struct Lcg(u32);

impl Lcg {
    fn next_u8(&mut self) -> u8 {
        self.0 = self.0.wrapping_mul(1664525).wrapping_add(1013904223);
        (self.0 >> 24) as u8
    }

    fn bytes(&mut self, n: usize) -> Vec<u8> {
        (0..n).map(|_| self.next_u8()).collect()
    }
}

fn random_keypoints(seed: u32, count: usize, d: usize, e: usize) -> Vec<Keypoint> {
    let mut rng = Lcg(seed);
    (0..count)
        .map(|_| {
            // Strictly positive positions: raw (0, 0) is the empty-slot
            // marker, which these fixtures must not produce by accident.
            let x = f32::from(rng.next_u8()) * 3.0 + f32::from(rng.next_u8()) / 64.0 + 1.0;
            let y = f32::from(rng.next_u8()) * 2.0 + f32::from(rng.next_u8()) / 64.0 + 1.0;
            Keypoint {
                position: Point2::new(x, y),
                lod: f32::from(rng.next_u8()) / 255.0 * 9.0 - 1.5,
                orientation: (f32::from(rng.next_u8()) / 255.0 * 2.0 - 1.0) * 3.1,
                score: u16::from_le_bytes([rng.next_u8(), rng.next_u8()]),
                descriptor: rng.bytes(d),
                extra: rng.bytes(e),
            }
        })
        .collect()
}

fn assert_round_trips(original: &[Keypoint], d: usize, e: usize) {
    let side = encoder_length_for(original.len(), d, e);
    let bytes = encode_keypoints(original, d, e, side).unwrap();
    let decoded = decode_keypoints(&bytes, d, e);

    assert_eq!(decoded.len(), original.len());
    let pos_tol = 1.0 / FIX_RESOLUTION;
    let lod_tol = (LOG2_PYRAMID_MAX_SCALE + PYRAMID_MAX_LEVELS) / 255.0;
    let ori_tol = 2.0 * std::f32::consts::PI / 255.0;
    for (got, want) in decoded.iter().zip(original) {
        assert!((got.position.x - want.position.x).abs() <= pos_tol);
        assert!((got.position.y - want.position.y).abs() <= pos_tol);
        assert!((got.lod - want.lod).abs() <= lod_tol);
        assert!((got.orientation - want.orientation).abs() <= ori_tol);
        assert_eq!(got.score, want.score);
        assert_eq!(got.descriptor, want.descriptor);
        assert_eq!(got.extra, want.extra);
    }
}

// ===== Round trips =====

#[test]
fn round_trip_bare_keypoints() {
    for count in [0usize, 1, 7, 100] {
        assert_round_trips(&random_keypoints(42 + count as u32, count, 0, 0), 0, 0);
    }
}

#[test]
fn round_trip_with_descriptor_and_extra() {
    assert_round_trips(&random_keypoints(7, 33, 32, 0), 32, 0);
    assert_round_trips(&random_keypoints(9, 12, 32, 8), 32, 8);
    // Odd payload width exercises the cell padding.
    assert_round_trips(&random_keypoints(11, 5, 5, 3), 5, 3);
}

#[test]
fn round_trip_at_exact_capacity() {
    // Fill every cell but the sentinel's.
    let d = 16;
    let side = encoder_length_for(50, d, 0);
    let capacity = cell_count(side, d, 0) - 1;
    let kps = random_keypoints(3, capacity, d, 0);
    let bytes = encode_keypoints(&kps, d, 0, side).unwrap();
    assert_eq!(decode_keypoints(&bytes, d, 0).len(), capacity);
}

// ===== Structural rules =====

#[test]
fn sentinel_terminates_decoding() {
    // One valid keypoint, then FF FF FF FF: decoder returns length 1 no
    // matter what follows.
    let kp = Keypoint {
        score: 77,
        ..Keypoint::at(10.0, 20.0)
    };
    let cell = pixels_per_keypoint(0, 0) * 4;
    let mut bytes = encode_keypoints(&[kp], 0, 0, 8).unwrap();
    for b in &mut bytes[2 * cell..] {
        *b = 0x5A; // garbage beyond the sentinel
    }
    let decoded = decode_keypoints(&bytes, 0, 0);
    assert_eq!(decoded.len(), 1);
    assert_eq!(decoded[0].position, Point2::new(10.0, 20.0));
}

#[test]
fn empty_slots_are_skipped_not_terminal() {
    let kps = random_keypoints(5, 4, 0, 0);
    let cell = pixels_per_keypoint(0, 0) * 4;
    let mut bytes = encode_keypoints(&kps, 0, 0, 8).unwrap();
    // Blank out keypoints 1 and 2 the way a tracker drops lost tracks:
    // zero position, zero score.
    bytes[cell..3 * cell].fill(0);
    let decoded = decode_keypoints(&bytes, 0, 0);
    assert_eq!(decoded.len(), 2);
    assert_eq!(decoded[1].score, kps[3].score);
}

#[test]
fn truncated_payload_discards_the_cell() {
    let d = 32;
    let kps = random_keypoints(1, 2, d, 0);
    let side = encoder_length_for(2, d, 0);
    let bytes = encode_keypoints(&kps, d, 0, side).unwrap();

    // Cut the buffer inside the second keypoint's descriptor.
    let cell = pixels_per_keypoint(d, 0) * 4;
    let cut = cell + 8 + d / 2;
    let decoded = decode_keypoints(&bytes[..cut], d, 0);
    assert_eq!(decoded.len(), 1, "partial cell must be discarded");
}

#[test]
fn zero_length_descriptors_decode() {
    // Keypoints without descriptors are kept, not rejected.
    let kps = random_keypoints(13, 6, 0, 0);
    let side = encoder_length_for(6, 0, 0);
    let bytes = encode_keypoints(&kps, 0, 0, side).unwrap();
    let decoded = decode_keypoints(&bytes, 0, 0);
    assert_eq!(decoded.len(), 6);
    assert!(decoded.iter().all(|k| k.descriptor.is_empty()));
}

// ===== Capacity geometry =====

#[test]
fn encoder_length_always_fits_capacity_plus_sentinel() {
    for capacity in [0usize, 1, 2, 10, 100, 300, 2048] {
        for (d, e) in [(0usize, 0usize), (32, 0), (32, 8), (5, 3)] {
            let side = encoder_length_for(capacity, d, e);
            assert!(
                cell_count(side, d, e) > capacity,
                "side {side} holds {} cells, capacity {capacity} (d={d}, e={e})",
                cell_count(side, d, e)
            );
        }
    }
}

// ===== Clipping (host mirror of the clipper kernel) =====

#[test]
fn overflow_clips_to_best_scores_in_descending_order() {
    // 300 candidates, keep 100: exactly the strongest 100, descending.
    let kps = random_keypoints(77, 300, 0, 0);
    let clipped = clip_by_score(&kps, 100);
    assert_eq!(clipped.len(), 100);
    for pair in clipped.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }

    let mut scores: Vec<u16> = kps.iter().map(|k| k.score).collect();
    scores.sort_unstable_by(|a, b| b.cmp(a));
    let expect: Vec<u16> = scores[..100].to_vec();
    let got: Vec<u16> = clipped.iter().map(|k| k.score).collect();
    assert_eq!(got, expect);
}

#[test]
fn clip_below_size_keeps_everything() {
    let kps = random_keypoints(1, 7, 0, 0);
    assert_eq!(clip_by_score(&kps, 100).len(), 7);
}

// ===== Sparse scan sanity against a synthetic detector image =====

#[test]
fn sparse_scan_finds_row_major_order() {
    let (w, h) = (32u32, 32u32);
    let mut rgba = vec![0u8; (w * h * 4) as usize];
    let spots = [(4u32, 2u32, 50u8), (30, 2, 90), (0, 9, 255), (31, 31, 1)];
    for &(x, y, s) in &spots {
        rgba[((y * w + x) * 4) as usize] = s;
    }
    let found = scan_sparse(&rgba, w, h);
    assert_eq!(found.len(), spots.len());
    for (kp, &(x, y, s)) in found.iter().zip(&spots) {
        assert_eq!((kp.x, kp.y, kp.score), (x, y, s));
    }
}
