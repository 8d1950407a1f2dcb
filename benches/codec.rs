// benches/codec.rs — host-side codec throughput.
//
// The decoder runs on every frame that ends in a keypoint sink, so its
// cost is part of the per-frame budget. The sparse scan mirrors what one
// encoder-kernel thread does; benchmarking it on the CPU tracks how much
// the skip hints actually save.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use visionflow::codec::{
    decode_keypoints, encode_keypoints, encoder_length_for, find_qth_sparse,
};
use visionflow::geometry::Point2;
use visionflow::keypoint::Keypoint;

fn fixture(count: usize, descriptor_size: usize) -> (Vec<u8>, usize) {
    let mut seed = 0x1234_5678u32;
    let mut byte = || {
        seed = seed.wrapping_mul(1664525).wrapping_add(1013904223);
        (seed >> 24) as u8
    };
    let keypoints: Vec<Keypoint> = (0..count)
        .map(|i| Keypoint {
            position: Point2::new((i % 640) as f32 + 0.25, (i / 640) as f32 + 0.5),
            lod: 0.0,
            orientation: 0.0,
            score: u16::from_le_bytes([byte(), byte()]),
            descriptor: (0..descriptor_size).map(|_| byte()).collect(),
            extra: Vec::new(),
        })
        .collect();
    let side = encoder_length_for(count, descriptor_size, 0);
    let bytes = encode_keypoints(&keypoints, descriptor_size, 0, side).unwrap();
    (bytes, side)
}

fn bench_decode(c: &mut Criterion) {
    let (bare, _) = fixture(1024, 0);
    c.bench_function("decode 1024 bare keypoints", |b| {
        b.iter(|| decode_keypoints(black_box(&bare), 0, 0));
    });

    let (described, _) = fixture(1024, 32);
    c.bench_function("decode 1024 keypoints with descriptors", |b| {
        b.iter(|| decode_keypoints(black_box(&described), 32, 0));
    });
}

fn bench_sparse_scan(c: &mut Criterion) {
    // 640x480 frame, ~500 keypoints, honest skip hints.
    let (w, h) = (640u32, 480u32);
    let mut rgba = vec![0u8; (w * h * 4) as usize];
    let positions: Vec<usize> = (0..500).map(|i| i * 613 + 7).collect();
    for &p in &positions {
        rgba[p * 4] = 128;
    }
    for window in positions.windows(2) {
        let gap = window[1] - window[0] - 1;
        rgba[window[0] * 4 + 2] = gap.min(255) as u8;
    }
    // Hints for the empty run before the first keypoint.
    for p in 0..positions[0] {
        rgba[p * 4 + 2] = (positions[0] - p - 1).min(255) as u8;
    }

    c.bench_function("find 400th keypoint with skip hints", |b| {
        b.iter(|| find_qth_sparse(black_box(&rgba), w, h, 400));
    });
}

criterion_group!(benches, bench_decode, bench_sparse_scan);
criterion_main!(benches);
