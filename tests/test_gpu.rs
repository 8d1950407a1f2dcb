// tests/test_gpu.rs — end-to-end pipeline scenarios on a real device.
//
// These need a working GPU, so they are ignored by default and `cargo
// test` stays green in CI. Run them with:
//
//   cargo test --test test_gpu -- --include-ignored
//
// Scenarios: alpha blending, detection (single corner / empty image /
// overflow clipping), resource conservation across runs, read
// cancellation, and the run-before-init guard.

use visionflow::error::Error;
use visionflow::gpu::{DeviceContext, TextureFormat};
use visionflow::media::BufferMedia;
use visionflow::nodes;
use visionflow::pipeline::{Pipeline, SinkOutput};

fn context() -> DeviceContext {
    DeviceContext::new().expect("these tests need a GPU device")
}

/// Dark frame with a bright quadrant starting at (corner_x, corner_y):
/// exactly one interior corner.
fn quadrant_media(size: u32, corner_x: u32, corner_y: u32) -> BufferMedia {
    let mut media = BufferMedia::uniform(size, size, [20, 20, 20, 255]);
    for y in corner_y..size {
        for x in corner_x..size {
            media.set_pixel(x, y, [220, 220, 220, 255]);
        }
    }
    media
}

fn detection_pipeline(media: BufferMedia, params: nodes::keypoint::FastParams) -> Pipeline {
    let mut p = Pipeline::new();
    let source = p.add(nodes::image::source(Box::new(media))).unwrap();
    let grey = p.add(nodes::image::greyscale()).unwrap();
    let detector = p.add(nodes::keypoint::detector::fast(params)).unwrap();
    let sink = p.add(nodes::keypoint::sink()).unwrap();
    p.connect(source.output("out"), grey.input("in")).unwrap();
    p.connect(grey.output("out"), detector.input("in")).unwrap();
    p.connect(detector.output("out"), sink.input("in")).unwrap();
    p.init().unwrap();
    p
}

#[test]
#[ignore = "requires a GPU"]
fn alpha_blend_of_uniform_frames() {
    // S1: 0.5 * 128 + 0.5 * 64 + 0 = 96, every pixel, alpha included.
    let mut ctx = context();
    let mut p = Pipeline::new();
    let a = p
        .add(nodes::image::source(Box::new(BufferMedia::uniform(
            4,
            4,
            [128, 128, 128, 255],
        ))))
        .unwrap();
    let b = p
        .add(nodes::image::source(Box::new(BufferMedia::uniform(
            4,
            4,
            [64, 64, 64, 255],
        ))))
        .unwrap();
    let mix = p
        .add(nodes::image::mixer(nodes::image::MixerParams {
            alpha: 0.5,
            beta: 0.5,
            gamma: 0.0,
        }))
        .unwrap();
    let sink = p.add(nodes::image::sink()).unwrap();
    p.connect(a.output("out"), mix.input("in0")).unwrap();
    p.connect(b.output("out"), mix.input("in1")).unwrap();
    p.connect(mix.output("out"), sink.input("in")).unwrap();
    p.init().unwrap();

    let SinkOutput::Image {
        width,
        height,
        pixels,
    } = p.run(&mut ctx).unwrap()
    else {
        panic!("image sink must export an image");
    };
    assert_eq!((width, height), (4, 4));
    for px in pixels.chunks_exact(4) {
        assert_eq!(px, &[96, 96, 96, 255]);
    }
}

#[test]
#[ignore = "requires a GPU"]
fn single_corner_detected_at_subpixel_tolerance() {
    // S2: one synthetic corner at (3, 5) in an 8x8 frame, capacity 1
    // (encoder length 2).
    let mut ctx = context();
    let mut p = detection_pipeline(
        quadrant_media(8, 3, 5),
        nodes::keypoint::FastParams {
            threshold: 10,
            capacity: 1,
        },
    );

    let SinkOutput::Keypoints(kps) = p.run(&mut ctx).unwrap() else {
        panic!("keypoint sink must export keypoints");
    };
    assert_eq!(kps.len(), 1, "expected exactly one keypoint, got {kps:?}");
    assert!((kps[0].position.x - 3.0).abs() <= 1.0 / 8.0);
    assert!((kps[0].position.y - 5.0).abs() <= 1.0 / 8.0);
}

#[test]
#[ignore = "requires a GPU"]
fn uniform_image_detects_nothing() {
    // S3.
    let mut ctx = context();
    let media = BufferMedia::uniform(16, 16, [90, 90, 90, 255]);
    let mut p = detection_pipeline(media, Default::default());

    let SinkOutput::Keypoints(kps) = p.run(&mut ctx).unwrap() else {
        panic!("keypoint sink must export keypoints");
    };
    assert!(kps.is_empty(), "uniform frame produced {:?}", kps.len());
}

#[test]
#[ignore = "requires a GPU"]
fn clipper_keeps_best_hundred_in_score_order() {
    // S4: a busy frame, clipper size 100.
    let mut ctx = context();
    let mut media = BufferMedia::uniform(128, 128, [20, 20, 20, 255]);
    // A grid of bright squares produces several hundred corner
    // candidates.
    for by in 0..8u32 {
        for bx in 0..8u32 {
            for y in 0..8u32 {
                for x in 0..8u32 {
                    media.set_pixel(bx * 16 + 4 + x, by * 16 + 4 + y, [220, 220, 220, 255]);
                }
            }
        }
    }

    let mut p = Pipeline::new();
    let source = p.add(nodes::image::source(Box::new(media))).unwrap();
    let grey = p.add(nodes::image::greyscale()).unwrap();
    let detector = p
        .add(nodes::keypoint::detector::fast(nodes::keypoint::FastParams {
            threshold: 20,
            capacity: 1024,
        }))
        .unwrap();
    let clip = p.add(nodes::keypoint::clipper(100)).unwrap();
    let sink = p.add(nodes::keypoint::sink()).unwrap();
    p.connect(source.output("out"), grey.input("in")).unwrap();
    p.connect(grey.output("out"), detector.input("in")).unwrap();
    p.connect(detector.output("out"), clip.input("in")).unwrap();
    p.connect(clip.output("out"), sink.input("in")).unwrap();
    p.init().unwrap();

    let SinkOutput::Keypoints(kps) = p.run(&mut ctx).unwrap() else {
        panic!("keypoint sink must export keypoints");
    };
    assert_eq!(kps.len(), 100);
    for pair in kps.windows(2) {
        assert!(
            pair[0].score >= pair[1].score,
            "clipper output must be ordered by descending score"
        );
    }
}

#[test]
#[ignore = "requires a GPU"]
fn pool_free_count_is_conserved_across_runs() {
    let mut ctx = context();
    let mut p = detection_pipeline(quadrant_media(32, 10, 12), Default::default());

    // First run warms the pool.
    p.run(&mut ctx).unwrap();
    let free_after_warmup = ctx.free_texture_count();
    assert_eq!(ctx.outstanding_scratch_count(), 0);

    for _ in 0..3 {
        p.run(&mut ctx).unwrap();
        assert_eq!(ctx.free_texture_count(), free_after_warmup);
        assert_eq!(ctx.outstanding_scratch_count(), 0);
    }
}

#[test]
#[ignore = "requires a GPU"]
fn cancelled_read_rejects_promptly() {
    let mut ctx = context();
    let texture = ctx.create_texture(16, 16, TextureFormat::Rgba8).unwrap();
    let pending = ctx.read_texture(texture);

    // Teardown cancels every pending read.
    ctx.cancel_reads();
    match ctx.wait_read(pending) {
        Err(Error::Cancelled(_)) => {}
        other => panic!("expected Cancelled, got {other:?}"),
    }
}

#[test]
#[ignore = "requires a GPU"]
fn run_before_init_is_an_illegal_operation() {
    let mut ctx = context();
    let mut p = Pipeline::new();
    let source = p
        .add(nodes::image::source(Box::new(BufferMedia::uniform(
            4,
            4,
            [0, 0, 0, 255],
        ))))
        .unwrap();
    let sink = p.add(nodes::image::sink()).unwrap();
    p.connect(source.output("out"), sink.input("in")).unwrap();

    match p.run(&mut ctx) {
        Err(Error::IllegalOperation(_)) => {}
        other => panic!("expected IllegalOperation, got {other:?}"),
    }
}

#[test]
#[ignore = "requires a GPU"]
fn rgba_frame_is_rejected_by_detector_expectation() {
    // The detector's input port expects greyscale; feeding it the raw
    // source frame fails the run, and the pool stays balanced.
    let mut ctx = context();
    let mut p = Pipeline::new();
    let source = p.add(nodes::image::source(Box::new(quadrant_media(8, 3, 4)))).unwrap();
    let detector = p
        .add(nodes::keypoint::detector::fast(Default::default()))
        .unwrap();
    let sink = p.add(nodes::keypoint::sink()).unwrap();
    p.connect(source.output("out"), detector.input("in")).unwrap();
    p.connect(detector.output("out"), sink.input("in")).unwrap();
    p.init().unwrap();

    match p.run(&mut ctx) {
        Err(Error::IllegalOperation(_)) => {}
        other => panic!("expected IllegalOperation, got {other:?}"),
    }
    assert_eq!(ctx.outstanding_scratch_count(), 0, "failed run must reclaim");
}

#[test]
#[ignore = "requires a GPU"]
fn buffer_node_delays_by_one_frame() {
    // Frame 1: buffer emits an empty list. Frame 2: it emits frame 1's
    // detections.
    let mut ctx = context();
    let mut p = Pipeline::new();
    let source = p.add(nodes::image::source(Box::new(quadrant_media(16, 5, 6)))).unwrap();
    let grey = p.add(nodes::image::greyscale()).unwrap();
    let detector = p
        .add(nodes::keypoint::detector::fast(nodes::keypoint::FastParams {
            threshold: 10,
            capacity: 64,
        }))
        .unwrap();
    let buffer = p.add(nodes::keypoint::buffer()).unwrap();
    let sink = p.add(nodes::keypoint::sink()).unwrap();
    p.connect(source.output("out"), grey.input("in")).unwrap();
    p.connect(grey.output("out"), detector.input("in")).unwrap();
    p.connect(detector.output("out"), buffer.input("in")).unwrap();
    p.connect(buffer.output("out"), sink.input("in")).unwrap();
    p.init().unwrap();

    let SinkOutput::Keypoints(first) = p.run(&mut ctx).unwrap() else {
        panic!("keypoint sink must export keypoints");
    };
    assert!(first.is_empty(), "first frame must see an empty buffer");

    let SinkOutput::Keypoints(second) = p.run(&mut ctx).unwrap() else {
        panic!("keypoint sink must export keypoints");
    };
    assert!(!second.is_empty(), "second frame must see frame one's list");

    p.release(&mut ctx);
}
