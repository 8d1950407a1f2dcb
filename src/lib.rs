// visionflow — a GPU-accelerated computer-vision pipeline runtime.
//
// A pipeline is a directed acyclic graph of typed nodes through which
// frames flow: sources ingest media, transforms dispatch compute kernels
// over pooled textures, sinks read results back to the host. Keypoint
// lists travel between kernels packed into fixed-size textures; the codec
// module defines that wire format and the host-side decoder.
//
// Quick tour:
//   gpu       — device context, texture arena/pool, async read-back
//   pipeline  — ports, messages, nodes, the scheduler
//   nodes     — the node library (image::*, keypoint::*)
//   codec     — the keypoint wire format
//   matrix    — the CPU opcode interpreter for dense linear algebra
//
// ```no_run
// use visionflow::prelude::*;
//
// let mut ctx = DeviceContext::new()?;
// let mut pipeline = Pipeline::new();
//
// let media = BufferMedia::uniform(64, 64, [128, 128, 128, 255]);
// let source = pipeline.add(nodes::image::source(Box::new(media)))?;
// let grey = pipeline.add(nodes::image::greyscale())?;
// let detector = pipeline.add(nodes::keypoint::detector::fast(Default::default()))?;
// let sink = pipeline.add(nodes::keypoint::sink())?;
//
// pipeline.connect(source.output("out"), grey.input("in"))?;
// pipeline.connect(grey.output("out"), detector.input("in"))?;
// pipeline.connect(detector.output("out"), sink.input("in"))?;
// pipeline.init()?;
//
// let keypoints = pipeline.run(&mut ctx)?;
// # let _ = keypoints;
// # Ok::<(), visionflow::Error>(())
// ```

pub mod codec;
pub mod error;
pub mod geometry;
pub mod gpu;
pub mod keypoint;
pub mod matrix;
pub mod media;
pub mod nodes;
pub mod pipeline;

pub use error::{Error, Result};
pub use keypoint::Keypoint;

/// One-stop imports for pipeline construction.
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::geometry::{Point2, Size, Vector2};
    pub use crate::gpu::{DeviceContext, TextureFormat};
    pub use crate::keypoint::Keypoint;
    pub use crate::matrix::{execute as matrix_execute, Matrix, Operation};
    pub use crate::media::{BufferMedia, Media};
    pub use crate::nodes;
    pub use crate::pipeline::{ImageFormat, Pipeline, SinkOutput};
}
