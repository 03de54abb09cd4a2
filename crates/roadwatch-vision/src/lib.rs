//! # roadwatch-vision
//!
//! Concrete implementations of the decoding and detection seams from
//! `roadwatch-core`, plus the per-frame pipeline that turns a decoded frame
//! into counts and an annotated JPEG.

pub mod ffmpeg;
pub mod mock;
pub mod pipeline;
pub mod postprocess;
pub mod render;
pub mod yolo;

pub use ffmpeg::{FfmpegFrameSource, FfmpegOpener};
pub use pipeline::{FramePipeline, ProcessedFrame};
pub use yolo::{YoloDetector, YoloOptions};
