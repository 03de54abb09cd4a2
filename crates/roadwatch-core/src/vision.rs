//! Seams for the external vision collaborators: a frame decoder, an object
//! detector and the frame type they exchange.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::VisionError;

/// A decoded video frame, 8-bit RGB.
pub type Frame = image::RgbImage;

/// Axis-aligned box in frame pixel coordinates (top-left origin).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Intersection over union; 0.0 for disjoint or degenerate boxes.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        let right = (self.x + self.width).min(other.x + other.width);
        let bottom = (self.y + self.height).min(other.y + other.height);
        if right <= left || bottom <= top {
            return 0.0;
        }
        let inter = (right - left) * (bottom - top);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 || !union.is_finite() {
            return 0.0;
        }
        inter / union
    }
}

/// One labeled region returned by a detector.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class_id: usize,
    pub label: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// Object detector. Implementations are blocking and may be CPU-bound;
/// callers run them off the async runtime.
pub trait Detector: Send + Sync {
    fn name(&self) -> &str;
    fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, VisionError>;
}

/// Sequential frame stream over one video. Dropping the source releases it.
pub trait FrameSource: Send {
    /// Next frame in presentation order, or `Ok(None)` at end of stream.
    fn next_frame(&mut self) -> Result<Option<Frame>, VisionError>;
}

/// Opens a video file as a [`FrameSource`].
pub trait VideoOpener: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn FrameSource>, VisionError>;
}
