//! Per-frame work: detect, tally against the vocabulary, annotate, encode.

use std::sync::Arc;

use roadwatch_core::{Detection, Detector, Frame, FrameCounts, LabelVocabulary, VisionError};
use tracing::trace;

use crate::render::{annotate, encode_frame_b64};

/// Result of processing one frame.
#[derive(Clone, Debug)]
pub struct ProcessedFrame {
    pub counts: FrameCounts,
    /// Base64 JPEG of the annotated frame.
    pub frame_b64: String,
    pub detections: Vec<Detection>,
}

/// Shared, stateless frame processor. One instance serves every session.
pub struct FramePipeline {
    detector: Arc<dyn Detector>,
    vocabulary: LabelVocabulary,
    jpeg_quality: u8,
}

impl FramePipeline {
    pub fn new(detector: Arc<dyn Detector>, vocabulary: LabelVocabulary, jpeg_quality: u8) -> Self {
        Self {
            detector,
            vocabulary,
            jpeg_quality,
        }
    }

    /// Blocking. Call from a blocking-capable thread.
    pub fn process(&self, frame: &Frame) -> Result<ProcessedFrame, VisionError> {
        let detections = self.detector.detect(frame)?;
        let counts = FrameCounts::tally(&self.vocabulary, &detections);
        let annotated = annotate(frame, &detections);
        let frame_b64 = encode_frame_b64(&annotated, self.jpeg_quality)?;
        trace!(
            detections = detections.len(),
            counted = counts.total(),
            bytes = frame_b64.len(),
            "frame processed"
        );
        Ok(ProcessedFrame {
            counts,
            frame_b64,
            detections,
        })
    }
}
