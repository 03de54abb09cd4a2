//! In-process stand-ins for the decoder and detector.
//!
//! Used by tests and by anyone wiring the server without ffmpeg or a model.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use image::Rgb;
use roadwatch_core::{Detection, Detector, Frame, FrameSource, VideoOpener, VisionError};

/// Gray level added per synthetic frame. Frame `i` is filled with
/// `(i * SHADE_STEP) % 256`, coarse enough to survive JPEG.
pub const SHADE_STEP: usize = 16;

/// Recover a synthetic frame's index (mod 16) from its bottom-right pixel.
pub fn synthetic_frame_index(frame: &Frame) -> usize {
    let (w, h) = frame.dimensions();
    let shade = frame.get_pixel(w.saturating_sub(1), h.saturating_sub(1)).0[0];
    (usize::from(shade) + SHADE_STEP / 2) / SHADE_STEP % (256 / SHADE_STEP)
}

/// Opens any existing file as `frames` solid-color frames.
#[derive(Clone, Debug)]
pub struct SyntheticOpener {
    pub frames: usize,
    pub width: u32,
    pub height: u32,
    /// Fail with a decode error after this many frames.
    pub fail_after: Option<usize>,
}

impl SyntheticOpener {
    pub fn new(frames: usize) -> Self {
        Self {
            frames,
            width: 32,
            height: 24,
            fail_after: None,
        }
    }

    pub fn failing_after(mut self, frames: usize) -> Self {
        self.fail_after = Some(frames);
        self
    }
}

impl VideoOpener for SyntheticOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn FrameSource>, VisionError> {
        if !path.is_file() {
            return Err(VisionError::open(path, "no such file"));
        }
        Ok(Box::new(SyntheticSource {
            remaining: self.frames,
            produced: 0,
            width: self.width,
            height: self.height,
            fail_after: self.fail_after,
        }))
    }
}

/// Frame source backing [`SyntheticOpener`].
#[derive(Debug)]
pub struct SyntheticSource {
    remaining: usize,
    produced: usize,
    width: u32,
    height: u32,
    fail_after: Option<usize>,
}

impl FrameSource for SyntheticSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, VisionError> {
        if self.fail_after == Some(self.produced) {
            return Err(VisionError::Decode(format!(
                "synthetic failure after {} frames",
                self.produced
            )));
        }
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;
        // Shade encodes the frame index so order is observable.
        let shade = (self.produced * SHADE_STEP % 256) as u8;
        self.produced += 1;
        Ok(Some(Frame::from_pixel(
            self.width,
            self.height,
            Rgb([shade, shade, shade]),
        )))
    }
}

/// Opener that always fails.
#[derive(Clone, Copy, Debug, Default)]
pub struct FailingOpener;

impl VideoOpener for FailingOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn FrameSource>, VisionError> {
        Err(VisionError::open(path, "unreadable container"))
    }
}

/// Returns the same detections for every frame and counts calls.
#[derive(Debug, Default)]
pub struct ScriptedDetector {
    detections: Vec<Detection>,
    calls: AtomicUsize,
}

impl ScriptedDetector {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self {
            detections,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Detector for ScriptedDetector {
    fn name(&self) -> &str {
        "scripted"
    }

    fn detect(&self, _frame: &Frame) -> Result<Vec<Detection>, VisionError> {
        let _ = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.detections.clone())
    }
}

/// Detector whose every call fails.
#[derive(Clone, Copy, Debug, Default)]
pub struct FailingDetector;

impl Detector for FailingDetector {
    fn name(&self) -> &str {
        "failing"
    }

    fn detect(&self, _frame: &Frame) -> Result<Vec<Detection>, VisionError> {
        Err(VisionError::Inference("scripted failure".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_source_yields_n_frames_in_order() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut source = SyntheticOpener::new(3).open(file.path()).unwrap();
        for expected in 0..3 {
            let frame = source.next_frame().unwrap().unwrap();
            assert_eq!(usize::from(frame.get_pixel(0, 0).0[0]), expected * SHADE_STEP);
            assert_eq!(synthetic_frame_index(&frame), expected);
            assert_eq!(frame.dimensions(), (32, 24));
        }
        assert!(source.next_frame().unwrap().is_none());
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn frame_index_tolerates_small_drift() {
        let frame = Frame::from_pixel(4, 4, Rgb([3 * 16 + 5, 0, 0]));
        assert_eq!(synthetic_frame_index(&frame), 3);
        let frame = Frame::from_pixel(4, 4, Rgb([2 * 16 - 4, 0, 0]));
        assert_eq!(synthetic_frame_index(&frame), 2);
    }

    #[test]
    fn synthetic_opener_requires_existing_file() {
        let err = SyntheticOpener::new(1)
            .open(Path::new("/definitely/not/here.mp4"))
            .err()
            .unwrap();
        assert_eq!(err.error_kind(), "open");
    }

    #[test]
    fn synthetic_source_fails_after_k() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut source = SyntheticOpener::new(5)
            .failing_after(2)
            .open(file.path())
            .unwrap();
        assert!(source.next_frame().unwrap().is_some());
        assert!(source.next_frame().unwrap().is_some());
        assert_eq!(source.next_frame().unwrap_err().error_kind(), "decode");
    }

    #[test]
    fn failing_opener_errors() {
        assert!(FailingOpener.open(Path::new("/tmp/x.mp4")).is_err());
    }

    #[test]
    fn scripted_detector_counts_calls() {
        let detector = ScriptedDetector::new(Vec::new());
        let frame = Frame::new(2, 2);
        let _ = detector.detect(&frame).unwrap();
        let _ = detector.detect(&frame).unwrap();
        assert_eq!(detector.calls(), 2);
        assert!(FailingDetector.detect(&frame).is_err());
    }
}
