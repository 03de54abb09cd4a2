//! YOLOv8 detector on ONNX Runtime (feature `onnx`).
//!
//! Expects a standard Ultralytics export: input `images` shaped
//! `[1, 3, N, N]` (RGB, 0..1), output `output0` shaped `[1, 4 + C, A]`.
//! Without the feature, [`YoloDetector::load`] returns
//! [`VisionError::Unsupported`].

#[cfg(not(feature = "onnx"))]
use std::path::Path;

#[cfg(not(feature = "onnx"))]
use roadwatch_core::VisionError;

use crate::postprocess::COCO_CLASSES;

/// Detector tuning.
#[derive(Clone, Debug)]
pub struct YoloOptions {
    pub input_size: u32,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    /// Class names by model index. Defaults to COCO-80.
    pub class_names: Vec<String>,
}

impl Default for YoloOptions {
    fn default() -> Self {
        Self {
            input_size: 640,
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
            class_names: COCO_CLASSES.iter().map(|s| (*s).to_string()).collect(),
        }
    }
}

#[cfg(feature = "onnx")]
pub use onnx::YoloDetector;

#[cfg(feature = "onnx")]
mod onnx {
    #![allow(
        clippy::cast_possible_wrap,
        clippy::cast_sign_loss,
        clippy::cast_possible_truncation
    )]

    use std::path::Path;

    use image::imageops::{self, FilterType};
    use ort::session::builder::GraphOptimizationLevel;
    use ort::session::Session;
    use ort::value::Tensor;
    use parking_lot::Mutex;
    use roadwatch_core::{Detection, Detector, Frame, VisionError};
    use tracing::{debug, info};

    use super::YoloOptions;
    use crate::postprocess::{decode_yolov8, nms, DecodeParams};

    /// One loaded model shared by every session. `Session::run` needs
    /// exclusive access, so calls are serialized.
    pub struct YoloDetector {
        session: Mutex<Session>,
        options: YoloOptions,
    }

    impl YoloDetector {
        /// Load a model from disk. Blocking.
        pub fn load(path: &Path, options: YoloOptions) -> Result<Self, VisionError> {
            if !path.is_file() {
                return Err(VisionError::ModelLoad(format!(
                    "model not found: {}",
                    path.display()
                )));
            }
            info!(model = %path.display(), input_size = options.input_size, "loading ONNX model");

            let session = Session::builder()
                .map_err(|e| VisionError::ModelLoad(format!("session builder: {e}")))?
                .with_optimization_level(GraphOptimizationLevel::Level3)
                .map_err(|e| VisionError::ModelLoad(format!("optimization level: {e}")))?
                .with_log_level(ort::logging::LogLevel::Warning)
                .map_err(|e| VisionError::ModelLoad(format!("log level: {e}")))?
                .commit_from_file(path)
                .map_err(|e| VisionError::ModelLoad(format!("model load: {e}")))?;

            Ok(Self {
                session: Mutex::new(session),
                options,
            })
        }

        /// Resize to N×N and lay out as planar RGB (CHW) in 0..1.
        fn preprocess(&self, frame: &Frame) -> Vec<f32> {
            let size = self.options.input_size;
            let resized = imageops::resize(frame, size, size, FilterType::Triangle);
            let plane = (size as usize) * (size as usize);
            let mut input = vec![0.0f32; 3 * plane];
            for (i, pixel) in resized.pixels().enumerate() {
                for c in 0..3 {
                    input[c * plane + i] = f32::from(pixel.0[c]) / 255.0;
                }
            }
            input
        }
    }

    impl Detector for YoloDetector {
        fn name(&self) -> &str {
            "yolov8-onnx"
        }

        fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, VisionError> {
            let n = i64::from(self.options.input_size);
            let input = self.preprocess(frame);
            let tensor = Tensor::from_array(([1i64, 3, n, n], input))
                .map_err(|e| VisionError::Inference(format!("input tensor: {e}")))?;

            let mut session = self.session.lock();
            let outputs = session
                .run(ort::inputs!["images" => tensor])
                .map_err(|e| VisionError::Inference(format!("run: {e}")))?;

            let (shape, data) = outputs["output0"]
                .try_extract_tensor::<f32>()
                .map_err(|e| VisionError::Inference(format!("extract output: {e}")))?;

            let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
            if dims.len() != 3 || dims[0] != 1 || dims[1] <= 4 {
                return Err(VisionError::Inference(format!(
                    "unexpected output shape: {dims:?}"
                )));
            }

            let candidates = decode_yolov8(
                data,
                dims[2],
                &self.options.class_names,
                DecodeParams {
                    input_size: self.options.input_size,
                    frame_width: frame.width(),
                    frame_height: frame.height(),
                    confidence_threshold: self.options.confidence_threshold,
                },
            );
            let candidate_count = candidates.len();
            let kept = nms(candidates, self.options.iou_threshold);
            debug!(candidates = candidate_count, kept = kept.len(), "yolo detect");
            Ok(kept)
        }
    }
}

/// Placeholder so callers compile without the feature.
#[cfg(not(feature = "onnx"))]
#[derive(Debug)]
pub struct YoloDetector {
    _private: (),
}

#[cfg(not(feature = "onnx"))]
impl YoloDetector {
    pub fn load(path: &Path, _options: YoloOptions) -> Result<Self, VisionError> {
        Err(VisionError::Unsupported(format!(
            "cannot load {}: built without the `onnx` feature",
            path.display()
        )))
    }
}

#[cfg(not(feature = "onnx"))]
impl roadwatch_core::Detector for YoloDetector {
    fn name(&self) -> &str {
        "yolov8-unavailable"
    }

    fn detect(
        &self,
        _frame: &roadwatch_core::Frame,
    ) -> Result<Vec<roadwatch_core::Detection>, VisionError> {
        Err(VisionError::Unsupported("built without the `onnx` feature".into()))
    }
}
