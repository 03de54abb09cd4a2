//! YOLOv8 output decoding and class-wise non-maximum suppression.
//!
//! Kept free of the ONNX runtime so the math can be exercised with
//! hand-built output tensors.

use std::cmp::Ordering;

use roadwatch_core::{BoundingBox, Detection};

/// COCO-80 class names in YOLOv8 export order.
pub const COCO_CLASSES: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich", "orange",
    "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch", "potted plant",
    "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote", "keyboard", "cell phone",
    "microwave", "oven", "toaster", "sink", "refrigerator", "book", "clock", "vase", "scissors",
    "teddy bear", "hair drier", "toothbrush",
];

/// Geometry needed to map model-space boxes back onto the source frame.
#[derive(Clone, Copy, Debug)]
pub struct DecodeParams {
    /// Square model input edge in pixels.
    pub input_size: u32,
    pub frame_width: u32,
    pub frame_height: u32,
    pub confidence_threshold: f32,
}

/// Decode a `[1, 4 + C, A]` YOLOv8 output, flattened row-major.
///
/// Rows 0..4 hold `cx, cy, w, h` in model-input pixels; rows 4.. hold
/// per-class scores. Each anchor yields at most one candidate (its best
/// class) when that score clears the threshold. Boxes are clamped to the
/// frame.
pub fn decode_yolov8(
    output: &[f32],
    num_anchors: usize,
    class_names: &[String],
    params: DecodeParams,
) -> Vec<Detection> {
    if num_anchors == 0 || output.len() % num_anchors != 0 {
        return Vec::new();
    }
    let rows = output.len() / num_anchors;
    if rows <= 4 {
        return Vec::new();
    }
    let num_classes = rows - 4;
    let at = |row: usize, anchor: usize| output[row * num_anchors + anchor];

    let scale_x = params.frame_width as f32 / params.input_size as f32;
    let scale_y = params.frame_height as f32 / params.input_size as f32;
    let frame_w = params.frame_width as f32;
    let frame_h = params.frame_height as f32;

    let mut detections = Vec::new();
    for anchor in 0..num_anchors {
        let mut best_class = 0;
        let mut best_score = f32::NEG_INFINITY;
        for class in 0..num_classes {
            let score = at(4 + class, anchor);
            if score > best_score {
                best_score = score;
                best_class = class;
            }
        }
        if !best_score.is_finite() || best_score < params.confidence_threshold {
            continue;
        }

        let (cx, cy, w, h) = (at(0, anchor), at(1, anchor), at(2, anchor), at(3, anchor));
        if !(cx.is_finite() && cy.is_finite() && w.is_finite() && h.is_finite()) {
            continue;
        }

        let left = ((cx - w / 2.0) * scale_x).clamp(0.0, frame_w);
        let top = ((cy - h / 2.0) * scale_y).clamp(0.0, frame_h);
        let right = ((cx + w / 2.0) * scale_x).clamp(0.0, frame_w);
        let bottom = ((cy + h / 2.0) * scale_y).clamp(0.0, frame_h);
        if right <= left || bottom <= top {
            continue;
        }

        detections.push(Detection {
            class_id: best_class,
            label: class_label(class_names, best_class),
            confidence: best_score,
            bbox: BoundingBox::new(left, top, right - left, bottom - top),
        });
    }
    detections
}

/// Name for a class index, falling back to `class_<id>` past the table.
pub fn class_label(class_names: &[String], class_id: usize) -> String {
    class_names
        .get(class_id)
        .cloned()
        .unwrap_or_else(|| format!("class_{class_id}"))
}

/// Class-wise greedy NMS: within each class, keep the highest-confidence
/// box and drop any other whose IoU with a kept box exceeds the threshold.
/// Output is ordered by descending confidence.
pub fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.retain(|d| d.confidence.is_finite());
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
    });

    let mut keep: Vec<Detection> = Vec::with_capacity(detections.len());
    for candidate in detections {
        let suppressed = keep.iter().any(|kept| {
            kept.class_id == candidate.class_id && kept.bbox.iou(&candidate.bbox) > iou_threshold
        });
        if !suppressed {
            keep.push(candidate);
        }
    }
    keep
}
