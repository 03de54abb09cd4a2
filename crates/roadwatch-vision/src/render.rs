//! Box overlay and JPEG/base64 encoding of annotated frames.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::Rgb;
use roadwatch_core::{Detection, Frame, VisionError};

/// Box outline thickness in pixels.
pub const BOX_THICKNESS: u32 = 2;

const PALETTE: [Rgb<u8>; 8] = [
    Rgb([255, 56, 56]),
    Rgb([255, 157, 151]),
    Rgb([255, 112, 31]),
    Rgb([255, 178, 29]),
    Rgb([72, 249, 10]),
    Rgb([26, 147, 52]),
    Rgb([0, 194, 255]),
    Rgb([132, 56, 255]),
];

/// Outline color for a class id.
pub fn class_color(class_id: usize) -> Rgb<u8> {
    PALETTE[class_id % PALETTE.len()]
}

/// Copy of `frame` with one outlined box per detection.
pub fn annotate(frame: &Frame, detections: &[Detection]) -> Frame {
    let mut out = frame.clone();
    for detection in detections {
        draw_box(&mut out, detection);
    }
    out
}

fn draw_box(img: &mut Frame, detection: &Detection) {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return;
    }
    let bbox = detection.bbox;
    let clamp_x = |v: f32| (v.max(0.0) as u32).min(w - 1);
    let clamp_y = |v: f32| (v.max(0.0) as u32).min(h - 1);
    let left = clamp_x(bbox.x);
    let top = clamp_y(bbox.y);
    let right = clamp_x(bbox.x + bbox.width);
    let bottom = clamp_y(bbox.y + bbox.height);
    if right < left || bottom < top {
        return;
    }
    let color = class_color(detection.class_id);

    for t in 0..BOX_THICKNESS {
        let y_top = (top + t).min(bottom);
        let y_bottom = bottom.saturating_sub(t).max(top);
        for x in left..=right {
            img.put_pixel(x, y_top, color);
            img.put_pixel(x, y_bottom, color);
        }
        let x_left = (left + t).min(right);
        let x_right = right.saturating_sub(t).max(left);
        for y in top..=bottom {
            img.put_pixel(x_left, y, color);
            img.put_pixel(x_right, y, color);
        }
    }
}

/// Encode a frame as baseline JPEG. `quality` is clamped to 1..=100.
pub fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>, VisionError> {
    let mut buf = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
    frame
        .write_with_encoder(encoder)
        .map_err(|e| VisionError::Encode(e.to_string()))?;
    Ok(buf)
}

/// JPEG-encode then base64 (standard alphabet, padded).
pub fn encode_frame_b64(frame: &Frame, quality: u8) -> Result<String, VisionError> {
    Ok(STANDARD.encode(encode_jpeg(frame, quality)?))
}
