//! Decoding for YOLO-style detection heads.
//!
//! The head emits one tensor shaped `[1, 4 + classes, anchors]`: rows 0..4 hold the
//! center-form box in model input pixels, the remaining rows hold per-class scores.

use anyhow::{anyhow, Result};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};

use crate::detect::backend::RawDetection;

const PAD_VALUE: u8 = 114;

#[derive(Clone, Debug, PartialEq)]
pub struct YoloParams {
    /// Square model input edge, in pixels.
    pub input_size: u32,
    pub iou_threshold: f32,
    pub max_detections: usize,
}

impl Default for YoloParams {
    fn default() -> Self {
        Self {
            input_size: 640,
            iou_threshold: 0.45,
            max_detections: 300,
        }
    }
}

/// Aspect-preserving resize onto a padded square canvas.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub source_width: u32,
    pub source_height: u32,
}

impl Letterbox {
    pub fn new(source_width: u32, source_height: u32, input_size: u32) -> Self {
        let scale = (input_size as f32 / source_width.max(1) as f32)
            .min(input_size as f32 / source_height.max(1) as f32);
        let scaled_w = (source_width as f32 * scale).round();
        let scaled_h = (source_height as f32 * scale).round();
        Self {
            scale,
            pad_x: ((input_size as f32 - scaled_w) / 2.0).floor(),
            pad_y: ((input_size as f32 - scaled_h) / 2.0).floor(),
            source_width,
            source_height,
        }
    }

    pub fn apply(&self, image: &RgbImage, input_size: u32) -> RgbImage {
        let scaled_w = ((self.source_width as f32 * self.scale).round() as u32).max(1);
        let scaled_h = ((self.source_height as f32 * self.scale).round() as u32).max(1);
        let resized = imageops::resize(image, scaled_w, scaled_h, FilterType::Triangle);
        let mut canvas = RgbImage::from_pixel(input_size, input_size, Rgb([PAD_VALUE; 3]));
        imageops::overlay(
            &mut canvas,
            &resized,
            self.pad_x as i64,
            self.pad_y as i64,
        );
        canvas
    }

    /// Map a center-form box from model input space back to the source image,
    /// clipped to the image bounds.
    pub fn unmap(&self, x: f32, y: f32, width: f32, height: f32) -> (f32, f32, f32, f32) {
        let max_x = self.source_width as f32;
        let max_y = self.source_height as f32;
        let left = ((x - width / 2.0 - self.pad_x) / self.scale).clamp(0.0, max_x);
        let top = ((y - height / 2.0 - self.pad_y) / self.scale).clamp(0.0, max_y);
        let right = ((x + width / 2.0 - self.pad_x) / self.scale).clamp(0.0, max_x);
        let bottom = ((y + height / 2.0 - self.pad_y) / self.scale).clamp(0.0, max_y);
        (
            (left + right) / 2.0,
            (top + bottom) / 2.0,
            right - left,
            bottom - top,
        )
    }
}

/// Decode a flattened `[1, 4 + classes, anchors]` head into detections ordered by
/// descending confidence, after per-class NMS.
pub fn decode(
    output: &[f32],
    shape: &[usize],
    class_count: usize,
    letterbox: &Letterbox,
    confidence_threshold: f32,
    params: &YoloParams,
) -> Result<Vec<RawDetection>> {
    let (channels, anchors) = match shape {
        [1, channels, anchors] => (*channels, *anchors),
        _ => return Err(anyhow!("unexpected detection head shape {:?}", shape)),
    };
    if channels != 4 + class_count {
        return Err(anyhow!(
            "detection head has {} channels, expected {} for {} classes",
            channels,
            4 + class_count,
            class_count
        ));
    }
    if output.len() != channels * anchors {
        return Err(anyhow!(
            "detection head holds {} values, expected {}",
            output.len(),
            channels * anchors
        ));
    }

    let at = |row: usize, anchor: usize| output[row * anchors + anchor];
    let mut candidates = Vec::new();
    for anchor in 0..anchors {
        let mut best = (0usize, f32::NEG_INFINITY);
        for class_id in 0..class_count {
            let score = at(4 + class_id, anchor);
            if score > best.1 {
                best = (class_id, score);
            }
        }
        let (class_id, confidence) = best;
        if !confidence.is_finite() || confidence < confidence_threshold {
            continue;
        }
        let (x, y, width, height) = letterbox.unmap(
            at(0, anchor),
            at(1, anchor),
            at(2, anchor),
            at(3, anchor),
        );
        if width <= 0.0 || height <= 0.0 {
            continue;
        }
        candidates.push(RawDetection {
            class_id,
            confidence: confidence.min(1.0),
            x,
            y,
            width,
            height,
        });
    }

    let mut kept = non_max_suppression(candidates, params.iou_threshold);
    kept.truncate(params.max_detections);
    Ok(kept)
}

/// Greedy per-class NMS. Output is sorted by descending confidence.
pub fn non_max_suppression(mut detections: Vec<RawDetection>, iou_threshold: f32) -> Vec<RawDetection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<RawDetection> = Vec::with_capacity(detections.len());
    for candidate in detections {
        let suppressed = kept.iter().any(|k| {
            k.class_id == candidate.class_id && iou(k, &candidate) > iou_threshold
        });
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}

pub fn iou(a: &RawDetection, b: &RawDetection) -> f32 {
    let (a_left, a_top) = (a.x - a.width / 2.0, a.y - a.height / 2.0);
    let (b_left, b_top) = (b.x - b.width / 2.0, b.y - b.height / 2.0);
    let left = a_left.max(b_left);
    let top = a_top.max(b_top);
    let right = (a_left + a.width).min(b_left + b.width);
    let bottom = (a_top + a.height).min(b_top + b.height);
    if right <= left || bottom <= top {
        return 0.0;
    }
    let intersection = (right - left) * (bottom - top);
    let union = a.width * a.height + b.width * b.height - intersection;
    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}
