use std::io::Cursor;

use image::{ImageFormat, RgbImage};

use super::backend::RawDetection;

/// A labelled detection. Center-form box in original image pixels.
#[derive(Clone, Debug, PartialEq)]
pub struct BoundingBox {
    pub class_id: usize,
    pub class_name: String,
    pub confidence: f32,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub(crate) fn from_raw(raw: &RawDetection, class_name: String) -> Self {
        Self {
            class_id: raw.class_id,
            class_name,
            confidence: raw.confidence,
            x: raw.x,
            y: raw.y,
            width: raw.width,
            height: raw.height,
        }
    }

    /// Corner form: (left, top, right, bottom).
    pub fn corners(&self) -> (f32, f32, f32, f32) {
        let half_w = self.width / 2.0;
        let half_h = self.height / 2.0;
        (
            self.x - half_w,
            self.y - half_h,
            self.x + half_w,
            self.y + half_h,
        )
    }
}

/// Per-image output of a detection run.
#[derive(Clone, Debug)]
pub struct InferenceResult {
    pub annotated_image: RgbImage,
    /// In the order the backend returned them.
    pub boxes: Vec<BoundingBox>,
}

impl InferenceResult {
    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    /// PNG bytes of the annotated image.
    pub fn encode_png(&self) -> Result<Vec<u8>, image::ImageError> {
        let mut out = Cursor::new(Vec::new());
        self.annotated_image.write_to(&mut out, ImageFormat::Png)?;
        Ok(out.into_inner())
    }
}
