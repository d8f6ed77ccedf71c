//! Box rendering for annotated results.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use ab_glyph::{FontVec, PxScale};
use anyhow::{anyhow, Context, Result};
use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;

use super::result::BoundingBox;

const PALETTE: [[u8; 3]; 10] = [
    [255, 56, 56],
    [255, 157, 151],
    [255, 112, 31],
    [255, 178, 29],
    [207, 210, 49],
    [72, 249, 10],
    [26, 147, 52],
    [0, 212, 187],
    [44, 153, 168],
    [0, 194, 255],
];

/// Border color for a class id.
pub fn class_color(class_id: usize) -> Rgb<u8> {
    Rgb(PALETTE[class_id % PALETTE.len()])
}

#[derive(Clone)]
pub struct AnnotationStyle {
    pub border_width: u32,
    pub font_size: f32,
    pub text_color: [u8; 3],
    /// Captions are drawn only when a font is loaded.
    pub font: Option<Arc<FontVec>>,
}

impl Default for AnnotationStyle {
    fn default() -> Self {
        Self {
            border_width: 2,
            font_size: 16.0,
            text_color: [255, 255, 255],
            font: None,
        }
    }
}

impl fmt::Debug for AnnotationStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnnotationStyle")
            .field("border_width", &self.border_width)
            .field("font_size", &self.font_size)
            .field("text_color", &self.text_color)
            .field("font", &self.font.is_some())
            .finish()
    }
}

impl AnnotationStyle {
    /// Load a TrueType/OpenType font for box captions.
    pub fn with_font_file(mut self, path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read font {}", path.display()))?;
        let font = FontVec::try_from_vec(bytes)
            .map_err(|_| anyhow!("{} is not a usable font", path.display()))?;
        self.font = Some(Arc::new(font));
        Ok(self)
    }
}

/// Draw every box (and its caption, when a font is set) onto a copy of `image`.
///
/// Boxes are clipped to the image; boxes with nothing visible are skipped.
pub fn annotate(image: &DynamicImage, boxes: &[BoundingBox], style: &AnnotationStyle) -> RgbImage {
    let mut canvas = image.to_rgb8();
    let (image_width, image_height) = canvas.dimensions();
    let border_width = style
        .border_width
        .min(image_width.max(image_height))
        .max(1);
    for bbox in boxes {
        let Some((left, top, width, height)) = clip_to_image(bbox, image_width, image_height)
        else {
            log::debug!(
                "box {:?} for class {} lies outside the image",
                bbox.corners(),
                bbox.class_name
            );
            continue;
        };
        let color = class_color(bbox.class_id);

        for i in 0..border_width {
            let rect = Rect::at(left - i as i32, top - i as i32)
                .of_size(width + 2 * i, height + 2 * i);
            draw_hollow_rect_mut(&mut canvas, rect, color);
        }

        if let Some(font) = &style.font {
            let caption = format!("{} {:.2}", bbox.class_name, bbox.confidence);
            let caption_y = top
                .saturating_sub(border_width as i32)
                .saturating_sub(style.font_size.ceil() as i32)
                .max(0);
            draw_text_mut(
                &mut canvas,
                Rgb(style.text_color),
                left,
                caption_y,
                PxScale::from(style.font_size),
                font.as_ref(),
                &caption,
            );
        }
    }
    canvas
}

/// Pixel rectangle `(left, top, width, height)` of `bbox` clipped to an
/// `image_width` x `image_height` image.
fn clip_to_image(
    bbox: &BoundingBox,
    image_width: u32,
    image_height: u32,
) -> Option<(i32, i32, u32, u32)> {
    let (x1, y1, x2, y2) = bbox.corners();
    if ![x1, y1, x2, y2].iter().all(|v| v.is_finite()) {
        return None;
    }
    let (max_x, max_y) = (image_width as f32, image_height as f32);
    if x2 < 0.0 || y2 < 0.0 || x1 >= max_x || y1 >= max_y {
        return None;
    }
    let left = x1.clamp(0.0, max_x).round() as i32;
    let top = y1.clamp(0.0, max_y).round() as i32;
    let right = x2.clamp(0.0, max_x).round() as i32;
    let bottom = y2.clamp(0.0, max_y).round() as i32;
    Some((
        left,
        top,
        (right - left).max(1) as u32,
        (bottom - top).max(1) as u32,
    ))
}
