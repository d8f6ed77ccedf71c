use anyhow::Result;
use image::RgbImage;

/// Backend output before labelling and threshold enforcement.
///
/// Boxes are center-form in the pixel space of the image passed to `infer`.
#[derive(Clone, Debug, PartialEq)]
pub struct RawDetection {
    pub class_id: usize,
    pub confidence: f32,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Detector backend trait.
///
/// This is the only seam between the session and a concrete detection library.
/// Any backend that can map an RGB image to class-scored boxes can sit behind it.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Class labels, indexed by class id.
    fn labels(&self) -> &[String];

    /// Run detection on an image.
    ///
    /// Backends may drop boxes under `confidence_threshold` early; callers still
    /// enforce the threshold on whatever comes back. Must be deterministic for
    /// identical pixels and threshold.
    fn infer(&mut self, image: &RgbImage, confidence_threshold: f32)
        -> Result<Vec<RawDetection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
