use std::path::{Path, PathBuf};

use image::DynamicImage;

use super::backend::DetectorBackend;
use super::backends::{StubBackend, YoloParams};
use super::render::{self, AnnotationStyle};
use super::result::{BoundingBox, InferenceResult};
use crate::error::{InferenceError, ModelLoadError, UnknownClassError};

/// Label used when a backend reports a class id outside its label set.
pub const UNKNOWN_CLASS: &str = "unknown";

/// How to load and run a detector.
#[derive(Clone, Debug, Default)]
pub struct ModelOptions {
    /// Labels file for ONNX models. Defaults to `<weights>.names`.
    pub labels_path: Option<PathBuf>,
    pub yolo: YoloParams,
    pub annotation: AnnotationStyle,
}

/// A loaded detector.
pub struct Model {
    backend: Box<dyn DetectorBackend>,
    style: AnnotationStyle,
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("backend", &self.backend.name())
            .field("labels", &self.backend.labels().len())
            .finish()
    }
}

/// Load the detector stored at `path`.
pub fn load_model(path: &Path, options: &ModelOptions) -> Result<Model, ModelLoadError> {
    Model::load(path, options)
}

impl Model {
    /// Load a detector from a weight file.
    ///
    /// `.onnx` weights need the `backend-tract` feature; `.json` files are stub
    /// manifests.
    pub fn load(path: &Path, options: &ModelOptions) -> Result<Self, ModelLoadError> {
        if !path.exists() {
            return Err(ModelLoadError::Missing {
                path: path.to_path_buf(),
            });
        }
        if !path.is_file() {
            return Err(ModelLoadError::Unreadable {
                path: path.to_path_buf(),
                reason: "not a regular file".to_string(),
            });
        }

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        let mut backend: Box<dyn DetectorBackend> = match extension.as_deref() {
            Some("json") => Box::new(
                StubBackend::from_manifest(path).map_err(|e| unreadable(path, &e))?,
            ),
            Some("onnx") => load_onnx(path, options)?,
            _ => {
                return Err(ModelLoadError::Unsupported {
                    path: path.to_path_buf(),
                    reason: "expected an .onnx model or a .json stub manifest".to_string(),
                })
            }
        };
        backend.warm_up().map_err(|e| unreadable(path, &e))?;

        log::info!(
            "model loaded from {} (backend={}, classes={})",
            path.display(),
            backend.name(),
            backend.labels().len()
        );
        Ok(Self {
            backend,
            style: options.annotation.clone(),
        })
    }

    /// Wrap an already constructed backend.
    pub fn from_backend<B: DetectorBackend + 'static>(backend: B) -> Self {
        Self {
            backend: Box::new(backend),
            style: AnnotationStyle::default(),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn labels(&self) -> &[String] {
        self.backend.labels()
    }

    pub fn class_name_for(&self, class_id: usize) -> Result<&str, UnknownClassError> {
        let labels = self.backend.labels();
        labels
            .get(class_id)
            .map(String::as_str)
            .ok_or(UnknownClassError {
                class_id,
                label_count: labels.len(),
            })
    }

    /// Run detection on one image.
    ///
    /// Only boxes with `confidence >= threshold` are returned, in backend order.
    /// No boxes is an empty result, not an error.
    pub fn detect(
        &mut self,
        image_name: &str,
        image: &DynamicImage,
        threshold: f32,
    ) -> Result<InferenceResult, InferenceError> {
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(InferenceError::new(
                image_name,
                format!("confidence threshold {} is outside (0, 1]", threshold),
            ));
        }

        let rgb = image.to_rgb8();
        let raw = self
            .backend
            .infer(&rgb, threshold)
            .map_err(|e| InferenceError::new(image_name, format!("{:#}", e)))?;

        let mut boxes = Vec::with_capacity(raw.len());
        for detection in raw.iter().filter(|d| d.confidence >= threshold) {
            let class_name = match self.class_name_for(detection.class_id) {
                Ok(name) => name.to_string(),
                Err(e) => {
                    log::warn!("{}: {}; labelling box as {}", image_name, e, UNKNOWN_CLASS);
                    UNKNOWN_CLASS.to_string()
                }
            };
            boxes.push(BoundingBox::from_raw(detection, class_name));
        }
        log::debug!(
            "{}: {} boxes at confidence >= {:.2}",
            image_name,
            boxes.len(),
            threshold
        );

        let annotated_image = render::annotate(image, &boxes, &self.style);
        Ok(InferenceResult {
            annotated_image,
            boxes,
        })
    }
}

fn unreadable(path: &Path, err: &anyhow::Error) -> ModelLoadError {
    ModelLoadError::Unreadable {
        path: path.to_path_buf(),
        reason: format!("{:#}", err),
    }
}

#[cfg(feature = "backend-tract")]
fn load_onnx(path: &Path, options: &ModelOptions) -> Result<Box<dyn DetectorBackend>, ModelLoadError> {
    use super::backends::TractBackend;

    let labels_path = options
        .labels_path
        .clone()
        .unwrap_or_else(|| path.with_extension("names"));
    let backend = TractBackend::new(path, &labels_path, options.yolo.clone())
        .map_err(|e| unreadable(path, &e))?;
    Ok(Box::new(backend))
}

#[cfg(not(feature = "backend-tract"))]
fn load_onnx(path: &Path, _options: &ModelOptions) -> Result<Box<dyn DetectorBackend>, ModelLoadError> {
    Err(ModelLoadError::Unsupported {
        path: path.to_path_buf(),
        reason: "ONNX models require the backend-tract feature".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::backend::RawDetection;
    use anyhow::anyhow;
    use image::RgbImage;
    use std::io::Write;
    use tempfile::{Builder, TempDir};

    fn raw(class_id: usize, confidence: f32) -> RawDetection {
        RawDetection {
            class_id,
            confidence,
            x: 8.0,
            y: 8.0,
            width: 4.0,
            height: 4.0,
        }
    }

    fn labels() -> Vec<String> {
        vec!["thumbs_up".to_string(), "stop".to_string()]
    }

    fn image() -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::new(16, 16))
    }

    /// Ignores the threshold so the model has to enforce it.
    struct Unfiltered(Vec<String>, Vec<RawDetection>);

    impl DetectorBackend for Unfiltered {
        fn name(&self) -> &'static str {
            "unfiltered"
        }
        fn labels(&self) -> &[String] {
            &self.0
        }
        fn infer(&mut self, _: &RgbImage, _: f32) -> anyhow::Result<Vec<RawDetection>> {
            Ok(self.1.clone())
        }
    }

    struct Broken;

    impl DetectorBackend for Broken {
        fn name(&self) -> &'static str {
            "broken"
        }
        fn labels(&self) -> &[String] {
            &[]
        }
        fn infer(&mut self, _: &RgbImage, _: f32) -> anyhow::Result<Vec<RawDetection>> {
            Err(anyhow!("tensor shape mismatch"))
        }
    }

    #[test]
    fn every_box_clears_threshold() {
        let detections = vec![raw(0, 0.10), raw(1, 0.39), raw(0, 0.40), raw(1, 0.95)];
        let mut model = Model::from_backend(Unfiltered(labels(), detections));
        for threshold in [0.05_f32, 0.25, 0.4, 0.5, 0.95, 1.0] {
            let result = model.detect("img.jpg", &image(), threshold).unwrap();
            assert!(result.boxes.iter().all(|b| b.confidence >= threshold));
        }
        let result = model.detect("img.jpg", &image(), 0.40).unwrap();
        let got: Vec<_> = result
            .boxes
            .iter()
            .map(|b| (b.class_name.as_str(), b.confidence))
            .collect();
        assert_eq!(got, vec![("thumbs_up", 0.40), ("stop", 0.95)]);
    }

    #[test]
    fn nothing_above_threshold_is_empty_not_error() {
        let mut model = Model::from_backend(StubBackend::new(labels()).with_detections(vec![raw(0, 0.3)]));
        let result = model.detect("img.jpg", &image(), 0.5).unwrap();
        assert!(result.is_empty());
        assert_eq!(result.annotated_image.dimensions(), (16, 16));
    }

    #[test]
    fn unknown_class_is_labelled_unknown() {
        let mut model = Model::from_backend(Unfiltered(labels(), vec![raw(7, 0.9)]));
        assert_eq!(
            model.class_name_for(7),
            Err(UnknownClassError {
                class_id: 7,
                label_count: 2
            })
        );
        assert_eq!(model.class_name_for(1), Ok("stop"));

        let result = model.detect("img.jpg", &image(), 0.5).unwrap();
        assert_eq!(result.boxes[0].class_name, UNKNOWN_CLASS);
        assert_eq!(result.boxes[0].class_id, 7);
    }

    #[test]
    fn rejects_threshold_outside_unit_interval() {
        let mut model = Model::from_backend(StubBackend::new(labels()));
        for threshold in [0.0_f32, -0.1, 1.01, f32::NAN] {
            assert!(model.detect("img.jpg", &image(), threshold).is_err());
        }
    }

    #[test]
    fn backend_failure_names_the_image() {
        let mut model = Model::from_backend(Broken);
        let err = model.detect("img7.png", &image(), 0.5).unwrap_err();
        assert_eq!(err.image_name, "img7.png");
        assert!(err.reason.contains("tensor shape mismatch"));
    }

    #[test]
    fn detection_is_deterministic() {
        let mut model = Model::from_backend(
            StubBackend::new(labels()).with_detections(vec![raw(0, 0.8), raw(1, 0.6)]),
        );
        let first = model.detect("a.jpg", &image(), 0.5).unwrap();
        let second = model.detect("a.jpg", &image(), 0.5).unwrap();
        assert_eq!(first.boxes, second.boxes);
        assert_eq!(first.annotated_image, second.annotated_image);
    }

    #[test]
    fn out_of_frame_box_does_not_abort_detection() {
        let mut huge = raw(0, 0.9);
        huge.width = 1e10;
        huge.height = 1e10;
        let mut model = Model::from_backend(StubBackend::new(labels()).with_detections(vec![huge]));
        let result = model.detect("big.jpg", &image(), 0.5).unwrap();
        assert_eq!(result.boxes.len(), 1);
        assert_eq!(result.boxes[0].width, 1e10);
        assert_eq!(result.annotated_image.dimensions(), (16, 16));
    }

    #[test]
    fn load_reports_missing_weights() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("weights").join("best.onnx");
        let err = load_model(&path, &ModelOptions::default()).unwrap_err();
        assert_eq!(err, ModelLoadError::Missing { path });
    }

    #[test]
    fn load_rejects_unknown_format() {
        let file = Builder::new().suffix(".pt").tempfile().unwrap();
        let err = load_model(file.path(), &ModelOptions::default()).unwrap_err();
        assert!(matches!(err, ModelLoadError::Unsupported { .. }));
    }

    #[test]
    fn load_reports_unreadable_manifest() {
        let mut file = Builder::new().suffix(".json").tempfile().unwrap();
        file.write_all(b"not json").unwrap();
        let err = load_model(file.path(), &ModelOptions::default()).unwrap_err();
        assert!(matches!(err, ModelLoadError::Unreadable { .. }));
    }

    #[test]
    fn loads_stub_manifest() {
        let mut file = Builder::new().suffix(".json").tempfile().unwrap();
        file.write_all(br#"{ "labels": ["thumbs_up"], "detections": [] }"#)
            .unwrap();
        let model = load_model(file.path(), &ModelOptions::default()).unwrap();
        assert_eq!(model.backend_name(), "stub");
        assert_eq!(model.labels(), &["thumbs_up".to_string()]);
    }
}
