use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use serde::Deserialize;

use crate::detect::backend::{DetectorBackend, RawDetection};

/// Fixture backend for tests and demos. Returns the same canned detections for
/// every image, filtered by the requested threshold.
///
/// A manifest is a JSON file:
///
/// ```json
/// {
///   "labels": ["thumbs_up", "stop"],
///   "detections": [
///     { "class_id": 0, "confidence": 0.83, "x": 32, "y": 32, "width": 20, "height": 24 }
///   ]
/// }
/// ```
#[derive(Clone, Debug, Default)]
pub struct StubBackend {
    labels: Vec<String>,
    detections: Vec<RawDetection>,
}

#[derive(Debug, Deserialize)]
struct StubManifest {
    labels: Vec<String>,
    #[serde(default)]
    detections: Vec<StubDetection>,
}

#[derive(Debug, Deserialize)]
struct StubDetection {
    class_id: usize,
    confidence: f32,
    x: f32,
    y: f32,
    width: f32,
    height: f32,
}

impl StubBackend {
    pub fn new(labels: Vec<String>) -> Self {
        Self {
            labels,
            detections: Vec::new(),
        }
    }

    pub fn with_detections(mut self, detections: Vec<RawDetection>) -> Self {
        self.detections = detections;
        self
    }

    pub fn from_manifest(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read stub manifest {}", path.display()))?;
        let manifest: StubManifest = serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid stub manifest {}: {}", path.display(), e))?;
        if manifest.labels.is_empty() {
            return Err(anyhow!("stub manifest {} has no labels", path.display()));
        }
        let detections = manifest
            .detections
            .into_iter()
            .map(|d| RawDetection {
                class_id: d.class_id,
                confidence: d.confidence,
                x: d.x,
                y: d.y,
                width: d.width,
                height: d.height,
            })
            .collect();
        Ok(Self::new(manifest.labels).with_detections(detections))
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn labels(&self) -> &[String] {
        &self.labels
    }

    fn infer(&mut self, _image: &RgbImage, confidence_threshold: f32) -> Result<Vec<RawDetection>> {
        Ok(self
            .detections
            .iter()
            .filter(|d| d.confidence >= confidence_threshold)
            .cloned()
            .collect())
    }
}
