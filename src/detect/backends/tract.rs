#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use tract_onnx::prelude::*;

use super::yolo::{self, Letterbox, YoloParams};
use crate::detect::backend::{DetectorBackend, RawDetection};

/// Tract-based backend for YOLO-style ONNX detectors.
///
/// Loads a local model file once; inference is CPU-only and synchronous.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    labels: Vec<String>,
    params: YoloParams,
}

impl TractBackend {
    /// Load an ONNX model and its labels file, and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, labels_path: &Path, params: YoloParams) -> Result<Self> {
        let model_path = model_path.as_ref();
        let labels = read_labels(labels_path)?;
        let edge = params.input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, edge, edge)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        log::info!(
            "loaded ONNX detector {} ({} classes, input {}x{})",
            model_path.display(),
            labels.len(),
            edge,
            edge
        );
        Ok(Self {
            model,
            labels,
            params,
        })
    }

    fn build_input(&self, canvas: &RgbImage) -> Tensor {
        let edge = self.params.input_size as usize;
        tract_ndarray::Array4::from_shape_fn((1, 3, edge, edge), |(_, channel, y, x)| {
            canvas.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0
        })
        .into_tensor()
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn labels(&self) -> &[String] {
        &self.labels
    }

    fn infer(&mut self, image: &RgbImage, confidence_threshold: f32) -> Result<Vec<RawDetection>> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(anyhow!("image has zero area ({}x{})", width, height));
        }
        let letterbox = Letterbox::new(width, height, self.params.input_size);
        let canvas = letterbox.apply(image, self.params.input_size);
        let input = self.build_input(&canvas);

        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let head = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = head.shape().to_vec();
        let values: Vec<f32> = head.iter().copied().collect();

        yolo::decode(
            &values,
            &shape,
            self.labels.len(),
            &letterbox,
            confidence_threshold,
            &self.params,
        )
    }

    fn warm_up(&mut self) -> Result<()> {
        let blank = RgbImage::new(self.params.input_size, self.params.input_size);
        self.infer(&blank, 1.0).map(|_| ())
    }
}

/// One label per line; blank lines are skipped.
fn read_labels(path: &Path) -> Result<Vec<String>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read labels file {}", path.display()))?;
    let labels: Vec<String> = raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();
    if labels.is_empty() {
        return Err(anyhow!("labels file {} is empty", path.display()));
    }
    Ok(labels)
}
