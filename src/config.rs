use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::detect::{AnnotationStyle, ModelOptions, YoloParams};
use crate::session::{MAX_CONFIDENCE, MIN_CONFIDENCE};
use crate::store::DEFAULT_LOG_PATH;

const DEFAULT_MODEL_PATH: &str = "weights/best.onnx";
const DEFAULT_CONFIDENCE: f32 = 0.40;
const DEFAULT_BORDER_WIDTH: u32 = 2;
const DEFAULT_FONT_SIZE: f32 = 16.0;

#[derive(Debug, Deserialize, Default)]
struct SessionConfigFile {
    confidence: Option<f32>,
    model: Option<ModelConfigFile>,
    log: Option<LogConfigFile>,
    annotation: Option<AnnotationConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelConfigFile {
    path: Option<PathBuf>,
    labels_path: Option<PathBuf>,
    input_size: Option<u32>,
    iou_threshold: Option<f32>,
    max_detections: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct LogConfigFile {
    path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct AnnotationConfigFile {
    border_width: Option<u32>,
    font_path: Option<PathBuf>,
    font_size: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub model_path: PathBuf,
    pub labels_path: Option<PathBuf>,
    pub log_path: PathBuf,
    /// Default threshold for runs that do not pass one.
    pub confidence: f32,
    pub yolo: YoloParams,
    pub annotation: AnnotationSettings,
}

#[derive(Debug, Clone)]
pub struct AnnotationSettings {
    pub border_width: u32,
    pub font_path: Option<PathBuf>,
    pub font_size: f32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from_file(SessionConfigFile::default())
    }
}

impl SessionConfig {
    /// Defaults, then the file named by `DETECT_CONFIG`, then `DETECT_*` overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("DETECT_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: SessionConfigFile) -> Self {
        let model = file.model.unwrap_or_default();
        let annotation = file.annotation.unwrap_or_default();
        let yolo_defaults = YoloParams::default();
        Self {
            model_path: model
                .path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH)),
            labels_path: model.labels_path,
            log_path: file
                .log
                .and_then(|log| log.path)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_PATH)),
            confidence: file.confidence.unwrap_or(DEFAULT_CONFIDENCE),
            yolo: YoloParams {
                input_size: model.input_size.unwrap_or(yolo_defaults.input_size),
                iou_threshold: model.iou_threshold.unwrap_or(yolo_defaults.iou_threshold),
                max_detections: model
                    .max_detections
                    .unwrap_or(yolo_defaults.max_detections),
            },
            annotation: AnnotationSettings {
                border_width: annotation.border_width.unwrap_or(DEFAULT_BORDER_WIDTH),
                font_path: annotation.font_path,
                font_size: annotation.font_size.unwrap_or(DEFAULT_FONT_SIZE),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("DETECT_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.model_path = PathBuf::from(path);
            }
        }
        if let Ok(path) = std::env::var("DETECT_LABELS_PATH") {
            if !path.trim().is_empty() {
                self.labels_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(path) = std::env::var("DETECT_LOG_PATH") {
            if !path.trim().is_empty() {
                self.log_path = PathBuf::from(path);
            }
        }
        if let Ok(confidence) = std::env::var("DETECT_CONFIDENCE") {
            self.confidence = confidence
                .trim()
                .parse()
                .map_err(|_| anyhow!("DETECT_CONFIDENCE must be a number between 0.25 and 1.0"))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !(MIN_CONFIDENCE..=MAX_CONFIDENCE).contains(&self.confidence) {
            return Err(anyhow!(
                "confidence {} must be within [{:.2}, {:.2}]",
                self.confidence,
                MIN_CONFIDENCE,
                MAX_CONFIDENCE
            ));
        }
        if !(self.yolo.iou_threshold > 0.0 && self.yolo.iou_threshold <= 1.0) {
            return Err(anyhow!("iou_threshold must be within (0, 1]"));
        }
        if self.yolo.input_size == 0 || self.yolo.input_size % 32 != 0 {
            return Err(anyhow!(
                "input_size {} must be a positive multiple of 32",
                self.yolo.input_size
            ));
        }
        if self.yolo.max_detections == 0 {
            return Err(anyhow!("max_detections must be greater than zero"));
        }
        if self.annotation.border_width == 0 {
            return Err(anyhow!("annotation border_width must be at least 1"));
        }
        if !(self.annotation.font_size > 0.0) {
            return Err(anyhow!("annotation font_size must be positive"));
        }
        if let Some(font_path) = &self.annotation.font_path {
            if !font_path.is_file() {
                return Err(anyhow!(
                    "annotation font_path {} is not a readable file",
                    font_path.display()
                ));
            }
        }
        Ok(())
    }

    /// Model options for [`crate::detect::load_model`].
    ///
    /// Reads the caption font, if any. A font that cannot be used only turns
    /// captions off; boxes are still drawn.
    pub fn model_options(&self) -> ModelOptions {
        let mut annotation = AnnotationStyle {
            border_width: self.annotation.border_width,
            font_size: self.annotation.font_size,
            ..AnnotationStyle::default()
        };
        if let Some(font_path) = &self.annotation.font_path {
            match annotation.clone().with_font_file(font_path) {
                Ok(with_font) => annotation = with_font,
                Err(e) => log::warn!("{:#}; drawing boxes without captions", e),
            }
        }
        ModelOptions {
            labels_path: self.labels_path.clone(),
            yolo: self.yolo.clone(),
            annotation,
        }
    }
}

/// `.toml` files are parsed as TOML, anything else as JSON.
fn read_config_file(path: &Path) -> Result<SessionConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
