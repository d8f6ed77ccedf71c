//! Error types for detection sessions.
//!
//! Every error here is surfaced to the caller; nothing is retried or swallowed.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// The detector could not be loaded. Fatal to detection, not to the session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelLoadError {
    #[error("unable to load model: weight file {} does not exist", .path.display())]
    Missing { path: PathBuf },

    #[error("unable to load model from {}: {reason}", .path.display())]
    Unreadable { path: PathBuf, reason: String },

    #[error("unable to load model from {}: {reason}", .path.display())]
    Unsupported { path: PathBuf, reason: String },
}

impl ModelLoadError {
    pub fn path(&self) -> &std::path::Path {
        match self {
            ModelLoadError::Missing { path }
            | ModelLoadError::Unreadable { path, .. }
            | ModelLoadError::Unsupported { path, .. } => path,
        }
    }
}

/// Why a detection log file was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorruptReason {
    /// The file has no header row at all.
    Empty,
    /// The header row names a different column set.
    SchemaMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },
    /// The header row is the two-column legacy schema; needs `migrate_legacy`.
    LegacySchema,
    /// A data row could not be parsed.
    BadRow { line: u64, message: String },
}

impl fmt::Display for CorruptReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorruptReason::Empty => write!(f, "file is empty (missing header row)"),
            CorruptReason::SchemaMismatch { expected, found } => write!(
                f,
                "columns [{}] do not match expected [{}]",
                found.join(", "),
                expected.join(", ")
            ),
            CorruptReason::LegacySchema => write!(
                f,
                "legacy two-column schema (Image Name, Confidence); migrate it first"
            ),
            CorruptReason::BadRow { line, message } => {
                write!(f, "line {}: {}", line, message)
            }
        }
    }
}

/// The detection log exists but cannot be read as the canonical schema.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("detection log {} is corrupt: {reason}", .path.display())]
pub struct CorruptLogError {
    pub path: PathBuf,
    pub reason: CorruptReason,
}

#[derive(Error, Debug)]
pub enum LogStoreError {
    #[error(transparent)]
    Corrupt(#[from] CorruptLogError),

    #[error("failed to access detection log {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode detection log: {0}")]
    Encode(#[from] csv::Error),
}

/// A single image could not be processed. Recovered per image.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("detection failed for {image_name}: {reason}")]
pub struct InferenceError {
    pub image_name: String,
    pub reason: String,
}

impl InferenceError {
    pub fn new(image_name: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self {
            image_name: image_name.into(),
            reason: reason.to_string(),
        }
    }
}

/// A class id outside the model's label set.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("class id {class_id} is outside the model label set ({label_count} labels)")]
pub struct UnknownClassError {
    pub class_id: usize,
    pub label_count: usize,
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("detection unavailable: {0}")]
    ModelUnavailable(ModelLoadError),

    #[error("no images uploaded")]
    NoImages,

    #[error("confidence threshold {value} is outside [0.25, 1.00]")]
    InvalidThreshold { value: f32 },

    #[error("unsupported upload {name}: expected a jpg, jpeg, png, bmp or webp image")]
    UnsupportedUpload { name: String },

    #[error(transparent)]
    Log(#[from] LogStoreError),
}

impl From<CorruptLogError> for SessionError {
    fn from(err: CorruptLogError) -> Self {
        SessionError::Log(LogStoreError::Corrupt(err))
    }
}
