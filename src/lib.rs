//! Detection sessions
//!
//! Run a pre-trained object detector over a batch of uploaded images, render
//! annotated results, and keep a CSV log of every detected box.
//!
//! # Module Structure
//!
//! - `store`: the detection log (CSV load/append/save/export, legacy migration)
//! - `detect`: the inference adapter (`DetectorBackend` trait, `Model`, rendering)
//! - `upload`: uploaded image files
//! - `session`: the controller tying uploads, detector and log together
//! - `config`: file + environment configuration
//!
//! The presentation layer (upload widgets, sliders, image display) is not part of
//! this crate; the binaries are thin command-line front-ends over `session`.

pub mod config;
pub mod detect;
pub mod error;
pub mod session;
pub mod store;
pub mod upload;

pub use config::SessionConfig;
pub use detect::{
    load_model, BoundingBox, DetectorBackend, InferenceResult, Model, ModelOptions, RawDetection,
};
pub use error::{
    CorruptLogError, CorruptReason, InferenceError, LogStoreError, ModelLoadError, SessionError,
    UnknownClassError,
};
pub use session::{DetectionRun, DetectionSession, ImageOutcome, SessionState};
pub use store::{CsvLogStore, DetectionLog, DetectionRecord, Migration};
pub use upload::UploadedImage;
