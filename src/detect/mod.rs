//! Inference adapter: a narrow seam over an opaque object detector.

mod backend;
pub mod backends;
mod model;
pub mod render;
mod result;

pub use backend::{DetectorBackend, RawDetection};
pub use backends::{StubBackend, YoloParams};
pub use model::{load_model, Model, ModelOptions, UNKNOWN_CLASS};
pub use render::AnnotationStyle;
pub use result::{BoundingBox, InferenceResult};

#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
