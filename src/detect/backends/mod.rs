pub mod stub;
pub mod yolo;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use stub::StubBackend;
pub use yolo::YoloParams;

#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;
