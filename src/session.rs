//! Detection session controller.
//!
//! A session owns its in-memory view of the detection log (read from disk once at
//! open), the uploaded images, and the detector. Runs are sequential: images in
//! upload order, boxes in detector order. The log is flushed once per run.
//!
//! ```text
//! Idle --upload--> Ready --detect--> Detecting --> Completed
//!   ^                ^                                 |
//!   |                +-------------upload/detect-------+
//!   +--------------------------reset-------------------+
//! ```

use crate::config::SessionConfig;
use crate::detect::{load_model, InferenceResult, Model};
use crate::error::{InferenceError, LogStoreError, ModelLoadError, SessionError};
use crate::store::{CsvLogStore, DetectionLog, DetectionRecord};
use crate::upload::UploadedImage;

/// Lowest threshold the presentation layer may request.
pub const MIN_CONFIDENCE: f32 = 0.25;
pub const MAX_CONFIDENCE: f32 = 1.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Ready,
    Detecting,
    Completed,
}

/// Detector availability. A failed load leaves the session usable for the log.
#[derive(Debug)]
enum Detector {
    Loaded(Model),
    Unavailable(ModelLoadError),
}

/// Outcome for one uploaded image.
#[derive(Debug)]
pub struct ImageOutcome {
    pub image_name: String,
    pub result: Result<InferenceResult, InferenceError>,
}

/// Everything one detection run produced, in upload order.
#[derive(Debug)]
pub struct DetectionRun {
    pub outcomes: Vec<ImageOutcome>,
    /// Records appended to the log by this run.
    pub appended: usize,
    /// Outcome of flushing the log to disk. On failure the records are still in
    /// the session's in-memory log and go out with the next successful save.
    pub saved: Result<(), LogStoreError>,
}

impl DetectionRun {
    pub fn succeeded(&self) -> impl Iterator<Item = (&str, &InferenceResult)> {
        self.outcomes.iter().filter_map(|outcome| {
            outcome
                .result
                .as_ref()
                .ok()
                .map(|result| (outcome.image_name.as_str(), result))
        })
    }

    pub fn failures(&self) -> impl Iterator<Item = &InferenceError> {
        self.outcomes
            .iter()
            .filter_map(|outcome| outcome.result.as_ref().err())
    }
}

pub struct DetectionSession {
    store: CsvLogStore,
    log: DetectionLog,
    detector: Detector,
    uploads: Vec<UploadedImage>,
    state: SessionState,
}

impl DetectionSession {
    /// Open a session from configuration.
    ///
    /// A corrupt log aborts here. A model that fails to load does not: the session
    /// opens without a detector and reports the load error on `detect`.
    pub fn open(config: &SessionConfig) -> Result<Self, SessionError> {
        let store = CsvLogStore::new(&config.log_path);
        let detector = load_model(&config.model_path, &config.model_options());
        Self::with_detector(store, detector)
    }

    /// Open a session around an explicit detector load outcome.
    pub fn with_detector(
        store: CsvLogStore,
        detector: Result<Model, ModelLoadError>,
    ) -> Result<Self, SessionError> {
        let log = store.load()?;
        let detector = match detector {
            Ok(model) => Detector::Loaded(model),
            Err(e) => {
                log::error!("{}; detection disabled for this session", e);
                Detector::Unavailable(e)
            }
        };
        log::info!(
            "session opened: log={} records={}",
            store.path().display(),
            log.len()
        );
        Ok(Self {
            store,
            log,
            detector,
            uploads: Vec::new(),
            state: SessionState::Idle,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn log(&self) -> &DetectionLog {
        &self.log
    }

    pub fn store(&self) -> &CsvLogStore {
        &self.store
    }

    pub fn uploads(&self) -> &[UploadedImage] {
        &self.uploads
    }

    /// The load failure, when the session runs without a detector.
    pub fn model_error(&self) -> Option<&ModelLoadError> {
        match &self.detector {
            Detector::Loaded(_) => None,
            Detector::Unavailable(e) => Some(e),
        }
    }

    /// Add images to the batch, keeping upload order.
    ///
    /// The whole call is rejected if any image has an unsupported extension.
    pub fn upload(
        &mut self,
        images: impl IntoIterator<Item = UploadedImage>,
    ) -> Result<(), SessionError> {
        let images: Vec<UploadedImage> = images.into_iter().collect();
        if let Some(bad) = images.iter().find(|image| !image.has_accepted_extension()) {
            return Err(SessionError::UnsupportedUpload {
                name: bad.name.clone(),
            });
        }
        if images.is_empty() {
            return Ok(());
        }
        self.uploads.extend(images);
        self.state = SessionState::Ready;
        Ok(())
    }

    /// Drop the uploads and return to `Idle`. The log is kept.
    pub fn reset(&mut self) {
        self.uploads.clear();
        self.state = SessionState::Idle;
    }

    /// Run detection over every uploaded image at `threshold`.
    ///
    /// Fails before touching any image when the detector is unavailable, nothing is
    /// uploaded, or the threshold is out of range. Per-image failures are reported
    /// in the run and do not stop the batch; records from the images that succeeded
    /// are appended and the log is saved. A failed save is reported in
    /// [`DetectionRun::saved`] alongside the results.
    pub fn detect(&mut self, threshold: f32) -> Result<DetectionRun, SessionError> {
        let model = match &mut self.detector {
            Detector::Loaded(model) => model,
            Detector::Unavailable(e) => return Err(SessionError::ModelUnavailable(e.clone())),
        };
        if self.uploads.is_empty() {
            return Err(SessionError::NoImages);
        }
        if !(MIN_CONFIDENCE..=MAX_CONFIDENCE).contains(&threshold) {
            return Err(SessionError::InvalidThreshold { value: threshold });
        }

        self.state = SessionState::Detecting;
        log::info!(
            "detecting {} images at confidence {:.2}",
            self.uploads.len(),
            threshold
        );

        let mut outcomes = Vec::with_capacity(self.uploads.len());
        let mut records = Vec::new();
        for upload in &self.uploads {
            let result = upload
                .decode()
                .map_err(|e| InferenceError::new(&upload.name, format!("cannot decode image: {}", e)))
                .and_then(|image| model.detect(&upload.name, &image, threshold));

            match &result {
                Ok(inference) => {
                    records.extend(inference.boxes.iter().map(|bbox| {
                        DetectionRecord::new(&upload.name, &bbox.class_name, bbox.confidence)
                    }));
                }
                Err(e) => log::warn!("{}", e),
            }
            outcomes.push(ImageOutcome {
                image_name: upload.name.clone(),
                result,
            });
        }

        let appended = records.len();
        self.log.extend(records);
        let saved = self.store.save(&self.log);
        self.state = SessionState::Completed;

        match &saved {
            Ok(()) => log::info!(
                "detection log updated: {} new records, {} total",
                appended,
                self.log.len()
            ),
            Err(e) => log::error!("{}; {} new records kept in memory only", e, appended),
        }
        Ok(DetectionRun {
            outcomes,
            appended,
            saved,
        })
    }

    /// CSV bytes of the full log, for download.
    pub fn export_log(&self) -> Result<Vec<u8>, SessionError> {
        Ok(self.log.export()?)
    }
}
