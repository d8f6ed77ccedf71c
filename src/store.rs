//! Detection log persistence.
//!
//! The log is a flat UTF-8 CSV file with a header row and one row per detected box.
//! The column set is fixed; any other header is rejected rather than coerced.
//! Saves replace the file atomically (temp file in the same directory, then rename),
//! so a crash mid-write leaves the previous version readable.
//!
//! Two sessions saving the same file is last-writer-wins. There is no locking.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::error::{CorruptLogError, CorruptReason, LogStoreError};

/// Canonical header row.
pub const COLUMNS: [&str; 3] = ["Image Name", "Class Name", "Confidence"];

/// Header row of the older two-column variant.
pub const LEGACY_COLUMNS: [&str; 2] = ["Image Name", "Confidence"];

pub const DEFAULT_LOG_PATH: &str = "detection_log.csv";

/// Class name written for legacy rows during migration.
pub const DEFAULT_LEGACY_CLASS: &str = "unknown";

/// One logged (image, class, confidence) observation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    #[serde(rename = "Image Name")]
    pub image_name: String,
    #[serde(rename = "Class Name")]
    pub class_name: String,
    #[serde(rename = "Confidence")]
    pub confidence: f32,
}

impl DetectionRecord {
    pub fn new(
        image_name: impl Into<String>,
        class_name: impl Into<String>,
        confidence: f32,
    ) -> Self {
        Self {
            image_name: image_name.into(),
            class_name: class_name.into(),
            confidence,
        }
    }
}

#[derive(Debug, Deserialize)]
struct LegacyRecord {
    #[serde(rename = "Image Name")]
    image_name: String,
    #[serde(rename = "Confidence")]
    confidence: f32,
}

/// Insertion-ordered detection log.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DetectionLog {
    records: Vec<DetectionRecord>,
}

impl DetectionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the log at `path`. A missing file is an empty log.
    pub fn load(path: &Path) -> Result<Self, LogStoreError> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                log::info!(
                    "detection log {} not found; starting empty",
                    path.display()
                );
                return Ok(Self::new());
            }
            Err(source) => {
                return Err(LogStoreError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let log = Self::from_csv(&bytes).map_err(|reason| CorruptLogError {
            path: path.to_path_buf(),
            reason,
        })?;
        log::debug!(
            "loaded {} detection records from {}",
            log.len(),
            path.display()
        );
        Ok(log)
    }

    /// Parse the canonical CSV encoding.
    pub fn from_csv(bytes: &[u8]) -> Result<Self, CorruptReason> {
        let mut reader = open_reader(bytes)?;
        let headers = read_headers(&mut reader)?;
        if headers != COLUMNS {
            if headers == LEGACY_COLUMNS {
                return Err(CorruptReason::LegacySchema);
            }
            return Err(CorruptReason::SchemaMismatch {
                expected: COLUMNS.iter().map(|c| c.to_string()).collect(),
                found: headers,
            });
        }

        let mut records = Vec::new();
        for (line, record) in read_rows::<DetectionRecord>(&mut reader)? {
            check_confidence(line, record.confidence)?;
            records.push(record);
        }
        Ok(Self { records })
    }

    /// Append `records` in order. No deduplication.
    pub fn append(mut self, records: impl IntoIterator<Item = DetectionRecord>) -> Self {
        self.extend(records);
        self
    }

    pub fn extend(&mut self, records: impl IntoIterator<Item = DetectionRecord>) {
        self.records.extend(records);
    }

    /// Serialize to the canonical CSV encoding. The header is always present.
    pub fn export(&self) -> Result<Vec<u8>, LogStoreError> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(Vec::new());
        writer.write_record(COLUMNS)?;
        for record in &self.records {
            writer.serialize(record)?;
        }
        writer
            .into_inner()
            .map_err(|e| LogStoreError::Encode(csv::Error::from(e.into_error())))
    }

    /// Replace the file at `path` with this log.
    pub fn save(&self, path: &Path) -> Result<(), LogStoreError> {
        let bytes = self.export()?;
        write_atomic(path, &bytes)?;
        log::debug!(
            "saved {} detection records to {}",
            self.len(),
            path.display()
        );
        Ok(())
    }

    pub fn records(&self) -> &[DetectionRecord] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DetectionRecord> {
        self.records.iter()
    }

    /// Records logged for one image, in log order.
    pub fn records_for<'a>(
        &'a self,
        image_name: &'a str,
    ) -> impl Iterator<Item = &'a DetectionRecord> + 'a {
        self.records
            .iter()
            .filter(move |record| record.image_name == image_name)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl<'a> IntoIterator for &'a DetectionLog {
    type Item = &'a DetectionRecord;
    type IntoIter = std::slice::Iter<'a, DetectionRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

/// Result of [`CsvLogStore::migrate_legacy`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Migration {
    /// No file at the store path.
    Missing,
    /// The file already uses the canonical schema.
    AlreadyCanonical,
    /// The legacy file was rewritten with this many rows.
    Migrated { rows: usize },
}

/// The on-disk detection log.
#[derive(Clone, Debug)]
pub struct CsvLogStore {
    path: PathBuf,
}

impl CsvLogStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<DetectionLog, LogStoreError> {
        DetectionLog::load(&self.path)
    }

    pub fn save(&self, log: &DetectionLog) -> Result<(), LogStoreError> {
        log.save(&self.path)
    }

    /// Rewrite a two-column legacy log into the canonical schema, using
    /// `class_name` for the missing column.
    pub fn migrate_legacy(&self, class_name: &str) -> Result<Migration, LogStoreError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Migration::Missing),
            Err(source) => {
                return Err(LogStoreError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        let corrupt = |reason: CorruptReason| CorruptLogError {
            path: self.path.clone(),
            reason,
        };

        let log = match DetectionLog::from_csv(&bytes) {
            Ok(_) => return Ok(Migration::AlreadyCanonical),
            Err(CorruptReason::LegacySchema) => {
                parse_legacy(&bytes, class_name).map_err(corrupt)?
            }
            Err(reason) => return Err(corrupt(reason).into()),
        };

        self.save(&log)?;
        log::info!(
            "migrated {} legacy rows in {} (class name \"{}\")",
            log.len(),
            self.path.display(),
            class_name
        );
        Ok(Migration::Migrated { rows: log.len() })
    }
}

fn parse_legacy(bytes: &[u8], class_name: &str) -> Result<DetectionLog, CorruptReason> {
    let mut reader = open_reader(bytes)?;
    read_headers(&mut reader)?;
    let mut records = Vec::new();
    for (line, legacy) in read_rows::<LegacyRecord>(&mut reader)? {
        check_confidence(line, legacy.confidence)?;
        records.push(DetectionRecord::new(
            legacy.image_name,
            class_name,
            legacy.confidence,
        ));
    }
    Ok(DetectionLog { records })
}

fn open_reader(bytes: &[u8]) -> Result<csv::Reader<&[u8]>, CorruptReason> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(CorruptReason::Empty);
    }
    Ok(csv::ReaderBuilder::new().has_headers(true).from_reader(bytes))
}

fn read_headers(reader: &mut csv::Reader<&[u8]>) -> Result<Vec<String>, CorruptReason> {
    let headers = reader.headers().map_err(bad_row)?;
    Ok(headers.iter().map(str::to_string).collect())
}

/// Deserialize every data row, paired with its 1-based line number.
fn read_rows<T: DeserializeOwned>(
    reader: &mut csv::Reader<&[u8]>,
) -> Result<Vec<(u64, T)>, CorruptReason> {
    let headers = reader.headers().map_err(bad_row)?.clone();
    let mut rows = Vec::new();
    for row in reader.records() {
        let row = row.map_err(bad_row)?;
        let line = row.position().map(|pos| pos.line()).unwrap_or(0);
        let value = row
            .deserialize(Some(&headers))
            .map_err(|err| CorruptReason::BadRow {
                line,
                message: err.to_string(),
            })?;
        rows.push((line, value));
    }
    Ok(rows)
}

fn check_confidence(line: u64, confidence: f32) -> Result<(), CorruptReason> {
    if confidence.is_finite() && (0.0..=1.0).contains(&confidence) {
        return Ok(());
    }
    Err(CorruptReason::BadRow {
        line,
        message: format!("confidence {} is outside [0, 1]", confidence),
    })
}

fn bad_row(err: csv::Error) -> CorruptReason {
    let line = err.position().map(|pos| pos.line()).unwrap_or(0);
    CorruptReason::BadRow {
        line,
        message: err.to_string(),
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), LogStoreError> {
    let io_err = |source: std::io::Error| LogStoreError::Io {
        path: path.to_path_buf(),
        source,
    };
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(io_err)?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(io_err)?;
    tmp.write_all(bytes).map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> Vec<DetectionRecord> {
        vec![
            DetectionRecord::new("img1.jpg", "thumbs_up", 0.83),
            DetectionRecord::new("img1.jpg", "stop", 0.41),
            DetectionRecord::new("img2.png", "love_you", 0.97),
        ]
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let log = DetectionLog::load(&dir.path().join("absent.csv")).unwrap();
        assert!(log.is_empty());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("detection_log.csv");
        let log = DetectionLog::new().append(sample());
        log.save(&path).unwrap();

        let loaded = DetectionLog::load(&path).unwrap();
        assert_eq!(loaded, log);
    }

    #[test]
    fn append_preserves_prior_order() {
        let base = DetectionLog::new().append(sample());
        let extra = vec![
            DetectionRecord::new("img3.jpg", "thumbs_up", 0.5),
            DetectionRecord::new("img3.jpg", "thumbs_up", 0.5),
        ];
        let log = base.clone().append(extra.clone());
        assert_eq!(log.len(), base.len() + extra.len());
        assert_eq!(&log.records()[..base.len()], base.records());
        assert_eq!(&log.records()[base.len()..], &extra[..]);
    }

    #[test]
    fn export_always_writes_header() {
        let bytes = DetectionLog::new().export().unwrap();
        assert_eq!(bytes, b"Image Name,Class Name,Confidence\n");

        let log = DetectionLog::new().append(vec![DetectionRecord::new(
            "img1.jpg",
            "thumbs_up",
            0.83,
        )]);
        let text = String::from_utf8(log.export().unwrap()).unwrap();
        assert_eq!(text, "Image Name,Class Name,Confidence\nimg1.jpg,thumbs_up,0.83\n");
    }

    #[test]
    fn quoted_names_survive_round_trip() {
        let log = DetectionLog::new().append(vec![DetectionRecord::new(
            "holiday, day 2.jpg",
            "thumbs \"up\"",
            0.5,
        )]);
        let parsed = DetectionLog::from_csv(&log.export().unwrap()).unwrap();
        assert_eq!(parsed, log);
    }

    #[test]
    fn rejects_missing_class_column() {
        let err = DetectionLog::from_csv(b"Image Name,Confidence\nimg1.jpg,0.5\n").unwrap_err();
        assert_eq!(err, CorruptReason::LegacySchema);

        let err = DetectionLog::from_csv(b"Image,Class,Score\n").unwrap_err();
        assert!(matches!(err, CorruptReason::SchemaMismatch { .. }));
    }

    #[test]
    fn rejects_reordered_columns() {
        let err =
            DetectionLog::from_csv(b"Class Name,Image Name,Confidence\nstop,a.jpg,0.5\n")
                .unwrap_err();
        assert!(matches!(err, CorruptReason::SchemaMismatch { .. }));
    }

    #[test]
    fn rejects_bad_rows() {
        let err = DetectionLog::from_csv(b"Image Name,Class Name,Confidence\na.jpg,stop,high\n")
            .unwrap_err();
        assert!(matches!(err, CorruptReason::BadRow { line: 2, .. }));

        let err = DetectionLog::from_csv(b"Image Name,Class Name,Confidence\na.jpg,stop,1.7\n")
            .unwrap_err();
        assert!(matches!(err, CorruptReason::BadRow { line: 2, .. }));

        let err = DetectionLog::from_csv(b"Image Name,Class Name,Confidence\na.jpg,stop\n")
            .unwrap_err();
        assert!(matches!(err, CorruptReason::BadRow { .. }));
    }

    #[test]
    fn empty_file_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("detection_log.csv");
        fs::write(&path, b"").unwrap();
        match DetectionLog::load(&path) {
            Err(LogStoreError::Corrupt(err)) => assert_eq!(err.reason, CorruptReason::Empty),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn save_replaces_previous_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("detection_log.csv");
        let store = CsvLogStore::new(&path);

        store.save(&DetectionLog::new().append(sample())).unwrap();
        store
            .save(&DetectionLog::new().append(sample().into_iter().take(1)))
            .unwrap();

        assert_eq!(store.load().unwrap().len(), 1);
        let leftovers = fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn migrates_legacy_log() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("detection_log.csv");
        fs::write(&path, "Image Name,Confidence\nimg1.jpg,0.83\nimg2.jpg,0.4\n").unwrap();
        let store = CsvLogStore::new(&path);

        assert!(matches!(
            store.load(),
            Err(LogStoreError::Corrupt(CorruptLogError {
                reason: CorruptReason::LegacySchema,
                ..
            }))
        ));

        let outcome = store.migrate_legacy(DEFAULT_LEGACY_CLASS).unwrap();
        assert_eq!(outcome, Migration::Migrated { rows: 2 });

        let log = store.load().unwrap();
        assert_eq!(
            log.records(),
            &[
                DetectionRecord::new("img1.jpg", "unknown", 0.83),
                DetectionRecord::new("img2.jpg", "unknown", 0.4),
            ]
        );
        assert_eq!(
            store.migrate_legacy(DEFAULT_LEGACY_CLASS).unwrap(),
            Migration::AlreadyCanonical
        );
    }

    #[test]
    fn migrate_without_file_is_noop() {
        let dir = TempDir::new().unwrap();
        let store = CsvLogStore::new(dir.path().join("absent.csv"));
        assert_eq!(store.migrate_legacy("unknown").unwrap(), Migration::Missing);
        assert!(!store.path().exists());
    }

    #[test]
    fn records_for_filters_by_image() {
        let log = DetectionLog::new().append(sample());
        let names: Vec<_> = log
            .records_for("img1.jpg")
            .map(|r| r.class_name.as_str())
            .collect();
        assert_eq!(names, vec!["thumbs_up", "stop"]);
    }
}
