//! Violation persistence: one snapshot image plus one CSV log row per violation.
//!
//! The log is append-only. The header row is written only when the file is
//! new or empty. Snapshot names have second granularity, so two violations
//! recorded within the same second share (and overwrite) one snapshot file.

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use image::{ImageFormat, RgbImage};

use crate::classify::Violation;
use crate::detect::BoundingBox;

pub const LOG_HEADER: &str = "timestamp,frame_path,label,bbox";
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";
pub const SNAPSHOT_EXTENSION: &str = "jpg";

/// One persisted row of the violation log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ViolationRecord {
    pub timestamp: String,
    pub frame_path: String,
    pub label: String,
    pub bbox: BoundingBox,
}

impl ViolationRecord {
    pub fn to_csv_row(&self) -> String {
        let bbox = self.bbox.to_string();
        [
            csv_field(&self.timestamp),
            csv_field(&self.frame_path),
            csv_field(&self.label),
            csv_field(&bbox),
        ]
        .join(",")
    }
}

/// RFC 4180 quoting: wrap fields containing separators, quotes or newlines.
pub fn csv_field(value: &str) -> Cow<'_, str> {
    if value.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(value)
    }
}

pub fn snapshot_name(timestamp: &str) -> String {
    format!("violation_{}.{}", timestamp, SNAPSHOT_EXTENSION)
}

/// Storage backend for violation snapshots and log rows.
pub trait ViolationStore {
    /// Persist the annotated frame under `name`; returns the stored reference.
    fn save_snapshot(&mut self, name: &str, image: &RgbImage) -> Result<String>;

    /// Append one row to the violation log.
    fn append_record(&mut self, record: &ViolationRecord) -> Result<()>;
}

impl<S: ViolationStore + ?Sized> ViolationStore for Box<S> {
    fn save_snapshot(&mut self, name: &str, image: &RgbImage) -> Result<String> {
        (**self).save_snapshot(name, image)
    }

    fn append_record(&mut self, record: &ViolationRecord) -> Result<()> {
        (**self).append_record(record)
    }
}

/// Writes JPEG snapshots into a directory and appends to a CSV file.
pub struct FilesystemViolationStore {
    snapshot_dir: PathBuf,
    log_path: PathBuf,
}

impl FilesystemViolationStore {
    /// Open the store, creating the snapshot directory and the log's parent.
    pub fn open(snapshot_dir: impl Into<PathBuf>, log_path: impl Into<PathBuf>) -> Result<Self> {
        let snapshot_dir = snapshot_dir.into();
        let log_path = log_path.into();
        std::fs::create_dir_all(&snapshot_dir).with_context(|| {
            format!(
                "failed to create snapshot directory {}",
                snapshot_dir.display()
            )
        })?;
        if let Some(parent) = log_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create log directory {}", parent.display()))?;
        }
        Ok(Self {
            snapshot_dir,
            log_path,
        })
    }

    pub fn snapshot_dir(&self) -> &Path {
        &self.snapshot_dir
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }
}

impl ViolationStore for FilesystemViolationStore {
    fn save_snapshot(&mut self, name: &str, image: &RgbImage) -> Result<String> {
        let path = self.snapshot_dir.join(name);
        image
            .save_with_format(&path, ImageFormat::Jpeg)
            .with_context(|| format!("failed to write snapshot {}", path.display()))?;
        Ok(path.to_string_lossy().into_owned())
    }

    fn append_record(&mut self, record: &ViolationRecord) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .with_context(|| format!("failed to open violation log {}", self.log_path.display()))?;
        let is_new = file
            .metadata()
            .with_context(|| format!("failed to stat violation log {}", self.log_path.display()))?
            .len()
            == 0;

        let mut chunk = String::new();
        if is_new {
            chunk.push_str(LOG_HEADER);
            chunk.push('\n');
        }
        chunk.push_str(&record.to_csv_row());
        chunk.push('\n');

        file.write_all(chunk.as_bytes())
            .with_context(|| format!("failed to append to {}", self.log_path.display()))?;
        Ok(())
    }
}

/// In-memory store for tests. Append attempts listed in `fail_appends`
/// (zero-based attempt index) return an error.
#[derive(Default)]
pub struct InMemoryViolationStore {
    pub snapshots: BTreeMap<String, (u32, u32)>,
    pub records: Vec<ViolationRecord>,
    fail_appends: BTreeSet<usize>,
    append_attempts: usize,
}

impl InMemoryViolationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_appends(attempts: impl IntoIterator<Item = usize>) -> Self {
        Self {
            fail_appends: attempts.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn append_attempts(&self) -> usize {
        self.append_attempts
    }
}

impl ViolationStore for InMemoryViolationStore {
    fn save_snapshot(&mut self, name: &str, image: &RgbImage) -> Result<String> {
        self.snapshots
            .insert(name.to_string(), (image.width(), image.height()));
        Ok(format!("memory://{}", name))
    }

    fn append_record(&mut self, record: &ViolationRecord) -> Result<()> {
        let attempt = self.append_attempts;
        self.append_attempts += 1;
        if self.fail_appends.contains(&attempt) {
            return Err(anyhow!("injected append failure on attempt {}", attempt));
        }
        self.records.push(record.clone());
        Ok(())
    }
}

/// Persists violations through a `ViolationStore`, one call per violation.
pub struct ViolationRecorder<S> {
    store: S,
}

impl<S: ViolationStore> ViolationRecorder<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Save the annotated frame and append the log row. Not retried on failure.
    pub fn record(
        &mut self,
        violation: &Violation,
        annotated: &RgbImage,
    ) -> Result<ViolationRecord> {
        let timestamp = violation.timestamp.format(TIMESTAMP_FORMAT).to_string();
        let frame_path = self
            .store
            .save_snapshot(&snapshot_name(&timestamp), annotated)?;
        let record = ViolationRecord {
            timestamp,
            frame_path,
            label: violation.label.clone(),
            bbox: violation.bbox,
        };
        self.store.append_record(&record)?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, TimeZone};

    fn violation() -> Violation {
        Violation {
            timestamp: Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap(),
            label: "use-hand".to_string(),
            bbox: BoundingBox::new(150, 200, 170, 220),
            confidence: 0.9,
        }
    }

    #[test]
    fn csv_row_quotes_bbox() {
        let record = ViolationRecord {
            timestamp: "2024-03-09_14-05-07".to_string(),
            frame_path: "data/violations/violation_2024-03-09_14-05-07.jpg".to_string(),
            label: "use-hand".to_string(),
            bbox: BoundingBox::new(150, 200, 170, 220),
        };
        assert_eq!(
            record.to_csv_row(),
            concat!(
                "2024-03-09_14-05-07,",
                "data/violations/violation_2024-03-09_14-05-07.jpg,",
                "use-hand,\"[150,200,170,220]\""
            )
        );
    }

    #[test]
    fn csv_field_escapes_quotes() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("a \"b\""), "\"a \"\"b\"\"\"");
        assert_eq!(csv_field("x\ny"), "\"x\ny\"");
    }

    #[test]
    fn filesystem_store_writes_header_once() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("violations_log.csv");
        let snapshots = dir.path().join("violations");
        let image = RgbImage::new(16, 16);

        {
            let store = FilesystemViolationStore::open(&snapshots, &log_path).unwrap();
            let mut recorder = ViolationRecorder::new(store);
            let record = recorder.record(&violation(), &image).unwrap();
            assert!(record.frame_path.ends_with("violation_2024-03-09_14-05-07.jpg"));
            assert!(Path::new(&record.frame_path).exists());
        }
        // Reopen, as after a restart.
        let mut recorder =
            ViolationRecorder::new(FilesystemViolationStore::open(&snapshots, &log_path).unwrap());
        recorder.record(&violation(), &image).unwrap();

        let contents = std::fs::read_to_string(&log_path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], LOG_HEADER);
        assert!(lines[1].starts_with("2024-03-09_14-05-07,"));
        assert!(lines[1].ends_with(",use-hand,\"[150,200,170,220]\""));
        assert_eq!(lines[1], lines[2]);
    }

    #[test]
    fn same_second_snapshots_share_a_name() {
        let mut recorder = ViolationRecorder::new(InMemoryViolationStore::new());
        let image = RgbImage::new(4, 4);
        recorder.record(&violation(), &image).unwrap();
        recorder.record(&violation(), &image).unwrap();
        let store = recorder.into_store();
        assert_eq!(store.snapshots.len(), 1);
        assert_eq!(store.records.len(), 2);
        assert!(store
            .snapshots
            .contains_key("violation_2024-03-09_14-05-07.jpg"));
    }

    #[test]
    fn append_failure_is_reported() {
        let mut recorder = ViolationRecorder::new(InMemoryViolationStore::failing_appends([0]));
        let image = RgbImage::new(4, 4);
        assert!(recorder.record(&violation(), &image).is_err());
        assert!(recorder.record(&violation(), &image).is_ok());
        assert_eq!(recorder.store().records.len(), 1);
        assert_eq!(recorder.store().append_attempts(), 2);
    }

    #[test]
    fn unwritable_log_path_fails_open_or_append() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the log file should be.
        let log_path = dir.path().join("log_is_a_dir");
        std::fs::create_dir_all(&log_path).unwrap();
        let mut store =
            FilesystemViolationStore::open(dir.path().join("snaps"), &log_path).unwrap();
        let record = ViolationRecord {
            timestamp: "t".to_string(),
            frame_path: "p".to_string(),
            label: "use-hand".to_string(),
            bbox: BoundingBox::new(0, 0, 1, 1),
        };
        assert!(store.append_record(&record).is_err());
    }
}
