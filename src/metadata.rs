//! Bookmark metadata records for append-only persistence.
//!
//! Every bookmark mutation made through the controller (`add`, max-tracking
//! updates, `remove`) produces a [`BookmarkRecord`] that is handed to the
//! configured [`MetadataSink`]. On startup the same records can be replayed
//! with [`crate::bookmarks::BookmarkStore::restore`] to rebuild the store.
//!
//! ## Record fields
//!
//! - **`op`**: `Add` (default when absent), `Max` for max-tracking updates,
//!   or `Remove`
//! - **`label`**, **`x`**, **`y`**, **`z`**: the bookmark
//! - **`metric_kind`**, **`metric_value`**: the metric snapshot; `NaN` is
//!   written as JSON `null`
//! - **`timestamp`**: UTC time the record was produced
//!
//! [`JsonLinesMetadata`] stores one JSON object per line. Other formats can be
//! plugged in by implementing [`MetadataSink`].

use crate::bookmarks::Bookmark;
use crate::core::Position;
use crate::error::AppResult;
use crate::metric::{MetricKind, MetricSnapshot};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Kind of bookmark mutation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookmarkOp {
    /// User bookmark added or replaced by label.
    #[default]
    Add,
    /// Max-tracking bookmark that replaces every other `"Max <kind>"` entry.
    Max,
    /// Bookmark removed by label.
    Remove,
}

/// One persisted bookmark mutation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BookmarkRecord {
    /// Mutation kind.
    #[serde(default)]
    pub op: BookmarkOp,
    /// Bookmark label.
    pub label: String,
    /// X in microns.
    pub x: f64,
    /// Y in microns.
    pub y: f64,
    /// Z in microns.
    pub z: f64,
    /// Metric the value was scored with.
    pub metric_kind: MetricKind,
    /// Metric value; `null` in JSON when not finite.
    #[serde(with = "nan_as_null")]
    pub metric_value: f64,
    /// When the record was produced.
    pub timestamp: DateTime<Utc>,
}

impl BookmarkRecord {
    /// Record for a bookmark that was just added.
    pub fn added(bookmark: &Bookmark) -> Self {
        Self::from_bookmark(BookmarkOp::Add, bookmark)
    }

    /// Record for a max-tracking bookmark produced by
    /// [`crate::bookmarks::BookmarkStore::update_max`].
    pub fn max(bookmark: &Bookmark) -> Self {
        Self::from_bookmark(BookmarkOp::Max, bookmark)
    }

    /// Record for a bookmark that was just removed.
    pub fn removed(bookmark: &Bookmark) -> Self {
        Self::from_bookmark(BookmarkOp::Remove, bookmark)
    }

    fn from_bookmark(op: BookmarkOp, bookmark: &Bookmark) -> Self {
        Self {
            op,
            label: bookmark.label.clone(),
            x: bookmark.position.x,
            y: bookmark.position.y,
            z: bookmark.position.z,
            metric_kind: bookmark.metric.kind,
            metric_value: bookmark.metric.value,
            timestamp: Utc::now(),
        }
    }

    /// Recorded stage position.
    pub fn position(&self) -> Position {
        Position::new(self.x, self.y, self.z)
    }

    /// Recorded metric snapshot.
    pub fn metric(&self) -> MetricSnapshot {
        MetricSnapshot::new(self.metric_kind, self.metric_value)
    }
}

mod nan_as_null {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_some(value)
        } else {
            serializer.serialize_none()
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
    }
}

/// Receiver of bookmark records.
pub trait MetadataSink: Send {
    /// Persist one record.
    fn record(&mut self, record: &BookmarkRecord) -> Result<()>;
}

/// Append-only JSON-lines bookmark file.
#[derive(Clone, Debug)]
pub struct JsonLinesMetadata {
    path: PathBuf,
}

impl JsonLinesMetadata {
    /// Sink appending to `path`. Nothing is touched until the first record.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// File the records are appended to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every record in file order. A missing file yields no records.
    ///
    /// Blank lines are skipped; a malformed line is an error.
    pub fn load(&self) -> AppResult<Vec<BookmarkRecord>> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            records.push(serde_json::from_str(&line)?);
        }
        Ok(records)
    }
}

impl MetadataSink for JsonLinesMetadata {
    fn record(&mut self, record: &BookmarkRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating directory {}", dir.display()))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("appending to {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bookmarks::BookmarkStore;
    use tempfile::tempdir;

    fn bookmark(label: &str, value: f64) -> Bookmark {
        Bookmark {
            label: label.to_string(),
            position: Position::new(1.0, 2.0, 3.0),
            metric: MetricSnapshot::new(MetricKind::Mean, value),
        }
    }

    #[test]
    fn test_nan_written_as_null() {
        let record = BookmarkRecord::added(&bookmark("dark", f64::NAN));
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"metric_value\":null"));

        let back: BookmarkRecord = serde_json::from_str(&json).unwrap();
        assert!(back.metric_value.is_nan());
    }

    #[test]
    fn test_op_defaults_to_add() {
        let json = r#"{"label":"a","x":0.0,"y":0.0,"z":1.5,"metric_kind":"Max",
            "metric_value":7.0,"timestamp":"2024-05-01T12:00:00Z"}"#;
        let record: BookmarkRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.op, BookmarkOp::Add);
        assert_eq!(record.position().z, 1.5);
    }

    #[test]
    fn test_append_and_load() {
        let dir = tempdir().unwrap();
        let mut sink = JsonLinesMetadata::new(dir.path().join("bookmarks.jsonl"));
        assert!(sink.load().unwrap().is_empty());

        sink.record(&BookmarkRecord::added(&bookmark("a", 1.0))).unwrap();
        sink.record(&BookmarkRecord::added(&bookmark("b", 2.0))).unwrap();
        sink.record(&BookmarkRecord::removed(&bookmark("a", 1.0))).unwrap();

        let records = sink.load().unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[2].op, BookmarkOp::Remove);

        let mut store = BookmarkStore::new();
        assert_eq!(store.restore(records), 3);
        assert_eq!(store.labels(), vec!["b"]);
    }

    #[test]
    fn test_restore_applies_max_rule() {
        let max_a = Bookmark {
            label: "Max Mean (5.0)".to_string(),
            ..bookmark("", 5.0)
        };
        let max_b = Bookmark {
            label: "Max Mean (7.0)".to_string(),
            ..bookmark("", 7.0)
        };
        let mut store = BookmarkStore::new();
        store.restore(vec![
            BookmarkRecord::max(&max_a),
            BookmarkRecord::added(&bookmark("user", 1.0)),
            BookmarkRecord::max(&max_b),
        ]);
        assert_eq!(store.labels(), vec!["user", "Max Mean (7.0)"]);
    }

    #[test]
    fn test_restore_keeps_user_label_with_max_prefix() {
        let mut live = BookmarkStore::new();
        let mut records = Vec::new();
        let max = live
            .update_max(MetricKind::Mean, 5.0, Position::new(0.0, 0.0, 5.0))
            .unwrap();
        records.push(BookmarkRecord::max(max));
        let user = live.add(
            "Max Mean point",
            Position::new(1.0, 1.0, 1.0),
            MetricSnapshot::new(MetricKind::Mean, 2.0),
        );
        records.push(BookmarkRecord::added(user));
        assert_eq!(live.labels(), vec!["Max Mean (5.0)", "Max Mean point"]);

        let mut restored = BookmarkStore::new();
        assert_eq!(restored.restore(records), 2);
        assert_eq!(restored.labels(), live.labels());
    }

    #[test]
    fn test_record_creates_missing_parent_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data").join("session").join("bookmarks.jsonl");
        let mut sink = JsonLinesMetadata::new(&path);

        sink.record(&BookmarkRecord::added(&bookmark("Focus A", 3.0))).unwrap();
        assert!(path.exists());
        let records = sink.load().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].label, "Focus A");
    }

    #[test]
    fn test_malformed_line_is_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.jsonl");
        std::fs::write(&path, "{not json}\n").unwrap();
        assert!(JsonLinesMetadata::new(path).load().is_err());
    }
}
