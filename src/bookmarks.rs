//! Labeled stage positions.
//!
//! [`BookmarkStore`] keeps bookmarks in insertion order with unique labels.
//! Public indices are 1-based ordinals into that order. Adding a label that
//! already exists replaces the old entry and moves it to the end.
//!
//! Max-tracking bookmarks are labeled `"Max <kind> (<value>)"`; at most one
//! bookmark per metric kind carries the `"Max <kind>"` prefix at any time.

use crate::core::Position;
use crate::error::{AppResult, StageError};
use crate::metadata::{BookmarkOp, BookmarkRecord};
use crate::metric::{MetricKind, MetricSnapshot};
use serde::{Deserialize, Serialize};

/// Longest accepted label, in characters.
pub const MAX_LABEL_LEN: usize = 50;

const LABEL_PUNCTUATION: &[char] = &[' ', '-', '_', '.', '(', ')', '#', ':', ','];

/// A named position with the metric observed when it was saved.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bookmark {
    /// Unique label.
    pub label: String,
    /// Saved stage position.
    pub position: Position,
    /// Metric observed when saved.
    pub metric: MetricSnapshot,
}

/// Check a user-supplied label: 1-50 characters of letters, digits, spaces
/// and `-_.()#:,`.
pub fn validate_label(label: &str) -> AppResult<()> {
    let len = label.chars().count();
    if len == 0 || len > MAX_LABEL_LEN {
        return Err(StageError::InvalidLabel(format!(
            "length must be 1-{} characters, got {}",
            MAX_LABEL_LEN, len
        )));
    }
    if label.trim().is_empty() {
        return Err(StageError::InvalidLabel("label is blank".to_string()));
    }
    if let Some(bad) = label
        .chars()
        .find(|c| !c.is_alphanumeric() && !LABEL_PUNCTUATION.contains(c))
    {
        return Err(StageError::InvalidLabel(format!(
            "character '{}' is not allowed",
            bad
        )));
    }
    Ok(())
}

/// Label prefix shared by every max-tracking bookmark of `kind`.
pub fn max_label_prefix(kind: MetricKind) -> String {
    format!("Max {}", kind)
}

/// Full max-tracking label for `kind` at `value`.
pub fn max_label(kind: MetricKind, value: f64) -> String {
    format!("{} ({:.1})", max_label_prefix(kind), value)
}

/// Ordered, label-keyed bookmark collection.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BookmarkStore {
    entries: Vec<Bookmark>,
}

impl BookmarkStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of bookmarks.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no bookmarks are stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bookmarks in order.
    pub fn iter(&self) -> impl Iterator<Item = &Bookmark> {
        self.entries.iter()
    }

    /// Labels in order.
    pub fn labels(&self) -> Vec<&str> {
        self.entries.iter().map(|b| b.label.as_str()).collect()
    }

    /// True when `index` is within `1..=len`.
    pub fn is_valid_index(&self, index: usize) -> bool {
        index >= 1 && index <= self.entries.len()
    }

    fn check_index(&self, index: usize) -> AppResult<usize> {
        if self.is_valid_index(index) {
            Ok(index - 1)
        } else {
            Err(StageError::InvalidIndex {
                index,
                count: self.entries.len(),
            })
        }
    }

    /// 1-based index and bookmark for `label`.
    pub fn find(&self, label: &str) -> Option<(usize, &Bookmark)> {
        self.entries
            .iter()
            .enumerate()
            .find(|(_, b)| b.label == label)
            .map(|(i, b)| (i + 1, b))
    }

    /// Bookmark at 1-based `index`.
    pub fn get(&self, index: usize) -> AppResult<&Bookmark> {
        let i = self.check_index(index)?;
        Ok(&self.entries[i])
    }

    /// Append a bookmark, replacing any existing one with the same label.
    ///
    /// Labels are not validated here; see [`validate_label`].
    pub fn add(
        &mut self,
        label: impl Into<String>,
        position: Position,
        metric: MetricSnapshot,
    ) -> &Bookmark {
        let label = label.into();
        self.entries.retain(|b| b.label != label);
        self.entries.push(Bookmark {
            label,
            position,
            metric,
        });
        &self.entries[self.entries.len() - 1]
    }

    /// Remove the bookmark at 1-based `index`.
    pub fn remove(&mut self, index: usize) -> AppResult<Bookmark> {
        let i = self.check_index(index)?;
        Ok(self.entries.remove(i))
    }

    /// Remove the bookmark labeled `label`, if any.
    pub fn remove_label(&mut self, label: &str) -> Option<Bookmark> {
        let i = self.entries.iter().position(|b| b.label == label)?;
        Some(self.entries.remove(i))
    }

    /// Replace the max-tracking bookmark for `kind`.
    ///
    /// Every bookmark whose label starts with `"Max <kind>"` is removed before
    /// the new one is appended.
    ///
    /// # Errors
    ///
    /// `InvalidSequence` if `value` is `NaN` or infinite; the store is unchanged.
    pub fn update_max(
        &mut self,
        kind: MetricKind,
        value: f64,
        position: Position,
    ) -> AppResult<&Bookmark> {
        if !value.is_finite() {
            return Err(StageError::InvalidSequence(format!(
                "cannot bookmark non-finite {} value",
                kind
            )));
        }
        let prefix = max_label_prefix(kind);
        self.entries.retain(|b| !b.label.starts_with(&prefix));
        Ok(self.add(
            max_label(kind, value),
            position,
            MetricSnapshot::new(kind, value),
        ))
    }

    /// Replay metadata records in order; returns the number applied.
    ///
    /// `Max` records follow the max-tracking replacement rule; `Add` records
    /// only replace an entry with the same label, like [`add`](Self::add).
    pub fn restore<I>(&mut self, records: I) -> usize
    where
        I: IntoIterator<Item = BookmarkRecord>,
    {
        let mut applied = 0;
        for record in records {
            match record.op {
                BookmarkOp::Add => {
                    self.add(record.label.clone(), record.position(), record.metric());
                    applied += 1;
                }
                BookmarkOp::Max => {
                    let prefix = max_label_prefix(record.metric_kind);
                    self.entries.retain(|b| !b.label.starts_with(&prefix));
                    self.add(record.label.clone(), record.position(), record.metric());
                    applied += 1;
                }
                BookmarkOp::Remove => {
                    if self.remove_label(&record.label).is_some() {
                        applied += 1;
                    }
                }
            }
        }
        applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn mean(value: f64) -> MetricSnapshot {
        MetricSnapshot::new(MetricKind::Mean, value)
    }

    #[test]
    fn test_add_same_label_replaces_and_moves_to_end() {
        let mut store = BookmarkStore::new();
        store.add("Focus A", Position::new(1.0, 2.0, 3.0), mean(42.0));
        store.add("Focus B", Position::default(), mean(0.0));
        store.add("Focus A", Position::new(9.0, 9.0, 9.0), mean(1.0));

        assert_eq!(store.labels(), vec!["Focus B", "Focus A"]);
        let (index, bookmark) = store.find("Focus A").unwrap();
        assert_eq!(index, 2);
        assert_eq!(bookmark.position, Position::new(9.0, 9.0, 9.0));
        assert_eq!(bookmark.metric.value, 1.0);
    }

    #[test]
    fn test_out_of_range_indices_do_not_mutate() {
        let mut store = BookmarkStore::new();
        store.add("a", Position::default(), mean(1.0));
        store.add("b", Position::default(), mean(2.0));
        let before = store.clone();

        assert!(store.remove(0).is_err());
        assert!(store.remove(3).is_err());
        assert!(store.get(0).is_err());
        assert_eq!(store, before);

        assert_eq!(store.remove(1).unwrap().label, "a");
        assert_eq!(store.get(1).unwrap().label, "b");
    }

    #[test]
    fn test_labels_stay_unique() {
        let mut store = BookmarkStore::new();
        let labels = ["x", "y", "x", "z", "y", "x"];
        for (i, label) in labels.iter().enumerate() {
            store.add(*label, Position::default(), mean(i as f64));
            if i % 4 == 3 {
                store.remove(1).unwrap();
            }
        }
        let unique: HashSet<&str> = store.labels().into_iter().collect();
        assert_eq!(unique.len(), store.len());
    }

    #[test]
    fn test_update_max_keeps_one_per_kind() {
        let mut store = BookmarkStore::new();
        store.add("Focus A", Position::default(), mean(1.0));
        store
            .update_max(MetricKind::StdDev, 12.34, Position::new(0.0, 0.0, 2.0))
            .unwrap();
        store
            .update_max(MetricKind::Mean, 5.0, Position::default())
            .unwrap();
        let latest = store
            .update_max(MetricKind::StdDev, 20.06, Position::new(0.0, 0.0, 4.0))
            .unwrap();
        assert_eq!(latest.label, "Max StdDev (20.1)");

        let std_dev: Vec<&Bookmark> = store
            .iter()
            .filter(|b| b.label.starts_with("Max StdDev"))
            .collect();
        assert_eq!(std_dev.len(), 1);
        assert_eq!(std_dev[0].position.z, 4.0);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_update_max_rejects_nan() {
        let mut store = BookmarkStore::new();
        assert!(store
            .update_max(MetricKind::Max, f64::NAN, Position::default())
            .is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn test_label_validation() {
        assert!(validate_label("Focus A").is_ok());
        assert!(validate_label("Max StdDev (12.3)").is_ok());
        assert!(validate_label("").is_err());
        assert!(validate_label("   ").is_err());
        assert!(validate_label(&"a".repeat(51)).is_err());
        assert!(validate_label(&"a".repeat(50)).is_ok());
        assert!(validate_label("slash/name").is_err());
    }
}
