//! Core types shared by both mapping phases and the ingestor.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

/// One structured row: field name to scalar JSON value. Sparse.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Ordered raw header to target field mapping. Each header appears at most once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMapping {
    entries: Vec<(String, String)>,
}

impl ColumnMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the target for `header`, keeping its original position.
    pub fn insert(&mut self, header: impl Into<String>, target: impl Into<String>) {
        let header = header.into();
        let target = target.into();
        match self.entries.iter_mut().find(|(h, _)| *h == header) {
            Some(entry) => entry.1 = target,
            None => self.entries.push((header, target)),
        }
    }

    pub fn get(&self, header: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(h, _)| h == header)
            .map(|(_, t)| t.as_str())
    }

    pub fn contains_header(&self, header: &str) -> bool {
        self.get(header).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(h, t)| (h.as_str(), t.as_str()))
    }

    /// Distinct target fields in header order.
    pub fn targets(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for (_, target) in &self.entries {
            if !seen.contains(&target.as_str()) {
                seen.push(target.as_str());
            }
        }
        seen
    }

    /// Keep only entries whose target satisfies `keep`. Returns the removed entries.
    pub fn retain_targets(&mut self, mut keep: impl FnMut(&str) -> bool) -> Vec<(String, String)> {
        let (kept, removed): (Vec<_>, Vec<_>) =
            self.entries.drain(..).partition(|(_, t)| keep(t));
        self.entries = kept;
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for ColumnMapping {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (header, target) in &self.entries {
            map.serialize_entry(header, target)?;
        }
        map.end()
    }
}

/// A raw row rendered as a JSON object in header order, for prompts.
pub(crate) struct OrderedRow<'a> {
    pub headers: &'a [String],
    pub values: &'a [String],
}

impl Serialize for OrderedRow<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.headers.len()))?;
        for (header, value) in self.headers.iter().zip(self.values) {
            map.serialize_entry(header, value)?;
        }
        map.end()
    }
}

/// Caller-controlled cancellation, checked at batch and row boundaries only.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
