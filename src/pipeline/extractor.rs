//! Phase 2: Row Extractor.
//!
//! Sends fixed-size batches of raw rows to the inference service, which
//! decomposes compound cells into separate target fields. Every returned
//! field name is re-validated. A batch whose call or shape fails degrades to
//! a rename-only projection of the phase-1 mapping instead of failing the
//! upload.

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::{debug, warn};

use crate::schema::{self, Entity};

use super::error::IngestError;
use super::inference::InferenceClient;
use super::input::RawTable;
use super::prompt;
use super::sanitize::{extract_json_block, JsonShape};
use super::types::{CancellationFlag, ColumnMapping, OrderedRow, Record};

/// Rows per inference call. Bounds prompt size and cost per call.
pub const DEFAULT_BATCH_SIZE: usize = 25;

/// Result of one batch. Both variants carry exactly one record per input row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchOutcome {
    FullyExtracted {
        /// Index of the batch's first row in the upload.
        start: usize,
        records: Vec<Record>,
        /// Fields removed by validation across the batch.
        dropped_fields: usize,
    },
    FallbackProjected {
        start: usize,
        records: Vec<Record>,
        reason: String,
    },
}

impl BatchOutcome {
    pub fn start(&self) -> usize {
        match self {
            Self::FullyExtracted { start, .. } | Self::FallbackProjected { start, .. } => *start,
        }
    }

    pub fn records(&self) -> &[Record] {
        match self {
            Self::FullyExtracted { records, .. } | Self::FallbackProjected { records, .. } => records,
        }
    }

    pub fn into_records(self) -> Vec<Record> {
        match self {
            Self::FullyExtracted { records, .. } | Self::FallbackProjected { records, .. } => records,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::FallbackProjected { .. })
    }
}

pub struct RowExtractor<'a> {
    client: &'a dyn InferenceClient,
    entity: Entity,
    batch_size: usize,
    valid_fields: BTreeSet<&'static str>,
}

impl<'a> RowExtractor<'a> {
    pub fn new(client: &'a dyn InferenceClient, entity: Entity) -> Self {
        Self {
            client,
            entity,
            batch_size: DEFAULT_BATCH_SIZE,
            valid_fields: schema::target_field_names(entity),
        }
    }

    /// Zero is treated as one.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Extract every row of `table`, batch by batch in index order.
    ///
    /// Cancellation is honoured before each batch, never mid-call.
    pub fn extract_all(
        &self,
        table: &RawTable,
        mapping: &ColumnMapping,
        cancel: &CancellationFlag,
    ) -> Result<Vec<BatchOutcome>, IngestError> {
        let mut outcomes = Vec::with_capacity(table.len().div_ceil(self.batch_size));
        for (batch_idx, rows) in table.rows.chunks(self.batch_size).enumerate() {
            if cancel.is_cancelled() {
                return Err(IngestError::Cancelled);
            }
            let start = batch_idx * self.batch_size;
            outcomes.push(self.extract_batch(&table.headers, mapping, rows, start));
        }
        Ok(outcomes)
    }

    /// Extract one batch. Never fails; failure is the `FallbackProjected` variant.
    pub fn extract_batch(
        &self,
        headers: &[String],
        mapping: &ColumnMapping,
        rows: &[Vec<String>],
        start: usize,
    ) -> BatchOutcome {
        match self.try_extract(headers, mapping, rows) {
            Ok((records, dropped_fields)) => {
                debug!(
                    entity = %self.entity,
                    start,
                    rows = rows.len(),
                    dropped_fields,
                    "Batch extracted"
                );
                BatchOutcome::FullyExtracted {
                    start,
                    records,
                    dropped_fields,
                }
            }
            Err(reason) => {
                warn!(
                    entity = %self.entity,
                    start,
                    rows = rows.len(),
                    reason = %reason,
                    "Batch extraction failed, using header mapping fallback"
                );
                BatchOutcome::FallbackProjected {
                    start,
                    records: rows
                        .iter()
                        .map(|row| fallback_projection(headers, mapping, row))
                        .collect(),
                    reason,
                }
            }
        }
    }

    fn try_extract(
        &self,
        headers: &[String],
        mapping: &ColumnMapping,
        rows: &[Vec<String>],
    ) -> Result<(Vec<Record>, usize), String> {
        let rows_json: Vec<serde_json::Value> = rows
            .iter()
            .map(|values| serde_json::to_value(OrderedRow { headers, values }))
            .collect::<Result<_, _>>()
            .map_err(|e| e.to_string())?;

        let system = prompt::extraction_system_prompt(self.entity);
        let user = prompt::extraction_user_prompt(headers, mapping, &rows_json);
        let response = self.client.complete(&system, &user).map_err(|e| e.to_string())?;

        parse_batch_response(&response, rows.len(), &self.valid_fields)
    }
}

/// Parse a phase-2 completion into exactly `expected` validated records.
///
/// Returns the records plus the number of fields dropped by validation.
/// A non-array, a wrong element count, or a non-object element is an error.
pub fn parse_batch_response(
    response: &str,
    expected: usize,
    valid_fields: &BTreeSet<&'static str>,
) -> Result<(Vec<Record>, usize), String> {
    let block = extract_json_block(response, JsonShape::Array)
        .ok_or_else(|| "no JSON array in inference response".to_string())?;
    let value: serde_json::Value =
        serde_json::from_str(block).map_err(|e| format!("invalid JSON: {e}"))?;
    let items = match value {
        serde_json::Value::Array(items) => items,
        _ => return Err("inference response is not a JSON array".into()),
    };
    if items.len() != expected {
        return Err(format!(
            "expected {expected} records, inference returned {}",
            items.len()
        ));
    }

    let mut records = Vec::with_capacity(expected);
    let mut dropped = 0;
    for (idx, item) in items.into_iter().enumerate() {
        let serde_json::Value::Object(object) = item else {
            return Err(format!("element {idx} is not a JSON object"));
        };
        let (record, n) = validate_record(object, valid_fields);
        dropped += n;
        records.push(record);
    }
    Ok((records, dropped))
}

/// Keep scalar values of known fields. Nulls are omitted without counting.
fn validate_record(
    object: serde_json::Map<String, serde_json::Value>,
    valid_fields: &BTreeSet<&'static str>,
) -> (Record, usize) {
    let mut record = Record::new();
    let mut dropped = 0;
    for (field, value) in object {
        if !valid_fields.contains(field.as_str()) {
            warn!(field = %field, "Dropping unrecognized extracted field");
            dropped += 1;
            continue;
        }
        match value {
            serde_json::Value::Null => {}
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => {
                warn!(field = %field, "Dropping non-scalar extracted value");
                dropped += 1;
            }
            scalar => {
                record.insert(field, scalar);
            }
        }
    }
    (record, dropped)
}

/// Rename-only projection of one row through the phase-1 mapping.
///
/// For each mapped header with a non-blank value, in header order, emit the
/// raw value under its target. The first non-blank header wins when two map
/// to the same target.
pub fn fallback_projection(headers: &[String], mapping: &ColumnMapping, row: &[String]) -> Record {
    let mut record = Record::new();
    for (header, value) in headers.iter().zip(row) {
        let Some(target) = mapping.get(header) else {
            continue;
        };
        if value.trim().is_empty() || record.contains_key(target) {
            continue;
        }
        record.insert(target.to_string(), serde_json::Value::String(value.clone()));
    }
    record
}
