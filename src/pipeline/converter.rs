//! End-to-end conversion: raw bytes to coerced, schema-valid records.
//!
//! Orchestrates parsing, phase 1, phase 2 and coercion. Persistence is a
//! separate step (see `crate::ingest`).

use std::time::Instant;

use serde::Serialize;
use tracing::info;

use crate::schema::Entity;

use super::classifier::{HeaderClassifier, SAMPLE_ROWS};
use super::coerce;
use super::error::IngestError;
use super::extractor::{BatchOutcome, RowExtractor, DEFAULT_BATCH_SIZE};
use super::inference::InferenceClient;
use super::input::RawTable;
use super::types::{CancellationFlag, ColumnMapping, Record};

/// Per-batch metadata kept after records are flattened.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchReport {
    pub start: usize,
    pub rows: usize,
    pub degraded: bool,
    /// Fallback reason for degraded batches.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub dropped_fields: usize,
}

impl From<&BatchOutcome> for BatchReport {
    fn from(outcome: &BatchOutcome) -> Self {
        match outcome {
            BatchOutcome::FullyExtracted {
                start,
                records,
                dropped_fields,
            } => Self {
                start: *start,
                rows: records.len(),
                degraded: false,
                reason: None,
                dropped_fields: *dropped_fields,
            },
            BatchOutcome::FallbackProjected {
                start,
                records,
                reason,
            } => Self {
                start: *start,
                rows: records.len(),
                degraded: true,
                reason: Some(reason.clone()),
                dropped_fields: 0,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversionResult {
    pub entity: Entity,
    pub mapping: ColumnMapping,
    pub unmapped: Vec<String>,
    /// One record per input row, input order.
    pub records: Vec<Record>,
    /// Upload row index of each record.
    #[serde(skip)]
    pub source_rows: Vec<usize>,
    pub batches: Vec<BatchReport>,
}

impl ConversionResult {
    pub fn degraded_batches(&self) -> usize {
        self.batches.iter().filter(|b| b.degraded).count()
    }

    pub fn dropped_fields(&self) -> usize {
        self.batches.iter().map(|b| b.dropped_fields).sum()
    }

    /// Output columns: mapped targets in header order, then any other
    /// extracted field in name order.
    pub fn columns(&self) -> Vec<String> {
        let mut columns: Vec<String> = self
            .mapping
            .targets()
            .into_iter()
            .map(str::to_string)
            .collect();
        let mut extra: Vec<&String> = self
            .records
            .iter()
            .flat_map(|r| r.keys())
            .filter(|k| !columns.contains(k))
            .collect();
        extra.sort();
        extra.dedup();
        columns.extend(extra.into_iter().cloned());
        columns
    }

    /// Render the records as a cleaned CSV document.
    pub fn to_csv(&self) -> Result<String, csv::Error> {
        let columns = self.columns();
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(&columns)?;
        for record in &self.records {
            writer.write_record(columns.iter().map(|c| cell_text(record.get(c))))?;
        }
        let bytes = writer.into_inner().map_err(|e| e.into_error())?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

fn cell_text(value: Option<&serde_json::Value>) -> String {
    match value {
        None | Some(serde_json::Value::Null) => String::new(),
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

pub struct Converter<'a> {
    client: &'a dyn InferenceClient,
    batch_size: usize,
}

impl<'a> Converter<'a> {
    pub fn new(client: &'a dyn InferenceClient) -> Self {
        Self {
            client,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Convert one uploaded file.
    ///
    /// Input, mapping and ambiguity errors abort before phase 2. Batch
    /// failures degrade to fallback projection and are reported in
    /// `batches`.
    pub fn convert(
        &self,
        bytes: &[u8],
        target: Option<Entity>,
        cancel: &CancellationFlag,
    ) -> Result<ConversionResult, IngestError> {
        let started = Instant::now();
        let table = RawTable::parse(bytes)?;
        info!(
            columns = table.headers.len(),
            rows = table.len(),
            entity_hint = ?target,
            "Conversion started"
        );

        let classification = HeaderClassifier::new(self.client).classify(
            &table.headers,
            &table.sample_rows(SAMPLE_ROWS),
            target,
        )?;

        let outcomes = RowExtractor::new(self.client, classification.entity)
            .with_batch_size(self.batch_size)
            .extract_all(&table, &classification.mapping, cancel)?;

        let batches: Vec<BatchReport> = outcomes.iter().map(BatchReport::from).collect();
        let mut records: Vec<Record> = outcomes
            .into_iter()
            .flat_map(BatchOutcome::into_records)
            .collect();
        coerce::coerce_records(&mut records);

        let result = ConversionResult {
            entity: classification.entity,
            mapping: classification.mapping,
            unmapped: classification.unmapped,
            records,
            source_rows: table.source_rows,
            batches,
        };

        info!(
            entity = %result.entity,
            records = result.records.len(),
            batches = result.batches.len(),
            degraded_batches = result.degraded_batches(),
            dropped_fields = result.dropped_fields(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Conversion complete"
        );
        Ok(result)
    }
}
