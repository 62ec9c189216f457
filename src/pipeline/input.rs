//! Tabular input parsing.
//!
//! First record is the header row. Column order and count are arbitrary.

use csv::ReaderBuilder;

use super::error::IngestError;
use super::types::OrderedRow;

/// A parsed upload: unique headers plus rows padded to header width.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    /// Zero-based position of each kept row among the file's data rows.
    pub source_rows: Vec<usize>,
}

impl RawTable {
    pub fn parse(bytes: &[u8]) -> Result<Self, IngestError> {
        let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Err(IngestError::Input("file is empty".into()));
        }

        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(bytes);

        let mut records = reader.records();
        let header_record = match records.next() {
            Some(record) => record.map_err(|e| IngestError::Input(format!("unreadable header row: {e}")))?,
            None => return Err(IngestError::Input("file is empty".into())),
        };

        let raw_headers: Vec<String> = header_record.iter().map(|h| h.trim().to_string()).collect();
        if raw_headers.iter().all(String::is_empty) {
            return Err(IngestError::Input("file has no columns".into()));
        }
        let headers = disambiguate_headers(raw_headers);

        let mut rows = Vec::new();
        let mut source_rows = Vec::new();
        for (idx, record) in records.enumerate() {
            let record = record.map_err(|e| IngestError::Input(format!("unreadable row {idx}: {e}")))?;
            if record.iter().all(|cell| cell.trim().is_empty()) {
                continue;
            }
            if record.len() > headers.len() {
                tracing::warn!(
                    row = idx,
                    cells = record.len(),
                    columns = headers.len(),
                    "Row has more cells than headers, extra cells ignored"
                );
            }
            let mut row: Vec<String> = record
                .iter()
                .take(headers.len())
                .map(str::to_string)
                .collect();
            row.resize(headers.len(), String::new());
            rows.push(row);
            source_rows.push(idx);
        }

        Ok(Self {
            headers,
            rows,
            source_rows,
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Value of `header` in `row`, if both exist.
    pub fn cell(&self, row: usize, header: &str) -> Option<&str> {
        let col = self.headers.iter().position(|h| h == header)?;
        self.rows.get(row).and_then(|r| r.get(col)).map(String::as_str)
    }

    /// JSON objects for the first `n` rows, keys in header order.
    pub fn sample_rows(&self, n: usize) -> Vec<serde_json::Value> {
        self.rows_as_json(&self.rows[..n.min(self.rows.len())])
    }

    pub(crate) fn rows_as_json(&self, rows: &[Vec<String>]) -> Vec<serde_json::Value> {
        rows.iter()
            .filter_map(|values| {
                serde_json::to_value(OrderedRow {
                    headers: &self.headers,
                    values,
                })
                .ok()
            })
            .collect()
    }
}

/// Blank headers become `Unnamed: {idx}`; repeats get `.1`, `.2`, ... suffixes.
fn disambiguate_headers(raw: Vec<String>) -> Vec<String> {
    let mut headers: Vec<String> = Vec::with_capacity(raw.len());
    for (idx, header) in raw.into_iter().enumerate() {
        let base = if header.is_empty() {
            format!("Unnamed: {idx}")
        } else {
            header
        };
        let mut candidate = base.clone();
        let mut suffix = 1;
        while headers.contains(&candidate) {
            candidate = format!("{base}.{suffix}");
            suffix += 1;
        }
        headers.push(candidate);
    }
    headers
}
