//! Two-phase schema mapping: header classification, batched row
//! extraction, then type coercion.

pub mod classifier;
pub mod coerce;
pub mod converter;
pub mod error;
pub mod extractor;
pub mod inference;
pub mod input;
pub mod prompt;
pub mod sanitize;
pub mod types;

pub use classifier::{infer_entity, score_entities, HeaderClassification, HeaderClassifier};
pub use converter::{BatchReport, ConversionResult, Converter};
pub use error::IngestError;
pub use extractor::{fallback_projection, BatchOutcome, RowExtractor};
pub use input::RawTable;
pub use types::{CancellationFlag, ColumnMapping, Record};
