//! Pipeline error taxonomy.
//!
//! Only fatal conditions live here. A failed extraction batch becomes
//! `BatchOutcome::FallbackProjected`, a hallucinated field becomes a drop
//! counter, and an unresolved foreign key becomes a `RowError`. None of
//! those abort an upload.

use thiserror::Error;

use crate::config::ConfigError;
use crate::pipeline::inference::InferenceError;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum IngestError {
    /// Empty file, no header row, no columns.
    #[error("Invalid input: {0}")]
    Input(String),

    /// Phase-1 inference failed or returned something that is not a JSON object.
    #[error("Failed to get column mapping: {0}")]
    Mapping(String),

    #[error("Could not infer target table (candidates: {}); specify the target table explicitly", candidates.join(", "))]
    EntityInferenceAmbiguous { candidates: Vec<String> },

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Upload cancelled")]
    Cancelled,
}

impl From<InferenceError> for IngestError {
    fn from(err: InferenceError) -> Self {
        Self::Mapping(err.to_string())
    }
}
