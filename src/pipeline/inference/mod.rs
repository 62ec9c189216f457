//! Semantic inference service boundary.
//!
//! The service output is untrusted text. Callers sanitize and validate it
//! against the schema registry before any field name is used.

pub mod mock;
pub mod openai;

pub use mock::MockInferenceClient;
pub use openai::OpenAiClient;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("Inference service is not reachable at {0}")]
    Connection(String),

    #[error("Inference service returned error (status {status}): {body}")]
    Service { status: u16, body: String },

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Malformed inference response: {0}")]
    MalformedResponse(String),
}

/// A single request/response exchange: system instructions plus user content
/// in, raw completion text out.
pub trait InferenceClient: Send + Sync {
    fn complete(&self, system: &str, prompt: &str) -> Result<String, InferenceError>;

    /// Model identifier, for logging.
    fn model(&self) -> &str;
}
