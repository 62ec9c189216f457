use std::collections::VecDeque;
use std::sync::Mutex;

use super::{InferenceClient, InferenceError};

/// Scripted inference client for tests.
///
/// Returns queued responses in order; once the queue is empty every call
/// fails with `MalformedResponse`. Prompts are recorded for assertions.
#[derive(Default)]
pub struct MockInferenceClient {
    responses: Mutex<VecDeque<Result<String, InferenceError>>>,
    prompts: Mutex<Vec<String>>,
}

impl MockInferenceClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful completion.
    pub fn respond(self, text: impl Into<String>) -> Self {
        self.push(Ok(text.into()));
        self
    }

    /// Queue a transport failure.
    pub fn fail(self, message: impl Into<String>) -> Self {
        self.push(Err(InferenceError::HttpClient(message.into())));
        self
    }

    fn push(&self, response: Result<String, InferenceError>) {
        if let Ok(mut queue) = self.responses.lock() {
            queue.push_back(response);
        }
    }

    /// User prompts received so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().map(|p| p.len()).unwrap_or(0)
    }
}

impl InferenceClient for MockInferenceClient {
    fn complete(&self, _system: &str, prompt: &str) -> Result<String, InferenceError> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        self.responses
            .lock()
            .ok()
            .and_then(|mut queue| queue.pop_front())
            .unwrap_or_else(|| {
                Err(InferenceError::MalformedResponse(
                    "no scripted response left".into(),
                ))
            })
    }

    fn model(&self) -> &str {
        "mock"
    }
}
