//! Language-model clients.
//!
//! `LlmClient` is the only seam between the pipeline and a model service.
//! Implementations: `GeminiClient` (hosted), `OllamaClient` (local), and
//! `MockLlmClient` / `ScriptedLlmClient` for tests.

pub mod gemini;
pub mod mock;
pub mod ollama;

pub use gemini::GeminiClient;
pub use mock::{MockLlmClient, ScriptedLlmClient};
pub use ollama::OllamaClient;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("No model service configured: {0}")]
    NotConfigured(String),

    #[error("Model service is not reachable at {0}")]
    Connection(String),

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("Model service returned error (status {status}): {body}")]
    Http { status: u16, body: String },

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Response withheld by content policy: {0}")]
    SafetyBlocked(String),

    #[error("Model returned an empty response")]
    EmptyResponse,

    #[error("Response parsing error: {0}")]
    ResponseParsing(String),
}

/// Model service abstraction (allows mocking).
pub trait LlmClient: Send + Sync {
    /// One blocking generation call. Implementations must bound it with a
    /// timeout and report it as `LlmError::Timeout`.
    fn generate(&self, model: &str, prompt: &str, system: &str) -> Result<String, LlmError>;

    fn list_models(&self) -> Result<Vec<String>, LlmError>;

    fn is_model_available(&self, model: &str) -> Result<bool, LlmError> {
        let models = self.list_models()?;
        Ok(models.iter().any(|m| m.starts_with(model)))
    }
}

/// Shared clients (one configured client reused across sessions).
impl<T: LlmClient + ?Sized> LlmClient for std::sync::Arc<T> {
    fn generate(&self, model: &str, prompt: &str, system: &str) -> Result<String, LlmError> {
        (**self).generate(model, prompt, system)
    }

    fn list_models(&self) -> Result<Vec<String>, LlmError> {
        (**self).list_models()
    }
}

/// Normalize a reqwest transport failure.
pub(crate) fn map_transport_error(e: reqwest::Error, base_url: &str, timeout_secs: u64) -> LlmError {
    if e.is_timeout() {
        LlmError::Timeout(timeout_secs)
    } else if e.is_connect() {
        LlmError::Connection(base_url.to_string())
    } else {
        LlmError::HttpClient(e.to_string())
    }
}

pub(crate) fn build_http_client(timeout_secs: u64) -> Result<reqwest::blocking::Client, LlmError> {
    reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| LlmError::HttpClient(format!("Failed to create HTTP client: {e}")))
}
