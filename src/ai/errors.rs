//! Error types for the AI partner and speech services.

use thiserror::Error;

/// External service error. Callers replace these with fallbacks.
#[derive(Debug, Error)]
pub enum AiError {
    /// HTTP client error from Rig.
    #[error("http client error: {0}")]
    HttpClient(#[from] rig::http_client::Error),
    /// Completion error.
    #[error("completion error: {0}")]
    Completion(#[from] rig::completion::CompletionError),
    /// Speech endpoint transport error.
    #[error("speech request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// Speech endpoint answered with a non-success status.
    #[error("speech service returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, for logs.
        body: String,
    },
    /// The model or service produced nothing usable.
    #[error("empty response from {0}")]
    EmptyResponse(&'static str),
    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// URL parse error.
    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
}

/// Convenience result alias for AI operations.
pub type AiResult<T> = Result<T, AiError>;
