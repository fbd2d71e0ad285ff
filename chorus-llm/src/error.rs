//! Completion-service error types.

use thiserror::Error;

/// Errors that can occur while talking to a completion service.
#[derive(Debug, Error)]
pub enum LlmError {
    /// HTTP request failed.
    #[error("Completion request failed: {0}")]
    RequestFailed(String),

    /// Response body was not the expected JSON shape.
    #[error("Failed to parse completion response: {0}")]
    ParseError(String),

    /// No response within the hard timeout.
    #[error("Completion request timed out after {0}ms")]
    Timeout(u64),

    /// Provider is unavailable or not configured.
    #[error("Completion provider unavailable: {0}")]
    Unavailable(String),

    /// All retry attempts exhausted.
    #[error("All completion attempts exhausted after {attempts} tries: {last_error}")]
    RetriesExhausted {
        /// Attempts made, including the first.
        attempts: u32,
        /// Error from the final attempt.
        last_error: String,
    },

    /// Configuration or template error.
    #[error("Completion configuration error: {0}")]
    ConfigError(String),
}

impl LlmError {
    /// `true` if the failure was a timeout, directly or on the final retry.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Classify a transport error from a request sent with a `timeout_ms` budget.
    #[must_use]
    pub fn from_http(err: &reqwest::Error, timeout_ms: u64) -> Self {
        if err.is_timeout() {
            Self::Timeout(timeout_ms)
        } else if err.is_connect() {
            Self::Unavailable(err.to_string())
        } else {
            Self::RequestFailed(err.to_string())
        }
    }
}

/// Convenience Result type alias.
pub type Result<T> = std::result::Result<T, LlmError>;
