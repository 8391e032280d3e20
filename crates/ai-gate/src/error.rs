//! Error types for the AI gate.
//!
//! Every variant here ultimately resolves to a fail-open evaluation; the
//! taxonomy exists for logging and tests, not for control flow upstream.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for AI gate operations.
pub type Result<T> = std::result::Result<T, AiGateError>;

/// Errors that can occur when calling an LLM provider.
#[derive(Debug, Error)]
pub enum AiGateError {
    /// The provider call did not complete within the configured timeout.
    #[error("provider timed out after {0:?}")]
    Timeout(Duration),

    /// HTTP transport failure.
    #[error("http error: {0}")]
    Http(String),

    /// Provider returned a non-success status.
    #[error("provider status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body (truncated).
        body: String,
    },

    /// Response body could not be parsed into the expected shape.
    #[error("malformed provider response: {0}")]
    MalformedResponse(String),

    /// No JSON object found in the model's completion text.
    #[error("no JSON object in completion")]
    NoJsonInCompletion,

    /// The gate is not configured (disabled or missing key).
    #[error("evaluator not configured: {0}")]
    NotConfigured(String),
}

impl From<reqwest::Error> for AiGateError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            // The caller's configured timeout is reported at the call site
            Self::Http(format!("request timed out: {err}"))
        } else {
            Self::Http(err.to_string())
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_descriptive() {
        let err = AiGateError::Status {
            status: 429,
            body: "rate limited".into(),
        };
        assert!(err.to_string().contains("429"));

        let err = AiGateError::Timeout(Duration::from_secs(2));
        assert!(err.to_string().contains("2s"));
    }
}
