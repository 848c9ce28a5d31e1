//! Inference error types.
//!
//! All errors implement `std::error::Error` via `thiserror`. They carry the
//! context needed for structured log entries; logging itself happens at the
//! call site.

use thiserror::Error;

/// Maximum number of characters of raw model output kept on a [`ParseError`].
pub const PARSE_EXCERPT_CHARS: usize = 2000;

/// Errors that can occur while talking to the model endpoint.
#[derive(Debug, Error)]
pub enum InferenceError {
    /// TCP/HTTP connection to the model endpoint failed.
    #[error("connection failed to {endpoint}: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    /// The model endpoint did not respond within the configured timeout.
    #[error("inference timeout after {duration_secs}s")]
    Timeout { duration_secs: u64 },

    /// Non-2xx HTTP response from the model endpoint.
    #[error("HTTP {status}: {body}")]
    HttpError { status: u16, body: String },

    /// SSE stream parsing or chunk-level error.
    #[error("stream error: {reason}")]
    StreamError { reason: String },

    /// The endpoint answered 2xx but the body was not a usable completion.
    #[error("malformed completion response: {reason}")]
    ResponseError { reason: String },

    /// Client-side configuration problem (bad URL, missing model, ...).
    #[error("config error: {reason}")]
    ConfigError { reason: String },
}

impl InferenceError {
    /// Whether a second attempt against a different model could succeed.
    ///
    /// Every provider-side failure qualifies. Configuration errors do not:
    /// they would fail the same way for any model.
    pub fn is_retriable(&self) -> bool {
        !matches!(self, InferenceError::ConfigError { .. })
    }

    /// Extract the error body text, if this is an `HttpError`.
    pub fn error_body(&self) -> Option<&str> {
        match self {
            InferenceError::HttpError { body, .. } => Some(body),
            _ => None,
        }
    }
}

/// Every structured-output recovery strategy failed.
///
/// `raw_excerpt` holds the first [`PARSE_EXCERPT_CHARS`] characters of the
/// offending text so the failure can be diagnosed from logs.
#[derive(Debug, Clone, Error)]
#[error("no JSON value recoverable from model output: {reason}")]
pub struct ParseError {
    pub reason: String,
    pub raw_excerpt: String,
}

impl ParseError {
    pub fn new(reason: impl Into<String>, raw: &str) -> Self {
        Self {
            reason: reason.into(),
            raw_excerpt: raw.chars().take(PARSE_EXCERPT_CHARS).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_not_retriable() {
        let err = InferenceError::ConfigError {
            reason: "missing base_url".to_string(),
        };
        assert!(!err.is_retriable());
    }

    #[test]
    fn test_provider_errors_retriable() {
        let errors = [
            InferenceError::Timeout { duration_secs: 30 },
            InferenceError::HttpError {
                status: 400,
                body: "bad request".to_string(),
            },
            InferenceError::StreamError {
                reason: "connection reset".to_string(),
            },
        ];
        assert!(errors.iter().all(InferenceError::is_retriable));
    }

    #[test]
    fn test_error_body_http_error() {
        let err = InferenceError::HttpError {
            status: 500,
            body: "test body".to_string(),
        };
        assert_eq!(err.error_body(), Some("test body"));
    }

    #[test]
    fn test_error_body_non_http() {
        let err = InferenceError::Timeout { duration_secs: 5 };
        assert!(err.error_body().is_none());
    }

    #[test]
    fn test_parse_error_truncates_excerpt() {
        let raw = "é".repeat(PARSE_EXCERPT_CHARS + 500);
        let err = ParseError::new("exhausted", &raw);
        assert_eq!(err.raw_excerpt.chars().count(), PARSE_EXCERPT_CHARS);
    }
}
