//! Common error types for dubtrack
//!
//! Two families live here:
//! - [`Error`]: operational failures of the client itself (config, I/O, HTTP client setup)
//! - [`ClassifiedError`]: a remote failure reduced to a typed, retryability-tagged value

use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Common result type for dubtrack operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across dubtrack crates
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML config file could not be parsed
    #[error("Config parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP client could not be constructed
    #[error("HTTP client error: {0}")]
    Http(String),
}

/// Failure taxonomy shared by the classifier, retry policy and poller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Request never reached the server (or was aborted / timed out)
    Network,
    /// Request rejected as invalid (HTTP 400)
    Validation,
    /// Server-side failure (HTTP 5xx)
    Server,
    /// Missing or rejected credentials (HTTP 401/403)
    Auth,
    /// Job does not exist (HTTP 404)
    NotFound,
    /// Throttled (HTTP 429)
    RateLimit,
    /// Anything we cannot interpret
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Network => "network",
            ErrorKind::Validation => "validation",
            ErrorKind::Server => "server",
            ErrorKind::Auth => "auth",
            ErrorKind::NotFound => "not_found",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Unknown => "unknown",
        }
    }

    /// Whether failures of this kind are worth another attempt.
    ///
    /// `Unknown` fails closed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ErrorKind::Network | ErrorKind::Server | ErrorKind::RateLimit
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Typed, retryability-tagged representation of a failed status fetch.
///
/// `message` is safe to show to end users. `details` carries the raw server
/// payload for diagnostics only and is never serialized.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[error("{message}")]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    pub retryable: bool,
    #[serde(skip)]
    pub details: Option<serde_json::Value>,
    /// Server-provided wait hint (`Retry-After`), if any
    #[serde(skip)]
    pub retry_after: Option<Duration>,
}

impl ClassifiedError {
    /// New error whose retryability follows [`ErrorKind::is_transient`]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status_code: None,
            retryable: kind.is_transient(),
            details: None,
            retry_after: None,
        }
    }

    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.retry_after = retry_after;
        self
    }

    /// Payload that is not a JSON object at all
    pub fn malformed_payload(description: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::Unknown,
            format!("Unexpected status payload: {}", description.into()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_kinds_are_retryable() {
        for kind in [ErrorKind::Network, ErrorKind::Server, ErrorKind::RateLimit] {
            assert!(ClassifiedError::new(kind, "x").retryable, "{kind} should retry");
        }
        for kind in [
            ErrorKind::Validation,
            ErrorKind::Auth,
            ErrorKind::NotFound,
            ErrorKind::Unknown,
        ] {
            assert!(!ClassifiedError::new(kind, "x").retryable, "{kind} should not retry");
        }
    }

    #[test]
    fn test_serialization_hides_details() {
        let err = ClassifiedError::new(ErrorKind::Server, "boom")
            .with_status(502)
            .with_details(serde_json::json!({"trace": "secret"}));

        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "server");
        assert_eq!(json["status_code"], 502);
        assert!(json.get("details").is_none());
        assert_eq!(err.to_string(), "boom");
    }
}
