//! Error classification
//!
//! Maps a raw [`FetchFailure`] onto the [`ErrorKind`] taxonomy and decides
//! whether another attempt is worthwhile.
//!
//! | Condition                          | Kind         | Retryable |
//! |------------------------------------|--------------|-----------|
//! | no HTTP response                   | `network`    | yes       |
//! | 400 + `duration_mismatch`          | `validation` | no        |
//! | 400                                | `validation` | no        |
//! | 401 / 403                          | `auth`       | no        |
//! | 404                                | `not_found`  | no        |
//! | 429                                | `rate_limit` | yes       |
//! | >= 500                             | `server`     | yes       |
//! | anything else (incl. undecodable)  | `unknown`    | no        |

use crate::fetcher::{FailureResponse, FetchFailure};
use crate::fields::{as_number, as_text};
use dubtrack_common::{ClassifiedError, Diagnostics, ErrorKind};
use serde_json::{Map, Value};
use std::time::Duration;

pub const DURATION_MISMATCH: &str = "duration_mismatch";

const NETWORK_MESSAGE: &str = "Unable to reach the server. Check your internet connection and try again.";
const VALIDATION_MESSAGE: &str = "The request was rejected as invalid.";
const SESSION_EXPIRED_MESSAGE: &str = "Your session has expired. Please sign in again.";
const FORBIDDEN_MESSAGE: &str = "You do not have access to this job.";
const NOT_FOUND_MESSAGE: &str = "Job not found. It may have been deleted.";
const RATE_LIMIT_MESSAGE: &str = "Too many requests. Please wait a moment and try again.";
const SERVER_MESSAGE: &str = "The server ran into a problem. Please try again shortly.";

/// Structured error body, after unwrapping the backend's envelopes
#[derive(Debug, Default, Clone, PartialEq)]
struct ErrorBody {
    code: Option<String>,
    message: Option<String>,
    voice_duration: Option<f64>,
    background_duration: Option<f64>,
    retry_after_secs: Option<f64>,
}

impl ErrorBody {
    fn parse(raw: &str) -> Option<(Self, Value)> {
        let value: Value = serde_json::from_str(raw).ok()?;
        let object = unwrap_envelope(value.as_object()?);
        let body = ErrorBody {
            code: object.get("error").and_then(as_text).map(str::to_string),
            message: object
                .get("message")
                .or_else(|| object.get("detail"))
                .and_then(as_text)
                .map(str::to_string),
            voice_duration: object.get("voice_duration").and_then(as_number),
            background_duration: object.get("background_duration").and_then(as_number),
            retry_after_secs: object.get("retry_after").and_then(as_number),
        };
        Some((body, value))
    }
}

/// Peel `{"detail": {...}}` and `{"error": "http_error", "message": {...}}` wrappers
fn unwrap_envelope(object: &Map<String, Value>) -> &Map<String, Value> {
    if let Some(inner) = object.get("detail").and_then(Value::as_object) {
        return unwrap_envelope(inner);
    }
    if let Some(inner) = object.get("message").and_then(Value::as_object) {
        return unwrap_envelope(inner);
    }
    object
}

/// Stateless classifier; the only thing it carries is where to send diagnostics
#[derive(Debug, Clone, Default)]
pub struct ErrorClassifier {
    diagnostics: Diagnostics,
}

impl ErrorClassifier {
    pub fn new(diagnostics: Diagnostics) -> Self {
        Self { diagnostics }
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn classify(&self, failure: &FetchFailure) -> ClassifiedError {
        let classified = match &failure.response {
            None => ClassifiedError::new(ErrorKind::Network, NETWORK_MESSAGE),
            Some(response) => self.classify_response(response),
        };

        self.diagnostics.debug(format_args!(
            "classified '{}' as {} (retryable: {})",
            failure.message, classified.kind, classified.retryable
        ));
        if let Some(details) = &classified.details {
            self.diagnostics.payload("error body", details);
        }
        classified
    }

    fn classify_response(&self, response: &FailureResponse) -> ClassifiedError {
        let status = response.status;
        let parsed = ErrorBody::parse(&response.body);
        let (body, details) = match parsed {
            Some((body, raw)) => (body, Some(raw)),
            None => (ErrorBody::default(), None),
        };

        let classified = match status {
            400 => validation_error(&body),
            401 => ClassifiedError::new(ErrorKind::Auth, SESSION_EXPIRED_MESSAGE),
            403 => ClassifiedError::new(ErrorKind::Auth, FORBIDDEN_MESSAGE),
            404 => ClassifiedError::new(ErrorKind::NotFound, NOT_FOUND_MESSAGE),
            429 => {
                let hint = response.retry_after.or_else(|| {
                    body.retry_after_secs
                        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
                });
                ClassifiedError::new(ErrorKind::RateLimit, RATE_LIMIT_MESSAGE).with_retry_after(hint)
            }
            s if s >= 500 => ClassifiedError::new(ErrorKind::Server, SERVER_MESSAGE),
            other if (200..300).contains(&other) => ClassifiedError::new(
                ErrorKind::Unknown,
                "The server returned a status payload that could not be read.",
            ),
            other => ClassifiedError::new(
                ErrorKind::Unknown,
                format!("Unexpected response from the server (HTTP {}).", other),
            ),
        };

        let classified = classified.with_status(status);
        match details {
            Some(raw) => classified.with_details(raw),
            None => classified,
        }
    }
}

fn validation_error(body: &ErrorBody) -> ClassifiedError {
    if body.code.as_deref() == Some(DURATION_MISMATCH) {
        let message = match (body.voice_duration, body.background_duration) {
            (Some(voice), Some(background)) => format!(
                "Audio tracks must be the same length. Voice: {:.1}s, Background: {:.1}s",
                voice, background
            ),
            _ => "Audio tracks must be the same length.".to_string(),
        };
        return ClassifiedError::new(ErrorKind::Validation, message);
    }

    let message = body
        .message
        .clone()
        .unwrap_or_else(|| VALIDATION_MESSAGE.to_string());
    ClassifiedError::new(ErrorKind::Validation, message)
}
