//! Injectable, level-gated diagnostics
//!
//! Tracking components never write to a fixed log sink. They hold a
//! [`Diagnostics`] handle that forwards to whatever [`DiagnosticSink`] the
//! embedding application supplies. Raw server payloads are only echoed when
//! `echo_payloads` is switched on, and even then sensitive keys are redacted.

use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::Level;

/// Keys whose values are never echoed (matched case-insensitively as substrings)
const SENSITIVE_KEYS: &[&str] = &[
    "password",
    "token",
    "secret",
    "api_key",
    "apikey",
    "authorization",
    "connection_string",
    "database_url",
];

const REDACTED: &str = "[REDACTED]";

/// Destination for diagnostic messages
pub trait DiagnosticSink: Send + Sync {
    /// Whether messages at `level` would be recorded
    fn enabled(&self, level: Level) -> bool;

    fn emit(&self, level: Level, message: &str);
}

/// Forwards to the global `tracing` subscriber
#[derive(Debug, Clone)]
pub struct TracingSink {
    max_level: Level,
}

impl TracingSink {
    pub fn new(max_level: Level) -> Self {
        Self { max_level }
    }
}

impl DiagnosticSink for TracingSink {
    fn enabled(&self, level: Level) -> bool {
        level <= self.max_level
    }

    fn emit(&self, level: Level, message: &str) {
        match level {
            Level::ERROR => tracing::error!(target: "dubtrack", "{}", message),
            Level::WARN => tracing::warn!(target: "dubtrack", "{}", message),
            Level::INFO => tracing::info!(target: "dubtrack", "{}", message),
            Level::DEBUG => tracing::debug!(target: "dubtrack", "{}", message),
            _ => tracing::trace!(target: "dubtrack", "{}", message),
        }
    }
}

/// Discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl DiagnosticSink for NullSink {
    fn enabled(&self, _level: Level) -> bool {
        false
    }

    fn emit(&self, _level: Level, _message: &str) {}
}

/// Cheap-to-clone handle over a shared sink
#[derive(Clone)]
pub struct Diagnostics {
    sink: Arc<dyn DiagnosticSink>,
    echo_payloads: bool,
}

impl Diagnostics {
    pub fn new(sink: Arc<dyn DiagnosticSink>, echo_payloads: bool) -> Self {
        Self {
            sink,
            echo_payloads,
        }
    }

    /// `tracing`-backed diagnostics capped at `max_level`
    pub fn tracing(max_level: Level, echo_payloads: bool) -> Self {
        Self::new(Arc::new(TracingSink::new(max_level)), echo_payloads)
    }

    pub fn silent() -> Self {
        Self::new(Arc::new(NullSink), false)
    }

    pub fn echoes_payloads(&self) -> bool {
        self.echo_payloads
    }

    /// Formats only when the sink accepts `level`
    pub fn log(&self, level: Level, args: fmt::Arguments<'_>) {
        if self.sink.enabled(level) {
            self.sink.emit(level, &args.to_string());
        }
    }

    pub fn error(&self, args: fmt::Arguments<'_>) {
        self.log(Level::ERROR, args);
    }

    pub fn warn(&self, args: fmt::Arguments<'_>) {
        self.log(Level::WARN, args);
    }

    pub fn info(&self, args: fmt::Arguments<'_>) {
        self.log(Level::INFO, args);
    }

    pub fn debug(&self, args: fmt::Arguments<'_>) {
        self.log(Level::DEBUG, args);
    }

    /// Echo a raw payload at DEBUG, redacted, only when payload echoing is on
    pub fn payload(&self, label: &str, payload: &Value) {
        if !self.echo_payloads || !self.sink.enabled(Level::DEBUG) {
            return;
        }
        let redacted = redact(payload);
        self.sink
            .emit(Level::DEBUG, &format!("{}: {}", label, redacted));
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::tracing(Level::TRACE, false)
    }
}

impl fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Diagnostics")
            .field("echo_payloads", &self.echo_payloads)
            .finish_non_exhaustive()
    }
}

/// Copy of `value` with sensitive object entries replaced by `[REDACTED]`
pub fn redact(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, inner)| {
                    if is_sensitive_key(key) {
                        (key.clone(), Value::String(REDACTED.to_string()))
                    } else {
                        (key.clone(), redact(inner))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact).collect()),
        other => other.clone(),
    }
}

fn is_sensitive_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    SENSITIVE_KEYS.iter().any(|needle| lower.contains(needle))
}
