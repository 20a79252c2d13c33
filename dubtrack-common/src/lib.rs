//! # dubtrack Common Library
//!
//! Shared code for the dubbing-job tracking client including:
//! - Job / LanguageTask model and status enums
//! - Error types (`Error`, `ClassifiedError`)
//! - Configuration loading
//! - Injectable diagnostics sink
//! - Language display table

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod job;
pub mod languages;

pub use diagnostics::{DiagnosticSink, Diagnostics};
pub use error::{ClassifiedError, Error, ErrorKind, Result};
pub use job::{Job, JobStatus, LanguageTask, TaskStatus, ValidationError};
