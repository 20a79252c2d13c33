//! Canonical job model
//!
//! A [`Job`] is an immutable snapshot produced by one successful status fetch.
//! The next fetch produces a brand-new snapshot; nothing here is mutated in place
//! once handed to a consumer.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Overall status of a dubbing job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Validating,
    Uploading,
    /// Accepted by the backend, waiting for a worker
    Pending,
    Processing,
    Generating,
    Finalizing,
    Complete,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Validating => "validating",
            JobStatus::Uploading => "uploading",
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Generating => "generating",
            JobStatus::Finalizing => "finalizing",
            JobStatus::Complete => "complete",
            JobStatus::Error => "error",
        }
    }

    /// `complete` and `error` end tracking
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Error)
    }

    /// Parse a server-reported status, accepting legacy spellings
    /// (`completed`, `failed`) and ignoring case and surrounding whitespace.
    pub fn parse_lenient(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "validating" => Some(JobStatus::Validating),
            "uploading" => Some(JobStatus::Uploading),
            "pending" => Some(JobStatus::Pending),
            "processing" => Some(JobStatus::Processing),
            "generating" => Some(JobStatus::Generating),
            "finalizing" => Some(JobStatus::Finalizing),
            "complete" | "completed" => Some(JobStatus::Complete),
            "error" | "failed" => Some(JobStatus::Error),
            _ => None,
        }
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_lenient(s).ok_or_else(|| format!("Invalid job status: {}", s))
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Status of a single language task.
///
/// Same family as [`JobStatus`] minus the pre-flight stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    Generating,
    Finalizing,
    Complete,
    Error,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Generating => "generating",
            TaskStatus::Finalizing => "finalizing",
            TaskStatus::Complete => "complete",
            TaskStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Complete | TaskStatus::Error)
    }

    pub fn parse_lenient(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(TaskStatus::Pending),
            "processing" => Some(TaskStatus::Processing),
            "generating" => Some(TaskStatus::Generating),
            "finalizing" => Some(TaskStatus::Finalizing),
            "complete" | "completed" => Some(TaskStatus::Complete),
            "error" | "failed" => Some(TaskStatus::Error),
            _ => None,
        }
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_lenient(s).ok_or_else(|| format!("Invalid task status: {}", s))
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Clamp a progress percentage into `[0, 100]`; NaN becomes 0
pub fn clamp_progress(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}

/// Pre-flight validation failure attached to a job in `error` status
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationError {
    /// Server discriminant, e.g. `duration_mismatch`
    pub code: String,
    pub message: String,
    /// Voice track duration in seconds
    pub voice_duration: Option<f64>,
    /// Background track duration in seconds
    pub background_duration: Option<f64>,
}

/// Per-language progress record within a [`Job`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LanguageTask {
    pub language_code: String,
    pub language_name: String,
    /// Flag emoji for display
    pub flag: String,
    pub status: TaskStatus,
    /// Percentage, always within `[0, 100]`
    pub progress: f64,
    pub message: String,
    /// Seconds
    #[serde(rename = "estimatedTimeRemaining")]
    pub estimated_time_remaining_secs: Option<u64>,
    /// Bytes
    pub file_size: Option<u64>,
    /// Always absolute once reconciled
    pub download_url: Option<String>,
}

/// Snapshot of a tracked dubbing job
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    /// Percentage, always within `[0, 100]`
    pub progress: f64,
    pub message: String,
    pub languages: Vec<LanguageTask>,
    pub total_languages: u32,
    pub completed_languages: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub estimated_completion: Option<DateTime<Utc>>,
    /// Only present when `status == Error` due to pre-flight validation
    pub validation_error: Option<ValidationError>,
}

impl Job {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Tasks that finished successfully and carry a download link
    pub fn downloads(&self) -> impl Iterator<Item = (&str, &str)> {
        self.languages.iter().filter_map(|task| {
            match (&task.status, task.download_url.as_deref()) {
                (TaskStatus::Complete, Some(url)) => Some((task.language_code.as_str(), url)),
                _ => None,
            }
        })
    }
}
