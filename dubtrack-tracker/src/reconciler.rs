//! Status payload reconciliation
//!
//! Normalizes a loosely-typed status payload into the canonical [`Job`] model.
//!
//! # Tolerance rules
//!
//! - Every field is looked up under its camelCase name first, then snake_case.
//! - Progress values are clamped to `[0, 100]`; missing progress is 0.
//! - A language task without a `languageCode` or with an unrecognized status is
//!   dropped and recorded as a warning; the remaining tasks are still used.
//! - Relative `downloadUrl`s are joined onto the API base URL.
//! - Only a payload that is not a JSON object at all is rejected.

use crate::fields::{as_number, as_text, pick};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use dubtrack_common::job::clamp_progress;
use dubtrack_common::languages::language_info;
use dubtrack_common::{ClassifiedError, Job, JobStatus, LanguageTask, TaskStatus, ValidationError};
use reqwest::Url;
use serde_json::{Map, Value};
use std::fmt;

/// Something recoverable that was wrong with a payload
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileWarning {
    MissingJobId,
    /// Job status absent or not recognized; treated as `processing`
    UnrecognizedJobStatus { value: Option<String> },
    DroppedLanguageTask { index: usize, reason: String },
    /// Field present but unusable; treated as absent
    InvalidField { field: &'static str, value: String },
    UnresolvableDownloadUrl { language_code: String, url: String },
    /// `validationError` reported on a job that is not in `error`
    StrayValidationError,
}

impl fmt::Display for ReconcileWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcileWarning::MissingJobId => write!(f, "payload has no job id"),
            ReconcileWarning::UnrecognizedJobStatus { value: Some(v) } => {
                write!(f, "unrecognized job status '{}'", v)
            }
            ReconcileWarning::UnrecognizedJobStatus { value: None } => {
                write!(f, "payload has no job status")
            }
            ReconcileWarning::DroppedLanguageTask { index, reason } => {
                write!(f, "dropped language task #{}: {}", index, reason)
            }
            ReconcileWarning::InvalidField { field, value } => {
                write!(f, "ignored invalid {}: {}", field, value)
            }
            ReconcileWarning::UnresolvableDownloadUrl { language_code, url } => {
                write!(f, "cannot resolve download URL '{}' for {}", url, language_code)
            }
            ReconcileWarning::StrayValidationError => {
                write!(f, "ignored validation error on a job that has not failed")
            }
        }
    }
}

/// A normalized job plus everything that had to be patched to get there
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    pub job: Job,
    pub warnings: Vec<ReconcileWarning>,
}

/// Normalizes status payloads against a fixed API base URL
#[derive(Debug, Clone)]
pub struct StateReconciler {
    base_url: Url,
}

impl StateReconciler {
    pub fn new(base_url: Url) -> Self {
        Self { base_url }
    }

    pub fn reconcile(&self, raw: &Value) -> Result<Reconciled, ClassifiedError> {
        reconcile(raw, &self.base_url)
    }
}

/// Normalize `raw` into a [`Job`], resolving relative download links against `base_url`
pub fn reconcile(raw: &Value, base_url: &Url) -> Result<Reconciled, ClassifiedError> {
    let object = raw
        .as_object()
        .ok_or_else(|| ClassifiedError::malformed_payload(format!("expected a JSON object, got {}", kind_of(raw))))?;

    let mut warnings = Vec::new();

    let id = match pick(object, "id", "job_id").and_then(id_text) {
        Some(id) => id,
        None => {
            warnings.push(ReconcileWarning::MissingJobId);
            String::new()
        }
    };

    let raw_status = pick(object, "status", "status");
    let status = match raw_status.and_then(Value::as_str).and_then(JobStatus::parse_lenient) {
        Some(status) => status,
        None => {
            warnings.push(ReconcileWarning::UnrecognizedJobStatus {
                value: raw_status.map(describe),
            });
            JobStatus::Processing
        }
    };

    let progress = progress_of(object, &mut warnings);
    let message = text_of(object, "message", "message").unwrap_or_default();

    let raw_tasks = pick(object, "languages", "language_tasks");
    let (languages, raw_task_count) = match raw_tasks {
        Some(Value::Array(entries)) => (reconcile_tasks(entries, base_url, &mut warnings), entries.len()),
        Some(other) => {
            warnings.push(ReconcileWarning::InvalidField {
                field: "languages",
                value: describe(other),
            });
            (Vec::new(), 0)
        }
        None => (Vec::new(), 0),
    };

    let total_languages = count_of(object, "totalLanguages", "total_languages", &mut warnings)
        .unwrap_or(raw_task_count as u32);
    let completed_languages = count_of(object, "completedLanguages", "completed_languages", &mut warnings)
        .unwrap_or_else(|| {
            languages
                .iter()
                .filter(|t| t.status == TaskStatus::Complete)
                .count() as u32
        });

    let started_at = timestamp_of(object, "startedAt", "started_at", &mut warnings);
    let estimated_completion =
        timestamp_of(object, "estimatedCompletion", "estimated_completion", &mut warnings);

    let validation_error = match pick(object, "validationError", "validation_error").and_then(validation_error_of) {
        Some(err) if status == JobStatus::Error => Some(err),
        Some(_) => {
            warnings.push(ReconcileWarning::StrayValidationError);
            None
        }
        None => None,
    };

    Ok(Reconciled {
        job: Job {
            id,
            status,
            progress,
            message,
            languages,
            total_languages,
            completed_languages,
            started_at,
            estimated_completion,
            validation_error,
        },
        warnings,
    })
}

fn reconcile_tasks(entries: &[Value], base_url: &Url, warnings: &mut Vec<ReconcileWarning>) -> Vec<LanguageTask> {
    let mut tasks = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        match reconcile_task(entry, base_url, warnings) {
            Ok(task) => tasks.push(task),
            Err(reason) => warnings.push(ReconcileWarning::DroppedLanguageTask { index, reason }),
        }
    }
    tasks
}

fn reconcile_task(
    entry: &Value,
    base_url: &Url,
    warnings: &mut Vec<ReconcileWarning>,
) -> Result<LanguageTask, String> {
    let object = entry
        .as_object()
        .ok_or_else(|| format!("expected an object, got {}", kind_of(entry)))?;

    let language_code = pick(object, "languageCode", "language_code")
        .and_then(as_text)
        .ok_or_else(|| "missing languageCode".to_string())?
        .to_string();

    let status = match pick(object, "status", "status") {
        None => return Err(format!("missing status for {}", language_code)),
        Some(value) => value
            .as_str()
            .and_then(TaskStatus::parse_lenient)
            .ok_or_else(|| format!("unrecognized status {} for {}", describe(value), language_code))?,
    };

    let (default_name, default_flag) = language_info(&language_code);
    let language_name = text_of(object, "languageName", "language_name").unwrap_or(default_name);
    let flag = text_of(object, "flag", "flag").unwrap_or(default_flag);

    let download_url = match pick(object, "downloadUrl", "download_url").and_then(as_text) {
        None => None,
        Some(raw) => match resolve_download_url(base_url, raw) {
            Ok(url) => Some(url),
            Err(_) => {
                warnings.push(ReconcileWarning::UnresolvableDownloadUrl {
                    language_code: language_code.clone(),
                    url: raw.to_string(),
                });
                None
            }
        },
    };

    Ok(LanguageTask {
        progress: progress_of(object, warnings),
        message: text_of(object, "message", "message").unwrap_or_default(),
        estimated_time_remaining_secs: count_of(
            object,
            "estimatedTimeRemaining",
            "estimated_time_remaining",
            warnings,
        )
        .map(u64::from),
        file_size: size_of(object, "fileSize", "file_size", warnings),
        language_code,
        language_name,
        flag,
        status,
        download_url,
    })
}

/// Absolute http(s) URLs pass through untouched; relative ones are joined onto
/// `base_url`. Any other scheme is refused.
pub fn resolve_download_url(base_url: &Url, raw: &str) -> Result<String, String> {
    let (url, resolved) = match Url::parse(raw) {
        Ok(url) => (url, raw.to_string()),
        Err(_) => {
            let joined = base_url.join(raw).map_err(|e| e.to_string())?;
            let resolved = joined.to_string();
            (joined, resolved)
        }
    };
    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!("unsupported scheme '{}'", url.scheme()));
    }
    Ok(resolved)
}

fn id_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn text_of(object: &Map<String, Value>, camel: &str, snake: &str) -> Option<String> {
    pick(object, camel, snake).and_then(as_text).map(str::to_string)
}

fn progress_of(object: &Map<String, Value>, warnings: &mut Vec<ReconcileWarning>) -> f64 {
    match pick(object, "progress", "progress") {
        None => 0.0,
        Some(value) => match as_number(value) {
            Some(p) => clamp_progress(p),
            None => {
                warnings.push(ReconcileWarning::InvalidField {
                    field: "progress",
                    value: describe(value),
                });
                0.0
            }
        },
    }
}

fn non_negative(
    object: &Map<String, Value>,
    camel: &'static str,
    snake: &str,
    warnings: &mut Vec<ReconcileWarning>,
) -> Option<f64> {
    let value = pick(object, camel, snake)?;
    match as_number(value) {
        Some(n) if n.is_finite() && n >= 0.0 => Some(n.round()),
        _ => {
            warnings.push(ReconcileWarning::InvalidField {
                field: camel,
                value: describe(value),
            });
            None
        }
    }
}

fn count_of(
    object: &Map<String, Value>,
    camel: &'static str,
    snake: &str,
    warnings: &mut Vec<ReconcileWarning>,
) -> Option<u32> {
    non_negative(object, camel, snake, warnings).map(|n| n.min(u32::MAX as f64) as u32)
}

fn size_of(
    object: &Map<String, Value>,
    camel: &'static str,
    snake: &str,
    warnings: &mut Vec<ReconcileWarning>,
) -> Option<u64> {
    non_negative(object, camel, snake, warnings).map(|n| n as u64)
}

fn timestamp_of(
    object: &Map<String, Value>,
    camel: &'static str,
    snake: &str,
    warnings: &mut Vec<ReconcileWarning>,
) -> Option<DateTime<Utc>> {
    let value = pick(object, camel, snake)?;
    let parsed = value.as_str().and_then(parse_timestamp);
    if parsed.is_none() {
        warnings.push(ReconcileWarning::InvalidField {
            field: camel,
            value: describe(value),
        });
    }
    parsed
}

/// RFC 3339, or a naive ISO-8601 timestamp taken as UTC
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn validation_error_of(value: &Value) -> Option<ValidationError> {
    match value {
        Value::String(message) if !message.trim().is_empty() => Some(ValidationError {
            code: "validation_error".to_string(),
            message: message.trim().to_string(),
            voice_duration: None,
            background_duration: None,
        }),
        Value::Object(object) => Some(ValidationError {
            code: pick(object, "error", "code")
                .and_then(as_text)
                .unwrap_or("validation_error")
                .to_string(),
            message: text_of(object, "message", "message").unwrap_or_default(),
            voice_duration: pick(object, "voiceDuration", "voice_duration").and_then(as_number),
            background_duration: pick(object, "backgroundDuration", "background_duration")
                .and_then(as_number),
        }),
        _ => None,
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Short rendering of a value for warnings; never the whole payload
fn describe(value: &Value) -> String {
    let rendered = value.to_string();
    if rendered.chars().count() > 64 {
        let truncated: String = rendered.chars().take(61).collect();
        format!("{}...", truncated)
    } else {
        rendered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dubtrack_common::ErrorKind;
    use serde_json::json;

    fn base() -> Url {
        Url::parse("https://api.example.com/api/").unwrap()
    }

    fn run(raw: Value) -> Reconciled {
        reconcile(&raw, &base()).unwrap()
    }

    #[test]
    fn test_camel_case_payload() {
        let reconciled = run(json!({
            "id": "job_1",
            "status": "processing",
            "progress": 40,
            "message": "Translating",
            "languages": [{
                "languageCode": "es",
                "languageName": "Spanish",
                "flag": "🇪🇸",
                "status": "generating",
                "progress": 55,
                "message": "Synthesizing voice",
                "estimatedTimeRemaining": 90,
                "fileSize": 2048
            }],
            "totalLanguages": 1,
            "completedLanguages": 0,
            "startedAt": "2024-05-01T12:30:00.123456",
            "estimatedCompletion": null
        }));

        assert!(reconciled.warnings.is_empty(), "{:?}", reconciled.warnings);
        let job = reconciled.job;
        assert_eq!(job.id, "job_1");
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.progress, 40.0);
        assert_eq!(job.languages.len(), 1);
        let task = &job.languages[0];
        assert_eq!(task.status, TaskStatus::Generating);
        assert_eq!(task.estimated_time_remaining_secs, Some(90));
        assert_eq!(task.file_size, Some(2048));
        assert_eq!(
            job.started_at.unwrap().to_rfc3339(),
            "2024-05-01T12:30:00.123456+00:00"
        );
        assert_eq!(job.estimated_completion, None);
    }

    #[test]
    fn test_snake_case_payload() {
        let reconciled = run(json!({
            "job_id": "job_2",
            "status": "complete",
            "progress": 100,
            "language_tasks": [{
                "language_code": "fr",
                "status": "complete",
                "progress": 100,
                "download_url": "downloads/job_2/fr.mp3",
                "file_size": 1024
            }],
            "started_at": "2024-05-01T12:30:00Z"
        }));

        let job = reconciled.job;
        assert_eq!(job.id, "job_2");
        assert!(job.is_terminal());
        assert_eq!(job.total_languages, 1);
        assert_eq!(job.completed_languages, 1);
        let task = &job.languages[0];
        assert_eq!(task.language_name, "French");
        assert_eq!(task.flag, "🇫🇷");
        assert_eq!(
            task.download_url.as_deref(),
            Some("https://api.example.com/api/downloads/job_2/fr.mp3")
        );
    }

    #[test]
    fn test_camel_case_wins_when_both_present() {
        let job = run(json!({
            "id": "job_3",
            "status": "processing",
            "totalLanguages": 4,
            "total_languages": 9
        }))
        .job;
        assert_eq!(job.total_languages, 4);
    }

    #[test]
    fn test_progress_clamped() {
        for (raw, expected) in [
            (json!(-20), 0.0),
            (json!(0), 0.0),
            (json!(37.5), 37.5),
            (json!(100), 100.0),
            (json!(250), 100.0),
            (json!("64"), 64.0),
        ] {
            let job = run(json!({"id": "j", "status": "processing", "progress": raw})).job;
            assert_eq!(job.progress, expected, "raw progress {}", raw);
        }
    }

    #[test]
    fn test_missing_progress_defaults_to_zero() {
        let reconciled = run(json!({"id": "j", "status": "pending"}));
        assert_eq!(reconciled.job.progress, 0.0);
        assert_eq!(reconciled.job.status, JobStatus::Pending);
        assert!(reconciled.warnings.is_empty());
    }

    #[test]
    fn test_malformed_task_dropped() {
        let reconciled = run(json!({
            "id": "job_4",
            "status": "processing",
            "languages": [
                {"languageCode": "es", "status": "processing", "progress": 10},
                {"languageName": "French", "status": "processing"},
                {"languageCode": "de", "status": "complete", "progress": 100}
            ]
        }));

        let job = reconciled.job;
        assert_eq!(job.languages.len(), 2);
        assert_eq!(job.languages[0].language_code, "es");
        assert_eq!(job.languages[1].language_code, "de");
        assert_eq!(job.total_languages, 3);
        assert_eq!(job.completed_languages, 1);
        assert_eq!(reconciled.warnings.len(), 1);
        assert!(matches!(
            &reconciled.warnings[0],
            ReconcileWarning::DroppedLanguageTask { index: 1, .. }
        ));
    }

    #[test]
    fn test_task_with_unknown_or_preflight_status_dropped() {
        let reconciled = run(json!({
            "id": "j",
            "status": "processing",
            "languages": [
                {"languageCode": "es", "status": "teleporting"},
                {"languageCode": "fr", "status": "uploading"},
                {"languageCode": "de"},
                "ja",
                {"languageCode": "it", "status": "FAILED"}
            ]
        }));
        assert_eq!(reconciled.job.languages.len(), 1);
        assert_eq!(reconciled.job.languages[0].status, TaskStatus::Error);
        assert_eq!(reconciled.warnings.len(), 4);
    }

    #[test]
    fn test_absolute_download_url_unchanged() {
        let url = "https://cdn.example.net/signed/es.mp3?token=abc&exp=1";
        assert_eq!(resolve_download_url(&base(), url).unwrap(), url);
    }

    #[test]
    fn test_root_relative_download_url() {
        assert_eq!(
            resolve_download_url(&base(), "/files/es.mp3").unwrap(),
            "https://api.example.com/files/es.mp3"
        );
    }

    #[test]
    fn test_non_http_download_url_refused() {
        for url in ["javascript:alert(1)", "file:///etc/passwd", "data:text/plain,hi"] {
            assert!(resolve_download_url(&base(), url).is_err(), "{url}");
        }

        let reconciled = run(json!({
            "id": "job_1",
            "status": "complete",
            "languages": [{
                "languageCode": "es",
                "status": "complete",
                "progress": 100,
                "downloadUrl": "javascript:alert(1)"
            }]
        }));
        assert_eq!(reconciled.job.languages[0].download_url, None);
        assert!(reconciled.warnings.iter().any(|w| matches!(
            w,
            ReconcileWarning::UnresolvableDownloadUrl { url, .. } if url == "javascript:alert(1)"
        )));
    }

    #[test]
    fn test_unknown_job_status_keeps_polling() {
        let reconciled = run(json!({"id": "j", "status": "warming_up"}));
        assert_eq!(reconciled.job.status, JobStatus::Processing);
        assert_eq!(
            reconciled.warnings,
            vec![ReconcileWarning::UnrecognizedJobStatus {
                value: Some("\"warming_up\"".to_string())
            }]
        );
    }

    #[test]
    fn test_validation_error_only_on_error_status() {
        let failed = run(json!({
            "id": "j",
            "status": "error",
            "validationError": {
                "error": "duration_mismatch",
                "message": "Audio tracks must be the same length",
                "voice_duration": 120.5,
                "background_duration": 115.2
            }
        }))
        .job;
        let validation = failed.validation_error.unwrap();
        assert_eq!(validation.code, "duration_mismatch");
        assert_eq!(validation.voice_duration, Some(120.5));

        let running = run(json!({
            "id": "j",
            "status": "processing",
            "validation_error": "ignored"
        }));
        assert!(running.job.validation_error.is_none());
        assert_eq!(running.warnings, vec![ReconcileWarning::StrayValidationError]);
    }

    #[test]
    fn test_bad_timestamp_warns() {
        let reconciled = run(json!({"id": "j", "status": "processing", "startedAt": "yesterday"}));
        assert!(reconciled.job.started_at.is_none());
        assert_eq!(reconciled.warnings.len(), 1);
    }

    #[test]
    fn test_non_object_payload_rejected() {
        for raw in [json!([1, 2]), json!("complete"), json!(null)] {
            let err = reconcile(&raw, &base()).unwrap_err();
            assert_eq!(err.kind, ErrorKind::Unknown);
            assert!(!err.retryable);
        }
    }

    #[test]
    fn test_missing_id_warns() {
        let reconciled = run(json!({"status": "processing"}));
        assert_eq!(reconciled.job.id, "");
        assert_eq!(reconciled.warnings, vec![ReconcileWarning::MissingJobId]);
    }
}
