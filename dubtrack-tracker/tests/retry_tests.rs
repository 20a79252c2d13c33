//! Integration tests for RetryPolicy against a scripted fetcher

mod helpers;

use dubtrack_common::{Diagnostics, ErrorKind};
use dubtrack_tracker::{ErrorClassifier, FetchFailure, RetryPolicy, StatusFetcher};
use helpers::{MemorySink, ScriptedFetcher, Step};
use serde_json::json;
use std::time::Duration;
use tracing::Level;

fn assert_near(actual: Duration, expected_ms: u64) {
    let expected = Duration::from_millis(expected_ms);
    assert!(
        actual >= expected && actual < expected + Duration::from_millis(5),
        "{:?} should be ~{:?}",
        actual,
        expected
    );
}

#[tokio::test(start_paused = true)]
async fn test_backoff_doubles_between_attempts() {
    let fetcher = ScriptedFetcher::new(vec![
        Step::Fail(FetchFailure::http(503, "")),
        Step::Fail(FetchFailure::transport("connection reset")),
        Step::Payload(json!({"status": "processing"})),
    ]);
    let policy = RetryPolicy::new(3, Duration::from_millis(1000));

    let value = policy
        .with_retry(&ErrorClassifier::default(), || fetcher.fetch_status("job_1"))
        .await
        .unwrap();

    assert_eq!(value["status"], "processing");
    assert_eq!(fetcher.calls(), 3);
    let gaps = fetcher.gaps();
    assert_near(gaps[0], 1000);
    assert_near(gaps[1], 2000);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_report_last_error() {
    let fetcher = ScriptedFetcher::new(vec![Step::Fail(FetchFailure::http(502, "Bad Gateway"))]);
    let policy = RetryPolicy::new(3, Duration::from_millis(1000));

    let started = tokio::time::Instant::now();
    let error = policy
        .with_retry(&ErrorClassifier::default(), || fetcher.fetch_status("job_1"))
        .await
        .unwrap_err();

    assert_eq!(error.kind, ErrorKind::Server);
    assert!(error.retryable);
    assert_eq!(error.status_code, Some(502));
    assert_eq!(fetcher.calls(), 4);
    // 1s + 2s + 4s, no wait after the last attempt
    assert_near(started.elapsed(), 7000);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_waits_for_retry_after() {
    let fetcher = ScriptedFetcher::new(vec![
        Step::Fail(FetchFailure::http(429, "{}").with_retry_after(Some(Duration::from_secs(9)))),
        Step::Payload(json!({"status": "processing"})),
    ]);
    let policy = RetryPolicy::new(3, Duration::from_millis(1000));

    policy
        .with_retry(&ErrorClassifier::default(), || fetcher.fetch_status("job_1"))
        .await
        .unwrap();

    assert_near(fetcher.gaps()[0], 9000);
}

#[tokio::test(start_paused = true)]
async fn test_validation_error_not_retried() {
    let body = json!({
        "error": "duration_mismatch",
        "voice_duration": 120.5,
        "background_duration": 115.2
    });
    let fetcher = ScriptedFetcher::new(vec![Step::Fail(FetchFailure::http(400, body.to_string()))]);
    let policy = RetryPolicy::new(3, Duration::from_millis(1000));

    let error = policy
        .with_retry(&ErrorClassifier::default(), || fetcher.fetch_status("job_1"))
        .await
        .unwrap_err();

    assert_eq!(fetcher.calls(), 1);
    assert_eq!(error.kind, ErrorKind::Validation);
    assert!(!error.retryable);
    assert_eq!(
        error.message,
        "Audio tracks must be the same length. Voice: 120.5s, Background: 115.2s"
    );
}

#[tokio::test(start_paused = true)]
async fn test_slow_attempt_times_out_and_retries() {
    let fetcher = ScriptedFetcher::new(vec![
        Step::Delayed(Duration::from_secs(120), Box::new(Step::Payload(json!({"status": "pending"})))),
        Step::Payload(json!({"status": "processing"})),
    ]);
    let policy = RetryPolicy::new(1, Duration::from_millis(500)).with_attempt_timeout(Some(Duration::from_secs(10)));

    let value = policy
        .with_retry(&ErrorClassifier::default(), || fetcher.fetch_status("job_1"))
        .await
        .unwrap();

    assert_eq!(value["status"], "processing");
    assert_near(fetcher.gaps()[0], 10_500);
}

#[tokio::test(start_paused = true)]
async fn test_retries_logged_as_warnings() {
    let sink = MemorySink::new();
    let classifier = ErrorClassifier::new(helpers::diagnostics(&sink, false));
    let fetcher = ScriptedFetcher::new(vec![
        Step::Fail(FetchFailure::transport("connection refused")),
        Step::Payload(json!({"status": "processing"})),
    ]);

    RetryPolicy::new(2, Duration::from_millis(100))
        .with_retry(&classifier, || fetcher.fetch_status("job_1"))
        .await
        .unwrap();

    assert_eq!(sink.count_at(Level::WARN), 1);
    assert!(sink.contains("network error on attempt 1"));

    // Silent diagnostics still classify
    let quiet = ErrorClassifier::new(Diagnostics::silent());
    let failure = FetchFailure::http(404, "");
    assert_eq!(quiet.classify(&failure).kind, ErrorKind::NotFound);
}
