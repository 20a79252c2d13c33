//! Status endpoint access
//!
//! [`StatusFetcher`] is the seam between the poller and the network. The
//! production implementation, [`HttpStatusFetcher`], issues one `GET` per call
//! and reports failures as raw [`FetchFailure`] values; turning those into a
//! typed error is the classifier's job, not the fetcher's.

use async_trait::async_trait;
use dubtrack_common::config::{parse_api_base_url, TrackerSettings, JOB_ID_PLACEHOLDER};
use dubtrack_common::{Diagnostics, Error, Result};
use reqwest::header::RETRY_AFTER;
use reqwest::Url;
use std::time::Duration;
use thiserror::Error;

const USER_AGENT: &str = concat!("dubtrack/", env!("CARGO_PKG_VERSION"));

/// HTTP response attached to a failed fetch
#[derive(Debug, Clone, PartialEq)]
pub struct FailureResponse {
    pub status: u16,
    /// Raw response body (may be empty or not JSON)
    pub body: String,
    /// Parsed `Retry-After` header
    pub retry_after: Option<Duration>,
}

/// A failed status fetch before classification.
///
/// `response` is `None` when the request never produced an HTTP response
/// (connect failure, reset, abort, timeout).
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct FetchFailure {
    pub message: String,
    pub response: Option<FailureResponse>,
}

impl FetchFailure {
    /// Failure that never reached the server
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            response: None,
        }
    }

    /// Attempt exceeded its time budget
    pub fn timed_out(limit: Duration) -> Self {
        Self::transport(format!("request timed out after {:?}", limit))
    }

    /// Server answered with `status`
    pub fn http(status: u16, body: impl Into<String>) -> Self {
        Self {
            message: format!("HTTP {}", status),
            response: Some(FailureResponse {
                status,
                body: body.into(),
                retry_after: None,
            }),
        }
    }

    pub fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        if let Some(response) = self.response.as_mut() {
            response.retry_after = retry_after;
        }
        self
    }
}

/// Fetches the raw status payload for one job
#[async_trait]
pub trait StatusFetcher: Send + Sync {
    async fn fetch_status(&self, job_id: &str) -> std::result::Result<serde_json::Value, FetchFailure>;
}

// ============================================================================
// Endpoint
// ============================================================================

/// API base URL plus the status path template
#[derive(Debug, Clone, PartialEq)]
pub struct ApiEndpoint {
    base: Url,
    status_path: String,
}

impl ApiEndpoint {
    pub fn new(base_url: &str, status_path: &str) -> Result<Self> {
        let mut base = parse_api_base_url(base_url)?;
        if !status_path.contains(JOB_ID_PLACEHOLDER) {
            return Err(Error::Config(format!(
                "status_path must contain {}",
                JOB_ID_PLACEHOLDER
            )));
        }

        // Relative joins treat the last segment as a directory only with a trailing slash
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        Ok(Self {
            base,
            status_path: status_path.to_string(),
        })
    }

    pub fn from_settings(settings: &TrackerSettings) -> Result<Self> {
        Self::new(&settings.api_base_url, &settings.status_path)
    }

    /// Base URL, always ending in `/`
    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Absolute status URL for `job_id`
    pub fn status_url(&self, job_id: &str) -> Result<Url> {
        if job_id.trim().is_empty() {
            return Err(Error::InvalidInput("job id must not be empty".to_string()));
        }
        let path = self
            .status_path
            .replace(JOB_ID_PLACEHOLDER, &urlencoding::encode(job_id));
        let raw = format!(
            "{}/{}",
            self.base.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        Url::parse(&raw).map_err(|e| Error::InvalidInput(format!("Bad status URL '{}': {}", raw, e)))
    }
}

// ============================================================================
// HTTP implementation
// ============================================================================

/// reqwest-backed status fetcher
pub struct HttpStatusFetcher {
    http_client: reqwest::Client,
    endpoint: ApiEndpoint,
    auth_token: Option<String>,
    diagnostics: Diagnostics,
}

impl HttpStatusFetcher {
    pub fn new(
        endpoint: ApiEndpoint,
        auth_token: Option<String>,
        request_timeout: Option<Duration>,
        diagnostics: Diagnostics,
    ) -> Result<Self> {
        let mut builder = reqwest::Client::builder().user_agent(USER_AGENT);
        if let Some(timeout) = request_timeout {
            builder = builder.timeout(timeout);
        }
        let http_client = builder.build().map_err(|e| Error::Http(e.to_string()))?;

        Ok(Self {
            http_client,
            endpoint,
            auth_token,
            diagnostics,
        })
    }

    pub fn from_settings(settings: &TrackerSettings, diagnostics: Diagnostics) -> Result<Self> {
        Self::new(
            ApiEndpoint::from_settings(settings)?,
            settings.auth_token.clone(),
            settings.retry.attempt_timeout(),
            diagnostics,
        )
    }

    pub fn endpoint(&self) -> &ApiEndpoint {
        &self.endpoint
    }
}

#[async_trait]
impl StatusFetcher for HttpStatusFetcher {
    async fn fetch_status(&self, job_id: &str) -> std::result::Result<serde_json::Value, FetchFailure> {
        let url = self
            .endpoint
            .status_url(job_id)
            .map_err(|e| FetchFailure::transport(e.to_string()))?;

        self.diagnostics
            .debug(format_args!("GET {} (job {})", url.path(), job_id));

        let mut request = self.http_client.get(url);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                FetchFailure::transport(format!("request timed out: {}", e))
            } else {
                FetchFailure::transport(e.to_string())
            }
        })?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);

        let body = response
            .text()
            .await
            .map_err(|e| FetchFailure::transport(format!("failed to read response body: {}", e)))?;

        if !status.is_success() {
            return Err(FetchFailure::http(status.as_u16(), body).with_retry_after(retry_after));
        }

        serde_json::from_str(&body).map_err(|e| {
            self.diagnostics
                .warn(format_args!("status body for job {} is not JSON: {}", job_id, e));
            FetchFailure::http(status.as_u16(), body)
        })
    }
}
