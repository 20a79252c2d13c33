//! Configuration loading and resolution
//!
//! Settings are resolved in priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)
//!
//! A missing TOML file is not an error: we warn and continue with defaults.
//! A TOML file that exists but cannot be parsed is.
//!
//! Once resolved, [`TrackerSettings`] is read-only and shared by every poller.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000";
pub const DEFAULT_STATUS_PATH: &str = "/api/jobs/{job_id}";

/// Placeholder substituted with the job identifier in `status_path`
pub const JOB_ID_PLACEHOLDER: &str = "{job_id}";

pub const ENV_API_BASE_URL: &str = "DUBTRACK_API_BASE_URL";
pub const ENV_AUTH_TOKEN: &str = "DUBTRACK_AUTH_TOKEN";
pub const ENV_CONFIG_PATH: &str = "DUBTRACK_CONFIG";

/// Parse an API base URL, accepting only absolute `http`/`https` URLs with a host
pub fn parse_api_base_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim())
        .map_err(|e| Error::Config(format!("Invalid api_base_url '{}': {}", raw, e)))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().map_or(true, str::is_empty) {
        return Err(Error::Config(format!(
            "api_base_url must be an absolute http(s) URL, got '{}'",
            raw
        )));
    }
    Ok(url)
}

// ============================================================================
// TOML schema
// ============================================================================

/// On-disk configuration file
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TomlConfig {
    /// Scheme + host (+ optional prefix) of the dubbing API
    #[serde(default)]
    pub api_base_url: Option<String>,

    /// Status endpoint path template containing `{job_id}`
    #[serde(default)]
    pub status_path: Option<String>,

    /// Bearer token sent with every status request
    #[serde(default)]
    pub auth_token: Option<String>,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub polling: PollingSettings,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Per-fetch retry and backoff
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry; doubles for each further retry
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound for a single attempt (0 disables)
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,

    /// Cap applied to server `Retry-After` hints
    #[serde(default = "default_max_retry_after_ms")]
    pub max_retry_after_ms: u64,
}

impl RetrySettings {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn attempt_timeout(&self) -> Option<Duration> {
        (self.attempt_timeout_ms > 0).then(|| Duration::from_millis(self.attempt_timeout_ms))
    }

    pub fn max_retry_after(&self) -> Duration {
        Duration::from_millis(self.max_retry_after_ms)
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            attempt_timeout_ms: default_attempt_timeout_ms(),
            max_retry_after_ms: default_max_retry_after_ms(),
        }
    }
}

/// What a poller does after a non-retryable failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NonRetryablePolicy {
    /// Report the error and keep polling on the error tier
    #[default]
    KeepPolling,
    /// Report the error and stop the stream
    Stop,
}

/// Adaptive poll interval tiers
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PollingSettings {
    #[serde(default = "default_success_floor_ms")]
    pub success_floor_ms: u64,

    #[serde(default = "default_success_ceiling_ms")]
    pub success_ceiling_ms: u64,

    #[serde(default = "default_error_floor_ms")]
    pub error_floor_ms: u64,

    #[serde(default = "default_error_ceiling_ms")]
    pub error_ceiling_ms: u64,

    /// Multiplier applied per consecutive outcome of the same kind
    #[serde(default = "default_growth_factor")]
    pub growth_factor: f64,

    #[serde(default)]
    pub on_non_retryable: NonRetryablePolicy,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            success_floor_ms: default_success_floor_ms(),
            success_ceiling_ms: default_success_ceiling_ms(),
            error_floor_ms: default_error_floor_ms(),
            error_ceiling_ms: default_error_ceiling_ms(),
            growth_factor: default_growth_factor(),
            on_non_retryable: NonRetryablePolicy::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Echo raw (redacted) status payloads at debug level
    #[serde(default)]
    pub echo_payloads: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            echo_payloads: false,
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_attempt_timeout_ms() -> u64 {
    15_000
}

fn default_max_retry_after_ms() -> u64 {
    30_000
}

fn default_success_floor_ms() -> u64 {
    2_000
}

fn default_success_ceiling_ms() -> u64 {
    10_000
}

fn default_error_floor_ms() -> u64 {
    5_000
}

fn default_error_ceiling_ms() -> u64 {
    30_000
}

fn default_growth_factor() -> f64 {
    1.5
}

fn default_log_level() -> String {
    "info".to_string()
}

// ============================================================================
// Resolved settings
// ============================================================================

/// Fully resolved, validated configuration
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerSettings {
    pub api_base_url: String,
    pub status_path: String,
    pub auth_token: Option<String>,
    pub retry: RetrySettings,
    pub polling: PollingSettings,
    pub logging: LoggingConfig,
    /// Config file the settings were read from, if any
    pub source: Option<PathBuf>,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            status_path: DEFAULT_STATUS_PATH.to_string(),
            auth_token: None,
            retry: RetrySettings::default(),
            polling: PollingSettings::default(),
            logging: LoggingConfig::default(),
            source: None,
        }
    }
}

impl TrackerSettings {
    pub fn validate(&self) -> Result<()> {
        parse_api_base_url(&self.api_base_url)?;

        if !self.status_path.contains(JOB_ID_PLACEHOLDER) {
            return Err(Error::Config(format!(
                "status_path must contain {}, got '{}'",
                JOB_ID_PLACEHOLDER, self.status_path
            )));
        }

        let p = &self.polling;
        check_tier("success", p.success_floor_ms, p.success_ceiling_ms)?;
        check_tier("error", p.error_floor_ms, p.error_ceiling_ms)?;
        if !p.growth_factor.is_finite() || p.growth_factor < 1.0 {
            return Err(Error::Config(format!(
                "polling.growth_factor must be >= 1.0, got {}",
                p.growth_factor
            )));
        }

        parse_log_level(&self.logging.level)?;
        Ok(())
    }
}

fn check_tier(name: &str, floor_ms: u64, ceiling_ms: u64) -> Result<()> {
    if floor_ms == 0 {
        return Err(Error::Config(format!("polling.{}_floor_ms must be > 0", name)));
    }
    if floor_ms > ceiling_ms {
        return Err(Error::Config(format!(
            "polling.{name}_floor_ms ({floor_ms}) exceeds polling.{name}_ceiling_ms ({ceiling_ms})"
        )));
    }
    Ok(())
}

/// Parse a configured log level name
pub fn parse_log_level(level: &str) -> Result<tracing::Level> {
    level
        .trim()
        .parse::<tracing::Level>()
        .map_err(|_| Error::Config(format!("Unknown log level '{}'", level)))
}

// ============================================================================
// Resolution
// ============================================================================

/// Resolves [`TrackerSettings`] from CLI, environment, TOML and defaults
#[derive(Debug, Clone, Default)]
pub struct ConfigResolver {
    config_path: Option<PathBuf>,
    api_base_url: Option<String>,
    auth_token: Option<String>,
}

impl ConfigResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Explicit config file (CLI `--config`)
    pub fn with_config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    /// CLI `--api-base-url`
    pub fn with_api_base_url(mut self, url: Option<String>) -> Self {
        self.api_base_url = url;
        self
    }

    /// CLI `--auth-token`
    pub fn with_auth_token(mut self, token: Option<String>) -> Self {
        self.auth_token = token;
        self
    }

    pub fn resolve(&self) -> Result<TrackerSettings> {
        let (toml_config, source) = self.load_toml()?;

        let api_base_url = non_blank(self.api_base_url.clone())
            .or_else(|| non_blank(std::env::var(ENV_API_BASE_URL).ok()))
            .or_else(|| non_blank(toml_config.api_base_url.clone()))
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());

        let auth_token = non_blank(self.auth_token.clone())
            .or_else(|| non_blank(std::env::var(ENV_AUTH_TOKEN).ok()))
            .or_else(|| non_blank(toml_config.auth_token.clone()));

        let settings = TrackerSettings {
            api_base_url,
            status_path: non_blank(toml_config.status_path)
                .unwrap_or_else(|| DEFAULT_STATUS_PATH.to_string()),
            auth_token,
            retry: toml_config.retry,
            polling: toml_config.polling,
            logging: toml_config.logging,
            source,
        };
        settings.validate()?;
        Ok(settings)
    }

    fn load_toml(&self) -> Result<(TomlConfig, Option<PathBuf>)> {
        let explicit = self
            .config_path
            .clone()
            .or_else(|| std::env::var(ENV_CONFIG_PATH).ok().map(PathBuf::from));

        if let Some(path) = explicit {
            if !path.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            let config = load_toml_config(&path)?;
            return Ok((config, Some(path)));
        }

        match default_config_paths().into_iter().find(|p| p.exists()) {
            Some(path) => {
                let config = load_toml_config(&path)?;
                info!("Loaded config from {}", path.display());
                Ok((config, Some(path)))
            }
            None => {
                warn!("No config file found, using defaults");
                Ok((TomlConfig::default(), None))
            }
        }
    }
}

/// Read and parse a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)?;
    let config = toml::from_str(&content)?;
    Ok(config)
}

/// Candidate config file locations for the platform, in lookup order
pub fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join("dubtrack").join("config.toml"));
    }
    if cfg!(target_os = "linux") {
        paths.push(PathBuf::from("/etc/dubtrack/config.toml"));
    }
    paths
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
