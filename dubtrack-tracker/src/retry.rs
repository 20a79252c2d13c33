//! Bounded retry with exponential backoff
//!
//! One call to [`RetryPolicy::with_retry`] covers a single logical status fetch:
//! up to `max_retries + 1` attempts, each optionally bounded by a timeout.
//!
//! **Backoff Strategy:**
//! - Retry `n` (0-based) waits `base_delay * 2^n`
//! - A server `Retry-After` hint raises the wait, capped at `max_retry_after`
//! - No wait after the final attempt
//! - Non-retryable classifications fail immediately

use crate::classifier::ErrorClassifier;
use crate::fetcher::FetchFailure;
use dubtrack_common::config::RetrySettings;
use dubtrack_common::ClassifiedError;
use std::future::Future;
use std::time::Duration;

/// Wait before retry number `retry_index` (0 = first retry)
pub fn backoff_delay(base_delay: Duration, retry_index: u32) -> Duration {
    base_delay.saturating_mul(2u32.saturating_pow(retry_index))
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    /// Per-attempt time budget; `None` waits indefinitely
    pub attempt_timeout: Option<Duration>,
    pub max_retry_after: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            base_delay: settings.base_delay(),
            attempt_timeout: settings.attempt_timeout(),
            max_retry_after: settings.max_retry_after(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            ..Self::default()
        }
    }

    pub fn with_attempt_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Delay before retry `retry_index` after `error`
    pub fn delay_for(&self, retry_index: u32, error: &ClassifiedError) -> Duration {
        let backoff = backoff_delay(self.base_delay, retry_index);
        match error.retry_after {
            Some(hint) => backoff.max(hint.min(self.max_retry_after)),
            None => backoff,
        }
    }

    /// Run `operation` until it succeeds, fails non-retryably, or attempts run out.
    ///
    /// Returns the first success, or the classification of the last failure.
    pub async fn with_retry<T, F, Fut>(
        &self,
        classifier: &ErrorClassifier,
        mut operation: F,
    ) -> Result<T, ClassifiedError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchFailure>>,
    {
        let diagnostics = classifier.diagnostics();
        let mut retry_index = 0u32;

        loop {
            let outcome = match self.attempt_timeout {
                Some(limit) => match tokio::time::timeout(limit, operation()).await {
                    Ok(result) => result,
                    Err(_) => Err(FetchFailure::timed_out(limit)),
                },
                None => operation().await,
            };

            let failure = match outcome {
                Ok(value) => {
                    if retry_index > 0 {
                        diagnostics.debug(format_args!(
                            "status fetch succeeded after {} retries",
                            retry_index
                        ));
                    }
                    return Ok(value);
                }
                Err(failure) => failure,
            };

            let error = classifier.classify(&failure);
            if !error.retryable {
                diagnostics.debug(format_args!(
                    "{} error is not retryable, giving up after {} attempt(s)",
                    error.kind,
                    retry_index + 1
                ));
                return Err(error);
            }
            if retry_index >= self.max_retries {
                diagnostics.warn(format_args!(
                    "status fetch failed after {} attempt(s): {}",
                    retry_index + 1,
                    error.kind
                ));
                return Err(error);
            }

            let delay = self.delay_for(retry_index, &error);
            diagnostics.warn(format_args!(
                "{} error on attempt {}, retrying in {:?}",
                error.kind,
                retry_index + 1,
                delay
            ));
            tokio::time::sleep(delay).await;
            retry_index += 1;
        }
    }
}
