//! Job status polling
//!
//! A [`JobPoller`] drives one background task per tracked job. Each cycle runs
//! a retried fetch, reconciles the payload and emits a [`PollEvent`], then
//! sleeps on the adaptive [`PollSchedule`]. At most one fetch per job is in
//! flight: the next cycle is only scheduled after the previous one finished.
//!
//! Two consumption styles:
//! - [`JobPoller::subscribe`] yields events through a [`JobSubscription`].
//! - [`JobPoller::start`] invokes callbacks and returns a [`StopHandle`].
//!
//! After `stop()` returns, no further event or callback is delivered.

mod dispatch;
mod schedule;

pub use dispatch::CallbackGate;
pub use schedule::{tier_interval, Outcome, PollSchedule};

use crate::classifier::ErrorClassifier;
use crate::fetcher::{HttpStatusFetcher, StatusFetcher};
use crate::reconciler::{Reconciled, StateReconciler};
use crate::retry::RetryPolicy;
use dubtrack_common::config::{NonRetryablePolicy, PollingSettings, TrackerSettings};
use dubtrack_common::{ClassifiedError, Diagnostics, Job, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

/// Lifecycle of one job's poll task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    /// Waiting for the next cycle
    Scheduled,
    /// Fetch (including retries) in progress
    Fetching,
    Stopped,
}

/// What one poll cycle produced
#[derive(Debug, Clone, PartialEq)]
pub enum PollEvent {
    Progress(Job),
    /// Job reached `complete` or `error`; always the last event
    Completed(Job),
    Failed(ClassifiedError),
}

#[derive(Clone)]
pub struct JobPoller {
    fetcher: Arc<dyn StatusFetcher>,
    reconciler: StateReconciler,
    classifier: ErrorClassifier,
    retry: RetryPolicy,
    polling: PollingSettings,
    diagnostics: Diagnostics,
}

impl JobPoller {
    pub fn new(fetcher: Arc<dyn StatusFetcher>, reconciler: StateReconciler) -> Self {
        let diagnostics = Diagnostics::default();
        Self {
            fetcher,
            reconciler,
            classifier: ErrorClassifier::new(diagnostics.clone()),
            retry: RetryPolicy::default(),
            polling: PollingSettings::default(),
            diagnostics,
        }
    }

    /// HTTP-backed poller wired from resolved settings
    pub fn from_settings(settings: &TrackerSettings, diagnostics: Diagnostics) -> Result<Self> {
        let fetcher = HttpStatusFetcher::from_settings(settings, diagnostics.clone())?;
        let reconciler = StateReconciler::new(fetcher.endpoint().base().clone());

        Ok(Self::new(Arc::new(fetcher), reconciler)
            .with_retry_policy(RetryPolicy::from(&settings.retry))
            .with_polling(settings.polling.clone())
            .with_diagnostics(diagnostics))
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_polling(mut self, polling: PollingSettings) -> Self {
        self.polling = polling;
        self
    }

    pub fn with_non_retryable_policy(mut self, policy: NonRetryablePolicy) -> Self {
        self.polling.on_non_retryable = policy;
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: Diagnostics) -> Self {
        self.classifier = ErrorClassifier::new(diagnostics.clone());
        self.diagnostics = diagnostics;
        self
    }

    /// Start polling `job_id` and receive events through the returned subscription
    pub fn subscribe(&self, job_id: impl Into<String>) -> JobSubscription {
        self.spawn_task(job_id.into(), None)
    }

    /// Start polling `job_id`, delivering events to callbacks.
    ///
    /// `on_complete` runs at most once, after the final `on_progress`.
    pub fn start<P, C, E>(
        &self,
        job_id: impl Into<String>,
        mut on_progress: P,
        on_complete: C,
        mut on_error: E,
    ) -> StopHandle
    where
        P: FnMut(Job) + Send + 'static,
        C: FnOnce(Job) + Send + 'static,
        E: FnMut(ClassifiedError) + Send + 'static,
    {
        let gate = Arc::new(CallbackGate::new());
        let mut subscription = self.spawn_task(job_id.into(), Some(Arc::clone(&gate)));
        let handle = subscription.handle();

        tokio::spawn(async move {
            let mut on_complete = Some(on_complete);
            while let Some(event) = subscription.next().await {
                match event {
                    PollEvent::Progress(job) => {
                        gate.deliver(|| on_progress(job));
                    }
                    PollEvent::Completed(job) => {
                        if let Some(callback) = on_complete.take() {
                            gate.deliver(|| callback(job));
                        }
                    }
                    PollEvent::Failed(error) => {
                        gate.deliver(|| on_error(error));
                    }
                }
            }
        });

        handle
    }

    fn spawn_task(&self, job_id: String, gate: Option<Arc<CallbackGate>>) -> JobSubscription {
        let (event_tx, event_rx) = mpsc::channel(1);
        let (state_tx, state_rx) = watch::channel(PollerState::Idle);
        let handle = StopHandle {
            job_id: Arc::from(job_id.as_str()),
            cancel: CancellationToken::new(),
            state: state_rx,
            warnings: Arc::new(AtomicU64::new(0)),
            gate,
        };

        let task = PollTask {
            poller: self.clone(),
            job_id,
            events: event_tx,
            state: state_tx,
            cancel: handle.cancel.clone(),
            warnings: Arc::clone(&handle.warnings),
        };
        tokio::spawn(task.run());

        JobSubscription {
            events: event_rx,
            handle,
        }
    }

    /// One cycle: retried fetch plus reconciliation
    async fn poll_once(&self, job_id: &str, warning_count: &AtomicU64) -> std::result::Result<Job, ClassifiedError> {
        let fetcher = &self.fetcher;
        let raw = self
            .retry
            .with_retry(&self.classifier, || fetcher.fetch_status(job_id))
            .await?;
        self.diagnostics.payload("status payload", &raw);

        let Reconciled { mut job, warnings } = self.reconciler.reconcile(&raw)?;
        for warning in &warnings {
            self.diagnostics
                .warn(format_args!("job {}: {}", job_id, warning));
        }
        warning_count.fetch_add(warnings.len() as u64, Ordering::Relaxed);

        if job.id.is_empty() {
            job.id = job_id.to_string();
        }
        Ok(job)
    }
}

/// Background loop for one job
struct PollTask {
    poller: JobPoller,
    job_id: String,
    events: mpsc::Sender<PollEvent>,
    state: watch::Sender<PollerState>,
    cancel: CancellationToken,
    warnings: Arc<AtomicU64>,
}

impl PollTask {
    async fn run(self) {
        let diagnostics = self.poller.diagnostics.clone();
        let stop_on_non_retryable = self.poller.polling.on_non_retryable == NonRetryablePolicy::Stop;
        let mut schedule = PollSchedule::new(&self.poller.polling);

        diagnostics.info(format_args!("polling job {}", self.job_id));

        loop {
            self.state.send_replace(PollerState::Fetching);
            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                result = self.poller.poll_once(&self.job_id, &self.warnings) => result,
            };

            let (events, outcome, finished) = match result {
                Ok(job) if job.is_terminal() => {
                    diagnostics.info(format_args!(
                        "job {} finished with status {}",
                        self.job_id, job.status
                    ));
                    (vec![PollEvent::Progress(job.clone()), PollEvent::Completed(job)], Outcome::Success, true)
                }
                Ok(job) => {
                    diagnostics.debug(format_args!(
                        "job {} at {:.0}% ({})",
                        self.job_id, job.progress, job.status
                    ));
                    (vec![PollEvent::Progress(job)], Outcome::Success, false)
                }
                Err(error) => {
                    let finished = !error.retryable && stop_on_non_retryable;
                    diagnostics.warn(format_args!(
                        "job {} poll failed ({}): {}",
                        self.job_id, error.kind, error.message
                    ));
                    (vec![PollEvent::Failed(error)], Outcome::Failure, finished)
                }
            };

            if !self.emit(events).await || finished {
                break;
            }

            let delay = schedule.next_delay(outcome);
            self.state.send_replace(PollerState::Scheduled);
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = self.events.closed() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.state.send_replace(PollerState::Stopped);
        diagnostics.debug(format_args!("poll task for job {} exited", self.job_id));
    }

    /// Hand events to the consumer; false once stopped or nobody is listening
    async fn emit(&self, events: Vec<PollEvent>) -> bool {
        for event in events {
            let sent = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => false,
                sent = self.events.send(event) => sent.is_ok(),
            };
            if !sent {
                return false;
            }
        }
        true
    }
}

/// Cancels one job's polling; cheap to clone
#[derive(Debug, Clone)]
pub struct StopHandle {
    job_id: Arc<str>,
    cancel: CancellationToken,
    state: watch::Receiver<PollerState>,
    warnings: Arc<AtomicU64>,
    gate: Option<Arc<CallbackGate>>,
}

impl StopHandle {
    /// Stop polling. Idempotent; safe to call from inside a callback.
    pub fn stop(&self) {
        self.cancel.cancel();
        if let Some(gate) = &self.gate {
            gate.close();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn state(&self) -> PollerState {
        *self.state.borrow()
    }

    /// Reconciliation warnings seen so far
    pub fn warning_count(&self) -> u64 {
        self.warnings.load(Ordering::Relaxed)
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Wait until the poll task has exited
    pub async fn stopped(&self) {
        let mut state = self.state.clone();
        // Sender dropped means the task is gone too
        let _ = state.wait_for(|s| *s == PollerState::Stopped).await;
    }
}

/// Event stream for one job
#[derive(Debug)]
pub struct JobSubscription {
    events: mpsc::Receiver<PollEvent>,
    handle: StopHandle,
}

impl JobSubscription {
    /// Next event, or `None` once stopped or after the final event
    pub async fn next(&mut self) -> Option<PollEvent> {
        if self.handle.is_stopped() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.handle.cancel.cancelled() => None,
            event = self.events.recv() => event,
        }
    }

    pub fn handle(&self) -> StopHandle {
        self.handle.clone()
    }

    pub fn stop(&self) {
        self.handle.stop();
    }
}
