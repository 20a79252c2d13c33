//! Test helpers for dubtrack-tracker integration tests
//!
//! - [`ScriptedFetcher`]: replays a fixed sequence of fetch outcomes
//! - [`MemorySink`]: captures diagnostics for assertions
//! - [`Recorder`]: collects callback invocations from `JobPoller::start`

#![allow(dead_code)]

use async_trait::async_trait;
use dubtrack_common::{ClassifiedError, DiagnosticSink, Diagnostics, Job};
use dubtrack_tracker::{FetchFailure, StatusFetcher};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::Level;

/// One scripted fetch outcome
#[derive(Debug, Clone)]
pub enum Step {
    Payload(Value),
    Fail(FetchFailure),
    /// Wait, then produce the inner step
    Delayed(Duration, Box<Step>),
}

/// Replays scripted outcomes; the last one repeats forever
pub struct ScriptedFetcher {
    steps: Mutex<VecDeque<Step>>,
    last: Mutex<Option<Step>>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    call_times: Mutex<Vec<Instant>>,
}

impl ScriptedFetcher {
    pub fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            call_times: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Gaps between consecutive fetch calls
    pub fn gaps(&self) -> Vec<Duration> {
        let times = self.call_times.lock().unwrap();
        times.windows(2).map(|w| w[1] - w[0]).collect()
    }

    fn next_step(&self) -> Step {
        let mut steps = self.steps.lock().unwrap();
        let mut last = self.last.lock().unwrap();
        match steps.pop_front() {
            Some(step) => {
                *last = Some(step.clone());
                step
            }
            None => last.clone().expect("ScriptedFetcher needs at least one step"),
        }
    }
}

#[async_trait]
impl StatusFetcher for ScriptedFetcher {
    async fn fetch_status(&self, _job_id: &str) -> Result<Value, FetchFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.call_times.lock().unwrap().push(Instant::now());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let mut step = self.next_step();
        let result = loop {
            match step {
                Step::Payload(value) => break Ok(value),
                Step::Fail(failure) => break Err(failure),
                Step::Delayed(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    step = *inner;
                }
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Diagnostic sink that keeps every message
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<(Level, String)>>,
}

impl MemorySink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn messages(&self) -> Vec<String> {
        self.records.lock().unwrap().iter().map(|(_, m)| m.clone()).collect()
    }

    pub fn contains(&self, pattern: &str) -> bool {
        self.messages().iter().any(|m| m.contains(pattern))
    }

    pub fn count_at(&self, level: Level) -> usize {
        self.records.lock().unwrap().iter().filter(|(l, _)| *l == level).count()
    }
}

impl DiagnosticSink for MemorySink {
    fn enabled(&self, _level: Level) -> bool {
        true
    }

    fn emit(&self, level: Level, message: &str) {
        self.records.lock().unwrap().push((level, message.to_string()));
    }
}

pub fn diagnostics(sink: &Arc<MemorySink>, echo_payloads: bool) -> Diagnostics {
    Diagnostics::new(Arc::clone(sink) as Arc<dyn DiagnosticSink>, echo_payloads)
}

/// Callback invocation seen by a [`Recorder`]
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Progress(f64),
    Complete(Job),
    Error(ClassifiedError),
}

/// Shared log of callback invocations
#[derive(Clone, Default)]
pub struct Recorder {
    calls: Arc<Mutex<Vec<Call>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn progress_values(&self) -> Vec<f64> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Progress(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    pub fn completions(&self) -> usize {
        self.calls().iter().filter(|c| matches!(c, Call::Complete(_))).count()
    }

    pub fn errors(&self) -> Vec<ClassifiedError> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Error(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    pub fn on_progress(&self) -> impl FnMut(Job) + Send + 'static {
        let calls = Arc::clone(&self.calls);
        move |job| calls.lock().unwrap().push(Call::Progress(job.progress))
    }

    pub fn on_complete(&self) -> impl FnOnce(Job) + Send + 'static {
        let calls = Arc::clone(&self.calls);
        move |job| calls.lock().unwrap().push(Call::Complete(job))
    }

    pub fn on_error(&self) -> impl FnMut(ClassifiedError) + Send + 'static {
        let calls = Arc::clone(&self.calls);
        move |error| calls.lock().unwrap().push(Call::Error(error))
    }
}
