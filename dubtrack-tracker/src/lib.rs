//! dubtrack-tracker library interface
//!
//! Client-side tracking of asynchronous dubbing jobs: fetch, classify, retry,
//! reconcile and poll.

pub mod classifier;
pub mod fetcher;
pub mod poller;
pub mod reconciler;
pub mod retry;

mod fields;

pub use crate::classifier::ErrorClassifier;
pub use crate::fetcher::{ApiEndpoint, FetchFailure, HttpStatusFetcher, StatusFetcher};
pub use crate::poller::{JobPoller, JobSubscription, PollEvent, PollerState, StopHandle};
pub use crate::reconciler::{ReconcileWarning, Reconciled, StateReconciler};
pub use crate::retry::RetryPolicy;
