//! Job domain model
//!
//! - [`Fingerprint`] - normalized URL + format selector, the deduplication key
//! - [`Job`] - one download request and its state machine
//! - [`RetryPolicy`] - retry limit and backoff between attempts
//!
//! State machine:
//!
//! ```text
//! pending --dequeued--> running --success--> done
//!                       running --failure--> failed   (retries exhausted)
//!                       running --failure--> pending  (retry scheduled)
//! pending|running --cancel--> canceled
//! ```

mod fingerprint;
mod model;
mod retry;

pub use fingerprint::{DEFAULT_FORMAT, Fingerprint, FingerprintError};
pub use model::{FailureOutcome, Job, JobId, JobOutput, JobState, TransitionError};
pub use retry::RetryPolicy;

/// Filter for job listings
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub state: Option<JobState>,
    pub limit: Option<usize>,
}

impl JobFilter {
    pub fn with_state(state: JobState) -> Self {
        Self {
            state: Some(state),
            limit: None,
        }
    }

    pub fn matches(&self, job: &Job) -> bool {
        self.state.is_none_or(|state| job.state == state)
    }
}
