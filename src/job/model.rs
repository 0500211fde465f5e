use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use super::fingerprint::Fingerprint;

/// Opaque job identity: fingerprint prefix plus a time-ordered UUIDv7
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn derive(fingerprint: &Fingerprint) -> Self {
        Self(format!("{}-{}", fingerprint.short_key(), Uuid::now_v7()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Running,
    Done,
    Failed,
    Canceled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done | JobState::Failed | JobState::Canceled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Done => "done",
            JobState::Failed => "failed",
            JobState::Canceled => "canceled",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(JobState::Pending),
            "running" => Ok(JobState::Running),
            "done" => Ok(JobState::Done),
            "failed" => Ok(JobState::Failed),
            "canceled" | "cancelled" => Ok(JobState::Canceled),
            other => Err(format!("unknown job state '{}'", other)),
        }
    }
}

/// Where a finished download landed, plus whatever the capability reported
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOutput {
    pub path: PathBuf,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("job {id} cannot go from {from} to {to}")]
    Illegal {
        id: JobId,
        from: JobState,
        to: JobState,
    },
    #[error("job {id} is already {state}")]
    AlreadyTerminal { id: JobId, state: JobState },
}

/// Result of a failed attempt, decided by the retry limit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Back to pending; `attempts` failures recorded so far
    Retry { attempts: u32 },
    Failed,
}

/// A single download request tracked through its lifecycle.
///
/// All state changes go through the transition methods below, which keep
/// `output` set only in `Done` and `error` set only in `Failed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub fingerprint: Fingerprint,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub output: Option<JobOutput>,
    pub error: Option<String>,
    /// Failed attempts so far
    pub attempts: u32,
    #[serde(default)]
    pub cancel_requested: bool,
}

impl Job {
    pub fn new(fingerprint: Fingerprint, now: DateTime<Utc>) -> Self {
        Self {
            id: JobId::derive(&fingerprint),
            fingerprint,
            state: JobState::Pending,
            created_at: now,
            started_at: None,
            finished_at: None,
            output: None,
            error: None,
            attempts: 0,
            cancel_requested: false,
        }
    }

    /// pending -> running (dequeued by a worker)
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.expect(JobState::Pending, JobState::Running)?;
        self.state = JobState::Running;
        self.started_at = Some(now);
        Ok(())
    }

    /// running -> done
    pub fn complete(
        &mut self,
        output: JobOutput,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.expect(JobState::Running, JobState::Done)?;
        self.state = JobState::Done;
        self.output = Some(output);
        self.finished_at = Some(now);
        Ok(())
    }

    /// Record a failed attempt: back to pending while retries remain, else failed.
    ///
    /// With `retry_limit` R the job is attempted at most R + 1 times.
    pub fn record_failure(
        &mut self,
        error: &str,
        retry_limit: u32,
        now: DateTime<Utc>,
    ) -> Result<FailureOutcome, TransitionError> {
        self.expect(JobState::Running, JobState::Failed)?;
        self.attempts += 1;

        if self.attempts <= retry_limit {
            self.state = JobState::Pending;
            self.started_at = None;
            return Ok(FailureOutcome::Retry {
                attempts: self.attempts,
            });
        }

        self.state = JobState::Failed;
        self.error = Some(error.to_string());
        self.finished_at = Some(now);
        Ok(FailureOutcome::Failed)
    }

    /// running -> pending without counting an attempt (worker stopped mid-flight)
    pub fn release(&mut self) -> Result<(), TransitionError> {
        self.expect(JobState::Running, JobState::Pending)?;
        self.state = JobState::Pending;
        self.started_at = None;
        Ok(())
    }

    /// Cancellation request from a client.
    ///
    /// Pending jobs are canceled on the spot. Running jobs only get the flag;
    /// the worker observes it once the capability returns.
    pub fn request_cancel(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        match self.state {
            JobState::Pending => {
                self.cancel_requested = true;
                self.mark_canceled(now)
            }
            JobState::Running => {
                self.cancel_requested = true;
                Ok(())
            }
            state => Err(TransitionError::AlreadyTerminal {
                id: self.id.clone(),
                state,
            }),
        }
    }

    /// pending|running -> canceled
    pub fn mark_canceled(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if self.state.is_terminal() {
            return Err(TransitionError::AlreadyTerminal {
                id: self.id.clone(),
                state: self.state,
            });
        }
        self.state = JobState::Canceled;
        self.finished_at = Some(now);
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// `output` iff done, `error` iff failed
    pub fn invariants_hold(&self) -> bool {
        self.output.is_some() == (self.state == JobState::Done)
            && self.error.is_some() == (self.state == JobState::Failed)
    }

    fn expect(&self, from: JobState, to: JobState) -> Result<(), TransitionError> {
        if self.state == from {
            return Ok(());
        }
        if self.state.is_terminal() {
            return Err(TransitionError::AlreadyTerminal {
                id: self.id.clone(),
                state: self.state,
            });
        }
        Err(TransitionError::Illegal {
            id: self.id.clone(),
            from: self.state,
            to,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending_job() -> Job {
        let fp = Fingerprint::new("https://example.com/watch?v=1", None).unwrap();
        Job::new(fp, Utc::now())
    }

    fn output() -> JobOutput {
        JobOutput {
            path: PathBuf::from("downloads/job/video.mp4"),
            metadata: serde_json::json!({"size": 10}),
        }
    }

    #[test]
    fn test_new_job_is_pending() {
        let job = pending_job();
        assert_eq!(job.state, JobState::Pending);
        assert_eq!(job.attempts, 0);
        assert!(job.id.as_str().starts_with(job.fingerprint.short_key()));
        assert!(job.invariants_hold());
    }

    #[test]
    fn test_happy_path() {
        let mut job = pending_job();
        job.start(Utc::now()).unwrap();
        assert_eq!(job.state, JobState::Running);
        assert!(job.started_at.is_some());

        job.complete(output(), Utc::now()).unwrap();
        assert_eq!(job.state, JobState::Done);
        assert!(job.finished_at.is_some());
        assert!(job.invariants_hold());
    }

    #[test]
    fn test_complete_requires_running() {
        let mut job = pending_job();
        let err = job.complete(output(), Utc::now()).unwrap_err();
        assert!(matches!(err, TransitionError::Illegal { .. }));
        assert!(job.output.is_none());
    }

    #[test]
    fn test_retries_until_limit() {
        let mut job = pending_job();

        for attempt in 1..=2 {
            job.start(Utc::now()).unwrap();
            let outcome = job.record_failure("boom", 2, Utc::now()).unwrap();
            assert_eq!(outcome, FailureOutcome::Retry { attempts: attempt });
            assert_eq!(job.state, JobState::Pending);
            assert!(job.error.is_none());
            assert!(job.invariants_hold());
        }

        job.start(Utc::now()).unwrap();
        let outcome = job.record_failure("final boom", 2, Utc::now()).unwrap();
        assert_eq!(outcome, FailureOutcome::Failed);
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.attempts, 3);
        assert_eq!(job.error.as_deref(), Some("final boom"));
        assert!(job.invariants_hold());
    }

    #[test]
    fn test_zero_retry_limit_fails_immediately() {
        let mut job = pending_job();
        job.start(Utc::now()).unwrap();
        assert_eq!(
            job.record_failure("nope", 0, Utc::now()).unwrap(),
            FailureOutcome::Failed
        );
    }

    #[test]
    fn test_cancel_pending_is_immediate() {
        let mut job = pending_job();
        job.request_cancel(Utc::now()).unwrap();
        assert_eq!(job.state, JobState::Canceled);
        assert!(job.finished_at.is_some());

        // Workers can no longer pick it up
        assert!(matches!(
            job.start(Utc::now()),
            Err(TransitionError::AlreadyTerminal { .. })
        ));
    }

    #[test]
    fn test_cancel_running_sets_flag_only() {
        let mut job = pending_job();
        job.start(Utc::now()).unwrap();
        job.request_cancel(Utc::now()).unwrap();
        assert_eq!(job.state, JobState::Running);
        assert!(job.cancel_requested);

        job.mark_canceled(Utc::now()).unwrap();
        assert_eq!(job.state, JobState::Canceled);
        assert!(job.complete(output(), Utc::now()).is_err());
        assert!(job.record_failure("late", 5, Utc::now()).is_err());
        assert!(job.invariants_hold());
    }

    #[test]
    fn test_cancel_terminal_is_rejected() {
        let mut job = pending_job();
        job.start(Utc::now()).unwrap();
        job.complete(output(), Utc::now()).unwrap();

        let err = job.request_cancel(Utc::now()).unwrap_err();
        assert_eq!(
            err,
            TransitionError::AlreadyTerminal {
                id: job.id.clone(),
                state: JobState::Done
            }
        );
    }

    #[test]
    fn test_release_returns_to_pending() {
        let mut job = pending_job();
        job.start(Utc::now()).unwrap();
        job.release().unwrap();
        assert_eq!(job.state, JobState::Pending);
        assert_eq!(job.attempts, 0);
        assert!(job.started_at.is_none());
    }

    #[test]
    fn test_state_parsing() {
        assert_eq!("running".parse::<JobState>().unwrap(), JobState::Running);
        assert_eq!("Cancelled".parse::<JobState>().unwrap(), JobState::Canceled);
        assert!("paused".parse::<JobState>().is_err());
    }

    #[test]
    fn test_json_shape() {
        let job = pending_job();
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["state"], "pending");
        assert_eq!(value["id"], job.id.as_str());
    }
}
