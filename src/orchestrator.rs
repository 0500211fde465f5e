//! Orchestrator: the single entry point for submitting, querying and
//! canceling download jobs.
//!
//! Flow of a submission:
//! 1. Normalize URL + format into a [`Fingerprint`]
//! 2. Create a pending job record in the Job Store
//! 3. Claim the fingerprint in the Deduplication Index
//! 4. Lost the claim: drop our record and report the winner instead
//! 5. Won the claim: enqueue the job id for the worker pool
//!
//! A fingerprint owned by a failed or canceled job is released and the
//! submission creates a fresh job. Done jobs keep deduplicating until
//! retention evicts them.
//!
//! On start, jobs popped by an instance that died mid-attempt are
//! recovered before any worker runs: running records go back to pending
//! (or canceled, if that was asked for) and their ids return to the queue.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::backend::Backend;
use crate::config::Config;
use crate::job::{
    Fingerprint, FingerprintError, Job, JobFilter, JobId, JobState, RetryPolicy, TransitionError,
};
use crate::ledger::{DedupIndex, JobStore, LedgerError, PruneStats, prune_expired};
use crate::observability::Metrics;
use crate::queue::{Orphan, QueueError, TaskBroker};
use crate::storage::DownloadRoot;
use crate::worker::{Downloader, ShutdownPolicy, WorkerContext, WorkerPool};

/// Bound on claim/repair rounds for one submission
const MAX_SUBMIT_ROUNDS: usize = 8;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Invalid request: {0}")]
    Validation(#[from] FingerprintError),

    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Job {id} is already {state}")]
    AlreadyTerminal { id: JobId, state: JobState },

    #[error("Coordination backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Orchestrator is shutting down")]
    ShuttingDown,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<LedgerError> for OrchestratorError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::Backend(e) => OrchestratorError::BackendUnavailable(e.to_string()),
            LedgerError::JobNotFound(id) => OrchestratorError::NotFound(id),
            LedgerError::Transition(TransitionError::AlreadyTerminal { id, state }) => {
                OrchestratorError::AlreadyTerminal { id, state }
            }
            other => OrchestratorError::Internal(other.to_string()),
        }
    }
}

impl From<QueueError> for OrchestratorError {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::Backend(e) => OrchestratorError::BackendUnavailable(e.to_string()),
            QueueError::Closed => OrchestratorError::ShuttingDown,
        }
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Runtime settings, usually derived from [`Config`]
#[derive(Debug, Clone)]
pub struct Settings {
    pub nb_workers: usize,
    pub retry: RetryPolicy,
    pub shutdown: ShutdownPolicy,
    pub job_ttl: Duration,
    /// Zero disables the background sweeper
    pub prune_interval: Duration,
    pub delete_files: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for Settings {
    fn from(config: &Config) -> Self {
        Self {
            nb_workers: config.workers.nb_workers,
            retry: config.retry_policy(),
            shutdown: config.workers.shutdown,
            job_ttl: config.retention.job_ttl.as_duration(),
            prune_interval: config.retention.prune_interval.as_duration(),
            delete_files: config.retention.delete_files,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Submission {
    pub job_id: JobId,
    pub state: JobState,
    /// True when an existing job was returned instead of creating one
    pub deduplicated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    /// Job was pending and is now canceled
    Canceled,
    /// Job is running; it ends canceled once the attempt returns
    CancelRequested,
}

pub struct Orchestrator {
    settings: Settings,
    backend: Backend,
    broker: Arc<TaskBroker>,
    storage: DownloadRoot,
    metrics: Arc<Metrics>,
    pool: Mutex<Option<WorkerPool>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
    accepting: AtomicBool,
}

impl Orchestrator {
    /// Recover orphaned jobs, then spawn the worker pool and retention
    /// sweeper. Must run inside a tokio runtime.
    pub async fn start(
        settings: Settings,
        backend: Backend,
        downloader: Arc<dyn Downloader>,
        storage: DownloadRoot,
        metrics: Arc<Metrics>,
    ) -> Result<Self> {
        let broker = Arc::new(TaskBroker::new(
            backend.queue.clone(),
            settings.retry,
            metrics.clone(),
        ));

        let mut orchestrator = Self {
            settings,
            backend,
            broker,
            storage,
            metrics,
            pool: Mutex::new(None),
            sweeper: Mutex::new(None),
            accepting: AtomicBool::new(true),
        };
        orchestrator.recover_orphans().await?;

        let ctx = Arc::new(WorkerContext {
            store: orchestrator.backend.store.clone(),
            dedup: orchestrator.backend.dedup.clone(),
            broker: orchestrator.broker.clone(),
            downloader,
            storage: orchestrator.storage.clone(),
            metrics: orchestrator.metrics.clone(),
        });
        let pool = WorkerPool::spawn(orchestrator.settings.nb_workers, ctx);
        *orchestrator.pool.get_mut() = Some(pool);

        let settings = orchestrator.settings.clone();
        let sweeper = (!settings.prune_interval.is_zero()).then(|| {
            tokio::spawn(sweep(
                orchestrator.backend.store.clone(),
                orchestrator.backend.dedup.clone(),
                settings.delete_files.then(|| orchestrator.storage.clone()),
                settings.job_ttl,
                settings.prune_interval,
                orchestrator.metrics.clone(),
            ))
        });
        *orchestrator.sweeper.get_mut() = sweeper;

        info!(
            backend = %orchestrator.backend.kind(),
            workers = settings.nb_workers,
            retry_limit = settings.retry.retry_limit,
            shutdown = %settings.shutdown,
            "Orchestrator started"
        );

        Ok(orchestrator)
    }

    /// Settle every id a dead consumer popped and never acknowledged
    async fn recover_orphans(&self) -> Result<usize> {
        let orphans = self.backend.queue.orphaned().await?;
        if orphans.is_empty() {
            return Ok(0);
        }
        info!(count = orphans.len(), "Recovering jobs left by stopped instances");

        let mut requeued = 0;
        for orphan in &orphans {
            if self.recover_orphan(orphan).await? {
                requeued += 1;
            }
        }
        info!(requeued, "Orphan recovery finished");
        Ok(requeued)
    }

    async fn recover_orphan(&self, orphan: &Orphan) -> Result<bool> {
        let now = Utc::now();
        let recovered = self
            .backend
            .store
            .update(&orphan.id, &|job| match job.state {
                JobState::Running if job.cancel_requested => job.mark_canceled(now),
                JobState::Running => job.release(),
                _ => Ok(()),
            })
            .await;

        let job = match recovered {
            Ok(job) => Some(job),
            Err(LedgerError::JobNotFound(_)) => None,
            Err(e) => return Err(e.into()),
        };

        let requeue = match &job {
            Some(job) if job.state == JobState::Pending => {
                self.discard_files(&job.id).await;
                true
            }
            Some(job) if job.state == JobState::Canceled => {
                self.discard_files(&job.id).await;
                self.release_fingerprint(&job.fingerprint, &job.id).await;
                false
            }
            _ => false,
        };

        let settled = self.backend.queue.settle(orphan, requeue).await?;
        if settled {
            info!(
                job_id = %orphan.id,
                consumer = %orphan.consumer,
                state = ?job.as_ref().map(|j| j.state),
                requeue,
                "Recovered orphaned job"
            );
        }
        Ok(settled && requeue)
    }

    async fn discard_files(&self, id: &JobId) {
        if let Err(e) = self.storage.discard(id).await {
            warn!(job_id = %id, error = %e, "Failed to discard job directory");
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Submit `url` with an optional format selector
    pub async fn submit(&self, url: &str, format: Option<&str>) -> Result<Submission> {
        let fingerprint = Fingerprint::new(url, format)?;
        self.submit_fingerprint(fingerprint).await
    }

    pub async fn submit_fingerprint(&self, fingerprint: Fingerprint) -> Result<Submission> {
        if !self.is_accepting() {
            return Err(OrchestratorError::ShuttingDown);
        }

        for _ in 0..MAX_SUBMIT_ROUNDS {
            if let Some(owner) = self.backend.dedup.lookup(&fingerprint).await? {
                if let Some(existing) = self.reusable(&fingerprint, &owner).await? {
                    return Ok(self.deduplicated(existing));
                }
            }

            let job = Job::new(fingerprint.clone(), Utc::now());
            self.backend.store.create(&job).await?;

            let owner = match self.backend.dedup.register(&fingerprint, &job.id).await {
                Ok(owner) => owner,
                Err(e) => {
                    self.discard_record(&job.id).await;
                    return Err(e.into());
                }
            };

            if owner != job.id {
                // Lost the race to a concurrent submission
                self.discard_record(&job.id).await;
                match self.reusable(&fingerprint, &owner).await? {
                    Some(existing) => return Ok(self.deduplicated(existing)),
                    None => continue,
                }
            }

            if let Err(e) = self.broker.enqueue(&job.id).await {
                self.release_fingerprint(&fingerprint, &job.id).await;
                self.discard_record(&job.id).await;
                return Err(e.into());
            }

            self.metrics.job_submitted();
            info!(
                job_id = %job.id,
                url = %fingerprint.url,
                format = %fingerprint.format,
                "Job accepted"
            );
            return Ok(Submission {
                job_id: job.id,
                state: JobState::Pending,
                deduplicated: false,
            });
        }

        error!(key = %fingerprint.key, "Fingerprint ownership kept changing during submission");
        Err(OrchestratorError::Internal(
            "could not settle fingerprint ownership".to_string(),
        ))
    }

    /// The owner's record if it can absorb a new submission; otherwise the
    /// stale mapping is released and `None` returned.
    async fn reusable(&self, fingerprint: &Fingerprint, owner: &JobId) -> Result<Option<Job>> {
        match self.backend.store.get(owner).await? {
            Some(job) if !matches!(job.state, JobState::Failed | JobState::Canceled) => {
                Ok(Some(job))
            }
            Some(job) => {
                debug!(
                    job_id = %owner,
                    state = %job.state,
                    "Releasing fingerprint of finished job"
                );
                self.backend.dedup.release(fingerprint, owner).await?;
                Ok(None)
            }
            None => {
                debug!(job_id = %owner, "Releasing fingerprint of missing job");
                self.backend.dedup.release(fingerprint, owner).await?;
                Ok(None)
            }
        }
    }

    fn deduplicated(&self, job: Job) -> Submission {
        self.metrics.job_deduplicated();
        debug!(job_id = %job.id, state = %job.state, "Submission deduplicated");
        Submission {
            job_id: job.id,
            state: job.state,
            deduplicated: true,
        }
    }

    async fn discard_record(&self, id: &JobId) {
        if let Err(e) = self.backend.store.delete(id).await {
            warn!(job_id = %id, error = %e, "Failed to delete job record");
        }
    }

    async fn release_fingerprint(&self, fingerprint: &Fingerprint, owner: &JobId) {
        if let Err(e) = self.backend.dedup.release(fingerprint, owner).await {
            warn!(job_id = %owner, error = %e, "Failed to release fingerprint");
        }
    }

    pub async fn status(&self, id: &JobId) -> Result<Job> {
        self.backend
            .store
            .get(id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(id.clone()))
    }

    /// Cancel a job. Pending jobs are canceled immediately and withdrawn from
    /// the queue; running jobs are flagged and end canceled after their
    /// current attempt.
    pub async fn cancel(&self, id: &JobId) -> Result<CancelOutcome> {
        let now = Utc::now();
        let job = self
            .backend
            .store
            .update(id, &|job| job.request_cancel(now))
            .await?;

        if job.state != JobState::Canceled {
            info!(job_id = %id, "Cancellation requested for running job");
            return Ok(CancelOutcome::CancelRequested);
        }

        if let Err(e) = self.broker.withdraw(id).await {
            // Workers skip canceled jobs, a stale entry is harmless
            warn!(job_id = %id, error = %e, "Failed to withdraw job from queue");
        }
        self.release_fingerprint(&job.fingerprint, &job.id).await;
        self.metrics.job_canceled();
        info!(job_id = %id, "Job canceled");
        Ok(CancelOutcome::Canceled)
    }

    pub async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        Ok(self.backend.store.list(filter).await?)
    }

    /// Jobs currently being downloaded
    pub async fn active(&self) -> Result<Vec<Job>> {
        self.list(&JobFilter::with_state(JobState::Running)).await
    }

    /// Run one retention pass now
    pub async fn prune(&self) -> Result<PruneStats> {
        let storage = self.settings.delete_files.then_some(&self.storage);
        let stats = prune_expired(
            self.backend.store.as_ref(),
            self.backend.dedup.as_ref(),
            storage,
            self.settings.job_ttl,
            Utc::now(),
        )
        .await?;
        self.metrics.jobs_pruned(stats.jobs_pruned);
        Ok(stats)
    }

    /// Stop accepting work and stop the pool with the configured policy
    pub async fn shutdown(&self) {
        self.shutdown_with(self.settings.shutdown).await;
    }

    /// Stop accepting work and stop the pool. Later calls are no-ops.
    pub async fn shutdown_with(&self, policy: ShutdownPolicy) {
        self.accepting.store(false, Ordering::Release);

        if let Some(sweeper) = self.sweeper.lock().await.take() {
            sweeper.abort();
        }

        let Some(pool) = self.pool.lock().await.take() else {
            return;
        };
        pool.shutdown(policy).await;
        self.backend.queue.retire().await;
        info!("Orchestrator stopped");
    }
}

/// Periodic retention pass; the first one runs one interval after start
async fn sweep(
    store: Arc<dyn JobStore>,
    dedup: Arc<dyn DedupIndex>,
    storage: Option<DownloadRoot>,
    job_ttl: Duration,
    interval: Duration,
    metrics: Arc<Metrics>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let pass = prune_expired(
            store.as_ref(),
            dedup.as_ref(),
            storage.as_ref(),
            job_ttl,
            Utc::now(),
        );
        match pass.await {
            Ok(stats) => metrics.jobs_pruned(stats.jobs_pruned),
            Err(e) => warn!(error = %e, "Retention pass failed"),
        }
    }
}
