//! Job runner: takes one dequeued job id through a single attempt

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::fetcher::{Downloader, FetchError, FetchOutput, FetchRequest};
use super::pool::PoolState;
use crate::job::{Job, JobId, JobOutput, JobState};
use crate::ledger::{DedupIndex, JobStore, LedgerError};
use crate::observability::Metrics;
use crate::queue::{QueueError, TaskBroker};
use crate::storage::DownloadRoot;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

pub type Result<T> = std::result::Result<T, RunError>;

/// Everything a worker needs, shared by the whole pool
pub struct WorkerContext {
    pub store: Arc<dyn JobStore>,
    pub dedup: Arc<dyn DedupIndex>,
    pub broker: Arc<TaskBroker>,
    pub downloader: Arc<dyn Downloader>,
    pub storage: DownloadRoot,
    pub metrics: Arc<Metrics>,
}

/// How an attempt ended, from the worker's point of view
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Not pending anymore (canceled while queued, or claimed elsewhere)
    Skipped,
    Done,
    Retrying { attempts: u32, delay: Duration },
    Failed,
    Canceled,
    /// Pool stopped mid-flight; job is pending again at the queue head
    Released,
}

/// Run one attempt of `job_id`.
///
/// The job is claimed through the store (pending -> running), so a stale
/// queue entry for a canceled job is skipped without invoking the downloader.
pub async fn run_job(
    ctx: &WorkerContext,
    worker_id: usize,
    job_id: &JobId,
    control: &mut watch::Receiver<PoolState>,
) -> Result<RunOutcome> {
    let now = Utc::now();
    let job = match ctx.store.update(job_id, &|job| job.start(now)).await {
        Ok(job) => job,
        Err(LedgerError::Transition(e)) => {
            debug!(worker_id, %job_id, reason = %e, "Skipping job");
            return Ok(RunOutcome::Skipped);
        }
        Err(LedgerError::JobNotFound(_)) => {
            warn!(worker_id, %job_id, "Dequeued job has no record");
            return Ok(RunOutcome::Skipped);
        }
        Err(e) => return Err(e.into()),
    };

    info!(
        worker_id,
        %job_id,
        url = %job.fingerprint.url,
        format = %job.fingerprint.format,
        attempt = job.attempts + 1,
        "Processing job"
    );

    ctx.metrics.download_started();
    let result = attempt(ctx, &job, control).await;
    let outcome = match result {
        Some(result) => finish(ctx, worker_id, &job, result).await,
        None => abandon(ctx, worker_id, &job).await,
    };
    ctx.metrics.download_finished();
    outcome
}

/// Invoke the downloader; `None` means the pool asked us to stop first
async fn attempt(
    ctx: &WorkerContext,
    job: &Job,
    control: &mut watch::Receiver<PoolState>,
) -> Option<std::result::Result<FetchOutput, FetchError>> {
    let target_dir = match ctx.storage.prepare(&job.id).await {
        Ok(dir) => dir,
        Err(e) => return Some(Err(FetchError::Storage(e.to_string()))),
    };

    let request = FetchRequest {
        job_id: job.id.clone(),
        url: job.fingerprint.url.clone(),
        format: job.fingerprint.format.clone(),
        target_dir,
    };

    tokio::select! {
        biased;
        _ = stop_requested(control) => None,
        result = ctx.downloader.fetch(request) => Some(result),
    }
}

/// Resolves once the pool switches to `Stopping`
pub(super) async fn stop_requested(control: &mut watch::Receiver<PoolState>) {
    let signalled = control
        .wait_for(|state| *state == PoolState::Stopping)
        .await
        .is_ok();
    if !signalled {
        // Pool handle dropped without a stop signal; keep running
        std::future::pending::<()>().await;
    }
}

async fn finish(
    ctx: &WorkerContext,
    worker_id: usize,
    job: &Job,
    result: std::result::Result<FetchOutput, FetchError>,
) -> Result<RunOutcome> {
    let now = Utc::now();

    let (updated, reason) = match result {
        Ok(output) => {
            let output = JobOutput {
                path: output.path,
                metadata: output.metadata,
            };
            let updated = ctx
                .store
                .update(&job.id, &|job| {
                    if job.cancel_requested {
                        job.mark_canceled(now)
                    } else {
                        job.complete(output.clone(), now)
                    }
                })
                .await?;
            (updated, None)
        }
        Err(e) => {
            let reason = e.to_string();
            let retry_limit = ctx.broker.retry_policy().retry_limit;
            let updated = ctx
                .store
                .update(&job.id, &|job| {
                    if job.cancel_requested {
                        job.mark_canceled(now)
                    } else {
                        job.record_failure(&reason, retry_limit, now).map(|_| ())
                    }
                })
                .await?;
            (updated, Some(reason))
        }
    };

    match updated.state {
        JobState::Done => {
            ctx.metrics.download_succeeded();
            info!(
                worker_id,
                job_id = %updated.id,
                path = ?updated.output.as_ref().map(|o| &o.path),
                "Download completed"
            );
            Ok(RunOutcome::Done)
        }
        JobState::Pending => {
            discard_files(ctx, &updated.id).await;
            let delay = ctx.broker.schedule_retry(&updated.id, updated.attempts).await?;
            warn!(
                worker_id,
                job_id = %updated.id,
                attempts = updated.attempts,
                ?delay,
                error = reason.as_deref().unwrap_or_default(),
                "Download failed, retry scheduled"
            );
            Ok(RunOutcome::Retrying {
                attempts: updated.attempts,
                delay,
            })
        }
        JobState::Failed => {
            ctx.metrics.download_failed();
            discard_files(ctx, &updated.id).await;
            release_fingerprint(ctx, &updated).await;
            error!(
                worker_id,
                job_id = %updated.id,
                attempts = updated.attempts,
                error = updated.error.as_deref().unwrap_or_default(),
                "Download failed, retries exhausted"
            );
            Ok(RunOutcome::Failed)
        }
        JobState::Canceled => {
            ctx.metrics.job_canceled();
            discard_files(ctx, &updated.id).await;
            release_fingerprint(ctx, &updated).await;
            info!(worker_id, job_id = %updated.id, "Job canceled while running");
            Ok(RunOutcome::Canceled)
        }
        JobState::Running => {
            // Every branch above leaves running
            error!(worker_id, job_id = %updated.id, "Job still running after attempt");
            Ok(RunOutcome::Skipped)
        }
    }
}

/// Pool is stopping: put the job back untouched (or cancel it if asked to)
async fn abandon(ctx: &WorkerContext, worker_id: usize, job: &Job) -> Result<RunOutcome> {
    let now = Utc::now();
    let updated = ctx
        .store
        .update(&job.id, &|job| {
            if job.cancel_requested {
                job.mark_canceled(now)
            } else {
                job.release()
            }
        })
        .await?;

    discard_files(ctx, &updated.id).await;

    if updated.state == JobState::Canceled {
        ctx.metrics.job_canceled();
        release_fingerprint(ctx, &updated).await;
        return Ok(RunOutcome::Canceled);
    }

    ctx.broker.return_to_head(&updated.id).await?;
    info!(worker_id, job_id = %updated.id, "Abandoned in-flight job, returned to queue");
    Ok(RunOutcome::Released)
}

async fn discard_files(ctx: &WorkerContext, job_id: &JobId) {
    if let Err(e) = ctx.storage.discard(job_id).await {
        warn!(%job_id, error = %e, "Failed to discard job directory");
    }
}

/// Let the fingerprint be submitted again. Submission also repairs a
/// mapping left pointing at a failed job, so errors are only logged.
async fn release_fingerprint(ctx: &WorkerContext, job: &Job) {
    if let Err(e) = ctx.dedup.release(&job.fingerprint, &job.id).await {
        warn!(job_id = %job.id, error = %e, "Failed to release fingerprint");
    }
}
