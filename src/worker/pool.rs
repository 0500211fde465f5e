use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::runner::{WorkerContext, run_job, stop_requested};
use crate::job::JobId;

/// Pause after a failed pop so a down backend is not hammered
const POP_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Control signal broadcast to every worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    Running,
    /// Finish queued work, then exit
    Draining,
    /// Abandon in-flight attempts and exit
    Stopping,
}

/// What happens to queued and in-flight jobs on shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShutdownPolicy {
    /// Let workers empty the queue and finish what they run
    #[default]
    Drain,
    /// Stop now; in-flight jobs go back to pending at the queue head
    Abandon,
}

impl fmt::Display for ShutdownPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownPolicy::Drain => f.write_str("drain"),
            ShutdownPolicy::Abandon => f.write_str("abandon"),
        }
    }
}

impl FromStr for ShutdownPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "drain" => Ok(ShutdownPolicy::Drain),
            "abandon" => Ok(ShutdownPolicy::Abandon),
            other => Err(format!("unknown shutdown policy '{}'", other)),
        }
    }
}

/// Fixed set of worker tasks pulling from the shared queue.
///
/// Each worker runs at most one job at a time, so `size` bounds the number
/// of concurrent downloads.
pub struct WorkerPool {
    ctx: Arc<WorkerContext>,
    handles: Vec<JoinHandle<()>>,
    control: watch::Sender<PoolState>,
}

impl WorkerPool {
    pub fn spawn(size: usize, ctx: Arc<WorkerContext>) -> Self {
        let (control, receiver) = watch::channel(PoolState::Running);

        let handles = (0..size)
            .map(|worker_id| tokio::spawn(worker_loop(worker_id, ctx.clone(), receiver.clone())))
            .collect();

        info!(workers = size, downloader = ctx.downloader.name(), "Worker pool started");

        Self {
            ctx,
            handles,
            control,
        }
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Stop every worker according to `policy` and wait for them to exit
    pub async fn shutdown(self, policy: ShutdownPolicy) {
        let state = match policy {
            ShutdownPolicy::Drain => PoolState::Draining,
            ShutdownPolicy::Abandon => PoolState::Stopping,
        };
        info!(%policy, workers = self.handles.len(), "Shutting down worker pool");

        // Errors only if every worker already exited
        let _ = self.control.send(state);
        self.ctx.broker.close().await;

        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Worker task panicked");
            }
        }
        info!("Worker pool stopped");
    }
}

async fn worker_loop(
    worker_id: usize,
    ctx: Arc<WorkerContext>,
    mut control: watch::Receiver<PoolState>,
) {
    debug!(worker_id, "Worker started");

    loop {
        if *control.borrow() == PoolState::Stopping {
            break;
        }

        // Delayed retries keep a closed queue open; a stop must not wait for them
        let next = tokio::select! {
            biased;
            _ = stop_requested(&mut control) => break,
            next = ctx.broker.next() => next,
        };

        let job_id = match next {
            Ok(Some(job_id)) => job_id,
            Ok(None) => break,
            Err(e) => {
                error!(worker_id, error = %e, "Failed to pop from queue");
                if *control.borrow() != PoolState::Running {
                    break;
                }
                tokio::time::sleep(POP_ERROR_BACKOFF).await;
                continue;
            }
        };

        if *control.borrow() == PoolState::Stopping {
            match ctx.broker.return_to_head(&job_id).await {
                Ok(()) => acknowledge(&ctx, worker_id, &job_id).await,
                Err(e) => error!(worker_id, %job_id, error = %e, "Failed to return job to queue"),
            }
            break;
        }

        match run_job(&ctx, worker_id, &job_id, &mut control).await {
            Ok(outcome) => {
                debug!(worker_id, %job_id, ?outcome, "Job processed");
                acknowledge(&ctx, worker_id, &job_id).await;
            }
            // Left unacknowledged so restart recovery picks it up
            Err(e) => error!(worker_id, %job_id, error = %e, "Job processing failed"),
        }
    }

    debug!(worker_id, "Worker stopped");
}

async fn acknowledge(ctx: &WorkerContext, worker_id: usize, job_id: &JobId) {
    if let Err(e) = ctx.broker.ack(job_id).await {
        error!(worker_id, %job_id, error = %e, "Failed to acknowledge job");
    }
}
