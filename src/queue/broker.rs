use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::{JobQueue, Result};
use crate::job::{JobId, RetryPolicy};
use crate::observability::Metrics;

/// TaskBroker sits between the orchestrator, the workers and the queue
///
/// Architecture:
/// 1. Orchestrator calls `broker.enqueue(id)` for every new job
/// 2. Workers loop on `broker.next()`
/// 3. A failed attempt goes back via `schedule_retry`, delayed by the backoff
/// 4. Cancellation calls `withdraw` so the id never reaches a worker
///
/// The broker is NOT a separate task; it only wraps the queue with the
/// retry policy, logging and counters.
pub struct TaskBroker {
    queue: Arc<dyn JobQueue>,
    retry: RetryPolicy,
    metrics: Arc<Metrics>,
}

impl TaskBroker {
    pub fn new(queue: Arc<dyn JobQueue>, retry: RetryPolicy, metrics: Arc<Metrics>) -> Self {
        info!(
            retry_limit = retry.retry_limit,
            base_delay = ?retry.base_delay,
            "Creating TaskBroker"
        );
        Self {
            queue,
            retry,
            metrics,
        }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub async fn enqueue(&self, id: &JobId) -> Result<()> {
        self.queue.push(id).await?;
        debug!(job_id = %id, "Job enqueued");
        Ok(())
    }

    /// Re-enqueue after `attempts` failures, returning the delay applied
    pub async fn schedule_retry(&self, id: &JobId, attempts: u32) -> Result<Duration> {
        let delay = self.retry.backoff(attempts);
        self.queue.push_delayed(id, delay).await?;
        self.metrics.retry_scheduled();
        debug!(job_id = %id, attempts, ?delay, "Retry scheduled");
        Ok(delay)
    }

    /// Put a job back at the head of the queue
    pub async fn return_to_head(&self, id: &JobId) -> Result<()> {
        self.queue.push_front(id).await?;
        debug!(job_id = %id, "Job returned to queue head");
        Ok(())
    }

    /// Remove a job that has not been handed out yet
    pub async fn withdraw(&self, id: &JobId) -> Result<bool> {
        let removed = self.queue.remove(id).await?;
        if !removed {
            warn!(job_id = %id, "Job was not waiting in the queue");
        }
        Ok(removed)
    }

    pub async fn next(&self) -> Result<Option<JobId>> {
        self.queue.pop().await
    }

    /// The worker is done with a popped id; it no longer needs recovery
    pub async fn ack(&self, id: &JobId) -> Result<()> {
        self.queue.ack(id).await
    }

    pub async fn pending(&self) -> Result<usize> {
        self.queue.len().await
    }

    pub async fn close(&self) {
        self.queue.close().await;
        info!("Job queue closed");
    }
}
