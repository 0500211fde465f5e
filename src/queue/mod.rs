//! Job Queue: FIFO of pending job ids
//!
//! Architecture:
//! 1. Orchestrator pushes a job id after the record is created
//! 2. Workers block in `pop` until an id is available or the queue closes
//! 3. Failed attempts come back through `push_delayed` after the backoff
//! 4. A worker stopped mid-flight returns its job with `push_front`
//! 5. Workers `ack` every id they are done with
//!
//! A shared queue keeps each popped id on its consumer's processing list
//! until acknowledged. Ids left behind by a consumer that died are
//! `orphaned`; a starting orchestrator settles them back into the queue.
//!
//! The queue only carries ids; the Job Store holds the record. A job id
//! may be popped for a job that was canceled meanwhile, so workers always
//! claim the job through the store before running it.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::job::JobId;

pub mod broker;
pub mod memory;
pub mod redis;

pub use broker::TaskBroker;
pub use memory::MemoryQueue;
pub use self::redis::RedisQueue;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Backend(#[from] ::redis::RedisError),

    #[error("Queue is closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, QueueError>;

/// A popped id whose consumer stopped before acknowledging it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Orphan {
    pub id: JobId,
    pub consumer: String,
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Append to the tail
    async fn push(&self, id: &JobId) -> Result<()>;

    /// Put back at the head, ahead of everything waiting
    async fn push_front(&self, id: &JobId) -> Result<()>;

    /// Append to the tail once `delay` has elapsed. Accepted after close.
    async fn push_delayed(&self, id: &JobId, delay: Duration) -> Result<()>;

    /// Wait for the next id.
    ///
    /// Returns `None` once the queue is closed and has nothing left to hand out.
    async fn pop(&self) -> Result<Option<JobId>>;

    /// Drop a waiting id (immediate or delayed); returns whether it was queued
    async fn remove(&self, id: &JobId) -> Result<bool>;

    async fn contains(&self, id: &JobId) -> Result<bool>;

    /// Waiting ids, delayed ones included
    async fn len(&self) -> Result<usize>;

    async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Stop accepting pushes and wake blocked consumers
    async fn close(&self);

    /// The consumer is done with a popped id
    async fn ack(&self, _id: &JobId) -> Result<()> {
        Ok(())
    }

    /// Popped ids held by consumers that are gone. A process-local queue
    /// dies with its consumers, so it never has any.
    async fn orphaned(&self) -> Result<Vec<Orphan>> {
        Ok(Vec::new())
    }

    /// Take an orphan off its dead consumer, putting it at the queue head
    /// when `requeue` is set. Returns false if someone else settled it first.
    async fn settle(&self, _orphan: &Orphan, _requeue: bool) -> Result<bool> {
        Ok(false)
    }

    /// Give up this consumer's claim; anything still unacknowledged
    /// becomes an orphan right away
    async fn retire(&self) {}
}
