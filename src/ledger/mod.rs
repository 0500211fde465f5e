//! Job Store and Deduplication Index
//!
//! The ledger is the source of truth for every job record and for the
//! fingerprint -> job id mapping that collapses duplicate submissions.
//!
//! ## Backends
//!
//! - [`MemoryJobStore`] / [`MemoryDedupIndex`] - process-local, used when Redis
//!   is disabled. Per-job locks and a sharded index, no global lock.
//! - [`RedisLedger`] - shared across processes. Updates are compare-and-swap
//!   on a revision counter, registration is a single Lua script.
//!
//! ## Guarantees
//!
//! - `update` applies the mutation atomically against the latest record; a
//!   transition that is illegal for the stored state is rejected untouched.
//! - `register` returns the job id that owns the fingerprint. At most one
//!   caller ever wins a given fingerprint until it is released.
//! - `release` only removes the mapping if it still points at the given owner.

use async_trait::async_trait;

use crate::job::{Fingerprint, Job, JobFilter, JobId, TransitionError};

pub mod error;
pub mod keys;
pub mod memory;
pub mod pruning;
pub mod redis;

pub use error::{LedgerError, Result};
pub use keys::KeySpace;
pub use memory::{MemoryDedupIndex, MemoryJobStore};
pub use pruning::{PruneStats, prune_expired};
pub use redis::RedisLedger;

/// Mutation applied to a job record under the store's atomicity guarantee.
///
/// May run more than once against fresh copies when a concurrent writer wins.
pub type Mutation<'a> =
    &'a (dyn Fn(&mut Job) -> std::result::Result<(), TransitionError> + Send + Sync);

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new record; fails with `AlreadyExists` if the id is taken
    async fn create(&self, job: &Job) -> Result<()>;

    async fn get(&self, id: &JobId) -> Result<Option<Job>>;

    /// Atomically read-modify-write a record, returning the stored result
    async fn update(&self, id: &JobId, mutation: Mutation<'_>) -> Result<Job>;

    /// Records matching `filter`, newest first
    async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>>;

    /// Remove a record; returns whether it existed
    async fn delete(&self, id: &JobId) -> Result<bool>;

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
pub trait DedupIndex: Send + Sync {
    async fn lookup(&self, fingerprint: &Fingerprint) -> Result<Option<JobId>>;

    /// Claim `fingerprint` for `candidate` unless already claimed.
    ///
    /// Returns the owning job id: `candidate` if this call won, otherwise the
    /// existing owner.
    async fn register(&self, fingerprint: &Fingerprint, candidate: &JobId) -> Result<JobId>;

    /// Drop the mapping if it still points at `owner`
    async fn release(&self, fingerprint: &Fingerprint, owner: &JobId) -> Result<bool>;
}

/// Newest first, so a limit keeps the most recent submissions
pub(crate) fn sort_and_limit(mut jobs: Vec<Job>, filter: &JobFilter) -> Vec<Job> {
    jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
    if let Some(limit) = filter.limit {
        jobs.truncate(limit);
    }
    jobs
}
