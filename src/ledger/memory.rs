//! Process-local ledger backends
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};

use super::error::{LedgerError, Result};
use super::{DedupIndex, JobStore, Mutation, sort_and_limit};
use crate::job::{Fingerprint, Job, JobFilter, JobId};

/// In-memory job store.
///
/// The map lock is only held to find a record; each record has its own
/// mutex, so updates to different jobs never contend.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<JobId, Arc<Mutex<Job>>>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn entry(&self, id: &JobId) -> Option<Arc<Mutex<Job>>> {
        self.jobs.read().await.get(id).cloned()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, job: &Job) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(LedgerError::AlreadyExists(job.id.clone()));
        }
        jobs.insert(job.id.clone(), Arc::new(Mutex::new(job.clone())));
        Ok(())
    }

    async fn get(&self, id: &JobId) -> Result<Option<Job>> {
        match self.entry(id).await {
            Some(entry) => Ok(Some(entry.lock().await.clone())),
            None => Ok(None),
        }
    }

    async fn update(&self, id: &JobId, mutation: Mutation<'_>) -> Result<Job> {
        let entry = self
            .entry(id)
            .await
            .ok_or_else(|| LedgerError::JobNotFound(id.clone()))?;

        let mut guard = entry.lock().await;
        // Mutate a copy so a rejected transition leaves the record untouched
        let mut next = guard.clone();
        mutation(&mut next)?;
        *guard = next.clone();
        Ok(next)
    }

    async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        let entries: Vec<_> = self.jobs.read().await.values().cloned().collect();

        let mut jobs = Vec::with_capacity(entries.len());
        for entry in entries {
            let job = entry.lock().await;
            if filter.matches(&job) {
                jobs.push(job.clone());
            }
        }
        Ok(sort_and_limit(jobs, filter))
    }

    async fn delete(&self, id: &JobId) -> Result<bool> {
        Ok(self.jobs.write().await.remove(id).is_some())
    }
}

const DEDUP_SHARDS: usize = 16;

/// In-memory deduplication index, sharded by fingerprint key
pub struct MemoryDedupIndex {
    shards: Vec<Mutex<HashMap<String, JobId>>>,
}

impl Default for MemoryDedupIndex {
    fn default() -> Self {
        Self {
            shards: (0..DEDUP_SHARDS).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }
}

impl MemoryDedupIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn shard(&self, fingerprint: &Fingerprint) -> &Mutex<HashMap<String, JobId>> {
        let mut hasher = DefaultHasher::new();
        fingerprint.key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % self.shards.len()]
    }
}

#[async_trait]
impl DedupIndex for MemoryDedupIndex {
    async fn lookup(&self, fingerprint: &Fingerprint) -> Result<Option<JobId>> {
        Ok(self.shard(fingerprint).lock().await.get(&fingerprint.key).cloned())
    }

    async fn register(&self, fingerprint: &Fingerprint, candidate: &JobId) -> Result<JobId> {
        let mut shard = self.shard(fingerprint).lock().await;
        let owner = shard
            .entry(fingerprint.key.clone())
            .or_insert_with(|| candidate.clone());
        Ok(owner.clone())
    }

    async fn release(&self, fingerprint: &Fingerprint, owner: &JobId) -> Result<bool> {
        let mut shard = self.shard(fingerprint).lock().await;
        if shard.get(&fingerprint.key) == Some(owner) {
            shard.remove(&fingerprint.key);
            return Ok(true);
        }
        Ok(false)
    }
}
