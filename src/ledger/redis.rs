//! Redis-backed ledger shared by every process pointed at the same server
use std::sync::LazyLock;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use tracing::{debug, warn};

use super::error::{LedgerError, Result};
use super::keys::KeySpace;
use super::{DedupIndex, JobStore, Mutation, sort_and_limit};
use crate::job::{Fingerprint, Job, JobFilter, JobId};

/// Give up after this many lost compare-and-swap races on one record
const MAX_CAS_ATTEMPTS: usize = 16;

const FIELD_DATA: &str = "data";
const FIELD_REV: &str = "rev";

/// KEYS[1] = job hash, KEYS[2] = jobs index; ARGV[1] = data, ARGV[2] = id
static CREATE_JOB: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
        if redis.call('EXISTS', KEYS[1]) == 1 then
            return 0
        end
        redis.call('HSET', KEYS[1], 'data', ARGV[1], 'rev', '1')
        redis.call('SADD', KEYS[2], ARGV[2])
        return 1
        ",
    )
});

/// KEYS[1] = job hash; ARGV[1] = expected rev, ARGV[2] = data.
/// Returns -1 when missing, 0 on revision mismatch, 1 when applied.
static COMPARE_AND_SWAP: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
        local rev = redis.call('HGET', KEYS[1], 'rev')
        if not rev then
            return -1
        end
        if rev ~= ARGV[1] then
            return 0
        end
        redis.call('HSET', KEYS[1], 'data', ARGV[2], 'rev', tostring(tonumber(rev) + 1))
        return 1
        ",
    )
});

/// KEYS[1] = dedup key; ARGV[1] = candidate. Returns the owner.
static REGISTER: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
        local owner = redis.call('GET', KEYS[1])
        if owner then
            return owner
        end
        redis.call('SET', KEYS[1], ARGV[1])
        return ARGV[1]
        ",
    )
});

/// KEYS[1] = dedup key; ARGV[1] = expected owner
static RELEASE: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
        if redis.call('GET', KEYS[1]) == ARGV[1] then
            return redis.call('DEL', KEYS[1])
        end
        return 0
        ",
    )
});

/// Job store and deduplication index on one Redis connection.
///
/// Each job is a hash holding the JSON record and a revision counter;
/// updates are optimistic and retried on revision mismatch.
#[derive(Clone)]
pub struct RedisLedger {
    conn: ConnectionManager,
    keys: KeySpace,
}

impl RedisLedger {
    /// Share an existing connection manager with other components
    pub fn from_connection(conn: ConnectionManager, keys: KeySpace) -> Self {
        Self { conn, keys }
    }
}

#[async_trait]
impl JobStore for RedisLedger {
    async fn create(&self, job: &Job) -> Result<()> {
        let data = serde_json::to_string(job)?;
        let mut conn = self.conn.clone();

        let created: i64 = CREATE_JOB
            .key(self.keys.job(&job.id))
            .key(self.keys.jobs_index())
            .arg(data)
            .arg(job.id.as_str())
            .invoke_async(&mut conn)
            .await?;

        if created == 0 {
            return Err(LedgerError::AlreadyExists(job.id.clone()));
        }
        Ok(())
    }

    async fn get(&self, id: &JobId) -> Result<Option<Job>> {
        let mut conn = self.conn.clone();
        let data: Option<String> = conn.hget(self.keys.job(id), FIELD_DATA).await?;
        data.map(|data| serde_json::from_str(&data))
            .transpose()
            .map_err(Into::into)
    }

    async fn update(&self, id: &JobId, mutation: Mutation<'_>) -> Result<Job> {
        let key = self.keys.job(id);
        let mut conn = self.conn.clone();

        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let (data, rev): (Option<String>, Option<String>) = redis::cmd("HMGET")
                .arg(&key)
                .arg(FIELD_DATA)
                .arg(FIELD_REV)
                .query_async(&mut conn)
                .await?;

            let (Some(data), Some(rev)) = (data, rev) else {
                return Err(LedgerError::JobNotFound(id.clone()));
            };

            let mut job: Job = serde_json::from_str(&data)?;
            mutation(&mut job)?;
            let encoded = serde_json::to_string(&job)?;

            let applied: i64 = COMPARE_AND_SWAP
                .key(&key)
                .arg(&rev)
                .arg(encoded)
                .invoke_async(&mut conn)
                .await?;

            match applied {
                1 => return Ok(job),
                -1 => return Err(LedgerError::JobNotFound(id.clone())),
                _ => debug!(job_id = %id, attempt, "Concurrent job update, retrying"),
            }
        }

        warn!(job_id = %id, "Job update kept losing to concurrent writers");
        Err(LedgerError::Conflict(id.clone()))
    }

    async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn.smembers(self.keys.jobs_index()).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        for id in &ids {
            pipe.hget(self.keys.job(&JobId::from(id.as_str())), FIELD_DATA);
        }
        let records: Vec<Option<String>> = pipe.query_async(&mut conn).await?;

        let mut jobs = Vec::with_capacity(records.len());
        for data in records.into_iter().flatten() {
            let job: Job = serde_json::from_str(&data)?;
            if filter.matches(&job) {
                jobs.push(job);
            }
        }
        Ok(sort_and_limit(jobs, filter))
    }

    async fn delete(&self, id: &JobId) -> Result<bool> {
        let mut conn = self.conn.clone();
        let (removed, _): (i64, i64) = redis::pipe()
            .atomic()
            .del(self.keys.job(id))
            .srem(self.keys.jobs_index(), id.as_str())
            .query_async(&mut conn)
            .await?;
        Ok(removed > 0)
    }

    async fn health_check(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("PING").query_async::<_, String>(&mut conn).await?;
        Ok(())
    }
}

#[async_trait]
impl DedupIndex for RedisLedger {
    async fn lookup(&self, fingerprint: &Fingerprint) -> Result<Option<JobId>> {
        let mut conn = self.conn.clone();
        let owner: Option<String> = conn.get(self.keys.dedup(fingerprint)).await?;
        Ok(owner.map(JobId::from))
    }

    async fn register(&self, fingerprint: &Fingerprint, candidate: &JobId) -> Result<JobId> {
        let mut conn = self.conn.clone();
        let owner: String = REGISTER
            .key(self.keys.dedup(fingerprint))
            .arg(candidate.as_str())
            .invoke_async(&mut conn)
            .await?;
        Ok(JobId::from(owner))
    }

    async fn release(&self, fingerprint: &Fingerprint, owner: &JobId) -> Result<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = RELEASE
            .key(self.keys.dedup(fingerprint))
            .arg(owner.as_str())
            .invoke_async(&mut conn)
            .await?;
        Ok(removed > 0)
    }
}
