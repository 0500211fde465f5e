use std::sync::LazyLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::{AsyncCommands, Script};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{JobQueue, Orphan, QueueError, Result};
use crate::job::JobId;
use crate::ledger::KeySpace;

/// How long a blocking pop waits before re-checking for due delayed ids
const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// Upper bound on delayed ids moved per promotion
const PROMOTE_BATCH: usize = 100;

/// Renewals per lease period
const LEASE_RENEWALS: u32 = 3;

/// KEYS[1] = delayed zset, KEYS[2] = queue; ARGV[1] = now (ms), ARGV[2] = batch
static PROMOTE_DUE: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
        local due = redis.call(
            'ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, tonumber(ARGV[2]))
        for _, id in ipairs(due) do
            redis.call('ZREM', KEYS[1], id)
            redis.call('LPUSH', KEYS[2], id)
        end
        return #due
        ",
    )
});

/// KEYS[1] = processing list, KEYS[2] = queue, KEYS[3] = consumers set;
/// ARGV[1] = job id, ARGV[2] = "1" to requeue, ARGV[3] = consumer id
static SETTLE_ORPHAN: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
        local removed = redis.call('LREM', KEYS[1], 1, ARGV[1])
        if removed == 1 and ARGV[2] == '1' then
            redis.call('RPUSH', KEYS[2], ARGV[1])
        end
        if redis.call('LLEN', KEYS[1]) == 0 then
            redis.call('SREM', KEYS[3], ARGV[3])
        end
        return removed
        ",
    )
});

/// Redis list queue shared by every process using the same key prefix.
///
/// - push: LPUSH onto `{prefix}:queue`
/// - pop: BRPOPLPUSH from the other end onto this consumer's processing list
/// - ack: LREM from the processing list
/// - push_front: RPUSH, so the id is next out
/// - push_delayed: ZADD into `{prefix}:delayed` scored by due time; due ids
///   are promoted into the list before each pop
///
/// Each instance registers as a consumer holding a lease key that a
/// background task keeps renewing. Once the lease lapses, whatever is
/// left on the consumer's processing list shows up in `orphaned`.
///
/// Blocking pops run on dedicated connections so they never stall the
/// shared connection manager.
pub struct RedisQueue {
    client: redis::Client,
    conn: ConnectionManager,
    blocking: Mutex<Vec<MultiplexedConnection>>,
    keys: KeySpace,
    consumer: String,
    heartbeat: JoinHandle<()>,
    poll_timeout: Duration,
    closed: AtomicBool,
}

impl RedisQueue {
    /// Register a new consumer and start renewing its lease
    pub async fn register(
        client: redis::Client,
        conn: ConnectionManager,
        keys: KeySpace,
        lease_ttl: Duration,
    ) -> Result<Self> {
        let consumer = Uuid::now_v7().simple().to_string();
        renew_lease(&mut conn.clone(), &keys, &consumer, lease_ttl).await?;

        let heartbeat = tokio::spawn(heartbeat(
            conn.clone(),
            keys.clone(),
            consumer.clone(),
            lease_ttl,
        ));
        info!(%consumer, ?lease_ttl, "Registered queue consumer");

        Ok(Self {
            client,
            conn,
            blocking: Mutex::new(Vec::new()),
            keys,
            consumer,
            heartbeat,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            closed: AtomicBool::new(false),
        })
    }

    pub fn consumer(&self) -> &str {
        &self.consumer
    }

    fn processing(&self) -> String {
        self.keys.processing(&self.consumer)
    }

    async fn promote_due(&self) -> Result<usize> {
        let mut conn = self.conn.clone();
        let moved: usize = PROMOTE_DUE
            .key(self.keys.delayed())
            .key(self.keys.queue())
            .arg(Utc::now().timestamp_millis())
            .arg(PROMOTE_BATCH)
            .invoke_async(&mut conn)
            .await?;
        if moved > 0 {
            debug!(moved, "Promoted delayed jobs");
        }
        Ok(moved)
    }

    async fn blocking_connection(&self) -> Result<MultiplexedConnection> {
        if let Some(conn) = self.blocking.lock().await.pop() {
            return Ok(conn);
        }
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    async fn blocking_pop(&self) -> Result<Option<JobId>> {
        let mut conn = self.blocking_connection().await?;
        let timeout = self.poll_timeout.as_secs().max(1) as usize;

        // A connection that errored is dropped rather than returned to the pool
        let popped: Option<String> = redis::cmd("BRPOPLPUSH")
            .arg(self.keys.queue())
            .arg(self.processing())
            .arg(timeout)
            .query_async(&mut conn)
            .await?;

        self.blocking.lock().await.push(conn);
        Ok(popped.map(JobId::from))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(QueueError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl JobQueue for RedisQueue {
    async fn push(&self, id: &JobId) -> Result<()> {
        self.ensure_open()?;
        let mut conn = self.conn.clone();
        conn.lpush::<_, _, ()>(self.keys.queue(), id.as_str()).await?;
        Ok(())
    }

    async fn push_front(&self, id: &JobId) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.rpush::<_, _, ()>(self.keys.queue(), id.as_str()).await?;
        Ok(())
    }

    async fn push_delayed(&self, id: &JobId, delay: Duration) -> Result<()> {
        // Accepted after close; the delayed set outlives this process
        if delay.is_zero() {
            let mut conn = self.conn.clone();
            conn.lpush::<_, _, ()>(self.keys.queue(), id.as_str()).await?;
            return Ok(());
        }

        let due = Utc::now().timestamp_millis() + delay.as_millis() as i64;
        let mut conn = self.conn.clone();
        conn.zadd::<_, _, _, ()>(self.keys.delayed(), id.as_str(), due).await?;
        Ok(())
    }

    async fn pop(&self) -> Result<Option<JobId>> {
        loop {
            self.promote_due().await?;

            if self.closed.load(Ordering::Acquire) {
                // Drain what is already queued without blocking
                let mut conn = self.conn.clone();
                let id: Option<String> =
                    conn.rpoplpush(self.keys.queue(), self.processing()).await?;
                return Ok(id.map(JobId::from));
            }

            if let Some(id) = self.blocking_pop().await? {
                return Ok(Some(id));
            }
        }
    }

    async fn remove(&self, id: &JobId) -> Result<bool> {
        let mut conn = self.conn.clone();
        let (listed, delayed): (i64, i64) = redis::pipe()
            .atomic()
            .lrem(self.keys.queue(), 0, id.as_str())
            .zrem(self.keys.delayed(), id.as_str())
            .query_async(&mut conn)
            .await?;
        Ok(listed + delayed > 0)
    }

    async fn contains(&self, id: &JobId) -> Result<bool> {
        let mut conn = self.conn.clone();
        let position: Option<i64> = redis::cmd("LPOS")
            .arg(self.keys.queue())
            .arg(id.as_str())
            .query_async(&mut conn)
            .await?;
        if position.is_some() {
            return Ok(true);
        }
        let score: Option<f64> = conn.zscore(self.keys.delayed(), id.as_str()).await?;
        Ok(score.is_some())
    }

    async fn len(&self) -> Result<usize> {
        let mut conn = self.conn.clone();
        let (listed, delayed): (usize, usize) = redis::pipe()
            .llen(self.keys.queue())
            .zcard(self.keys.delayed())
            .query_async(&mut conn)
            .await?;
        Ok(listed + delayed)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    async fn ack(&self, id: &JobId) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.lrem::<_, _, ()>(self.processing(), 1, id.as_str()).await?;
        Ok(())
    }

    async fn orphaned(&self) -> Result<Vec<Orphan>> {
        let mut conn = self.conn.clone();
        let consumers: Vec<String> = conn.smembers(self.keys.consumers()).await?;

        let mut orphans = Vec::new();
        for consumer in consumers {
            if consumer == self.consumer {
                continue;
            }
            let alive: bool = conn.exists(self.keys.lease(&consumer)).await?;
            if alive {
                continue;
            }

            let ids: Vec<String> = conn.lrange(self.keys.processing(&consumer), 0, -1).await?;
            if ids.is_empty() {
                conn.srem::<_, _, ()>(self.keys.consumers(), &consumer).await?;
                debug!(%consumer, "Forgot expired consumer");
                continue;
            }
            orphans.extend(ids.into_iter().map(|id| Orphan {
                id: JobId::from(id),
                consumer: consumer.clone(),
            }));
        }
        Ok(orphans)
    }

    async fn settle(&self, orphan: &Orphan, requeue: bool) -> Result<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = SETTLE_ORPHAN
            .key(self.keys.processing(&orphan.consumer))
            .key(self.keys.queue())
            .key(self.keys.consumers())
            .arg(orphan.id.as_str())
            .arg(if requeue { "1" } else { "0" })
            .arg(&orphan.consumer)
            .invoke_async(&mut conn)
            .await?;
        Ok(removed == 1)
    }

    async fn retire(&self) {
        self.heartbeat.abort();
        let mut conn = self.conn.clone();
        if let Err(e) = conn.del::<_, ()>(self.keys.lease(&self.consumer)).await {
            warn!(consumer = %self.consumer, error = %e, "Failed to drop queue lease");
            return;
        }
        info!(consumer = %self.consumer, "Queue consumer retired");
    }
}

impl Drop for RedisQueue {
    fn drop(&mut self) {
        self.heartbeat.abort();
    }
}

/// Set the lease key with a fresh expiry and make sure the consumer is listed
async fn renew_lease(
    conn: &mut ConnectionManager,
    keys: &KeySpace,
    consumer: &str,
    ttl: Duration,
) -> Result<()> {
    let ttl_ms = ttl.as_millis().max(1) as u64;
    redis::pipe()
        .atomic()
        .cmd("SET")
        .arg(keys.lease(consumer))
        .arg(Utc::now().timestamp_millis())
        .arg("PX")
        .arg(ttl_ms)
        .ignore()
        .sadd(keys.consumers(), consumer)
        .ignore()
        .query_async::<_, ()>(conn)
        .await?;
    Ok(())
}

async fn heartbeat(mut conn: ConnectionManager, keys: KeySpace, consumer: String, ttl: Duration) {
    let period = (ttl / LEASE_RENEWALS).max(Duration::from_millis(100));
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        if let Err(e) = renew_lease(&mut conn, &keys, &consumer, ttl).await {
            warn!(%consumer, error = %e, "Failed to renew queue lease");
        }
    }
}
