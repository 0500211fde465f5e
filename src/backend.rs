//! Coordination backend: the store, index and queue used together
//!
//! Either all three live in process memory or all three live in Redis;
//! they are never mixed.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use redis::aio::ConnectionManager;
use thiserror::Error;
use tracing::info;

use crate::config::RedisConfig;
use crate::ledger::{
    DedupIndex, JobStore, KeySpace, LedgerError, MemoryDedupIndex, MemoryJobStore, RedisLedger,
};
use crate::queue::{JobQueue, MemoryQueue, QueueError, RedisQueue};

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Redis connection failed: {0}")]
    ConnectionFailed(#[from] redis::RedisError),

    #[error("Queue consumer registration failed: {0}")]
    Registration(#[from] QueueError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    InMemory,
    Redis,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::InMemory => f.write_str("in-memory"),
            BackendKind::Redis => f.write_str("redis"),
        }
    }
}

#[derive(Clone)]
pub struct Backend {
    pub store: Arc<dyn JobStore>,
    pub dedup: Arc<dyn DedupIndex>,
    pub queue: Arc<dyn JobQueue>,
    kind: BackendKind,
}

impl Backend {
    /// Process-local backend; state is lost on exit
    pub fn in_memory() -> Self {
        Self {
            store: Arc::new(MemoryJobStore::new()),
            dedup: Arc::new(MemoryDedupIndex::new()),
            queue: Arc::new(MemoryQueue::new()),
            kind: BackendKind::InMemory,
        }
    }

    /// Connect to Redis, verify the server answers and register this
    /// process as a queue consumer holding a `lease_ttl` lease
    pub async fn redis(
        redis_url: &str,
        key_prefix: &str,
        lease_ttl: Duration,
    ) -> Result<Self, BackendError> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client.clone()).await?;
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn.clone())
            .await?;

        let keys = KeySpace::new(key_prefix);
        let ledger = Arc::new(RedisLedger::from_connection(conn.clone(), keys.clone()));
        let queue = RedisQueue::register(client, conn, keys, lease_ttl).await?;

        info!(prefix = key_prefix, consumer = queue.consumer(), "Connected to Redis backend");

        Ok(Self {
            store: ledger.clone(),
            dedup: ledger,
            queue: Arc::new(queue),
            kind: BackendKind::Redis,
        })
    }

    pub async fn from_config(config: &RedisConfig) -> Result<Self, BackendError> {
        if config.enabled {
            Self::redis(&config.url, &config.key_prefix, config.lease_ttl.as_duration()).await
        } else {
            info!("Redis disabled, using in-memory backend");
            Ok(Self::in_memory())
        }
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    pub async fn health_check(&self) -> Result<(), LedgerError> {
        self.store.health_check().await
    }
}
