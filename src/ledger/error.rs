use thiserror::Error;

use crate::job::{JobId, TransitionError};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Redis error: {0}")]
    Backend(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Job already exists: {0}")]
    AlreadyExists(JobId),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("Gave up updating job {0} after repeated concurrent modifications")]
    Conflict(JobId),
}

pub type Result<T> = std::result::Result<T, LedgerError>;
