//! Download capability invoked by workers

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::job::JobId;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Download timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Too many redirects")]
    TooManyRedirects,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Downloader exited with {status}: {stderr}")]
    ProcessFailed { status: String, stderr: String },

    #[error("Downloader reported no output file")]
    NoOutput,

    #[error("Storage error: {0}")]
    Storage(String),
}

/// What a worker asks the downloader to fetch
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub job_id: JobId,
    pub url: String,
    pub format: String,
    /// Directory reserved for this job; everything written goes here
    pub target_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct FetchOutput {
    pub path: PathBuf,
    pub metadata: serde_json::Value,
}

/// The opaque download capability.
///
/// Implementations must tolerate being dropped mid-flight: a worker told to
/// stop abandons the future and discards the job directory.
#[async_trait]
pub trait Downloader: Send + Sync {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchOutput, FetchError>;

    fn name(&self) -> &'static str;
}
