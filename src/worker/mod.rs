//! Download workers
//!
//! A fixed pool of tokio tasks pulls job ids from the queue, claims each job
//! through the Job Store, invokes the [`Downloader`] and records the outcome.
//! Failures are retried with backoff up to the configured limit.

pub mod fetcher;
pub mod http;
pub mod pool;
pub mod runner;
pub mod ytdlp;

pub use fetcher::{Downloader, FetchError, FetchOutput, FetchRequest};
pub use http::{HttpConfig, HttpDownloader};
pub use pool::{PoolState, ShutdownPolicy, WorkerPool};
pub use runner::{RunError, RunOutcome, WorkerContext, run_job};
pub use ytdlp::CommandDownloader;

use std::sync::Arc;

use crate::config::{DownloaderConfig, DownloaderKind};

/// Downloader selected by `[downloader] kind`
pub fn build_downloader(config: &DownloaderConfig) -> Result<Arc<dyn Downloader>, FetchError> {
    let timeout = config.timeout.as_duration();
    let downloader: Arc<dyn Downloader> = match config.kind {
        DownloaderKind::Ytdlp => Arc::new(CommandDownloader::new(
            config.program.clone(),
            config.extra_args.clone(),
            timeout,
        )),
        DownloaderKind::Http => Arc::new(HttpDownloader::new(HttpConfig {
            request_timeout: timeout,
            ..HttpConfig::default()
        })?),
    };
    Ok(downloader)
}
