//! Tracing setup and in-process counters

use serde::Serialize;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use tracing_subscriber::EnvFilter;

/// Install the global fmt subscriber.
///
/// `RUST_LOG` wins when set; otherwise `default_level` (e.g. "info",
/// "mediabox=debug") is used. Safe to call more than once.
pub fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Metrics handle for recording counters/gauges
#[derive(Debug, Default)]
pub struct Metrics {
    jobs_submitted: AtomicU64,
    jobs_deduplicated: AtomicU64,
    jobs_canceled: AtomicU64,
    downloads_succeeded: AtomicU64,
    downloads_failed: AtomicU64,
    retries_scheduled: AtomicU64,
    jobs_pruned: AtomicU64,
    downloads_running: AtomicI64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn job_submitted(&self) {
        self.jobs_submitted.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "jobs_submitted", "Metric incremented");
    }

    pub fn job_deduplicated(&self) {
        self.jobs_deduplicated.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "jobs_deduplicated", "Metric incremented");
    }

    pub fn job_canceled(&self) {
        self.jobs_canceled.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "jobs_canceled", "Metric incremented");
    }

    pub fn download_started(&self) {
        self.downloads_running.fetch_add(1, Ordering::Relaxed);
    }

    pub fn download_finished(&self) {
        self.downloads_running.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn download_succeeded(&self) {
        self.downloads_succeeded.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "downloads_succeeded", "Metric incremented");
    }

    pub fn download_failed(&self) {
        self.downloads_failed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "downloads_failed", "Metric incremented");
    }

    pub fn retry_scheduled(&self) {
        self.retries_scheduled.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "retries_scheduled", "Metric incremented");
    }

    pub fn jobs_pruned(&self, count: usize) {
        self.jobs_pruned.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_submitted: self.jobs_submitted.load(Ordering::Relaxed),
            jobs_deduplicated: self.jobs_deduplicated.load(Ordering::Relaxed),
            jobs_canceled: self.jobs_canceled.load(Ordering::Relaxed),
            downloads_succeeded: self.downloads_succeeded.load(Ordering::Relaxed),
            downloads_failed: self.downloads_failed.load(Ordering::Relaxed),
            retries_scheduled: self.retries_scheduled.load(Ordering::Relaxed),
            jobs_pruned: self.jobs_pruned.load(Ordering::Relaxed),
            downloads_running: self.downloads_running.load(Ordering::Relaxed).max(0) as u64,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub jobs_submitted: u64,
    pub jobs_deduplicated: u64,
    pub jobs_canceled: u64,
    pub downloads_succeeded: u64,
    pub downloads_failed: u64,
    pub retries_scheduled: u64,
    pub jobs_pruned: u64,
    pub downloads_running: u64,
}
