/// Retention: evict terminal jobs once they outlive the configured TTL
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::error::Result;
use super::{DedupIndex, JobStore};
use crate::job::{Job, JobFilter};
use crate::storage::DownloadRoot;

/// Pruning statistics
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct PruneStats {
    pub jobs_pruned: usize,
    pub fingerprints_released: usize,
    pub directories_removed: usize,
}

/// Whether `job` is terminal and finished before `cutoff`
pub fn is_expired(job: &Job, cutoff: DateTime<Utc>) -> bool {
    job.is_terminal() && job.finished_at.unwrap_or(job.created_at) <= cutoff
}

/// Remove terminal jobs older than `job_ttl`, releasing their fingerprints.
///
/// Non-terminal jobs are never touched. When `storage` is given, the job's
/// download directory is removed as well.
pub async fn prune_expired(
    store: &dyn JobStore,
    dedup: &dyn DedupIndex,
    storage: Option<&DownloadRoot>,
    job_ttl: Duration,
    now: DateTime<Utc>,
) -> Result<PruneStats> {
    let mut stats = PruneStats::default();

    let Some(cutoff) = chrono::Duration::from_std(job_ttl)
        .ok()
        .and_then(|ttl| now.checked_sub_signed(ttl))
    else {
        debug!(?job_ttl, "Retention window exceeds representable time, nothing to prune");
        return Ok(stats);
    };

    for job in store.list(&JobFilter::default()).await? {
        if !is_expired(&job, cutoff) {
            continue;
        }

        if dedup.release(&job.fingerprint, &job.id).await? {
            stats.fingerprints_released += 1;
        }

        if let Some(storage) = storage {
            match storage.discard(&job.id).await {
                Ok(true) => stats.directories_removed += 1,
                Ok(false) => {}
                Err(e) => warn!(job_id = %job.id, error = %e, "Failed to remove job directory"),
            }
        }

        if store.delete(&job.id).await? {
            stats.jobs_pruned += 1;
            debug!(job_id = %job.id, state = %job.state, "Pruned job");
        }
    }

    if stats.jobs_pruned > 0 {
        info!(
            jobs = stats.jobs_pruned,
            fingerprints = stats.fingerprints_released,
            directories = stats.directories_removed,
            "Pruning complete"
        );
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{Fingerprint, JobOutput, JobState};
    use crate::ledger::{MemoryDedupIndex, MemoryJobStore};
    use std::path::PathBuf;
    use tempfile::TempDir;

    async fn seeded_job(
        store: &MemoryJobStore,
        dedup: &MemoryDedupIndex,
        url: &str,
        finished: Option<DateTime<Utc>>,
    ) -> Job {
        let fp = Fingerprint::new(url, None).unwrap();
        let created = finished.unwrap_or_else(Utc::now);
        let job = Job::new(fp, created);
        store.create(&job).await.unwrap();
        dedup.register(&job.fingerprint, &job.id).await.unwrap();

        if let Some(at) = finished {
            store
                .update(&job.id, &|j| {
                    j.start(at)?;
                    j.complete(
                        JobOutput {
                            path: PathBuf::from("video.mp4"),
                            metadata: serde_json::Value::Null,
                        },
                        at,
                    )
                })
                .await
                .unwrap();
        }
        store.get(&job.id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_prunes_only_expired_terminal_jobs() {
        let store = MemoryJobStore::new();
        let dedup = MemoryDedupIndex::new();
        let now = Utc::now();

        let eight_days_ago = Some(now - chrono::Duration::days(8));
        let hour_ago = Some(now - chrono::Duration::hours(1));
        let old = seeded_job(&store, &dedup, "https://example.com/old", eight_days_ago).await;
        let recent = seeded_job(&store, &dedup, "https://example.com/recent", hour_ago).await;
        let pending = seeded_job(&store, &dedup, "https://example.com/pending", None).await;

        let stats = prune_expired(&store, &dedup, None, Duration::from_secs(7 * 86_400), now)
            .await
            .unwrap();

        assert_eq!(stats.jobs_pruned, 1);
        assert_eq!(stats.fingerprints_released, 1);
        assert_eq!(store.get(&old.id).await.unwrap(), None);
        assert_eq!(dedup.lookup(&old.fingerprint).await.unwrap(), None);

        assert_eq!(store.get(&recent.id).await.unwrap().unwrap().state, JobState::Done);
        assert_eq!(dedup.lookup(&recent.fingerprint).await.unwrap(), Some(recent.id));
        assert_eq!(store.get(&pending.id).await.unwrap().unwrap().state, JobState::Pending);
    }

    #[tokio::test]
    async fn test_removes_directories_when_requested() {
        let temp = TempDir::new().unwrap();
        let storage = DownloadRoot::new(temp.path());
        let store = MemoryJobStore::new();
        let dedup = MemoryDedupIndex::new();
        let now = Utc::now();

        let two_days_ago = Some(now - chrono::Duration::days(2));
        let old = seeded_job(&store, &dedup, "https://example.com/old", two_days_ago).await;
        let dir = storage.prepare(&old.id).await.unwrap();

        let stats = prune_expired(&store, &dedup, Some(&storage), Duration::from_secs(86_400), now)
            .await
            .unwrap();

        assert_eq!(stats.directories_removed, 1);
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn test_huge_ttl_prunes_nothing() {
        let store = MemoryJobStore::new();
        let dedup = MemoryDedupIndex::new();
        let now = Utc::now();
        let long_ago = Some(now - chrono::Duration::days(400));
        seeded_job(&store, &dedup, "https://example.com/old", long_ago).await;

        let stats = prune_expired(&store, &dedup, None, Duration::MAX, now).await.unwrap();
        assert_eq!(stats, PruneStats::default());
    }
}
