//! Redis-backed coordination tests.
//!
//! Require a running server:
//!
//! ```text
//! REDIS_URL=redis://127.0.0.1:6379 cargo test --test redis_test -- --ignored
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tempfile::TempDir;
use tokio::time::Instant;

use mediabox::backend::{Backend, BackendKind};
use mediabox::job::{Fingerprint, Job, JobFilter, JobId, JobState, RetryPolicy};
use mediabox::ledger::LedgerError;
use mediabox::observability::Metrics;
use mediabox::orchestrator::{Orchestrator, Settings};
use mediabox::queue::Orphan;
use mediabox::storage::DownloadRoot;
use mediabox::worker::{Downloader, FetchError, FetchOutput, FetchRequest, ShutdownPolicy};

const LEASE_TTL: Duration = Duration::from_secs(1);

fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

/// Fresh key prefix so runs never see each other's data
fn fresh_prefix() -> String {
    format!("mediabox-test-{}", uuid::Uuid::new_v4())
}

async fn connect_to(prefix: &str) -> Backend {
    Backend::redis(&redis_url(), prefix, LEASE_TTL)
        .await
        .expect("Redis must be reachable for ignored tests")
}

async fn connect() -> Backend {
    connect_to(&fresh_prefix()).await
}

fn job(n: usize) -> Job {
    let fingerprint = Fingerprint::new(&url(n), None).unwrap();
    Job::new(fingerprint, Utc::now())
}

fn url(n: usize) -> String {
    format!("https://media.example.com/watch?v={n}")
}

struct InstantDownloader;

#[async_trait]
impl Downloader for InstantDownloader {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchOutput, FetchError> {
        let path = request.target_dir.join("media.bin");
        tokio::fs::write(&path, b"payload").await?;
        Ok(FetchOutput {
            path,
            metadata: serde_json::Value::Null,
        })
    }

    fn name(&self) -> &'static str {
        "instant"
    }
}

struct StalledDownloader;

#[async_trait]
impl Downloader for StalledDownloader {
    async fn fetch(&self, _request: FetchRequest) -> Result<FetchOutput, FetchError> {
        std::future::pending().await
    }

    fn name(&self) -> &'static str {
        "stalled"
    }
}

fn settings() -> Settings {
    Settings {
        nb_workers: 1,
        retry: RetryPolicy::none(),
        shutdown: ShutdownPolicy::Drain,
        job_ttl: Duration::from_secs(3600),
        prune_interval: Duration::ZERO,
        delete_files: false,
    }
}

async fn start(backend: Backend, downloader: Arc<dyn Downloader>, root: &TempDir) -> Orchestrator {
    Orchestrator::start(
        settings(),
        backend,
        downloader,
        DownloadRoot::new(root.path()),
        Arc::new(Metrics::new()),
    )
    .await
    .unwrap()
}

async fn wait_for(orchestrator: &Orchestrator, id: &JobId, state: JobState) -> Job {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let job = orchestrator.status(id).await.unwrap();
        if job.state == state {
            return job;
        }
        assert!(Instant::now() < deadline, "job {id} stuck in {}", job.state);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
#[ignore]
async fn test_store_round_trip_and_transitions() {
    let backend = connect().await;
    assert_eq!(backend.kind(), BackendKind::Redis);
    backend.health_check().await.unwrap();

    let job = job(1);
    backend.store.create(&job).await.unwrap();
    assert!(matches!(
        backend.store.create(&job).await,
        Err(LedgerError::AlreadyExists(_))
    ));

    let now = Utc::now();
    let running = backend.store.update(&job.id, &|j| j.start(now)).await.unwrap();
    assert_eq!(running.state, JobState::Running);

    // Second claim loses
    let err = backend.store.update(&job.id, &|j| j.start(now)).await.unwrap_err();
    assert!(matches!(err, LedgerError::Transition(_)));

    let running = backend
        .store
        .list(&JobFilter::with_state(JobState::Running))
        .await
        .unwrap();
    assert_eq!(running.len(), 1);

    assert!(backend.store.delete(&job.id).await.unwrap());
    assert!(backend.store.get(&job.id).await.unwrap().is_none());
    assert!(matches!(
        backend.store.update(&job.id, &|j| j.start(now)).await,
        Err(LedgerError::JobNotFound(_))
    ));
}

#[tokio::test]
#[ignore]
async fn test_concurrent_claims_have_one_winner() {
    let backend = connect().await;
    let job = job(2);
    backend.store.create(&job).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = backend.store.clone();
        let id = job.id.clone();
        handles.push(tokio::spawn(async move {
            let now = Utc::now();
            store.update(&id, &|j| j.start(now)).await.is_ok()
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
#[ignore]
async fn test_dedup_register_and_release() {
    let backend = connect().await;
    let fingerprint = Fingerprint::new("https://media.example.com/watch?v=3", None).unwrap();
    let first = JobId::from("first");
    let second = JobId::from("second");

    assert_eq!(backend.dedup.register(&fingerprint, &first).await.unwrap(), first);
    assert_eq!(backend.dedup.register(&fingerprint, &second).await.unwrap(), first);
    assert_eq!(backend.dedup.lookup(&fingerprint).await.unwrap(), Some(first.clone()));

    // Only the owner may release
    assert!(!backend.dedup.release(&fingerprint, &second).await.unwrap());
    assert!(backend.dedup.release(&fingerprint, &first).await.unwrap());
    assert_eq!(backend.dedup.lookup(&fingerprint).await.unwrap(), None);
}

#[tokio::test]
#[ignore]
async fn test_queue_order_and_delays() {
    let backend = connect().await;
    let queue = backend.queue.clone();
    let (a, b, c) = (JobId::from("a"), JobId::from("b"), JobId::from("c"));

    queue.push(&a).await.unwrap();
    queue.push(&b).await.unwrap();
    queue.push_front(&c).await.unwrap();
    assert_eq!(queue.len().await.unwrap(), 3);

    assert_eq!(queue.pop().await.unwrap(), Some(c.clone()));
    assert_eq!(queue.pop().await.unwrap(), Some(a.clone()));
    assert!(queue.remove(&b).await.unwrap());
    assert!(queue.is_empty().await.unwrap());

    queue.push_delayed(&a, Duration::from_millis(200)).await.unwrap();
    assert!(queue.contains(&a).await.unwrap());
    let popped = tokio::time::timeout(Duration::from_secs(5), queue.pop())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(popped, Some(a));
}

#[tokio::test]
#[ignore]
async fn test_closed_queue_drains_then_ends() {
    let backend = connect().await;
    let queue = Arc::clone(&backend.queue);
    let id = JobId::from("last");

    queue.push(&id).await.unwrap();
    queue.close().await;

    assert!(queue.push(&JobId::from("late")).await.is_err());
    assert_eq!(queue.pop().await.unwrap(), Some(id));
    assert_eq!(queue.pop().await.unwrap(), None);
}

#[tokio::test]
#[ignore]
async fn test_unacknowledged_ids_of_retired_consumer_are_orphaned() {
    let prefix = fresh_prefix();
    let first = connect_to(&prefix).await;
    let (kept, acked) = (JobId::from("kept"), JobId::from("acked"));

    first.queue.push(&kept).await.unwrap();
    first.queue.push(&acked).await.unwrap();
    assert_eq!(first.queue.pop().await.unwrap(), Some(kept.clone()));
    assert_eq!(first.queue.pop().await.unwrap(), Some(acked.clone()));
    first.queue.ack(&acked).await.unwrap();

    let second = connect_to(&prefix).await;
    // Lease still held
    assert!(second.queue.orphaned().await.unwrap().is_empty());

    first.queue.retire().await;
    let orphans = second.queue.orphaned().await.unwrap();
    assert_eq!(orphans.len(), 1);
    let Orphan { id, .. } = &orphans[0];
    assert_eq!(id, &kept);

    assert!(second.queue.settle(&orphans[0], true).await.unwrap());
    assert!(!second.queue.settle(&orphans[0], true).await.unwrap());
    assert_eq!(second.queue.pop().await.unwrap(), Some(kept.clone()));
    second.queue.ack(&kept).await.unwrap();

    // Nothing left behind, and the retired consumer is forgotten
    assert!(second.queue.orphaned().await.unwrap().is_empty());
}

#[tokio::test]
#[ignore]
async fn test_job_status_survives_restart() {
    let prefix = fresh_prefix();
    let root = TempDir::new().unwrap();

    let first = start(connect_to(&prefix).await, Arc::new(InstantDownloader), &root).await;
    let submission = first.submit(&url(1), None).await.unwrap();
    wait_for(&first, &submission.job_id, JobState::Done).await;
    first.shutdown().await;
    drop(first);

    let second = start(connect_to(&prefix).await, Arc::new(InstantDownloader), &root).await;
    let job = second.status(&submission.job_id).await.unwrap();
    assert_eq!(job.state, JobState::Done);
    assert!(job.output.is_some());

    let again = second.submit(&url(1), None).await.unwrap();
    assert_eq!(again.job_id, submission.job_id);
    assert!(again.deduplicated);
    second.shutdown().await;
}

#[tokio::test]
#[ignore]
async fn test_job_of_crashed_instance_is_recovered() {
    let prefix = fresh_prefix();
    let root = TempDir::new().unwrap();

    // Runs in its own runtime; dropping the runtime kills the instance
    // mid-download without any shutdown
    let crashed = {
        let prefix = prefix.clone();
        let path = root.path().to_path_buf();
        std::thread::spawn(move || {
            let runtime = tokio::runtime::Runtime::new().unwrap();
            runtime.block_on(async move {
                let orchestrator = Orchestrator::start(
                    settings(),
                    connect_to(&prefix).await,
                    Arc::new(StalledDownloader),
                    DownloadRoot::new(path),
                    Arc::new(Metrics::new()),
                )
                .await
                .unwrap();
                let submission = orchestrator.submit(&url(7), None).await.unwrap();
                wait_for(&orchestrator, &submission.job_id, JobState::Running).await;
                submission.job_id
            })
        })
        .join()
        .unwrap()
    };

    tokio::time::sleep(LEASE_TTL + Duration::from_millis(500)).await;

    let survivor = start(connect_to(&prefix).await, Arc::new(InstantDownloader), &root).await;
    let job = wait_for(&survivor, &crashed, JobState::Done).await;
    assert_eq!(job.attempts, 0);
    assert!(survivor.backend().queue.orphaned().await.unwrap().is_empty());
    survivor.shutdown().await;
}
