//! API models for the download endpoints.
//!
//! - `POST /download` accepts a [`DownloadRequest`] and answers with a
//!   [`JobAcceptedResponse`]
//! - Status and listing endpoints return [`JobView`]
//!
//! ```json
//! { "url": "https://www.youtube.com/watch?v=dQw4w9WgXcQ", "format": "bestaudio" }
//! { "url": "https://www.youtube.com/watch?v=dQw4w9WgXcQ", "preset": "audio" }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::job::{Job, JobId, JobState};
use crate::observability::MetricsSnapshot;
use crate::orchestrator::{CancelOutcome, Submission};

#[derive(Debug, Deserialize, Clone)]
pub struct DownloadRequest {
    pub url: String,
    /// yt-dlp format selector; wins over the preset's
    #[serde(default)]
    pub format: Option<String>,
    /// Configured preset supplying the format; `default` when omitted
    #[serde(default)]
    pub preset: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct JobAcceptedResponse {
    pub job_id: JobId,
    pub state: JobState,
    pub deduplicated: bool,
}

impl From<Submission> for JobAcceptedResponse {
    fn from(submission: Submission) -> Self {
        Self {
            job_id: submission.job_id,
            state: submission.state,
            deduplicated: submission.deduplicated,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct JobOutputView {
    pub path: PathBuf,
    pub metadata: serde_json::Value,
}

/// External representation of a job
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct JobView {
    pub job_id: JobId,
    pub url: String,
    pub format: String,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub attempts: u32,
    pub cancel_requested: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<JobOutputView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<Job> for JobView {
    fn from(job: Job) -> Self {
        Self {
            job_id: job.id,
            url: job.fingerprint.url,
            format: job.fingerprint.format,
            state: job.state,
            created_at: job.created_at,
            started_at: job.started_at,
            finished_at: job.finished_at,
            attempts: job.attempts,
            cancel_requested: job.cancel_requested,
            output: job.output.map(|output| JobOutputView {
                path: output.path,
                metadata: output.metadata,
            }),
            error: job.error,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct JobListQuery {
    pub state: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JobListResponse {
    pub count: usize,
    pub jobs: Vec<JobView>,
}

impl From<Vec<Job>> for JobListResponse {
    fn from(jobs: Vec<Job>) -> Self {
        Self {
            count: jobs.len(),
            jobs: jobs.into_iter().map(JobView::from).collect(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CancelResponse {
    pub job_id: JobId,
    pub outcome: CancelOutcome,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub components: HashMap<String, String>,
    pub version: String,
    pub backend: String,
    pub workers: usize,
    pub accepting: bool,
    pub metrics: MetricsSnapshot,
}
