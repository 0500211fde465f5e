use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use std::collections::HashMap;

use super::{
    models::{
        CancelResponse, DownloadRequest, HealthResponse, JobAcceptedResponse, JobListQuery,
        JobListResponse, JobView,
    },
    state::AppState,
    validation::job_filter,
};
use crate::api::error::ApiError;
use crate::config::{Config, presets::DEFAULT_PRESET};
use crate::job::JobId;

/// Download submission endpoint (POST /download)
///
/// The body is checked by the [`DownloadRequest`] extractor. The format
/// comes from the request, else from the named preset, else from the
/// `default` preset, else the downloader's own default. A submission
/// matching a live or completed job returns that job with
/// `deduplicated: true` instead of starting a new download.
pub async fn submit_download(
    State(state): State<AppState>,
    request: DownloadRequest,
) -> Result<impl IntoResponse, ApiError> {
    let format = requested_format(&state.config, &request)?;

    let submission = state.orchestrator.submit(&request.url, format).await?;

    Ok((StatusCode::ACCEPTED, Json(JobAcceptedResponse::from(submission))))
}

fn requested_format<'a>(
    config: &'a Config,
    request: &'a DownloadRequest,
) -> Result<Option<&'a str>, ApiError> {
    if let Some(format) = request.format.as_deref() {
        return Ok(Some(format));
    }

    let preset = match request.preset.as_deref() {
        Some(name) => Some(
            config
                .preset(name)
                .ok_or_else(|| ApiError::InvalidPayload(format!("unknown preset '{name}'")))?,
        ),
        None => config.preset(DEFAULT_PRESET),
    };
    Ok(preset.and_then(|preset| preset.format()))
}

/// Job status endpoint (GET /jobs/{job_id})
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state.orchestrator.status(&JobId::from(job_id)).await?;
    Ok((StatusCode::OK, Json(JobView::from(job))))
}

/// Cancel endpoint (DELETE /jobs/{job_id})
///
/// Pending jobs are canceled right away. Running jobs are flagged and end
/// canceled once the current attempt returns. Terminal jobs answer 409.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job_id = JobId::from(job_id);
    let outcome = state.orchestrator.cancel(&job_id).await?;
    Ok((StatusCode::OK, Json(CancelResponse { job_id, outcome })))
}

/// Job listing endpoint (GET /jobs?state=running&limit=50)
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<JobListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let filter = job_filter(&query).map_err(|e| ApiError::InvalidPayload(e.to_string()))?;
    let jobs = state.orchestrator.list(&filter).await?;
    Ok((StatusCode::OK, Json(JobListResponse::from(jobs))))
}

/// Jobs currently downloading (GET /active_downloads)
pub async fn active_downloads(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let jobs = state.orchestrator.active().await?;
    Ok((StatusCode::OK, Json(JobListResponse::from(jobs))))
}

/// Health check endpoint (GET /health)
///
/// Returns 503 Service Unavailable when the coordination backend does not
/// answer or the orchestrator stopped accepting work.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let orchestrator = &state.orchestrator;
    let mut components = HashMap::new();
    components.insert("api".to_string(), "healthy".to_string());

    let backend_status = match orchestrator.backend().health_check().await {
        Ok(()) => "healthy".to_string(),
        Err(e) => {
            tracing::warn!(error = %e, "Backend health check failed");
            format!("unhealthy: {e}")
        }
    };
    components.insert("backend".to_string(), backend_status);

    let accepting = orchestrator.is_accepting();
    components.insert(
        "workers".to_string(),
        if accepting { "healthy" } else { "stopping" }.to_string(),
    );

    let all_healthy = components.values().all(|status| status == "healthy");
    let status_code = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if all_healthy { "healthy" } else { "unhealthy" }.to_string(),
        components,
        version: env!("CARGO_PKG_VERSION").to_string(),
        backend: orchestrator.backend().kind().to_string(),
        workers: orchestrator.settings().nb_workers,
        accepting,
        metrics: state.metrics.snapshot(),
    };

    (status_code, Json(response))
}
