use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tower_http::{decompression::RequestDecompressionLayer, trace::TraceLayer};
use tracing::{error, info};

use super::{
    services::{active_downloads, cancel_job, get_job, health, list_jobs, submit_download},
    state::AppState,
};
use crate::backend::Backend;
use crate::config::Config;
use crate::observability::Metrics;
use crate::orchestrator::{Orchestrator, Settings};
use crate::storage::DownloadRoot;
use crate::worker::build_downloader;

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/download", post(submit_download))
        .route("/jobs", get(list_jobs))
        .route("/jobs/{job_id}", get(get_job).delete(cancel_job))
        .route("/active_downloads", get(active_downloads))
        .route("/health", get(health))
        .with_state(state)
        // Handles Content-Encoding: gzip before the handlers see the body
        .layer(RequestDecompressionLayer::new())
        .layer(TraceLayer::new_for_http())
}

/// Start the orchestrator from `config` and serve until SIGINT/SIGTERM.
///
/// `address` overrides `server.bind_addr`. The worker pool is stopped with
/// the configured shutdown policy after the listener closes.
pub async fn run(config: Config, address: Option<SocketAddr>) -> Result<(), AnyError> {
    let address = address.unwrap_or(config.server.bind_addr);

    let backend = if config.redis.enabled {
        info!(url = %config.redis.url, prefix = %config.redis.key_prefix, "Connecting to Redis");
        Backend::from_config(&config.redis)
            .await
            .map_err(|e| format!("Failed to connect to Redis: {}", e))?
    } else {
        info!("Redis disabled, using in-process coordination");
        Backend::in_memory()
    };

    let downloader = build_downloader(&config.downloader)
        .map_err(|e| format!("Failed to build downloader: {}", e))?;
    info!(downloader = downloader.name(), "Downloader ready");

    let storage = DownloadRoot::new(config.storage.root.clone());
    let orchestrator = Orchestrator::start(
        Settings::from(&config),
        backend,
        downloader,
        storage,
        Arc::new(Metrics::new()),
    )
    .await
    .map_err(|e| format!("Failed to start orchestrator: {}", e))?;
    let orchestrator = Arc::new(orchestrator);

    let app = router(AppState::new(config, orchestrator.clone()));

    let listener = TcpListener::bind(address).await?;
    info!(%address, "mediabox API listening");

    let served = axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await;

    orchestrator.shutdown().await;
    served?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
