/// Vidfetch API Server
///
/// HTTP and WebSocket front end for yt-dlp downloads: metadata lookup,
/// background download jobs, progress polling and streaming, file delivery.
mod config;
mod routes;
mod system;
mod ws;


use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use vidfetch_downloader::{Extractor, JobRunner, YtDlp};
use vidfetch_shared::job_store::JobStore;

use crate::config::AppConfig;

/// Shared application state for all handlers.
pub struct AppState {
    pub config: AppConfig,
    pub runner: JobRunner,
    pub store: JobStore,
    pub system: Arc<Mutex<sysinfo::System>>,
}

impl AppState {
    pub fn new(config: AppConfig, extractor: Arc<dyn Extractor>) -> Self {
        let store = JobStore::new();
        let runner = JobRunner::new(extractor, store.clone(), config.runner());
        Self {
            config,
            runner,
            store,
            system: Arc::new(Mutex::new(sysinfo::System::new())),
        }
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(routes::root))
        .route("/video-info", post(routes::video_info))
        .route("/download", post(routes::start_download))
        .route("/download-progress/:id", get(routes::download_progress))
        .route("/ws/download-progress/:id", get(ws::download_progress_ws))
        .route("/download-ready/:id", get(routes::download_ready))
        .route("/system-info", get(routes::system_info))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Periodically drop terminal jobs past retention and delete their directories.
fn spawn_eviction(store: JobStore, retention_secs: u64, interval_secs: u64) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
        loop {
            interval.tick().await;
            evict_expired_jobs(&store, retention_secs).await;
        }
    });
}

/// One eviction pass. Returns the number of jobs removed.
pub async fn evict_expired_jobs(store: &JobStore, retention_secs: u64) -> usize {
    let evicted = store.evict_expired(retention_secs).await;
    for job in &evicted {
        info!("Evicting job {} ({}) for {}", job.job_id, job.status, job.url);
        remove_job_dir(&job.job_dir).await;
    }

    if !evicted.is_empty() {
        let stats = store.stats().await;
        info!(
            "Evicted {} expired jobs, {} still tracked ({} active)",
            evicted.len(),
            stats.total_tracked,
            stats.starting + stats.downloading
        );
    }
    evicted.len()
}

async fn remove_job_dir(dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove job directory {:?}: {}", dir, e),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "vidfetch_api=info,vidfetch_downloader=info,vidfetch_shared=info,tower_http=info".into()
            }),
        )
        .init();

    let config = AppConfig::from_env();
    tokio::fs::create_dir_all(&config.download_dir).await?;
    info!("Download directory: {:?}", config.download_dir);

    let extractor: Arc<dyn Extractor> = Arc::new(YtDlp::new(config.ytdlp()));
    info!(
        "Extractor: {} ({}), {} concurrent downloads",
        extractor.name(),
        config.ytdlp_bin,
        config.max_concurrent_downloads
    );

    let state = Arc::new(AppState::new(config.clone(), extractor));
    spawn_eviction(
        state.store.clone(),
        config.job_retention_secs,
        config.cleanup_interval_secs,
    );

    let app = build_router(state);

    let addr = config.bind_addr();
    info!("Vidfetch API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
