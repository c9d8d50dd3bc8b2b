mod catalog;
mod config;
mod delivery;
mod error;
mod media;
mod plan;
mod platform;
mod resolver;
mod routes;

use std::sync::Arc;

use tokio::{net::TcpListener, sync::Semaphore, time::Duration};
use tracing::info;

use crate::{
    config::Config,
    error::ApiError,
    resolver::YtDlpResolver,
    routes::{AppState, build_cors_layer, router},
};

/// Job directories older than this are leftovers from a previous run.
const STALE_DOWNLOAD_JOB_SECONDS: u64 = 2 * 60 * 60;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "clipfetch_backend=info,tower_http=info".to_string()),
        )
        .init();

    if let Err(error) = run().await {
        eprintln!("Server error: {}", error.message);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), ApiError> {
    let mut config = Config::from_env();
    config.resolver.auth.discard_missing_cookie_files();

    tokio::fs::create_dir_all(&config.transfer_dir)
        .await
        .map_err(|error| {
            ApiError::internal(format!("Could not create the transfer directory: {error}"))
        })?;
    delivery::cleanup_stale_download_jobs(
        &config.transfer_dir,
        Duration::from_secs(STALE_DOWNLOAD_JOB_SECONDS),
    )
    .await;

    info!(
        "Using {} with a {}s timeout and up to {} concurrent download(s)",
        config.resolver.binary,
        config.resolver.timeout.as_secs(),
        config.max_concurrent_downloads
    );

    let cors = build_cors_layer(&config.allowed_origins)?;
    let state = AppState {
        resolver: Arc::new(YtDlpResolver::new(config.resolver.clone())),
        download_semaphore: Arc::new(Semaphore::new(config.max_concurrent_downloads)),
        transfer_dir: config.transfer_dir.clone(),
        max_download_bytes: config.max_download_bytes,
    };
    let app = router(state, cors);

    let listener = TcpListener::bind(&config.bind_addr).await.map_err(|error| {
        ApiError::internal(format!(
            "Could not listen on {}: {error}",
            config.bind_addr
        ))
    })?;

    info!("Backend ready on http://{}", config.bind_addr);

    axum::serve(listener, app)
        .await
        .map_err(|error| ApiError::internal(format!("HTTP server error: {error}")))
}
