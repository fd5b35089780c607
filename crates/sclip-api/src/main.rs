//! Axum API server binary.

use anyhow::Context;
use tracing::{info, warn};

use sclip_api::{create_router, metrics, ApiConfig, AppState};
use sclip_worker::{init_tracing, WorkerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Install rustls crypto provider (required for rustls 0.23+)
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    init_tracing("info,tower_http=warn");
    info!("Starting sclip-api");

    let config = ApiConfig::from_env();
    let worker_config = WorkerConfig::from_env();
    info!(
        host = %config.host,
        port = config.port,
        max_jobs = worker_config.max_concurrent_jobs,
        cache_dir = %worker_config.cache_dir.display(),
        "Configuration loaded"
    );

    let state = AppState::new(config.clone(), &worker_config)
        .await
        .context("failed to create application state")?;

    match state.cache().evict_expired().await {
        Ok(0) => {}
        Ok(evicted) => info!(evicted, "Evicted expired cache entries"),
        Err(e) => warn!(error = %e, "Cache eviction failed"),
    }

    if let Err(e) = state.executor.preflight().await {
        warn!(error = %e, "Dependencies unavailable; job creation will be rejected until fixed");
    }

    let metrics_handle = if config.metrics_enabled {
        info!("Prometheus metrics enabled at /metrics");
        Some(metrics::init_metrics().context("failed to install Prometheus recorder")?)
    } else {
        None
    };

    let app = create_router(state, metrics_handle);

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
}
