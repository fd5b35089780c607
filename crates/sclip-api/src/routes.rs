//! API routes.

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::limit::RequestBodyLimitLayer;

use crate::handlers::{
    cancel_job, clear_cache, create_job, delete_cache_entry, delete_job, get_job, health, list_cache, list_jobs,
    reanalyze_job, validate_system,
};
use crate::metrics::metrics_middleware;
use crate::middleware::{cors_layer, request_id, request_logging, security_headers};
use crate::state::AppState;
use crate::ws::ws_job;

/// Create the API router.
pub fn create_router(state: AppState, metrics_handle: Option<PrometheusHandle>) -> Router {
    let job_routes = Router::new()
        .route("/jobs", post(create_job).get(list_jobs))
        .route("/jobs/:job_id", get(get_job).delete(delete_job))
        .route("/jobs/:job_id/cancel", post(cancel_job))
        .route("/jobs/:job_id/reanalyze", post(reanalyze_job));

    let cache_routes = Router::new()
        .route("/cache", get(list_cache).delete(clear_cache))
        .route("/cache/:key", axum::routing::delete(delete_cache_entry));

    let system_routes = Router::new().route("/system/validate", get(validate_system));

    let api_routes = Router::new()
        .merge(job_routes)
        .merge(cache_routes)
        .merge(system_routes);

    let ws_routes = Router::new().route("/ws/jobs/:job_id", get(ws_job));

    let health_routes = Router::new().route("/health", get(health));

    // Metrics endpoint (if enabled)
    let metrics_routes = if let Some(handle) = metrics_handle {
        Router::new().route("/metrics", get(move || async move { handle.render() }))
    } else {
        Router::new()
    };

    Router::new()
        .nest("/api", api_routes)
        .merge(ws_routes)
        .merge(health_routes)
        .merge(metrics_routes)
        .layer(RequestBodyLimitLayer::new(state.config.max_body_size))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(security_headers))
        .layer(middleware::from_fn(request_id))
        .layer(middleware::from_fn(request_logging))
        .layer(cors_layer(&state.config.cors_origins))
        .with_state(state)
}
