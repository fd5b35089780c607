//! Axum HTTP/WebSocket host for the clip pipeline.
//!
//! This crate provides:
//! - Job submission, inspection, cancellation and re-analysis
//! - Live progress over WebSocket
//! - Analysis cache administration and dependency validation
//! - Prometheus metrics

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod ws;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
