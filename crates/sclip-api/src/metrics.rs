//! Prometheus metrics for the API server.

use std::sync::LazyLock;
use std::time::Instant;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use regex_lite::Regex;

/// Initialize the Prometheus metrics recorder.
/// Returns a handle that can be used to render metrics.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Metric names as constants for consistency.
pub mod names {
    // HTTP metrics
    pub const HTTP_REQUESTS_TOTAL: &str = "sclip_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "sclip_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "sclip_http_requests_in_flight";

    // WebSocket metrics
    pub const WS_CONNECTIONS_TOTAL: &str = "sclip_ws_connections_total";
    pub const WS_CONNECTIONS_ACTIVE: &str = "sclip_ws_connections_active";
    pub const WS_MESSAGES_SENT: &str = "sclip_ws_messages_sent_total";
}

/// Record an HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", sanitize_path(path)),
        ("status", status.to_string()),
    ];

    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Record a WebSocket connection opening.
pub fn record_ws_connected() {
    counter!(names::WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(names::WS_CONNECTIONS_ACTIVE).increment(1.0);
}

pub fn record_ws_disconnected() {
    gauge!(names::WS_CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a progress event pushed to a WebSocket client.
pub fn record_ws_message_sent(status: &str) {
    let labels = [("status", status.to_string())];
    counter!(names::WS_MESSAGES_SENT, &labels).increment(1);
}

static UUID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}").expect("valid regex")
});
static CACHE_KEY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/cache/[0-9a-f]+").expect("valid regex"));

/// Sanitize path for metrics labels (job ids and cache keys become placeholders).
fn sanitize_path(path: &str) -> String {
    let path = UUID_RE.replace_all(path, ":id");
    let path = CACHE_KEY_RE.replace_all(&path, "/cache/:key");
    path.to_string()
}

/// Metrics middleware for HTTP requests.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(1.0);
    let response = next.run(request).await;
    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);

    let status = response.status().as_u16();
    record_http_request(&method, &path, status, start.elapsed().as_secs_f64());

    response
}
