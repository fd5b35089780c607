//! Dependency validation.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use sclip_worker::DependencyStatus;

use crate::state::AppState;

#[derive(Serialize)]
pub struct ValidationResponse {
    pub ok: bool,
    pub dependencies: Vec<DependencyStatus>,
}

/// Check Whisper, Ollama and FFmpeg availability.
///
/// Responds 503 with the same body when any dependency is unavailable.
pub async fn validate_system(
    State(state): State<AppState>,
) -> Result<Json<ValidationResponse>, (StatusCode, Json<ValidationResponse>)> {
    let dependencies = state.executor.dependency_report().await;
    let ok = dependencies.iter().all(|d| d.ok);
    let response = ValidationResponse { ok, dependencies };
    if ok {
        Ok(Json(response))
    } else {
        Err((StatusCode::SERVICE_UNAVAILABLE, Json(response)))
    }
}
