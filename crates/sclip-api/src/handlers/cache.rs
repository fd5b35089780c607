//! Analysis cache administration.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use tracing::info;

use sclip_models::CacheEntryMeta;
use sclip_storage::CacheKey;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Serialize)]
pub struct CacheListResponse {
    pub entries: Vec<CacheEntryMeta>,
    pub total_bytes: u64,
}

#[derive(Serialize)]
pub struct CacheClearResponse {
    pub removed: usize,
}

/// List cache entries, newest first.
pub async fn list_cache(State(state): State<AppState>) -> ApiResult<Json<CacheListResponse>> {
    let mut entries = state.cache().list().await?;
    entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    let total_bytes = entries.iter().map(|e| e.size_bytes).sum();
    Ok(Json(CacheListResponse { entries, total_bytes }))
}

pub async fn delete_cache_entry(State(state): State<AppState>, Path(key): Path<String>) -> ApiResult<StatusCode> {
    let key = CacheKey::parse(&key)?;
    if !state.cache().delete(&key).await? {
        return Err(ApiError::not_found(format!("cache entry {}", key)));
    }
    info!(cache_key = %key, "Cache entry deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn clear_cache(State(state): State<AppState>) -> ApiResult<Json<CacheClearResponse>> {
    let removed = state.cache().clear().await?;
    info!(removed, "Analysis cache cleared");
    Ok(Json(CacheClearResponse { removed }))
}
