//! Job lifecycle handlers.
//!
//! Provides REST API endpoints for:
//! - Creating a job from a local video and analysis parameters
//! - Inspecting and listing jobs
//! - Cancelling, re-analyzing and cleaning up jobs

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use sclip_models::{parse_topics, Job, JobId, JobParams, JobStatus, OutputProfile, VideoRef};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

// ============================================================================
// Types
// ============================================================================

/// Topics given either as a list or as one comma-separated string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TopicsInput {
    List(Vec<String>),
    Text(String),
}

impl Default for TopicsInput {
    fn default() -> Self {
        TopicsInput::List(Vec::new())
    }
}

impl TopicsInput {
    pub fn into_topics(self) -> Vec<String> {
        match self {
            TopicsInput::List(topics) => topics.into_iter().map(|t| t.trim().to_string()).collect(),
            TopicsInput::Text(text) => parse_topics(&text),
        }
    }
}

/// Analysis parameters as sent by clients.
#[derive(Debug, Deserialize)]
pub struct ParamsRequest {
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub topics: TopicsInput,
    #[serde(default)]
    pub profile: OutputProfile,
}

impl ParamsRequest {
    fn into_params(self) -> JobParams {
        JobParams::new(self.context.trim(), self.topics.into_topics(), self.profile)
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    pub video_path: String,
    #[serde(flatten)]
    pub params: ParamsRequest,
}

#[derive(Debug, Serialize)]
pub struct JobCreatedResponse {
    pub job_id: JobId,
    pub status: JobStatus,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub job_id: JobId,
    /// False when the job had already finished
    pub cancelled: bool,
}

#[derive(Debug, Serialize)]
pub struct JobListResponse {
    pub jobs: Vec<Job>,
    pub total: usize,
}

// ============================================================================
// Handlers
// ============================================================================

/// Validate, preflight and start a job.
pub async fn create_job(
    State(state): State<AppState>,
    Json(request): Json<CreateJobRequest>,
) -> ApiResult<(StatusCode, Json<JobCreatedResponse>)> {
    let video = VideoRef::new(request.video_path.trim());
    let params = request.params.into_params();
    params.check(&video).map_err(|e| ApiError::validation(e.to_string()))?;
    ensure_video_file(&video).await?;

    let job_id = state.executor.start_job(video, params).await?;
    info!(job_id = %job_id, "Job accepted");

    Ok((
        StatusCode::ACCEPTED,
        Json(JobCreatedResponse {
            job_id,
            status: JobStatus::Queued,
        }),
    ))
}

/// All jobs, newest first.
pub async fn list_jobs(State(state): State<AppState>) -> Json<JobListResponse> {
    let mut jobs = state.registry().list().await;
    jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    let total = jobs.len();
    Json(JobListResponse { jobs, total })
}

pub async fn get_job(State(state): State<AppState>, Path(job_id): Path<String>) -> ApiResult<Json<Job>> {
    let job = state.registry().get(&JobId::from_string(job_id)).await?;
    Ok(Json(job))
}

/// Remove a finished job from the registry.
pub async fn delete_job(State(state): State<AppState>, Path(job_id): Path<String>) -> ApiResult<StatusCode> {
    let job_id = JobId::from_string(job_id);
    state.registry().remove(&job_id).await?;
    state.broadcaster().forget(&job_id);
    Ok(StatusCode::NO_CONTENT)
}

pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<CancelResponse>> {
    let job_id = JobId::from_string(job_id);
    let cancelled = state.executor.cancel(&job_id).await?;
    Ok(Json(CancelResponse { job_id, cancelled }))
}

/// Start a new job over the same video with new parameters, reusing the transcript.
pub async fn reanalyze_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Json(request): Json<ParamsRequest>,
) -> ApiResult<(StatusCode, Json<JobCreatedResponse>)> {
    let source = state.registry().get(&JobId::from_string(job_id)).await?;
    let params = request.into_params();
    params.check(&source.video).map_err(|e| ApiError::validation(e.to_string()))?;

    let job_id = state.executor.reanalyze(&source.id, params).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(JobCreatedResponse {
            job_id,
            status: JobStatus::Queued,
        }),
    ))
}

async fn ensure_video_file(video: &VideoRef) -> ApiResult<()> {
    match tokio::fs::metadata(video.path()).await {
        Ok(meta) if meta.is_file() => Ok(()),
        Ok(_) => Err(ApiError::validation(format!("{} is not a file", video))),
        Err(_) => Err(ApiError::validation(format!("video not found: {}", video))),
    }
}
