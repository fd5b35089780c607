//! Progress events streamed to subscribers.
//!
//! Events are tagged by `status`; each variant carries a fixed field set.
//!
//! ```json
//! {"job_id":"…","status":"cutting","clips_done":2,"clips_total":5,
//!  "progress":0.8,"message":"Cutting clip 3/5","time_info":{…}}
//! ```

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{Clip, ClipFailure, ErrorKind, Job, JobId, JobStatus, Stage};

/// Status-specific part of a progress event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageUpdate {
    Queued,
    Transcribing,
    Analyzing {
        /// Clips were served from the analysis cache
        #[serde(default)]
        cache_hit: bool,
    },
    Cutting {
        clips_done: u32,
        clips_total: u32,
    },
    Complete {
        results: Vec<Clip>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        warnings: Vec<ClipFailure>,
    },
    Error {
        kind: ErrorKind,
    },
}

impl StageUpdate {
    pub fn status(&self) -> JobStatus {
        match self {
            StageUpdate::Queued => JobStatus::Queued,
            StageUpdate::Transcribing => JobStatus::Transcribing,
            StageUpdate::Analyzing { .. } => JobStatus::Analyzing,
            StageUpdate::Cutting { .. } => JobStatus::Cutting,
            StageUpdate::Complete { .. } => JobStatus::Complete,
            StageUpdate::Error { .. } => JobStatus::Error,
        }
    }
}

/// Predicted duration per stage, in seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StageEstimates {
    pub transcribing: f64,
    pub analyzing: f64,
    pub cutting: f64,
    pub total: f64,
}

impl StageEstimates {
    pub fn get(&self, stage: Stage) -> f64 {
        match stage {
            Stage::Transcribing => self.transcribing,
            Stage::Analyzing => self.analyzing,
            Stage::Cutting => self.cutting,
        }
    }
}

/// Timing estimate attached to a progress event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TimeInfo {
    /// Seconds since the first stage started
    pub elapsed: f64,
    /// Estimated seconds left, never negative
    pub remaining: f64,
    /// Estimated completion instant
    pub eta: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_stage: Option<Stage>,
    /// Progress within the current stage
    pub stage_progress: f64,
    pub stage_estimates: StageEstimates,
}

/// A single progress update for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProgressEvent {
    pub job_id: JobId,

    #[serde(flatten)]
    pub update: StageUpdate,

    /// Overall progress in `[0.0, 1.0]`
    pub progress: f64,

    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_info: Option<TimeInfo>,

    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn new(job_id: JobId, update: StageUpdate, progress: f64, message: impl Into<String>) -> Self {
        Self {
            job_id,
            update,
            progress,
            message: message.into(),
            time_info: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_time_info(mut self, time_info: TimeInfo) -> Self {
        self.time_info = Some(time_info);
        self
    }

    /// Stamp the event with the registry update it reports.
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn status(&self) -> JobStatus {
        self.update.status()
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    /// Snapshot of a job's last known state, sent to subscribers on join.
    pub fn snapshot(job: &Job) -> Self {
        let update = match job.status {
            JobStatus::Queued => StageUpdate::Queued,
            JobStatus::Transcribing => StageUpdate::Transcribing,
            JobStatus::Analyzing => StageUpdate::Analyzing {
                cache_hit: job.cache_hit,
            },
            JobStatus::Cutting => StageUpdate::Cutting {
                clips_done: job.clips_done,
                clips_total: job.clips_total,
            },
            JobStatus::Complete => StageUpdate::Complete {
                results: job.results.clone().unwrap_or_default(),
                warnings: job.warnings.clone(),
            },
            JobStatus::Error => StageUpdate::Error {
                kind: job
                    .error
                    .as_ref()
                    .map(|e| e.kind)
                    .unwrap_or(ErrorKind::Cancelled),
            },
        };
        Self {
            job_id: job.id.clone(),
            update,
            progress: job.progress,
            message: job.message.clone(),
            time_info: None,
            timestamp: job.updated_at,
        }
    }
}
