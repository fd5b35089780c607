//! Job records owned by the registry.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::{
    Clip, ClipFailure, ErrorKind, JobFailure, JobStatus, OutputProfile, Stage, Transcript,
    TransitionError,
};

/// Maximum context length in characters.
pub const MAX_CONTEXT_CHARS: u64 = 4000;

/// Maximum number of topics per job.
pub const MAX_TOPICS: u64 = 20;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reference to the source video on local disk.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct VideoRef(pub PathBuf);

impl VideoRef {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn path(&self) -> &Path {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.as_os_str().is_empty()
    }

    /// File stem used for naming output directories.
    pub fn stem(&self) -> String {
        self.0
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "video".to_string())
    }
}

impl fmt::Display for VideoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// Analysis parameters supplied at job creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Validate)]
pub struct JobParams {
    /// Free-text description of the video
    #[validate(
        length(min = 1, max = 4000, message = "context must be 1-4000 characters"),
        custom(function = "validate_not_blank")
    )]
    pub context: String,

    /// Topics of interest, in caller order
    #[validate(
        length(min = 1, max = 20, message = "between 1 and 20 topics are required"),
        custom(function = "validate_topics")
    )]
    pub topics: Vec<String>,

    #[serde(default)]
    pub profile: OutputProfile,
}

fn validate_not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut err = ValidationError::new("blank");
        err.message = Some("must not be blank".into());
        return Err(err);
    }
    Ok(())
}

fn validate_topics(topics: &[String]) -> Result<(), ValidationError> {
    if topics.iter().any(|t| t.trim().is_empty()) {
        let mut err = ValidationError::new("blank_topic");
        err.message = Some("topics must not be blank".into());
        return Err(err);
    }
    Ok(())
}

/// Rejected job parameters.
#[derive(Debug, Error)]
pub enum ParamsError {
    #[error("Video reference must not be empty")]
    EmptyVideoRef,

    #[error("Invalid job parameters: {0}")]
    Invalid(#[from] ValidationErrors),
}

impl JobParams {
    pub fn new(context: impl Into<String>, topics: Vec<String>, profile: OutputProfile) -> Self {
        Self {
            context: context.into(),
            topics,
            profile,
        }
    }

    /// Validate parameters together with the video they apply to.
    pub fn check(&self, video: &VideoRef) -> Result<(), ParamsError> {
        if video.is_empty() {
            return Err(ParamsError::EmptyVideoRef);
        }
        self.validate()?;
        Ok(())
    }
}

/// Split a comma-separated topic string into trimmed, non-empty topics.
pub fn parse_topics(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}

/// Timing record for one stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct StageSpan {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Stage was bypassed (e.g. resume from transcript)
    #[serde(default)]
    pub skipped: bool,
}

impl StageSpan {
    pub fn is_running(&self) -> bool {
        self.started_at.is_some() && self.finished_at.is_none()
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    /// Actual duration in seconds, if the stage has finished.
    pub fn duration_secs(&self) -> Option<f64> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some(seconds_between(start, end)),
            _ => None,
        }
    }

    /// Seconds since the stage started, measured at `now`.
    pub fn elapsed_secs(&self, now: DateTime<Utc>) -> f64 {
        match self.started_at {
            Some(start) => seconds_between(start, self.finished_at.unwrap_or(now)),
            None => 0.0,
        }
    }
}

/// Per-stage timestamps for a job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct StageTimings {
    pub transcribing: StageSpan,
    pub analyzing: StageSpan,
    pub cutting: StageSpan,
}

impl StageTimings {
    pub fn get(&self, stage: Stage) -> &StageSpan {
        match stage {
            Stage::Transcribing => &self.transcribing,
            Stage::Analyzing => &self.analyzing,
            Stage::Cutting => &self.cutting,
        }
    }

    pub fn get_mut(&mut self, stage: Stage) -> &mut StageSpan {
        match stage {
            Stage::Transcribing => &mut self.transcribing,
            Stage::Analyzing => &mut self.analyzing,
            Stage::Cutting => &mut self.cutting,
        }
    }

    /// The stage currently running, if any.
    pub fn current(&self) -> Option<Stage> {
        Stage::ALL.into_iter().find(|s| self.get(*s).is_running())
    }

    /// Earliest recorded stage start.
    pub fn first_start(&self) -> Option<DateTime<Utc>> {
        Stage::ALL
            .iter()
            .filter_map(|s| self.get(*s).started_at)
            .min()
    }

    /// Close spans for a move to `next` at `now`.
    ///
    /// The running stage is finished, stages that were never entered and
    /// precede `next` are marked skipped, and the stage for `next` starts.
    fn advance(&mut self, next: JobStatus, now: DateTime<Utc>) {
        if let Some(running) = self.current() {
            self.get_mut(running).finished_at = Some(now);
        }
        if next == JobStatus::Error {
            return;
        }
        let boundary = next.stage().map(|s| s.index()).unwrap_or(Stage::ALL.len());
        for stage in Stage::ALL.iter().take(boundary) {
            let span = self.get_mut(*stage);
            if span.started_at.is_none() {
                span.skipped = true;
            }
        }
        if let Some(stage) = next.stage() {
            let span = self.get_mut(stage);
            span.started_at = Some(now);
            span.finished_at = None;
            span.skipped = false;
        }
    }
}

fn seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    ((end - start).num_milliseconds() as f64 / 1000.0).max(0.0)
}

/// A job tracked by the registry.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Job {
    pub id: JobId,

    pub video: VideoRef,

    pub params: JobParams,

    #[serde(default)]
    pub status: JobStatus,

    #[serde(default)]
    pub timings: StageTimings,

    /// Last published progress in `[0.0, 1.0]`
    #[serde(default)]
    pub progress: f64,

    /// Last published message
    #[serde(default)]
    pub message: String,

    /// Transcript kept for re-analysis; not part of API payloads
    #[serde(skip)]
    pub transcript: Option<Transcript>,

    /// Whether the analysis came from the cache
    #[serde(default)]
    pub cache_hit: bool,

    /// Clips cut so far, reported while cutting
    #[serde(default)]
    pub clips_done: u32,

    /// Clips the cut stage will produce
    #[serde(default)]
    pub clips_total: u32,

    /// Final clips, present only when complete
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<Clip>>,

    /// Failure detail, present only on error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobFailure>,

    /// Clips that failed to cut
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<ClipFailure>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a queued job with a fresh id.
    pub fn new(video: VideoRef, params: JobParams) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            video,
            params,
            status: JobStatus::Queued,
            timings: StageTimings::default(),
            progress: 0.0,
            message: "Queued".to_string(),
            transcript: None,
            cache_hit: false,
            clips_done: 0,
            clips_total: 0,
            results: None,
            error: None,
            warnings: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `next`, recording stage timestamps.
    pub fn transition(&mut self, next: JobStatus) -> Result<(), TransitionError> {
        self.transition_at(next, Utc::now())
    }

    /// Move to `next` at an explicit instant.
    pub fn transition_at(&mut self, next: JobStatus, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError {
                from: self.status,
                to: next,
            });
        }
        self.timings.advance(next, now);
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    /// Record progress. Progress never decreases within a run.
    pub fn set_progress(&mut self, progress: f64, message: impl Into<String>) {
        let clamped = if progress.is_finite() { progress.clamp(0.0, 1.0) } else { 0.0 };
        self.progress = self.progress.max(clamped);
        self.message = message.into();
        self.updated_at = Utc::now();
    }

    pub fn set_clip_counts(&mut self, done: u32, total: u32) {
        self.clips_total = total;
        self.clips_done = done.min(total);
    }

    /// Finish successfully with the given clips.
    pub fn complete(&mut self, results: Vec<Clip>, warnings: Vec<ClipFailure>) -> Result<(), TransitionError> {
        self.transition(JobStatus::Complete)?;
        self.progress = 1.0;
        self.results = Some(results);
        self.warnings = warnings;
        Ok(())
    }

    /// Finish with an error.
    pub fn fail(&mut self, kind: ErrorKind, message: impl Into<String>) -> Result<(), TransitionError> {
        let message = message.into();
        self.transition(JobStatus::Error)?;
        self.message = message.clone();
        self.error = Some(JobFailure::new(kind, message));
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// The stage currently running, if any.
    pub fn current_stage(&self) -> Option<Stage> {
        self.status.stage()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn params() -> JobParams {
        JobParams::new("cooking tutorial", vec!["knife skills".into()], OutputProfile::Social)
    }

    #[test]
    fn test_job_ids_unique() {
        let a = JobId::new();
        let b = JobId::new();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
    }

    #[test]
    fn test_params_validation() {
        let video = VideoRef::new("/videos/v.mp4");
        assert!(params().check(&video).is_ok());
        assert!(matches!(
            params().check(&VideoRef::new("")),
            Err(ParamsError::EmptyVideoRef)
        ));

        let blank_context = JobParams::new("   ", vec!["a".into()], OutputProfile::Social);
        assert!(blank_context.check(&video).is_err());

        let long_context = JobParams::new("x".repeat(4001), vec!["a".into()], OutputProfile::Social);
        assert!(long_context.check(&video).is_err());

        let at_limit = JobParams::new("é".repeat(4000), vec!["a".into()], OutputProfile::Social);
        assert!(at_limit.check(&video).is_ok());

        let no_topics = JobParams::new("ctx", vec![], OutputProfile::Social);
        assert!(no_topics.check(&video).is_err());

        let too_many = JobParams::new("ctx", (0..21).map(|i| i.to_string()).collect(), OutputProfile::Social);
        assert!(too_many.check(&video).is_err());

        let blank_topic = JobParams::new("ctx", vec!["a".into(), " ".into()], OutputProfile::Social);
        assert!(blank_topic.check(&video).is_err());
    }

    #[test]
    fn test_parse_topics() {
        assert_eq!(
            parse_topics(" knife skills, ,plating ,"),
            vec!["knife skills".to_string(), "plating".to_string()]
        );
        assert!(parse_topics(" , ").is_empty());
    }

    #[test]
    fn test_transitions_record_timings() {
        let mut job = Job::new(VideoRef::new("/v.mp4"), params());
        let t0 = Utc::now();
        job.transition_at(JobStatus::Transcribing, t0).unwrap();
        job.transition_at(JobStatus::Analyzing, t0 + Duration::seconds(10)).unwrap();

        assert_eq!(job.timings.transcribing.duration_secs(), Some(10.0));
        assert!(job.timings.analyzing.is_running());
        assert_eq!(job.timings.current(), Some(Stage::Analyzing));

        let err = job.transition(JobStatus::Transcribing).unwrap_err();
        assert_eq!(err.from, JobStatus::Analyzing);
    }

    #[test]
    fn test_resume_marks_transcription_skipped() {
        let mut job = Job::new(VideoRef::new("/v.mp4"), params());
        job.transition(JobStatus::Analyzing).unwrap();
        assert!(job.timings.transcribing.skipped);
        assert!(!job.timings.analyzing.skipped);
    }

    #[test]
    fn test_progress_never_decreases() {
        let mut job = Job::new(VideoRef::new("/v.mp4"), params());
        job.set_progress(0.4, "a");
        job.set_progress(0.2, "b");
        assert_eq!(job.progress, 0.4);
        assert_eq!(job.message, "b");
        job.set_progress(7.0, "c");
        assert_eq!(job.progress, 1.0);
    }

    #[test]
    fn test_fail_is_terminal() {
        let mut job = Job::new(VideoRef::new("/v.mp4"), params());
        job.transition(JobStatus::Transcribing).unwrap();
        job.fail(ErrorKind::TranscriptionFailed, "whisper exited 1").unwrap();

        assert!(job.is_terminal());
        assert!(job.timings.transcribing.is_finished());
        assert_eq!(job.error.as_ref().unwrap().kind, ErrorKind::TranscriptionFailed);
        assert!(job.complete(vec![], vec![]).is_err());
        assert!(job.results.is_none());
    }

    #[test]
    fn test_serialized_job_omits_transcript() {
        let mut job = Job::new(VideoRef::new("/v.mp4"), params());
        job.transcript = Some(Transcript::new("secret", vec![]));
        let json = serde_json::to_value(&job).unwrap();
        assert!(json.get("transcript").is_none());
        assert_eq!(json["status"], "queued");
        assert!(json.get("results").is_none());
    }
}
