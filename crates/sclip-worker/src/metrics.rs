//! Pipeline metrics.
//!
//! Recorded through the `metrics` facade; the host installs the exporter.

use metrics::{counter, gauge, histogram};

use sclip_models::{ErrorKind, Stage};

/// Metric names as constants for consistency.
pub mod names {
    pub const JOBS_STARTED_TOTAL: &str = "sclip_jobs_started_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "sclip_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "sclip_jobs_failed_total";
    pub const JOBS_RUNNING: &str = "sclip_jobs_running";

    pub const STAGE_DURATION_SECONDS: &str = "sclip_stage_duration_seconds";

    pub const CACHE_HITS_TOTAL: &str = "sclip_analysis_cache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "sclip_analysis_cache_misses_total";

    pub const CLIPS_CUT_TOTAL: &str = "sclip_clips_cut_total";
    pub const CLIPS_FAILED_TOTAL: &str = "sclip_clips_failed_total";
}

pub fn record_job_started(resumed: bool) {
    let labels = [("resumed", resumed.to_string())];
    counter!(names::JOBS_STARTED_TOTAL, &labels).increment(1);
}

pub fn record_job_completed(clip_count: usize) {
    counter!(names::JOBS_COMPLETED_TOTAL).increment(1);
    counter!(names::CLIPS_CUT_TOTAL).increment(clip_count as u64);
}

pub fn record_job_failed(kind: ErrorKind) {
    let labels = [("kind", kind.as_str().to_string())];
    counter!(names::JOBS_FAILED_TOTAL, &labels).increment(1);
}

pub fn set_jobs_running(count: usize) {
    gauge!(names::JOBS_RUNNING).set(count as f64);
}

pub fn record_stage_duration(stage: Stage, secs: f64) {
    let labels = [("stage", stage.as_str().to_string())];
    histogram!(names::STAGE_DURATION_SECONDS, &labels).record(secs);
}

pub fn record_cache_lookup(hit: bool) {
    if hit {
        counter!(names::CACHE_HITS_TOTAL).increment(1);
    } else {
        counter!(names::CACHE_MISSES_TOTAL).increment(1);
    }
}

pub fn record_clip_failed() {
    counter!(names::CLIPS_FAILED_TOTAL).increment(1);
}
