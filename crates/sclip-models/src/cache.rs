//! Persisted analysis cache records.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{Clip, JobId, JobParams, OutputProfile, VideoRef};

/// Snapshot of the parameters an analysis was computed with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct AnalysisParams {
    pub context: String,
    pub topics: Vec<String>,
    pub profile: OutputProfile,
}

impl From<&JobParams> for AnalysisParams {
    fn from(params: &JobParams) -> Self {
        Self {
            context: params.context.clone(),
            topics: params.topics.clone(),
            profile: params.profile,
        }
    }
}

/// One stored analysis result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CacheEntry {
    /// Derived key, also the file name prefix
    pub cache_key: String,
    /// Job that produced the analysis
    pub job_id: JobId,
    pub timestamp: DateTime<Utc>,
    pub video: VideoRef,
    pub params: AnalysisParams,
    /// Transcript length in characters
    pub transcript_len: usize,
    pub clip_count: usize,
    pub clips: Vec<Clip>,
}

impl CacheEntry {
    pub fn new(
        cache_key: impl Into<String>,
        job_id: JobId,
        video: VideoRef,
        params: AnalysisParams,
        transcript_len: usize,
        clips: Vec<Clip>,
    ) -> Self {
        Self {
            cache_key: cache_key.into(),
            job_id,
            timestamp: Utc::now(),
            video,
            params,
            transcript_len,
            clip_count: clips.len(),
            clips,
        }
    }

    /// Age of the entry at `now`.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.timestamp
    }

    /// Metadata view of this entry.
    pub fn meta(&self, size_bytes: u64) -> CacheEntryMeta {
        CacheEntryMeta {
            cache_key: self.cache_key.clone(),
            job_id: self.job_id.clone(),
            timestamp: self.timestamp,
            video: self.video.clone(),
            params: self.params.clone(),
            clip_count: self.clip_count,
            size_bytes,
        }
    }
}

/// Listing view of a cache entry, without the clip list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CacheEntryMeta {
    pub cache_key: String,
    pub job_id: JobId,
    pub timestamp: DateTime<Utc>,
    pub video: VideoRef,
    pub params: AnalysisParams,
    pub clip_count: usize,
    /// Size of the stored record on disk
    pub size_bytes: u64,
}
