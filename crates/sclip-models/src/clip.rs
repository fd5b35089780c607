//! Clip definitions.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A candidate or finished clip.
///
/// Produced by the analysis stage without file fields; the cut stage
/// produces a new value with `file_path` and `file_size` populated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Clip {
    /// Stable ordinal within a job (1-based)
    pub segment_id: u32,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Start time in seconds
    pub start_time: f64,
    /// End time in seconds
    pub end_time: f64,
    /// Duration in seconds (`end_time - start_time`)
    pub duration: f64,
    /// Relevance score in `[0.0, 1.0]`
    pub relevance_score: f64,
    /// Job topics this clip covers
    #[serde(default)]
    pub topics: Vec<String>,
    /// Output file, set after cutting
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    /// Output size in bytes, set after cutting
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
}

/// Reasons a clip definition is rejected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClipError {
    #[error("Clip duration must be positive (start {start}, end {end})")]
    NonPositiveDuration { start: f64, end: f64 },

    #[error("Clip start time must not be negative: {0}")]
    NegativeStart(f64),

    #[error("Relevance score out of range: {0}")]
    ScoreOutOfRange(f64),
}

impl Clip {
    /// Build a clip, deriving the duration and checking its invariants.
    pub fn new(
        segment_id: u32,
        title: impl Into<String>,
        description: impl Into<String>,
        start_time: f64,
        end_time: f64,
        relevance_score: f64,
        topics: Vec<String>,
    ) -> Result<Self, ClipError> {
        let clip = Self {
            segment_id,
            title: title.into(),
            description: description.into(),
            start_time,
            end_time,
            duration: end_time - start_time,
            relevance_score,
            topics,
            file_path: None,
            file_size: None,
        };
        clip.validate()?;
        Ok(clip)
    }

    /// Check the duration and score invariants.
    pub fn validate(&self) -> Result<(), ClipError> {
        if !(self.start_time >= 0.0) {
            return Err(ClipError::NegativeStart(self.start_time));
        }
        if !(self.end_time - self.start_time > 0.0) {
            return Err(ClipError::NonPositiveDuration {
                start: self.start_time,
                end: self.end_time,
            });
        }
        if !(0.0..=1.0).contains(&self.relevance_score) {
            return Err(ClipError::ScoreOutOfRange(self.relevance_score));
        }
        Ok(())
    }

    /// Copy of this clip carrying the cut output.
    pub fn with_output(&self, file_path: impl Into<String>, file_size: u64) -> Self {
        Self {
            file_path: Some(file_path.into()),
            file_size: Some(file_size),
            ..self.clone()
        }
    }

    /// Whether the cut stage has produced a file for this clip.
    pub fn is_cut(&self) -> bool {
        self.file_path.is_some()
    }
}

/// A clip that failed to cut, recorded as a job warning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ClipFailure {
    pub segment_id: u32,
    pub title: String,
    pub message: String,
}

impl std::fmt::Display for ClipFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "clip {} ({}): {}", self.segment_id, self.title, self.message)
    }
}
