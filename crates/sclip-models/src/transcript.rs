//! Transcript produced by the transcription stage.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A timed span of transcribed speech.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TranscriptSegment {
    /// Start time in seconds
    pub start: f64,
    /// End time in seconds
    pub end: f64,
    /// Spoken text
    pub text: String,
}

/// Full transcript with per-segment timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
pub struct Transcript {
    /// Full transcript text
    pub text: String,
    /// Timed segments, in order
    #[serde(default)]
    pub segments: Vec<TranscriptSegment>,
    /// Detected language code, if reported by the engine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl Transcript {
    pub fn new(text: impl Into<String>, segments: Vec<TranscriptSegment>) -> Self {
        Self {
            text: text.into(),
            segments,
            language: None,
        }
    }

    /// Length used for cache key derivation: Unicode scalar values in `text`.
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }

    /// Render the transcript with `[HH:MM:SS]` markers so the analyzer
    /// can ground clip boundaries in real timestamps.
    pub fn to_timed_text(&self) -> String {
        if self.segments.is_empty() {
            return self.text.clone();
        }
        self.segments
            .iter()
            .map(|s| format!("[{}] {}", format_hms(s.start), s.text.trim()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn format_hms(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    format!("{:02}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}
