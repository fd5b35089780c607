//! Job lifecycle status and pipeline stages.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Job processing status.
///
/// Transitions follow pipeline order (`queued → transcribing → analyzing →
/// cutting → complete`). Stages may be skipped forward, never revisited.
/// `error` is reachable from any non-terminal state and is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Job is waiting for a worker slot
    #[default]
    Queued,
    /// Speech-to-text in progress
    Transcribing,
    /// Content analysis in progress (or served from cache)
    Analyzing,
    /// Clips are being cut
    Cutting,
    /// Job finished with at least one clip
    Complete,
    /// Job failed or was cancelled
    Error,
}

impl JobStatus {
    /// Get string representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Transcribing => "transcribing",
            JobStatus::Analyzing => "analyzing",
            JobStatus::Cutting => "cutting",
            JobStatus::Complete => "complete",
            JobStatus::Error => "error",
        }
    }

    /// Position in the pipeline order. `Error` has no position.
    fn rank(&self) -> Option<u8> {
        match self {
            JobStatus::Queued => Some(0),
            JobStatus::Transcribing => Some(1),
            JobStatus::Analyzing => Some(2),
            JobStatus::Cutting => Some(3),
            JobStatus::Complete => Some(4),
            JobStatus::Error => None,
        }
    }

    /// Check if this is a terminal state (no more updates expected).
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Error)
    }

    /// Check whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self.rank(), next.rank()) {
            (_, None) => true,
            (Some(current), Some(next)) => next > current,
            (None, Some(_)) => false,
        }
    }

    /// The pipeline stage this status represents, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            JobStatus::Transcribing => Some(Stage::Transcribing),
            JobStatus::Analyzing => Some(Stage::Analyzing),
            JobStatus::Cutting => Some(Stage::Cutting),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One of the three pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Transcribing,
    Analyzing,
    Cutting,
}

impl Stage {
    /// All stages in pipeline order.
    pub const ALL: [Stage; 3] = [Stage::Transcribing, Stage::Analyzing, Stage::Cutting];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Transcribing => "transcribing",
            Stage::Analyzing => "analyzing",
            Stage::Cutting => "cutting",
        }
    }

    /// Zero-based position in the pipeline.
    pub fn index(&self) -> usize {
        match self {
            Stage::Transcribing => 0,
            Stage::Analyzing => 1,
            Stage::Cutting => 2,
        }
    }

    /// The job status a job holds while in this stage.
    pub fn status(&self) -> JobStatus {
        match self {
            Stage::Transcribing => JobStatus::Transcribing,
            Stage::Analyzing => JobStatus::Analyzing,
            Stage::Cutting => JobStatus::Cutting,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected status transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Illegal status transition: {from} -> {to}")]
pub struct TransitionError {
    pub from: JobStatus,
    pub to: JobStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions_allowed() {
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Transcribing));
        assert!(JobStatus::Transcribing.can_transition_to(JobStatus::Analyzing));
        assert!(JobStatus::Analyzing.can_transition_to(JobStatus::Cutting));
        assert!(JobStatus::Cutting.can_transition_to(JobStatus::Complete));
        // Resume-from-transcript skips transcription
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Analyzing));
    }

    #[test]
    fn test_regression_rejected() {
        assert!(!JobStatus::Cutting.can_transition_to(JobStatus::Analyzing));
        assert!(!JobStatus::Analyzing.can_transition_to(JobStatus::Analyzing));
        assert!(!JobStatus::Transcribing.can_transition_to(JobStatus::Queued));
    }

    #[test]
    fn test_error_reachable_from_non_terminal_only() {
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Error));
        assert!(JobStatus::Cutting.can_transition_to(JobStatus::Error));
        assert!(!JobStatus::Complete.can_transition_to(JobStatus::Error));
        assert!(!JobStatus::Error.can_transition_to(JobStatus::Error));
        assert!(!JobStatus::Error.can_transition_to(JobStatus::Complete));
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&JobStatus::Transcribing).unwrap();
        assert_eq!(json, "\"transcribing\"");
    }
}
