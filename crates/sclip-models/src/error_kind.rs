//! Public error taxonomy for jobs.
//!
//! Callers only ever see a job's kind and message; the concrete error types
//! of each crate are mapped onto these kinds at the executor boundary.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Kind of failure attached to a job in `error` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed parameters; the job is never created
    Validation,
    /// A required external tool is unavailable
    Dependency,
    TranscriptionFailed,
    AnalysisFailed,
    /// Every planned clip failed to cut
    CuttingFailed,
    Cancelled,
    /// Recovered locally as a cache miss, never attached to a job
    CacheCorrupt,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Dependency => "dependency",
            ErrorKind::TranscriptionFailed => "transcription_failed",
            ErrorKind::AnalysisFailed => "analysis_failed",
            ErrorKind::CuttingFailed => "cutting_failed",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::CacheCorrupt => "cache_corrupt",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error detail stored on a failed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct JobFailure {
    pub kind: ErrorKind,
    /// Human-readable message
    pub message: String,
}

impl JobFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for JobFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_serialization() {
        assert_eq!(
            serde_json::to_string(&ErrorKind::TranscriptionFailed).unwrap(),
            "\"transcription_failed\""
        );
        assert_eq!(ErrorKind::CuttingFailed.to_string(), "cutting_failed");
    }

    #[test]
    fn test_failure_display() {
        let failure = JobFailure::new(ErrorKind::Cancelled, "Cancelled by user");
        assert_eq!(failure.to_string(), "cancelled: Cancelled by user");
    }
}
