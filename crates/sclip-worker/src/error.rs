//! Worker error types.

use thiserror::Error;

use sclip_models::{ErrorKind, JobFailure};

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Job failed: {0}")]
    JobFailed(JobFailure),

    #[error("Dependency unavailable: {0}")]
    Dependency(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("No transcript available for job {0}")]
    NoTranscript(String),

    #[error("Job already running: {0}")]
    AlreadyRunning(String),

    #[error("Storage error: {0}")]
    Storage(#[from] sclip_storage::StorageError),

    #[error("Queue error: {0}")]
    Queue(#[from] sclip_queue::QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn job_failed(kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self::JobFailed(JobFailure::new(kind, msg))
    }

    pub fn dependency(msg: impl Into<String>) -> Self {
        Self::Dependency(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }
}
