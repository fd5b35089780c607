//! Queue error types.

use thiserror::Error;

use sclip_models::{ParamsError, TransitionError};

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Job still active: {0}")]
    JobActive(String),

    #[error(transparent)]
    Validation(#[from] ParamsError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("Update rejected: {0}")]
    Rejected(String),
}

impl QueueError {
    pub fn job_not_found(id: impl std::fmt::Display) -> Self {
        Self::JobNotFound(id.to_string())
    }

    pub fn rejected(msg: impl Into<String>) -> Self {
        Self::Rejected(msg.into())
    }
}
