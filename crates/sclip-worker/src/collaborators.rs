//! Collaborator contracts for the three pipeline stages.
//!
//! The executor only sees these traits. Adapters for Whisper, Ollama and
//! FFmpeg live in their own modules; tests substitute mocks or fakes.

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;

use sclip_models::{Clip, JobId, JobParams, Transcript, VideoRef};

/// Read side of a job's cancellation flag.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    pub fn new(rx: watch::Receiver<bool>) -> Self {
        Self { rx }
    }

    /// A signal that never fires.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Underlying receiver, for handing to process runners.
    pub fn receiver(&self) -> watch::Receiver<bool> {
        self.rx.clone()
    }

    /// Resolves once cancellation is requested.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                // Sender dropped without cancelling
                return std::future::pending().await;
            }
        }
    }
}

/// Write side of a job's cancellation flag.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Create a linked cancellation handle and signal.
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelSignal::new(rx))
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TranscribeError {
    #[error("Transcription model not found: {0}")]
    ModelNotFound(String),

    #[error("Transcription process failed: {0}")]
    Process(String),

    #[error("Transcription cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnalyzeError {
    #[error("Analyzer connection failed: {0}")]
    Connection(String),

    #[error("Analyzer timed out after {0} seconds")]
    Timeout(u64),

    #[error("Malformed analyzer response: {0}")]
    MalformedResponse(String),

    #[error("Analysis cancelled")]
    Cancelled,
}

impl AnalyzeError {
    /// Transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AnalyzeError::Connection(_) | AnalyzeError::Timeout(_) | AnalyzeError::MalformedResponse(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CutError {
    #[error("Encoding failed: {0}")]
    Encoding(String),

    #[error("Cut cancelled")]
    Cancelled,
}

/// File produced for one clip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CutOutput {
    pub file_path: PathBuf,
    pub file_size: u64,
}

/// Speech-to-text for a whole video.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, video: &VideoRef, cancel: CancelSignal) -> Result<Transcript, TranscribeError>;

    /// Verify the engine is installed and usable.
    async fn check(&self) -> Result<(), String>;
}

/// Picks clip candidates from a transcript.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(
        &self,
        transcript: &Transcript,
        params: &JobParams,
        cancel: CancelSignal,
    ) -> Result<Vec<Clip>, AnalyzeError>;

    async fn check(&self) -> Result<(), String>;
}

/// Renders one clip to a file.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Cutter: Send + Sync {
    async fn cut(
        &self,
        job_id: &JobId,
        video: &VideoRef,
        clip: &Clip,
        cancel: CancelSignal,
    ) -> Result<CutOutput, CutError>;

    async fn check(&self) -> Result<(), String>;
}
