//! Clip pipeline worker.
//!
//! This crate provides:
//! - The pipeline executor (transcribe, analyze, cut) with cancellation
//! - Progress and ETA estimation
//! - Whisper, Ollama and FFmpeg collaborator adapters
//! - Structured job logging and metrics

pub mod collaborators;
pub mod config;
pub mod cutter;
pub mod error;
pub mod eta;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod ollama;
pub mod retry;
pub mod whisper;

pub use collaborators::{
    cancel_pair, AnalyzeError, Analyzer, CancelHandle, CancelSignal, CutError, CutOutput, Cutter, TranscribeError,
    Transcriber,
};
pub use config::WorkerConfig;
pub use cutter::FfmpegCutter;
pub use error::{WorkerError, WorkerResult};
pub use eta::{StageWeights, TimeEstimator};
pub use executor::{Collaborators, DependencyStatus, PipelineExecutor};
pub use logging::{init_tracing, JobLogger};
pub use ollama::OllamaAnalyzer;
pub use whisper::WhisperTranscriber;
