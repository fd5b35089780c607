//! Shared data models for the SCLIP clip pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Jobs, their parameters and lifecycle status
//! - Clips and transcripts produced by the pipeline stages
//! - Progress events streamed to subscribers
//! - Analysis cache entries

pub mod cache;
pub mod clip;
pub mod error_kind;
pub mod job;
pub mod job_status;
pub mod profile;
pub mod progress;
pub mod transcript;

// Re-export common types
pub use cache::{AnalysisParams, CacheEntry, CacheEntryMeta};
pub use clip::{Clip, ClipError, ClipFailure};
pub use error_kind::{ErrorKind, JobFailure};
pub use job::{parse_topics, Job, JobId, JobParams, ParamsError, StageSpan, StageTimings, VideoRef};
pub use job_status::{JobStatus, Stage, TransitionError};
pub use profile::OutputProfile;
pub use progress::{ProgressEvent, StageEstimates, StageUpdate, TimeInfo};
pub use transcript::{Transcript, TranscriptSegment};
