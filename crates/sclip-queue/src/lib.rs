//! In-process job tracking for the SCLIP clip pipeline.
//!
//! This crate provides:
//! - `JobRegistry`: the concurrency-safe table of job records
//! - `ProgressBroadcaster`: per-job publish/subscribe of progress events

pub mod error;
pub mod progress;
pub mod registry;

pub use error::{QueueError, QueueResult};
pub use progress::{ProgressBroadcaster, Subscription, DEFAULT_CHANNEL_CAPACITY};
pub use registry::JobRegistry;
