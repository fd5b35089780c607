//! Durable storage for the SCLIP clip pipeline.
//!
//! This crate provides:
//! - The content-addressed analysis cache (one JSON file per entry)
//! - Cache key derivation with canonicalized topics
//! - Streaming SHA-256 hashing of video files

pub mod analysis_cache;
pub mod error;
pub mod hash;

pub use analysis_cache::{canonical_topics, AnalysisCache, CacheKey, DEFAULT_MAX_AGE_DAYS};
pub use error::{StorageError, StorageResult};
pub use hash::hash_video_file;
