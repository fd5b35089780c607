//! FFmpeg CLI wrapper for the SCLIP clip pipeline.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building
//! - Progress parsing from `-progress pipe:2`
//! - Cancellation and timeouts via tokio
//! - Clip cutting and audio extraction
//! - Output naming and directory maintenance

pub mod audio;
pub mod clip;
pub mod command;
pub mod error;
pub mod fs_utils;
pub mod progress;

pub use audio::extract_audio;
pub use clip::{cut_clip, EncodingSettings};
pub use command::{check_ffmpeg, FfmpegCommand, FfmpegRunner};
pub use error::{MediaError, MediaResult};
pub use fs_utils::{clip_file_name, cleanup_clip_files, list_clip_files, sanitize_filename, ClipFile};
pub use progress::FfmpegProgress;
