//! Worker configuration.

use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

use crate::eta::StageWeights;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum concurrently running jobs; further jobs stay queued
    pub max_concurrent_jobs: usize,
    /// Maximum concurrent cut invocations across all jobs
    pub max_cut_processes: usize,
    /// Optional per-job timeout, enforced by cancelling the job
    pub job_timeout: Option<Duration>,
    /// Work directory for temporary files
    pub work_dir: PathBuf,
    /// Root directory for cut clips
    pub output_dir: PathBuf,
    /// Analysis cache directory
    pub cache_dir: PathBuf,
    /// Maximum analysis cache entry age
    pub cache_max_age: chrono::Duration,
    /// Stage weights for progress and ETA
    pub stage_weights: StageWeights,
    /// Baseline total job duration used before any stage has finished
    pub baseline_total: Duration,
    /// Whisper CLI binary
    pub whisper_bin: String,
    /// Whisper model name or path
    pub whisper_model: String,
    /// FFmpeg binary
    pub ffmpeg_bin: String,
    /// Ollama base URL
    pub ollama_url: String,
    /// Ollama model
    pub ollama_model: String,
    /// Ollama request timeout
    pub ollama_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 2,
            max_cut_processes: 2,
            job_timeout: None,
            work_dir: PathBuf::from("/tmp/sclip"),
            output_dir: PathBuf::from("output"),
            cache_dir: PathBuf::from("cache"),
            cache_max_age: chrono::Duration::days(sclip_storage::DEFAULT_MAX_AGE_DAYS),
            stage_weights: StageWeights::default(),
            baseline_total: Duration::from_secs(300),
            whisper_bin: "whisper".to_string(),
            whisper_model: "medium".to_string(),
            ffmpeg_bin: "ffmpeg".to_string(),
            ollama_url: "http://localhost:11434".to_string(),
            ollama_model: "mistral:latest".to_string(),
            ollama_timeout: Duration::from_secs(300),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let stage_weights = match std::env::var("SCLIP_STAGE_WEIGHTS") {
            Ok(raw) => StageWeights::parse(&raw).unwrap_or_else(|e| {
                warn!(value = %raw, error = %e, "Ignoring invalid SCLIP_STAGE_WEIGHTS");
                StageWeights::default()
            }),
            Err(_) => StageWeights::default(),
        };

        Self {
            max_concurrent_jobs: env_parse("SCLIP_MAX_JOBS")
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.max_concurrent_jobs),
            max_cut_processes: env_parse("SCLIP_MAX_CUT_PROCESSES")
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.max_cut_processes),
            job_timeout: env_parse::<u64>("SCLIP_JOB_TIMEOUT")
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            work_dir: std::env::var("SCLIP_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            output_dir: std::env::var("SCLIP_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            cache_dir: std::env::var("SCLIP_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_dir),
            cache_max_age: env_parse::<i64>("SCLIP_CACHE_MAX_AGE_DAYS")
                .filter(|d| *d > 0)
                .map(chrono::Duration::days)
                .unwrap_or(defaults.cache_max_age),
            stage_weights,
            baseline_total: env_parse::<u64>("SCLIP_BASELINE_SECS")
                .filter(|s| *s > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.baseline_total),
            whisper_bin: std::env::var("SCLIP_WHISPER_BIN").unwrap_or(defaults.whisper_bin),
            whisper_model: std::env::var("SCLIP_WHISPER_MODEL").unwrap_or(defaults.whisper_model),
            ffmpeg_bin: std::env::var("SCLIP_FFMPEG_BIN").unwrap_or(defaults.ffmpeg_bin),
            ollama_url: std::env::var("SCLIP_OLLAMA_URL").unwrap_or(defaults.ollama_url),
            ollama_model: std::env::var("SCLIP_OLLAMA_MODEL").unwrap_or(defaults.ollama_model),
            ollama_timeout: env_parse::<u64>("SCLIP_OLLAMA_TIMEOUT")
                .map(Duration::from_secs)
                .unwrap_or(defaults.ollama_timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.max_concurrent_jobs, 2);
        assert_eq!(config.cache_max_age, chrono::Duration::days(30));
        assert!(config.job_timeout.is_none());
        assert_eq!(config.stage_weights, StageWeights::default());
    }
}
