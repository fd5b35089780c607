//! FFmpeg clip cutter.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use sclip_media::{check_ffmpeg, clip_file_name, cut_clip, EncodingSettings, FfmpegRunner, MediaError};
use sclip_models::{Clip, JobId, VideoRef};

use crate::collaborators::{CancelSignal, CutError, CutOutput, Cutter};
use crate::config::WorkerConfig;

/// Cuts clips with FFmpeg into `<output_dir>/<video stem>_<job id>/`.
#[derive(Debug, Clone)]
pub struct FfmpegCutter {
    ffmpeg_bin: PathBuf,
    output_dir: PathBuf,
    encoding: EncodingSettings,
}

impl FfmpegCutter {
    pub fn new(ffmpeg_bin: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_bin: ffmpeg_bin.into(),
            output_dir: output_dir.into(),
            encoding: EncodingSettings::default(),
        }
    }

    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new(&config.ffmpeg_bin, &config.output_dir)
    }

    pub fn with_encoding(mut self, encoding: EncodingSettings) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Directory holding one job's clips.
    pub fn job_dir(&self, job_id: &JobId, video: &VideoRef) -> PathBuf {
        self.output_dir.join(format!("{}_{}", video.stem(), job_id))
    }
}

#[async_trait]
impl Cutter for FfmpegCutter {
    async fn cut(
        &self,
        job_id: &JobId,
        video: &VideoRef,
        clip: &Clip,
        cancel: CancelSignal,
    ) -> Result<CutOutput, CutError> {
        let output = self
            .job_dir(job_id, video)
            .join(clip_file_name(clip.segment_id, &clip.title));
        let runner = FfmpegRunner::new()
            .with_binary(&self.ffmpeg_bin)
            .with_cancel(cancel.receiver());

        match cut_clip(&runner, video.path(), &output, clip, &self.encoding).await {
            Ok(file_size) => {
                debug!(output = %output.display(), file_size, "Clip written");
                Ok(CutOutput {
                    file_path: output,
                    file_size,
                })
            }
            Err(MediaError::Cancelled) => {
                // Remove the partial file; a missing file is fine
                let _ = tokio::fs::remove_file(&output).await;
                Err(CutError::Cancelled)
            }
            Err(e) => Err(CutError::Encoding(e.detail())),
        }
    }

    async fn check(&self) -> Result<(), String> {
        check_ffmpeg(&self.ffmpeg_bin).map(|_| ()).map_err(|e| e.to_string())
    }
}
