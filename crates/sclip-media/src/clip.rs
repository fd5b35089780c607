//! Clip cutting.

use std::path::Path;

use tracing::info;

use sclip_models::Clip;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};

/// Encoder settings for cut clips.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodingSettings {
    pub video_codec: String,
    pub audio_codec: String,
    pub preset: String,
    pub crf: u8,
    pub audio_bitrate: String,
}

impl Default for EncodingSettings {
    fn default() -> Self {
        Self {
            video_codec: "libx264".to_string(),
            audio_codec: "aac".to_string(),
            preset: "medium".to_string(),
            crf: 23,
            audio_bitrate: "128k".to_string(),
        }
    }
}

/// Build the FFmpeg command that cuts `clip` out of `input`.
pub fn clip_command(
    input: &Path,
    output: &Path,
    clip: &Clip,
    encoding: &EncodingSettings,
) -> MediaResult<FfmpegCommand> {
    let duration = clip.end_time - clip.start_time;
    if !(clip.start_time >= 0.0 && duration > 0.0) {
        return Err(MediaError::InvalidRange(format!(
            "{:.3}s - {:.3}s",
            clip.start_time, clip.end_time
        )));
    }

    Ok(FfmpegCommand::new(input, output)
        .seek(clip.start_time)
        .duration(duration)
        .video_codec(&encoding.video_codec)
        .preset(&encoding.preset)
        .crf(encoding.crf)
        .audio_codec(&encoding.audio_codec)
        .audio_bitrate(&encoding.audio_bitrate)
        .faststart())
}

/// Cut one clip, re-encoding it. Returns the output size in bytes.
pub async fn cut_clip(
    runner: &FfmpegRunner,
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    clip: &Clip,
    encoding: &EncodingSettings,
) -> MediaResult<u64> {
    let input = input.as_ref();
    let output = output.as_ref();

    if !tokio::fs::try_exists(input).await.unwrap_or(false) {
        return Err(MediaError::FileNotFound(input.to_path_buf()));
    }
    if let Some(parent) = output.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let cmd = clip_command(input, output, clip, encoding)?;

    info!(
        segment_id = clip.segment_id,
        start = clip.start_time,
        end = clip.end_time,
        output = %output.display(),
        "Cutting clip"
    );

    runner.run(&cmd).await?;

    let size = tokio::fs::metadata(output).await?.len();
    if size == 0 {
        return Err(MediaError::ffmpeg_failed("FFmpeg produced an empty file", None, None));
    }
    Ok(size)
}
