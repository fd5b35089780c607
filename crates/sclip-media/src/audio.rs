//! Audio extraction for speech recognition.

use std::path::Path;

use tracing::info;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};

/// Sample rate expected by Whisper models.
pub const SPEECH_SAMPLE_RATE: u32 = 16_000;

/// Build the command extracting 16 kHz mono PCM WAV from `input`.
pub fn audio_command(input: &Path, output: &Path) -> FfmpegCommand {
    FfmpegCommand::new(input, output)
        .no_video()
        .audio_codec("pcm_s16le")
        .audio_sample_rate(SPEECH_SAMPLE_RATE)
        .audio_channels(1)
}

/// Extract the audio track of `input` into `output` as 16 kHz mono WAV.
pub async fn extract_audio(
    runner: &FfmpegRunner,
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
) -> MediaResult<()> {
    let input = input.as_ref();
    let output = output.as_ref();

    if !tokio::fs::try_exists(input).await.unwrap_or(false) {
        return Err(MediaError::FileNotFound(input.to_path_buf()));
    }
    if let Some(parent) = output.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    info!(input = %input.display(), output = %output.display(), "Extracting audio");
    runner.run(&audio_command(input, output)).await
}
