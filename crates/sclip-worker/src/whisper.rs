//! Whisper CLI transcriber.
//!
//! Extracts a 16 kHz mono WAV with FFmpeg, runs the `whisper` CLI with JSON
//! output into a scratch directory, and reads the segments back.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info};

use sclip_media::{check_ffmpeg, extract_audio, FfmpegRunner, MediaError};
use sclip_models::{Transcript, TranscriptSegment, VideoRef};

use crate::collaborators::{CancelSignal, TranscribeError, Transcriber};
use crate::config::WorkerConfig;

/// Transcriber backed by the `whisper` command-line tool.
#[derive(Debug, Clone)]
pub struct WhisperTranscriber {
    whisper_bin: PathBuf,
    model: String,
    ffmpeg_bin: PathBuf,
    work_dir: PathBuf,
}

/// Shape of the `--output_format json` file.
#[derive(Debug, Deserialize)]
struct WhisperOutput {
    #[serde(default)]
    text: String,
    #[serde(default)]
    segments: Vec<WhisperSegment>,
    #[serde(default)]
    language: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WhisperSegment {
    start: f64,
    end: f64,
    text: String,
}

impl WhisperTranscriber {
    pub fn new(
        whisper_bin: impl Into<PathBuf>,
        model: impl Into<String>,
        ffmpeg_bin: impl Into<PathBuf>,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            whisper_bin: whisper_bin.into(),
            model: model.into(),
            ffmpeg_bin: ffmpeg_bin.into(),
            work_dir: work_dir.into(),
        }
    }

    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new(
            &config.whisper_bin,
            &config.whisper_model,
            &config.ffmpeg_bin,
            &config.work_dir,
        )
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Resolve the whisper binary and, for path-like models, the model file.
    fn locate(&self) -> Result<PathBuf, TranscribeError> {
        let binary = which::which(&self.whisper_bin).map_err(|_| {
            TranscribeError::ModelNotFound(format!("whisper binary '{}' not found", self.whisper_bin.display()))
        })?;
        let model_path = Path::new(&self.model);
        if looks_like_path(&self.model) && !model_path.exists() {
            return Err(TranscribeError::ModelNotFound(format!(
                "model file {} does not exist",
                model_path.display()
            )));
        }
        Ok(binary)
    }

    async fn run_whisper(
        &self,
        binary: &Path,
        audio: &Path,
        out_dir: &Path,
        cancel: &CancelSignal,
    ) -> Result<(), TranscribeError> {
        let mut child = Command::new(binary)
            .arg(audio)
            .args(["--model", &self.model])
            .args(["--output_format", "json"])
            .arg("--output_dir")
            .arg(out_dir)
            .args(["--fp16", "False", "--verbose", "False"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TranscribeError::Process(format!("failed to spawn whisper: {}", e)))?;

        let stderr = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(mut stderr) = stderr {
                use tokio::io::AsyncReadExt;
                let _ = stderr.read_to_string(&mut buf).await;
            }
            buf
        });

        let status = tokio::select! {
            status = child.wait() => status.map_err(|e| TranscribeError::Process(e.to_string()))?,
            _ = cancel.cancelled() => {
                info!("Whisper cancelled, killing process");
                let _ = child.kill().await;
                return Err(TranscribeError::Cancelled);
            }
        };

        if status.success() {
            return Ok(());
        }
        let stderr = stderr_task.await.unwrap_or_default();
        let tail: Vec<&str> = stderr.lines().rev().take(10).collect();
        let tail = tail.into_iter().rev().collect::<Vec<_>>().join("\n");
        if tail.contains("not found") && tail.to_lowercase().contains("model") {
            return Err(TranscribeError::ModelNotFound(tail));
        }
        Err(TranscribeError::Process(format!("whisper exited with {}: {}", status, tail)))
    }
}

fn looks_like_path(model: &str) -> bool {
    model.contains('/') || model.ends_with(".pt")
}

/// Parse whisper's JSON output.
fn parse_output(data: &[u8]) -> Result<Transcript, TranscribeError> {
    let output: WhisperOutput = serde_json::from_slice(data)
        .map_err(|e| TranscribeError::Process(format!("unreadable whisper output: {}", e)))?;

    let segments: Vec<TranscriptSegment> = output
        .segments
        .into_iter()
        .map(|s| TranscriptSegment {
            start: s.start,
            end: s.end,
            text: s.text.trim().to_string(),
        })
        .collect();

    let text = if output.text.trim().is_empty() {
        segments.iter().map(|s| s.text.as_str()).collect::<Vec<_>>().join(" ")
    } else {
        output.text.trim().to_string()
    };

    Ok(Transcript {
        text,
        segments,
        language: output.language,
    })
}

fn media_error(e: MediaError) -> TranscribeError {
    match e {
        MediaError::Cancelled => TranscribeError::Cancelled,
        other => TranscribeError::Process(format!("audio extraction failed: {}", other.detail())),
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(&self, video: &VideoRef, cancel: CancelSignal) -> Result<Transcript, TranscribeError> {
        let binary = self.locate()?;

        tokio::fs::create_dir_all(&self.work_dir)
            .await
            .map_err(|e| TranscribeError::Process(format!("cannot create work dir: {}", e)))?;
        let scratch = tempfile::Builder::new()
            .prefix("whisper-")
            .tempdir_in(&self.work_dir)
            .map_err(|e| TranscribeError::Process(format!("cannot create scratch dir: {}", e)))?;

        let audio = scratch.path().join("audio.wav");
        let runner = FfmpegRunner::new()
            .with_binary(&self.ffmpeg_bin)
            .with_cancel(cancel.receiver());
        extract_audio(&runner, video.path(), &audio).await.map_err(media_error)?;

        info!(video = %video, model = %self.model, "Running whisper");
        self.run_whisper(&binary, &audio, scratch.path(), &cancel).await?;

        let json_path = scratch.path().join("audio.json");
        let data = tokio::fs::read(&json_path)
            .await
            .map_err(|e| TranscribeError::Process(format!("missing whisper output {}: {}", json_path.display(), e)))?;
        let transcript = parse_output(&data)?;
        debug!(
            "Transcribed {} segments, {} chars",
            transcript.segments.len(),
            transcript.char_len()
        );
        Ok(transcript)
    }

    async fn check(&self) -> Result<(), String> {
        self.locate().map_err(|e| e.to_string())?;
        check_ffmpeg(&self.ffmpeg_bin).map_err(|e| e.to_string())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_output() {
        let json = br#"{
            "text": " Hold the knife. Rock the blade.",
            "segments": [
                {"id": 0, "start": 0.0, "end": 2.5, "text": " Hold the knife."},
                {"id": 1, "start": 2.5, "end": 5.0, "text": " Rock the blade."}
            ],
            "language": "en"
        }"#;
        let transcript = parse_output(json).unwrap();
        assert_eq!(transcript.text, "Hold the knife. Rock the blade.");
        assert_eq!(transcript.segments.len(), 2);
        assert_eq!(transcript.segments[1].text, "Rock the blade.");
        assert_eq!(transcript.language.as_deref(), Some("en"));
    }

    #[test]
    fn test_parse_output_rebuilds_text_from_segments() {
        let json = br#"{"segments": [{"start": 0.0, "end": 1.0, "text": " hi "}, {"start": 1.0, "end": 2.0, "text": "there"}]}"#;
        assert_eq!(parse_output(json).unwrap().text, "hi there");
        assert!(parse_output(b"not json").is_err());
    }

    #[tokio::test]
    async fn test_missing_binary_is_model_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let transcriber = WhisperTranscriber::new("definitely-not-whisper-sclip", "medium", "ffmpeg", dir.path());
        let err = transcriber
            .transcribe(&VideoRef::new("/nope.mp4"), CancelSignal::never())
            .await
            .unwrap_err();
        assert!(matches!(err, TranscribeError::ModelNotFound(_)));
        assert!(transcriber.check().await.is_err());
    }

    #[test]
    fn test_model_path_detection() {
        assert!(looks_like_path("/models/medium.pt"));
        assert!(looks_like_path("large-v3.pt"));
        assert!(!looks_like_path("medium"));
    }
}
