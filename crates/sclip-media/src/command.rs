//! FFmpeg command builder and runner.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{MediaError, MediaResult};
use crate::progress::{is_progress_line, FfmpegProgress};

/// Lines of non-progress stderr kept for error reports.
const STDERR_TAIL_LINES: usize = 20;

/// Builder for FFmpeg commands.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    /// Input file path
    input: PathBuf,
    /// Output file path
    output: PathBuf,
    /// Input arguments (before -i)
    input_args: Vec<String>,
    /// Output arguments (after -i)
    output_args: Vec<String>,
    /// Whether to overwrite output
    overwrite: bool,
    /// Log level
    log_level: String,
}

impl FfmpegCommand {
    /// Create a new FFmpeg command.
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            input_args: Vec::new(),
            output_args: Vec::new(),
            overwrite: true,
            log_level: "error".to_string(),
        }
    }

    /// Add an input argument (before -i).
    pub fn input_arg(mut self, arg: impl Into<String>) -> Self {
        self.input_args.push(arg.into());
        self
    }

    /// Add an output argument (after -i).
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Add multiple output arguments.
    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Seek before decoding (fast, keyframe-accurate with re-encode).
    pub fn seek(self, seconds: f64) -> Self {
        self.input_arg("-ss").input_arg(format!("{:.3}", seconds))
    }

    /// Limit the output duration.
    pub fn duration(self, seconds: f64) -> Self {
        self.output_arg("-t").output_arg(format!("{:.3}", seconds))
    }

    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:v").output_arg(codec)
    }

    pub fn audio_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:a").output_arg(codec)
    }

    pub fn crf(self, crf: u8) -> Self {
        self.output_arg("-crf").output_arg(crf.to_string())
    }

    pub fn preset(self, preset: impl Into<String>) -> Self {
        self.output_arg("-preset").output_arg(preset)
    }

    pub fn audio_bitrate(self, bitrate: impl Into<String>) -> Self {
        self.output_arg("-b:a").output_arg(bitrate)
    }

    /// Drop the video stream.
    pub fn no_video(self) -> Self {
        self.output_arg("-vn")
    }

    pub fn audio_sample_rate(self, hz: u32) -> Self {
        self.output_arg("-ar").output_arg(hz.to_string())
    }

    pub fn audio_channels(self, channels: u8) -> Self {
        self.output_arg("-ac").output_arg(channels.to_string())
    }

    /// Move the moov atom to the front for progressive playback.
    pub fn faststart(self) -> Self {
        self.output_arg("-movflags").output_arg("+faststart")
    }

    /// Set log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    pub fn output_path(&self) -> &Path {
        &self.output
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if self.overwrite {
            args.push("-y".to_string());
        }

        args.push("-v".to_string());
        args.push(self.log_level.clone());

        // Progress output to stderr
        args.push("-progress".to_string());
        args.push("pipe:2".to_string());

        args.extend(self.input_args.clone());

        args.push("-i".to_string());
        args.push(self.input.to_string_lossy().to_string());

        args.extend(self.output_args.clone());

        args.push(self.output.to_string_lossy().to_string());

        args
    }
}

/// Runner for FFmpeg commands with progress tracking and cancellation.
#[derive(Debug, Clone)]
pub struct FfmpegRunner {
    /// FFmpeg binary name or path
    binary: PathBuf,
    /// Cancellation signal receiver
    cancel_rx: Option<watch::Receiver<bool>>,
    /// Timeout in seconds
    timeout_secs: Option<u64>,
}

impl Default for FfmpegRunner {
    fn default() -> Self {
        Self::new()
    }
}

enum Outcome {
    Exited(std::io::Result<std::process::ExitStatus>),
    Cancelled,
    TimedOut(u64),
}

impl FfmpegRunner {
    /// Create a new runner using `ffmpeg` from PATH.
    pub fn new() -> Self {
        Self {
            binary: PathBuf::from("ffmpeg"),
            cancel_rx: None,
            timeout_secs: None,
        }
    }

    /// Use a specific FFmpeg binary.
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Set cancellation signal. The process is killed when it flips to `true`.
    pub fn with_cancel(mut self, cancel_rx: watch::Receiver<bool>) -> Self {
        self.cancel_rx = Some(cancel_rx);
        self
    }

    /// Set timeout.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Run an FFmpeg command.
    pub async fn run(&self, cmd: &FfmpegCommand) -> MediaResult<()> {
        self.run_with_progress(cmd, |_| {}).await
    }

    /// Run an FFmpeg command with progress callback.
    pub async fn run_with_progress<F>(&self, cmd: &FfmpegCommand, progress_callback: F) -> MediaResult<()>
    where
        F: Fn(FfmpegProgress) + Send + 'static,
    {
        if self.is_cancelled() {
            return Err(MediaError::Cancelled);
        }

        let binary = which::which(&self.binary)
            .map_err(|_| MediaError::FfmpegNotFound(self.binary.display().to_string()))?;

        let args = cmd.build_args();
        debug!("Running FFmpeg: {} {}", binary.display(), args.join(" "));

        let mut child = Command::new(&binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::internal("FFmpeg stderr not captured"))?;
        let mut reader = BufReader::new(stderr).lines();

        // Parse progress and keep the tail of everything else
        let stderr_handle = tokio::spawn(async move {
            let mut current = FfmpegProgress::default();
            let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);

            while let Ok(Some(line)) = reader.next_line().await {
                if is_progress_line(&line) {
                    if let Some(progress) = current.apply_line(&line) {
                        progress_callback(progress);
                    }
                } else if !line.trim().is_empty() {
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
            }
            Vec::from(tail).join("\n")
        });

        let result = self.wait_for_completion(&mut child).await;
        let stderr_tail = stderr_handle.await.unwrap_or_default();

        match result {
            Err(MediaError::FfmpegFailed { message, exit_code, .. }) => Err(MediaError::ffmpeg_failed(
                message,
                Some(stderr_tail),
                exit_code,
            )),
            other => other,
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel_rx.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }

    /// Wait for child process with cancellation and timeout.
    async fn wait_for_completion(&self, child: &mut Child) -> MediaResult<()> {
        let outcome = tokio::select! {
            status = child.wait() => Outcome::Exited(status),
            _ = wait_cancelled(self.cancel_rx.clone()) => Outcome::Cancelled,
            secs = wait_timeout(self.timeout_secs) => Outcome::TimedOut(secs),
        };

        match outcome {
            Outcome::Exited(status) => {
                let status = status?;
                if status.success() {
                    Ok(())
                } else {
                    Err(MediaError::ffmpeg_failed(
                        "FFmpeg exited with non-zero status",
                        None,
                        status.code(),
                    ))
                }
            }
            Outcome::Cancelled => {
                info!("FFmpeg cancelled, killing process");
                let _ = child.kill().await;
                Err(MediaError::Cancelled)
            }
            Outcome::TimedOut(secs) => {
                warn!("FFmpeg timed out after {} seconds, killing process", secs);
                let _ = child.kill().await;
                Err(MediaError::Timeout(secs))
            }
        }
    }
}

/// Resolves once the flag is `true`; never resolves without a receiver.
async fn wait_cancelled(cancel_rx: Option<watch::Receiver<bool>>) {
    let Some(mut rx) = cancel_rx else {
        return std::future::pending().await;
    };
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            // Sender gone without cancelling
            return std::future::pending().await;
        }
    }
}

async fn wait_timeout(timeout_secs: Option<u64>) -> u64 {
    match timeout_secs {
        Some(secs) => {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            secs
        }
        None => std::future::pending().await,
    }
}

/// Check if FFmpeg is available.
pub fn check_ffmpeg(binary: impl AsRef<Path>) -> MediaResult<PathBuf> {
    let binary = binary.as_ref();
    which::which(binary).map_err(|_| MediaError::FfmpegNotFound(binary.display().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_builder() {
        let cmd = FfmpegCommand::new("input.mp4", "output.mp4")
            .seek(10.0)
            .duration(30.0)
            .video_codec("libx264")
            .crf(23);

        let args = cmd.build_args();
        let input_pos = args.iter().position(|a| a == "-i").unwrap();
        let seek_pos = args.iter().position(|a| a == "-ss").unwrap();
        let dur_pos = args.iter().position(|a| a == "-t").unwrap();

        assert!(seek_pos < input_pos);
        assert!(dur_pos > input_pos);
        assert!(args.contains(&"10.000".to_string()));
        assert!(args.contains(&"libx264".to_string()));
        assert_eq!(args.last().unwrap(), "output.mp4");
    }

    #[tokio::test]
    async fn test_missing_binary_reported() {
        let runner = FfmpegRunner::new().with_binary("definitely-not-ffmpeg-sclip");
        let cmd = FfmpegCommand::new("in.mp4", "out.mp4");
        let err = runner.run(&cmd).await.unwrap_err();
        assert!(matches!(err, MediaError::FfmpegNotFound(_)));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        let runner = FfmpegRunner::new().with_cancel(rx);
        let err = runner.run(&FfmpegCommand::new("in.mp4", "out.mp4")).await.unwrap_err();
        assert!(matches!(err, MediaError::Cancelled));
    }

    #[tokio::test]
    async fn test_wait_cancelled_resolves_on_flip() {
        let (tx, rx) = watch::channel(false);
        let waiter = tokio::spawn(wait_cancelled(Some(rx)));
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
