//! FFmpeg progress parsing.

use serde::{Deserialize, Serialize};

/// Progress information from FFmpeg.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FfmpegProgress {
    /// Current frame number
    pub frame: u64,
    /// Output time in milliseconds
    pub out_time_ms: i64,
    /// Encoding speed (e.g., 1.5 = 1.5x realtime)
    pub speed: f64,
    /// Whether encoding is complete
    pub is_complete: bool,
}

impl FfmpegProgress {
    /// Fraction of `total_secs` encoded so far, in `[0.0, 1.0]`.
    pub fn fraction(&self, total_secs: f64) -> f64 {
        if total_secs <= 0.0 {
            return 0.0;
        }
        (self.out_time_ms as f64 / 1000.0 / total_secs).clamp(0.0, 1.0)
    }

    /// Parse one `key=value` line of `-progress` output.
    ///
    /// Returns a snapshot at each `progress=` marker, which closes a block.
    pub fn apply_line(&mut self, line: &str) -> Option<FfmpegProgress> {
        let (key, value) = line.trim().split_once('=')?;
        match key {
            "out_time_us" | "out_time_ms" => {
                // FFmpeg reports microseconds under both names
                if let Ok(us) = value.parse::<i64>() {
                    self.out_time_ms = us / 1000;
                }
            }
            "frame" => {
                if let Ok(frame) = value.parse() {
                    self.frame = frame;
                }
            }
            "speed" => {
                if let Some(speed) = value.strip_suffix('x').and_then(|s| s.trim().parse().ok()) {
                    self.speed = speed;
                }
            }
            "progress" => {
                if value == "end" {
                    self.is_complete = true;
                }
                return Some(self.clone());
            }
            _ => {}
        }
        None
    }
}

/// Whether a stderr line belongs to the `-progress` stream.
pub fn is_progress_line(line: &str) -> bool {
    matches!(
        line.split_once('=').map(|(k, _)| k),
        Some(
            "frame" | "fps" | "stream_0_0_q" | "bitrate" | "total_size" | "out_time_us"
                | "out_time_ms" | "out_time" | "dup_frames" | "drop_frames" | "speed"
                | "progress"
        )
    )
}
