//! FFmpeg progress parsing and monotonic percentage reporting.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Progress information from FFmpeg.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FfmpegProgress {
    /// Current frame number
    pub frame: u64,
    /// Current FPS
    pub fps: f64,
    /// Output time in milliseconds
    pub out_time_ms: i64,
    /// Output time as string (HH:MM:SS.microseconds)
    pub out_time: String,
    /// Encoding speed (e.g., 1.5 = 1.5x realtime)
    pub speed: f64,
    /// Whether encoding is complete
    pub is_complete: bool,
}

impl FfmpegProgress {
    /// Percentage of `total_frames` encoded so far, 0-100.
    pub fn frame_percentage(&self, total_frames: u64) -> u8 {
        if self.is_complete {
            return 100;
        }
        if total_frames == 0 {
            return 0;
        }
        ((self.frame.min(total_frames) * 100) / total_frames) as u8
    }

    /// Percentage of `total_duration_ms` written so far.
    pub fn percentage(&self, total_duration_ms: i64) -> f64 {
        if total_duration_ms <= 0 {
            return 0.0;
        }
        ((self.out_time_ms as f64 / total_duration_ms as f64) * 100.0).clamp(0.0, 100.0)
    }

    /// Estimate time remaining in seconds.
    pub fn eta_seconds(&self, total_duration_ms: i64) -> Option<f64> {
        if self.speed <= 0.0 || self.out_time_ms <= 0 {
            return None;
        }

        let remaining_ms = total_duration_ms - self.out_time_ms;
        if remaining_ms <= 0 {
            return Some(0.0);
        }

        Some((remaining_ms as f64 / 1000.0) / self.speed)
    }
}

/// Callback type for raw FFmpeg progress updates.
pub type ProgressCallback = Box<dyn Fn(FfmpegProgress) + Send + 'static>;

/// Shared percentage sink (0-100) handed to long-running stages.
pub type ProgressSink = Arc<dyn Fn(u8) + Send + Sync + 'static>;

/// Clamps a stream of percentages so it never decreases.
#[derive(Debug, Default, Clone)]
pub struct MonotonicProgress {
    last: Option<u8>,
}

impl MonotonicProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a parsed value; returns the value to report when it advanced.
    pub fn update(&mut self, value: u8) -> Option<u8> {
        let value = value.min(100);
        match self.last {
            Some(last) if value <= last => None,
            _ => {
                self.last = Some(value);
                Some(value)
            }
        }
    }

    /// Force 100 unless it was already reported.
    pub fn finish(&mut self) -> Option<u8> {
        self.update(100)
    }

    pub fn last(&self) -> u8 {
        self.last.unwrap_or(0)
    }
}

/// Parse one line of `-progress pipe:2` output into `current`.
///
/// Returns a snapshot at the end of each key/value block (`progress=...`).
pub fn parse_progress_line(line: &str, current: &mut FfmpegProgress) -> Option<FfmpegProgress> {
    let (key, value) = line.trim().split_once('=')?;
    let value = value.trim();

    match key.trim() {
        "out_time_ms" | "out_time_us" => {
            // Both keys carry microseconds in practice
            if let Ok(us) = value.parse::<i64>() {
                current.out_time_ms = us / 1000;
            }
        }
        "out_time" => current.out_time = value.to_string(),
        "frame" => {
            if let Ok(frame) = value.parse() {
                current.frame = frame;
            }
        }
        "fps" => {
            if let Ok(fps) = value.parse() {
                current.fps = fps;
            }
        }
        "speed" => {
            if let Some(speed) = value.strip_suffix('x').and_then(|s| s.trim().parse().ok()) {
                current.speed = speed;
            }
        }
        "progress" => {
            if value == "end" {
                current.is_complete = true;
            }
            return Some(current.clone());
        }
        _ => {}
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_percentage() {
        let progress = FfmpegProgress {
            frame: 75,
            ..Default::default()
        };
        assert_eq!(progress.frame_percentage(150), 50);
        assert_eq!(progress.frame_percentage(0), 0);

        let over = FfmpegProgress {
            frame: 400,
            ..Default::default()
        };
        assert_eq!(over.frame_percentage(150), 100);
    }

    #[test]
    fn test_eta_calculation() {
        let progress = FfmpegProgress {
            out_time_ms: 5000,
            speed: 2.0,
            ..Default::default()
        };

        let eta = progress.eta_seconds(10000).unwrap();
        assert!((eta - 2.5).abs() < 0.01);
        assert!((progress.percentage(10000) - 50.0).abs() < 0.01);
    }

    #[test]
    fn test_monotonic_clamps_out_of_order_ticks() {
        let mut tracker = MonotonicProgress::new();
        let reported: Vec<u8> = [0u8, 10, 30, 20, 30, 55, 250]
            .into_iter()
            .filter_map(|v| tracker.update(v))
            .collect();
        assert_eq!(reported, vec![0, 10, 30, 55, 100]);
        assert_eq!(tracker.finish(), None);
        assert_eq!(tracker.last(), 100);
    }

    #[test]
    fn test_progress_block_parsing() {
        let mut progress = FfmpegProgress::default();
        let block = [
            "frame=42",
            "fps=24.0",
            "out_time_us=1750000",
            "out_time=00:00:01.750000",
            "speed=1.5x",
            "progress=continue",
        ];

        let mut snapshots = block
            .iter()
            .filter_map(|line| parse_progress_line(line, &mut progress));
        let snapshot = snapshots.next().unwrap();
        assert_eq!(snapshot.frame, 42);
        assert_eq!(snapshot.out_time_ms, 1750);
        assert!((snapshot.speed - 1.5).abs() < 0.01);
        assert!(!snapshot.is_complete);

        let end = parse_progress_line("progress=end", &mut progress).unwrap();
        assert!(end.is_complete);
        assert!(parse_progress_line("speed=N/A", &mut progress).is_none());
        assert!(parse_progress_line("[libx264 @ 0x1] frame I:1", &mut progress).is_none());
    }
}
