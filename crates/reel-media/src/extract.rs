//! Single-frame extraction from a video file.

use async_trait::async_trait;
use std::path::Path;
use tracing::debug;

use reel_models::ThumbnailSize;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::probe::{probe_video, VideoInfo};

/// Per-frame extraction timeout.
const EXTRACT_TIMEOUT_SECS: u64 = 60;

/// Source of still frames for thumbnailing.
#[async_trait]
pub trait FrameExtractor: Send + Sync {
    /// Read duration and dimensions; fails for unreadable videos.
    async fn probe(&self, video: &Path) -> MediaResult<VideoInfo>;

    /// Write the frame at `timestamp` seconds, letterboxed to `size`, to `output` (JPEG).
    async fn extract(
        &self,
        video: &Path,
        timestamp: f64,
        size: &ThumbnailSize,
        output: &Path,
    ) -> MediaResult<()>;
}

/// [`FrameExtractor`] backed by ffprobe and ffmpeg.
#[derive(Debug, Clone, Default)]
pub struct FfmpegFrameExtractor;

impl FfmpegFrameExtractor {
    pub fn new() -> Self {
        Self
    }
}

/// Scale-and-pad filter producing exactly `width` x `height`.
pub fn fit_filter(width: u32, height: u32) -> String {
    format!(
        "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2",
        w = width,
        h = height
    )
}

#[async_trait]
impl FrameExtractor for FfmpegFrameExtractor {
    async fn probe(&self, video: &Path) -> MediaResult<VideoInfo> {
        probe_video(video).await
    }

    async fn extract(
        &self,
        video: &Path,
        timestamp: f64,
        size: &ThumbnailSize,
        output: &Path,
    ) -> MediaResult<()> {
        if let Some(parent) = output.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let cmd = FfmpegCommand::new(video, output)
            .seek(timestamp)
            .single_frame()
            .video_filter(fit_filter(size.width, size.height))
            .output_args(["-q:v", "3"]);

        debug!(
            timestamp,
            size = %size.name,
            output = %output.display(),
            "Extracting frame"
        );
        FfmpegRunner::new()
            .with_timeout(EXTRACT_TIMEOUT_SECS)
            .run(&cmd)
            .await?;

        match tokio::fs::metadata(output).await {
            Ok(meta) if meta.len() > 0 => Ok(()),
            _ => Err(MediaError::ffmpeg_failed(
                format!("no frame decoded at {:.3}s", timestamp),
                None,
                Some(0),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_filter() {
        assert_eq!(
            fit_filter(320, 180),
            "scale=320:180:force_original_aspect_ratio=decrease,pad=320:180:(ow-iw)/2:(oh-ih)/2"
        );
    }

    #[tokio::test]
    async fn test_probe_unreadable_video() {
        let extractor = FfmpegFrameExtractor::new();
        let result = extractor.probe(Path::new("/nonexistent/video.mp4")).await;
        assert!(matches!(result, Err(MediaError::FileNotFound(_))));
    }
}
