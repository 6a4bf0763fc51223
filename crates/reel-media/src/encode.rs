//! Frame sequence to video encoding.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, info};

use reel_models::encoding::{DEFAULT_PIXEL_FORMAT, DEFAULT_PRESET, MAX_FPS};
use reel_models::{Codec, Quality, RenderSettings, Resolution};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::metrics::MetricsCollector;
use crate::progress::{MonotonicProgress, ProgressSink};

/// Default wall-clock limit for one encode.
pub const DEFAULT_ENCODE_TIMEOUT_SECS: u64 = 1800;

/// Parameters of one encode call.
#[derive(Debug, Clone)]
pub struct EncodeRequest {
    /// printf-style pattern, e.g. `frames/frame_%06d.png`, numbered from 1
    pub input_pattern: PathBuf,
    pub output_path: PathBuf,
    /// Codec name as received; checked against the allow-list before spawning
    pub codec: String,
    pub quality: Quality,
    pub resolution: Resolution,
    pub fps: u32,
    pub preset: Option<String>,
    /// Frames in the sequence; counted from disk when `None`
    pub total_frames: Option<u64>,
    /// Overrides the encoder's default timeout
    pub timeout_secs: Option<u64>,
}

impl EncodeRequest {
    pub fn new(
        input_pattern: impl Into<PathBuf>,
        output_path: impl Into<PathBuf>,
        settings: &RenderSettings,
    ) -> Self {
        Self {
            input_pattern: input_pattern.into(),
            output_path: output_path.into(),
            codec: settings.codec.as_str().to_string(),
            quality: settings.quality,
            resolution: settings.resolution,
            fps: settings.fps,
            preset: settings.preset.clone(),
            total_frames: None,
            timeout_secs: None,
        }
    }

    pub fn with_total_frames(mut self, total: u64) -> Self {
        self.total_frames = Some(total);
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Check codec, container and frame rate without touching the filesystem.
    pub fn validate(&self) -> MediaResult<Codec> {
        let codec: Codec = self.codec.parse()?;

        let extension = self
            .output_path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        if extension.as_deref() != Some(codec.container()) {
            return Err(MediaError::invalid_input(format!(
                "output {} must use the .{} extension for {}",
                self.output_path.display(),
                codec.container(),
                codec
            )));
        }

        if self.fps == 0 || self.fps > MAX_FPS {
            return Err(MediaError::invalid_input(format!("fps {} out of range", self.fps)));
        }

        Ok(codec)
    }
}

/// Encodes a numbered frame sequence into one video file.
#[async_trait]
pub trait VideoEncoder: Send + Sync {
    /// Encode and return the output path it was given.
    async fn encode(
        &self,
        request: &EncodeRequest,
        on_progress: Option<ProgressSink>,
        cancel: Option<watch::Receiver<bool>>,
    ) -> MediaResult<PathBuf>;
}

/// [`VideoEncoder`] backed by the ffmpeg CLI.
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    timeout_secs: u64,
    metrics: Option<MetricsCollector>,
}

impl Default for FfmpegEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_ENCODE_TIMEOUT_SECS)
    }
}

impl FfmpegEncoder {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            timeout_secs,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn build_command(&self, request: &EncodeRequest, codec: Codec) -> FfmpegCommand {
        let (width, height) = request.resolution.dimensions();
        FfmpegCommand::new(&request.input_pattern, &request.output_path)
            .image_sequence(request.fps, 1)
            .video_filter(format!(
                "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2,setsar=1",
                w = width,
                h = height
            ))
            .output_args(codec_args(codec, request.quality, request.preset.as_deref()))
            .pixel_format(DEFAULT_PIXEL_FORMAT)
            .output_arg("-r")
            .output_arg(request.fps.to_string())
            .no_audio()
    }

    fn record(&self, codec: Codec, status: &str, elapsed_secs: f64) {
        if let Some(metrics) = &self.metrics {
            metrics.increment_counter("encodes_total", &[("codec", codec.as_str()), ("status", status)]);
            metrics.record_histogram("encode_seconds", elapsed_secs, &[("codec", codec.as_str())]);
        }
    }
}

#[async_trait]
impl VideoEncoder for FfmpegEncoder {
    async fn encode(
        &self,
        request: &EncodeRequest,
        on_progress: Option<ProgressSink>,
        cancel: Option<watch::Receiver<bool>>,
    ) -> MediaResult<PathBuf> {
        let codec = request.validate()?;
        let started = Instant::now();

        let total_frames = match request.total_frames {
            Some(total) => total,
            None => count_sequence(&request.input_pattern),
        };

        if let Some(parent) = request.output_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let cmd = self.build_command(request, codec);
        let timeout = request.timeout_secs.unwrap_or(self.timeout_secs);
        let mut runner = FfmpegRunner::new().with_timeout(timeout);
        if let Some(cancel) = cancel {
            runner = runner.with_cancel(cancel);
        }

        info!(
            codec = %codec,
            resolution = %request.resolution,
            fps = request.fps,
            total_frames,
            output = %request.output_path.display(),
            "Encoding video"
        );

        let tracker = Arc::new(Mutex::new(MonotonicProgress::new()));
        let callback_tracker = tracker.clone();
        let callback_sink = on_progress.clone();
        let result = runner
            .run_with_progress(&cmd, move |progress| {
                let percent = progress.frame_percentage(total_frames);
                let advanced = callback_tracker
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .update(percent);
                if let (Some(p), Some(sink)) = (advanced, callback_sink.as_ref()) {
                    sink(p);
                }
            })
            .await;

        if let Err(e) = result {
            self.record(codec, "failed", started.elapsed().as_secs_f64());
            return Err(e);
        }

        let size = match tokio::fs::metadata(&request.output_path).await {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };
        if size == 0 {
            self.record(codec, "failed", started.elapsed().as_secs_f64());
            return Err(MediaError::ffmpeg_failed(
                format!("FFmpeg produced no output at {}", request.output_path.display()),
                None,
                Some(0),
            ));
        }

        let finished = tracker.lock().unwrap_or_else(|e| e.into_inner()).finish();
        if let (Some(p), Some(sink)) = (finished, on_progress.as_ref()) {
            sink(p);
        }

        let elapsed = started.elapsed().as_secs_f64();
        self.record(codec, "completed", elapsed);
        info!(
            codec = %codec,
            size_bytes = size,
            elapsed_secs = format!("{:.2}", elapsed),
            "Encoding complete"
        );

        Ok(request.output_path.clone())
    }
}

/// Encoder arguments for a codec and quality profile.
pub fn codec_args(codec: Codec, quality: Quality, preset: Option<&str>) -> Vec<String> {
    let crf = quality.crf(codec).to_string();
    let mut args = vec!["-c:v".to_string(), codec.ffmpeg_encoder().to_string()];

    match codec {
        Codec::H264 | Codec::H265 => {
            args.extend([
                "-crf".to_string(),
                crf,
                "-preset".to_string(),
                preset.unwrap_or(DEFAULT_PRESET).to_string(),
            ]);
            if codec == Codec::H265 {
                args.extend(["-tag:v".to_string(), "hvc1".to_string()]);
            }
            args.extend(["-movflags".to_string(), "+faststart".to_string()]);
        }
        Codec::Vp9 => {
            let cpu_used = match preset {
                Some("ultrafast" | "superfast" | "veryfast") => "8",
                Some("faster" | "fast") => "5",
                Some("slow" | "slower" | "veryslow") => "1",
                _ => "4",
            };
            args.extend([
                "-crf".to_string(),
                crf,
                "-b:v".to_string(),
                "0".to_string(),
                "-deadline".to_string(),
                "good".to_string(),
                "-cpu-used".to_string(),
                cpu_used.to_string(),
                "-row-mt".to_string(),
                "1".to_string(),
            ]);
        }
    }

    args
}

/// Count consecutive files of a `%0Nd` pattern starting at 1.
pub fn count_sequence(pattern: &Path) -> u64 {
    let Some(name) = pattern.file_name().and_then(|n| n.to_str()) else {
        return 0;
    };
    let Some(start) = name.find('%') else {
        return 0;
    };
    let Some(end) = name[start..].find('d').map(|i| start + i) else {
        return 0;
    };
    let width: usize = name[start + 1..end].trim_start_matches('0').parse().unwrap_or(0);
    let dir = pattern.parent().unwrap_or_else(|| Path::new("."));

    let mut count = 0u64;
    loop {
        let file = format!(
            "{}{:0width$}{}",
            &name[..start],
            count + 1,
            &name[end + 1..],
            width = width
        );
        if !dir.join(file).exists() {
            break;
        }
        count += 1;
    }
    debug!(pattern = %pattern.display(), count, "Counted input frames");
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::{FrameGenerator, FrameGeneratorConfig, FRAME_PATTERN};
    use reel_models::{Background, Slide, SlideContent};

    fn request(dir: &Path, codec: &str, output: &str) -> EncodeRequest {
        let mut req = EncodeRequest::new(
            dir.join(FRAME_PATTERN),
            dir.join(output),
            &RenderSettings::default(),
        );
        req.codec = codec.to_string();
        req
    }

    #[tokio::test]
    async fn test_unknown_codec_rejected_before_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let req = request(dir.path(), "prores", "out/video.mov");

        let result = FfmpegEncoder::default().encode(&req, None, None).await;

        assert!(matches!(result, Err(MediaError::UnsupportedFormat(_))));
        assert!(!dir.path().join("out").exists());
        assert!(!dir.path().join("out/video.mov").exists());
    }

    #[tokio::test]
    async fn test_extension_must_match_container() {
        let dir = tempfile::tempdir().unwrap();
        let req = request(dir.path(), "vp9", "video.mp4");
        let result = FfmpegEncoder::default().encode(&req, None, None).await;
        assert!(matches!(result, Err(MediaError::InvalidInput(_))));
        assert!(!dir.path().join("video.mp4").exists());
    }

    #[test]
    fn test_codec_args() {
        let h264 = codec_args(Codec::H264, Quality::High, Some("ultrafast"));
        assert_eq!(&h264[..2], &["-c:v".to_string(), "libx264".to_string()]);
        assert!(h264.windows(2).any(|w| w[0] == "-crf" && w[1] == "20"));
        assert!(h264.windows(2).any(|w| w[0] == "-preset" && w[1] == "ultrafast"));

        let h265 = codec_args(Codec::H265, Quality::Medium, None);
        assert!(h265.windows(2).any(|w| w[0] == "-tag:v" && w[1] == "hvc1"));

        let vp9 = codec_args(Codec::Vp9, Quality::Low, None);
        assert!(vp9.windows(2).any(|w| w[0] == "-b:v" && w[1] == "0"));
        assert!(!vp9.contains(&"-movflags".to_string()));
    }

    #[test]
    fn test_count_sequence() {
        let dir = tempfile::tempdir().unwrap();
        for i in 1..=7 {
            std::fs::write(dir.path().join(format!("frame_{:06}.png", i)), b"x").unwrap();
        }
        std::fs::write(dir.path().join("frame_000009.png"), b"x").unwrap();
        assert_eq!(count_sequence(&dir.path().join(FRAME_PATTERN)), 7);
        assert_eq!(count_sequence(&dir.path().join("missing_%04d.png")), 0);
    }

    fn write_frames(dir: &Path) -> u64 {
        let gen = FrameGenerator::new(FrameGeneratorConfig {
            width: 320,
            height: 180,
            fps: 30,
            font_path: None,
            threads: 2,
        })
        .unwrap();
        let slides = vec![
            Slide::new("a", 0, 3.0).with_content(SlideContent {
                background: Background::Solid { color: "#884400".into() },
                ..Default::default()
            }),
            Slide::new("b", 1, 2.0).with_content(SlideContent {
                background: Background::Gradient { from: "#000000".into(), to: "#ffffff".into() },
                ..Default::default()
            }),
        ];
        gen.generate(&slides, dir, |_| {}).unwrap().frame_count()
    }

    #[tokio::test]
    #[ignore = "requires ffmpeg"]
    async fn test_encode_all_codecs() {
        let dir = tempfile::tempdir().unwrap();
        let frames = dir.path().join("frames");
        assert_eq!(write_frames(&frames), 150);

        for (codec, ext) in [("h264", "mp4"), ("h265", "mp4"), ("vp9", "webm")] {
            let output = dir.path().join(format!("{}.{}", codec, ext));
            let mut req = EncodeRequest::new(frames.join(FRAME_PATTERN), &output, &RenderSettings::default());
            req.codec = codec.to_string();
            req.resolution = Resolution::P480;
            req.preset = Some("ultrafast".to_string());

            let seen = Arc::new(Mutex::new(Vec::new()));
            let sink_seen = seen.clone();
            let sink: ProgressSink = Arc::new(move |p| sink_seen.lock().unwrap().push(p));

            let path = FfmpegEncoder::default().encode(&req, Some(sink), None).await.unwrap();

            assert_eq!(path, output);
            assert!(std::fs::metadata(&output).unwrap().len() > 0);
            let seen = seen.lock().unwrap();
            assert!(seen.windows(2).all(|w| w[0] <= w[1]), "{:?}", *seen);
            assert_eq!(*seen.last().unwrap(), 100);
        }
    }

    #[tokio::test]
    #[ignore = "requires ffmpeg"]
    async fn test_missing_frames_fail() {
        let dir = tempfile::tempdir().unwrap();
        let req = request(dir.path(), "h264", "video.mp4");
        let result = FfmpegEncoder::default().encode(&req, None, None).await;
        assert!(matches!(result, Err(MediaError::FfmpegFailed { .. })));
    }
}
