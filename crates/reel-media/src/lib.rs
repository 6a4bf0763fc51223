//! Frame synthesis, FFmpeg encoding and preview artifacts.
//!
//! This crate provides:
//! - Slide-to-PNG frame generation on a bounded rayon pool
//! - Type-safe FFmpeg command building and a supervised runner
//! - Progress parsing from `-progress pipe:2`
//! - Cancellation and timeouts that kill the encoder's process group
//! - Thumbnail extraction, quality scoring, scene detection and sprite sheets

pub mod command;
pub mod encode;
pub mod error;
pub mod extract;
pub mod frames;
pub mod metrics;
pub mod probe;
pub mod progress;
pub mod quality;
pub mod scene;
pub mod sprite;
pub mod thumbnail;

pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use encode::{EncodeRequest, FfmpegEncoder, VideoEncoder, DEFAULT_ENCODE_TIMEOUT_SECS};
pub use error::{MediaError, MediaResult};
pub use extract::{FfmpegFrameExtractor, FrameExtractor};
pub use frames::{FrameGeneration, FrameGenerator, FrameGeneratorConfig, SlideWarning, FRAME_PATTERN};
pub use metrics::{MetricValue, MetricsCollector};
pub use probe::{probe_video, VideoInfo};
pub use progress::{FfmpegProgress, MonotonicProgress, ProgressSink};
pub use quality::analyze_image;
pub use scene::SceneDetector;
pub use sprite::{build_sprite, SpriteCell};
pub use thumbnail::{
    StoryboardOptions, ThumbnailEvent, ThumbnailGenerator, ThumbnailOptions, ThumbnailSet,
};
