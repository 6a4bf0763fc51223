//! Thumbnail generation: candidate selection, quality scoring, scene-aware
//! sampling and sprite sheets.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use reel_models::{FrameQuality, Scene, Sprite, Storyboard, Thumbnail, ThumbnailSize};

use crate::error::{MediaError, MediaResult};
use crate::extract::{FfmpegFrameExtractor, FrameExtractor};
use crate::metrics::MetricsCollector;
use crate::quality::analyze_file;
use crate::scene::{sample_timestamps, top_scenes, SceneDetector};
use crate::sprite::{build_sprite, SpriteCell};

/// Resamples tried for a black candidate before it is dropped.
pub const MAX_BLACK_NUDGES: u32 = 3;
/// Nudge step as a fraction of the duration.
const NUDGE_FRACTION: f64 = 0.05;
const MIN_NUDGE_SECS: f64 = 0.5;
/// Keep seeks clear of the last packet.
const END_MARGIN_SECS: f64 = 0.05;

/// Options for [`ThumbnailGenerator::generate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThumbnailOptions {
    /// Number of candidate timestamps; ignored when `timestamp` is set
    pub count: usize,
    /// Single explicit timestamp in seconds
    pub timestamp: Option<f64>,
    /// Sizes extracted per timestamp; empty means medium only
    pub sizes: Vec<ThumbnailSize>,
    pub analyze_quality: bool,
    pub avoid_black: bool,
    pub detect_scenes: bool,
    pub generate_sprite: bool,
    pub output_dir: PathBuf,
}

impl ThumbnailOptions {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            count: 1,
            timestamp: None,
            sizes: vec![ThumbnailSize::medium()],
            analyze_quality: true,
            avoid_black: false,
            detect_scenes: false,
            generate_sprite: false,
            output_dir: output_dir.into(),
        }
    }

    pub fn with_count(mut self, count: usize) -> Self {
        self.count = count;
        self
    }

    pub fn with_timestamp(mut self, timestamp: f64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_sizes(mut self, sizes: Vec<ThumbnailSize>) -> Self {
        self.sizes = sizes;
        self
    }

    pub fn analyze_quality(mut self, enabled: bool) -> Self {
        self.analyze_quality = enabled;
        self
    }

    pub fn avoid_black(mut self, enabled: bool) -> Self {
        self.avoid_black = enabled;
        self
    }

    pub fn detect_scenes(mut self, enabled: bool) -> Self {
        self.detect_scenes = enabled;
        self
    }

    pub fn generate_sprite(mut self, enabled: bool) -> Self {
        self.generate_sprite = enabled;
        self
    }

    fn effective_sizes(&self) -> Vec<ThumbnailSize> {
        if self.sizes.is_empty() {
            vec![ThumbnailSize::medium()]
        } else {
            self.sizes.clone()
        }
    }
}

/// Result of [`ThumbnailGenerator::generate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThumbnailSet {
    pub thumbnails: Vec<Thumbnail>,
    pub scenes: Option<Vec<Scene>>,
    pub sprite: Option<Sprite>,
    pub best_thumbnail: Option<Thumbnail>,
    pub processing_time_ms: u64,
}

/// Storyboard grid layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryboardOptions {
    pub columns: u32,
    pub rows: u32,
    pub thumbnail_size: ThumbnailSize,
}

impl Default for StoryboardOptions {
    fn default() -> Self {
        Self {
            columns: 10,
            rows: 10,
            thumbnail_size: ThumbnailSize::small(),
        }
    }
}

/// Progress notifications. Delivery is best-effort.
#[derive(Debug, Clone, PartialEq)]
pub enum ThumbnailEvent {
    Generated(Thumbnail),
    Skipped { timestamp: f64, reason: String },
    ScenesDetected(usize),
    SpriteGenerated(Sprite),
    Complete { thumbnails: usize, processing_time_ms: u64 },
}

/// Derives thumbnails and preview artifacts from a rendered video.
#[derive(Clone)]
pub struct ThumbnailGenerator {
    extractor: Arc<dyn FrameExtractor>,
    metrics: Option<MetricsCollector>,
    events: Option<mpsc::UnboundedSender<ThumbnailEvent>>,
}

impl Default for ThumbnailGenerator {
    fn default() -> Self {
        Self::new(Arc::new(FfmpegFrameExtractor::new()))
    }
}

impl ThumbnailGenerator {
    pub fn new(extractor: Arc<dyn FrameExtractor>) -> Self {
        Self {
            extractor,
            metrics: None,
            events: None,
        }
    }

    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_events(mut self, events: mpsc::UnboundedSender<ThumbnailEvent>) -> Self {
        self.events = Some(events);
        self
    }

    fn emit(&self, event: ThumbnailEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    /// Generate thumbnails for `video` according to `options`.
    ///
    /// The video is probed first; a probe failure fails the call before any
    /// frame is extracted.
    pub async fn generate(&self, video: &Path, options: &ThumbnailOptions) -> MediaResult<ThumbnailSet> {
        let started = Instant::now();
        if options.timestamp.is_none() && options.count == 0 {
            return Err(MediaError::invalid_input("thumbnail count must be at least 1"));
        }
        let sizes = options.effective_sizes();
        if sizes.iter().any(|s| s.width == 0 || s.height == 0) {
            return Err(MediaError::invalid_input("thumbnail sizes must be non-zero"));
        }

        let info = self.extractor.probe(video).await?;
        let duration = info.duration;
        tokio::fs::create_dir_all(&options.output_dir).await?;

        info!(
            video = %video.display(),
            duration,
            count = options.count,
            sizes = sizes.len(),
            "Generating thumbnails"
        );

        let scenes = if options.detect_scenes {
            let scenes = self.detect_scenes(video, duration, &options.output_dir).await?;
            self.emit(ThumbnailEvent::ScenesDetected(scenes.len()));
            Some(scenes)
        } else {
            None
        };

        let timestamps = select_timestamps(options, duration, scenes.as_deref());
        let need_quality = options.analyze_quality || options.avoid_black;
        let mut thumbnails = Vec::with_capacity(timestamps.len() * sizes.len());
        let mut skipped = 0u64;

        for (index, &initial) in timestamps.iter().enumerate() {
            let primary = &sizes[0];
            let primary_path = thumbnail_path(&options.output_dir, index, primary);

            let mut timestamp = initial;
            let mut accepted = None;
            for attempt in 0..=MAX_BLACK_NUDGES {
                if attempt > 0 {
                    timestamp = nudge(initial, attempt, duration);
                }
                self.extractor.extract(video, timestamp, primary, &primary_path).await?;
                let quality = if need_quality {
                    Some(analyze(primary_path.clone()).await?)
                } else {
                    None
                };

                if options.avoid_black && quality.is_some_and(|q| q.is_black) {
                    skipped += 1;
                    debug!(timestamp, attempt, "Black candidate skipped");
                    self.emit(ThumbnailEvent::Skipped {
                        timestamp,
                        reason: "black frame".to_string(),
                    });
                    let _ = tokio::fs::remove_file(&primary_path).await;
                    continue;
                }
                accepted = Some(quality);
                break;
            }

            let Some(quality) = accepted else {
                warn!(timestamp = initial, "Every resample was black, dropping candidate");
                continue;
            };

            let first = Thumbnail {
                timestamp,
                size: primary.clone(),
                path: primary_path,
                quality: if options.analyze_quality { quality } else { None },
            };
            self.emit(ThumbnailEvent::Generated(first.clone()));
            thumbnails.push(first);

            for size in &sizes[1..] {
                let path = thumbnail_path(&options.output_dir, index, size);
                self.extractor.extract(video, timestamp, size, &path).await?;
                let quality = if options.analyze_quality {
                    Some(analyze(path.clone()).await?)
                } else {
                    None
                };
                let thumbnail = Thumbnail {
                    timestamp,
                    size: size.clone(),
                    path,
                    quality,
                };
                self.emit(ThumbnailEvent::Generated(thumbnail.clone()));
                thumbnails.push(thumbnail);
            }
        }

        let best_thumbnail = if options.analyze_quality {
            best_of(&thumbnails).cloned()
        } else {
            None
        };

        let sprite = if options.generate_sprite && !thumbnails.is_empty() {
            let sprite = self.sprite_for(&thumbnails, &sizes, duration, &options.output_dir).await?;
            self.emit(ThumbnailEvent::SpriteGenerated(sprite.clone()));
            Some(sprite)
        } else {
            None
        };

        let processing_time_ms = started.elapsed().as_millis() as u64;
        if let Some(metrics) = &self.metrics {
            metrics.add_counter("thumbnails_generated_total", thumbnails.len() as u64, &[]);
            metrics.add_counter("thumbnails_skipped_total", skipped, &[]);
            metrics.record_histogram("thumbnail_generation_seconds", processing_time_ms as f64 / 1000.0, &[]);
        }
        self.emit(ThumbnailEvent::Complete {
            thumbnails: thumbnails.len(),
            processing_time_ms,
        });
        info!(
            thumbnails = thumbnails.len(),
            skipped,
            processing_time_ms,
            "Thumbnails generated"
        );

        Ok(ThumbnailSet {
            thumbnails,
            scenes,
            sprite,
            best_thumbnail,
            processing_time_ms,
        })
    }

    /// Extract and score one frame at `timestamp`.
    pub async fn generate_single(
        &self,
        video: &Path,
        timestamp: f64,
        output: &Path,
        size: &ThumbnailSize,
    ) -> MediaResult<Thumbnail> {
        let info = self.extractor.probe(video).await?;
        self.single_at(video, clamp_timestamp(timestamp, info.duration), output, size)
            .await
    }

    /// Large frame from the middle of the video.
    pub async fn generate_cover_thumbnail(&self, video: &Path, output: &Path) -> MediaResult<Thumbnail> {
        let info = self.extractor.probe(video).await?;
        let timestamp = clamp_timestamp(info.duration / 2.0, info.duration);
        self.single_at(video, timestamp, output, &ThumbnailSize::large()).await
    }

    /// Small, scene-aware previews for hover scrubbing.
    pub async fn generate_hover_previews(
        &self,
        video: &Path,
        output_dir: &Path,
        count: usize,
    ) -> MediaResult<ThumbnailSet> {
        let options = ThumbnailOptions::new(output_dir)
            .with_count(count)
            .with_sizes(vec![ThumbnailSize::small()])
            .detect_scenes(true)
            .avoid_black(true);
        self.generate(video, &options).await
    }

    /// Fixed grid of evenly spaced frames packed into `sprite.jpg` plus `sprite.vtt`.
    pub async fn generate_storyboard(
        &self,
        video: &Path,
        output_dir: &Path,
        options: &StoryboardOptions,
    ) -> MediaResult<Storyboard> {
        if options.columns == 0 || options.rows == 0 {
            return Err(MediaError::invalid_input("storyboard grid must be non-empty"));
        }
        let info = self.extractor.probe(video).await?;
        tokio::fs::create_dir_all(output_dir).await?;
        let frames_dir = tempfile::Builder::new()
            .prefix(".storyboard-")
            .tempdir_in(output_dir)?;

        let total = (options.columns * options.rows) as usize;
        let mut cells = Vec::with_capacity(total);
        for (index, timestamp) in even_timestamps(info.duration, total).into_iter().enumerate() {
            let path = frames_dir.path().join(format!("cell_{index:04}.jpg"));
            self.extractor
                .extract(video, timestamp, &options.thumbnail_size, &path)
                .await?;
            cells.push(SpriteCell::new(timestamp, path));
        }

        let grid = (options.columns, options.rows);
        let size = options.thumbnail_size.clone();
        let duration = info.duration;
        let out = output_dir.to_path_buf();
        let sprite = run_blocking(move || build_sprite(&cells, &size, Some(grid), duration, &out)).await?;

        info!(
            video = %video.display(),
            cells = sprite.cue_count,
            "Storyboard generated"
        );
        Ok(Storyboard {
            total_thumbnails: sprite.cue_count,
            sprite,
        })
    }

    async fn single_at(
        &self,
        video: &Path,
        timestamp: f64,
        output: &Path,
        size: &ThumbnailSize,
    ) -> MediaResult<Thumbnail> {
        self.extractor.extract(video, timestamp, size, output).await?;
        let quality = analyze(output.to_path_buf()).await?;
        Ok(Thumbnail {
            timestamp,
            size: size.clone(),
            path: output.to_path_buf(),
            quality: Some(quality),
        })
    }

    async fn detect_scenes(&self, video: &Path, duration: f64, output_dir: &Path) -> MediaResult<Vec<Scene>> {
        let samples_dir = tempfile::Builder::new()
            .prefix(".scenes-")
            .tempdir_in(output_dir)?;
        let size = ThumbnailSize::preview();
        let mut detector = SceneDetector::default();
        let mut scenes = Vec::new();

        for (index, timestamp) in sample_timestamps(duration).into_iter().enumerate() {
            let path = samples_dir.path().join(format!("sample_{index:04}.jpg"));
            if let Err(e) = self.extractor.extract(video, timestamp, &size, &path).await {
                warn!(timestamp, error = %e, "Scene sample failed, skipping");
                continue;
            }
            let image = run_blocking(move || Ok(image::open(&path)?)).await?;
            if let Some(scene) = detector.push(timestamp, &image) {
                scenes.push(scene);
            }
        }

        debug!(scenes = scenes.len(), "Scene detection finished");
        Ok(scenes)
    }

    async fn sprite_for(
        &self,
        thumbnails: &[Thumbnail],
        sizes: &[ThumbnailSize],
        duration: f64,
        output_dir: &Path,
    ) -> MediaResult<Sprite> {
        let cell_size = sprite_size(sizes).clone();
        let mut cells: Vec<SpriteCell> = thumbnails
            .iter()
            .filter(|t| t.size == cell_size)
            .map(|t| SpriteCell::new(t.timestamp, t.path.clone()))
            .collect();
        cells.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));

        let out = output_dir.to_path_buf();
        run_blocking(move || build_sprite(&cells, &cell_size, None, duration, &out)).await
    }
}

/// Timestamps to extract, in time order.
pub fn select_timestamps(options: &ThumbnailOptions, duration: f64, scenes: Option<&[Scene]>) -> Vec<f64> {
    if let Some(timestamp) = options.timestamp {
        return vec![clamp_timestamp(timestamp, duration)];
    }
    match scenes {
        Some(scenes) if scenes.len() >= options.count => top_scenes(scenes, options.count)
            .into_iter()
            .map(|s| clamp_timestamp(s.timestamp, duration))
            .collect(),
        _ => even_timestamps(duration, options.count),
    }
}

/// `count` timestamps at `duration * (i + 1) / (count + 1)`.
pub fn even_timestamps(duration: f64, count: usize) -> Vec<f64> {
    (0..count)
        .map(|i| clamp_timestamp(duration * (i + 1) as f64 / (count + 1) as f64, duration))
        .collect()
}

fn clamp_timestamp(timestamp: f64, duration: f64) -> f64 {
    let upper = (duration - END_MARGIN_SECS).max(0.0);
    if timestamp.is_finite() {
        timestamp.clamp(0.0, upper)
    } else {
        0.0
    }
}

fn nudge(timestamp: f64, attempt: u32, duration: f64) -> f64 {
    let step = (duration * NUDGE_FRACTION).max(MIN_NUDGE_SECS) * attempt as f64;
    let forward = timestamp + step;
    if forward < duration - END_MARGIN_SECS {
        forward
    } else {
        (timestamp - step).max(0.0)
    }
}

fn thumbnail_path(dir: &Path, index: usize, size: &ThumbnailSize) -> PathBuf {
    dir.join(format!("thumb_{:03}_{}.jpg", index, size.name))
}

/// Small size if requested, else the smallest requested.
fn sprite_size(sizes: &[ThumbnailSize]) -> &ThumbnailSize {
    sizes
        .iter()
        .find(|s| s.name == "small")
        .or_else(|| sizes.iter().min_by_key(|s| s.pixels()))
        .unwrap_or(&sizes[0])
}

fn best_of(thumbnails: &[Thumbnail]) -> Option<&Thumbnail> {
    thumbnails
        .iter()
        .filter_map(|t| t.score().map(|score| (score, t)))
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, t)| t)
}

async fn analyze(path: PathBuf) -> MediaResult<FrameQuality> {
    run_blocking(move || analyze_file(&path)).await
}

async fn run_blocking<T, F>(f: F) -> MediaResult<T>
where
    F: FnOnce() -> MediaResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| MediaError::internal(format!("blocking task failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::VideoInfo;
    use async_trait::async_trait;
    use image::{Rgb, RgbImage};
    use std::sync::Mutex;

    /// Extractor that paints flat frames whose shade depends on the timestamp.
    struct FakeExtractor {
        duration: f64,
        shade: fn(f64) -> u8,
        calls: Mutex<Vec<f64>>,
    }

    impl FakeExtractor {
        fn new(duration: f64, shade: fn(f64) -> u8) -> Arc<Self> {
            Arc::new(Self {
                duration,
                shade,
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl FrameExtractor for FakeExtractor {
        async fn probe(&self, video: &Path) -> MediaResult<VideoInfo> {
            if !video.to_string_lossy().ends_with(".mp4") {
                return Err(MediaError::InvalidVideo("not a video".into()));
            }
            Ok(VideoInfo {
                duration: self.duration,
                width: 1920,
                height: 1080,
                fps: 30.0,
                codec: "h264".into(),
                size: 1,
                bitrate: 1,
            })
        }

        async fn extract(&self, _video: &Path, timestamp: f64, size: &ThumbnailSize, output: &Path) -> MediaResult<()> {
            self.calls.lock().unwrap().push(timestamp);
            let v = (self.shade)(timestamp);
            let img = RgbImage::from_pixel(size.width, size.height, Rgb([v, v, v]));
            crate::sprite::write_jpeg(&img, output)
        }
    }

    fn gray(_: f64) -> u8 {
        128
    }

    fn options(dir: &Path) -> ThumbnailOptions {
        ThumbnailOptions::new(dir).with_sizes(vec![ThumbnailSize::preview()])
    }

    #[tokio::test]
    async fn test_count_five_single_size() {
        let dir = tempfile::tempdir().unwrap();
        let generator = ThumbnailGenerator::new(FakeExtractor::new(60.0, gray));
        let set = generator
            .generate(Path::new("video.mp4"), &options(dir.path()).with_count(5))
            .await
            .unwrap();

        assert_eq!(set.thumbnails.len(), 5);
        let stamps: Vec<f64> = set.thumbnails.iter().map(|t| t.timestamp).collect();
        assert_eq!(stamps, vec![10.0, 20.0, 30.0, 40.0, 50.0]);
        assert!(set.thumbnails.iter().all(|t| t.path.exists()));
        assert!(set.sprite.is_none());
        assert!(set.scenes.is_none());
    }

    #[tokio::test]
    async fn test_sizes_multiply_count() {
        let dir = tempfile::tempdir().unwrap();
        let generator = ThumbnailGenerator::new(FakeExtractor::new(30.0, gray));
        let opts = ThumbnailOptions::new(dir.path())
            .with_count(2)
            .with_sizes(vec![ThumbnailSize::large(), ThumbnailSize::medium(), ThumbnailSize::small()]);
        let set = generator.generate(Path::new("video.mp4"), &opts).await.unwrap();

        assert_eq!(set.thumbnails.len(), 6);
        for name in ["large", "medium", "small"] {
            assert_eq!(set.thumbnails.iter().filter(|t| t.size.name == name).count(), 2);
        }
    }

    #[tokio::test]
    async fn test_explicit_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let generator = ThumbnailGenerator::new(FakeExtractor::new(10.0, gray));
        let opts = options(dir.path()).with_count(4).with_timestamp(3.5);
        let set = tokio_test::assert_ok!(generator.generate(Path::new("video.mp4"), &opts).await);
        assert_eq!(set.thumbnails.len(), 1);
        assert_eq!(set.thumbnails[0].timestamp, 3.5);
    }

    fn dark_around_24(ts: f64) -> u8 {
        if (23.0..25.0).contains(&ts) {
            5
        } else {
            150
        }
    }

    #[tokio::test]
    async fn test_avoid_black_resamples() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let generator = ThumbnailGenerator::new(FakeExtractor::new(60.0, dark_around_24)).with_events(tx);
        let opts = options(dir.path()).with_count(4).avoid_black(true);
        let set = generator.generate(Path::new("video.mp4"), &opts).await.unwrap();

        assert_eq!(set.thumbnails.len(), 4);
        assert!(set.thumbnails.iter().all(|t| !t.quality.unwrap().is_black));
        assert!(set.thumbnails.iter().any(|t| t.timestamp == 27.0));

        let mut skipped = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let ThumbnailEvent::Skipped { timestamp, .. } = event {
                skipped.push(timestamp);
            }
        }
        assert_eq!(skipped, vec![24.0]);
    }

    fn always_black(_: f64) -> u8 {
        2
    }

    #[tokio::test]
    async fn test_all_black_candidates_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let extractor = FakeExtractor::new(60.0, always_black);
        let generator = ThumbnailGenerator::new(extractor.clone());
        let opts = options(dir.path()).with_count(2).avoid_black(true);
        let set = generator.generate(Path::new("video.mp4"), &opts).await.unwrap();

        assert!(set.thumbnails.is_empty());
        assert!(set.best_thumbnail.is_none());
        assert_eq!(extractor.calls.lock().unwrap().len(), 2 * (1 + MAX_BLACK_NUDGES as usize));
    }

    #[tokio::test]
    async fn test_black_frame_is_flagged_without_avoidance() {
        let dir = tempfile::tempdir().unwrap();
        let generator = ThumbnailGenerator::new(FakeExtractor::new(60.0, always_black));
        let set = generator
            .generate(Path::new("video.mp4"), &options(dir.path()))
            .await
            .unwrap();
        assert_eq!(set.thumbnails.len(), 1);
        assert!(set.thumbnails[0].quality.unwrap().is_black);
    }

    fn ramp(ts: f64) -> u8 {
        (ts * 4.5).min(255.0) as u8
    }

    #[tokio::test]
    async fn test_best_thumbnail_is_argmax() {
        let dir = tempfile::tempdir().unwrap();
        let generator = ThumbnailGenerator::new(FakeExtractor::new(60.0, ramp));
        let set = generator
            .generate(Path::new("video.mp4"), &options(dir.path()).with_count(5))
            .await
            .unwrap();

        let best = set.best_thumbnail.unwrap();
        let max = set
            .thumbnails
            .iter()
            .map(|t| t.quality.unwrap().score)
            .fold(f64::MIN, f64::max);
        assert_eq!(best.quality.unwrap().score, max);
        // Shade 135 at 30s is closest to the ideal brightness.
        assert_eq!(best.timestamp, 30.0);
    }

    #[tokio::test]
    async fn test_sprite_for_twelve() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let generator = ThumbnailGenerator::new(FakeExtractor::new(120.0, gray)).with_events(tx);
        let opts = options(dir.path()).with_count(12).generate_sprite(true);
        let set = generator.generate(Path::new("video.mp4"), &opts).await.unwrap();

        let sprite = set.sprite.unwrap();
        assert!(sprite.columns * sprite.rows >= 12);
        assert_eq!(sprite.cue_count, set.thumbnails.len());
        let vtt = std::fs::read_to_string(&sprite.vtt_path).unwrap();
        assert_eq!(vtt.matches(" --> ").count(), 12);

        let mut saw_sprite = false;
        let mut saw_complete = false;
        while let Ok(event) = rx.try_recv() {
            match event {
                ThumbnailEvent::SpriteGenerated(_) => saw_sprite = true,
                ThumbnailEvent::Complete { thumbnails, .. } => {
                    assert_eq!(thumbnails, 12);
                    saw_complete = true;
                }
                _ => {}
            }
        }
        assert!(saw_sprite && saw_complete);
    }

    fn two_scenes(ts: f64) -> u8 {
        if ts < 30.0 {
            40
        } else {
            210
        }
    }

    #[tokio::test]
    async fn test_scene_detection_and_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let generator = ThumbnailGenerator::new(FakeExtractor::new(60.0, two_scenes));

        let one = generator
            .generate(Path::new("video.mp4"), &options(dir.path()).detect_scenes(true))
            .await
            .unwrap();
        let scenes = one.scenes.unwrap();
        assert_eq!(scenes.len(), 1);
        assert_eq!(scenes[0].scene_number, 1);
        assert_eq!(scenes[0].timestamp, 30.0);
        assert_eq!(one.thumbnails[0].timestamp, 30.0);

        let three = generator
            .generate(
                Path::new("video.mp4"),
                &options(dir.path()).with_count(3).detect_scenes(true),
            )
            .await
            .unwrap();
        let stamps: Vec<f64> = three.thumbnails.iter().map(|t| t.timestamp).collect();
        assert_eq!(stamps, vec![15.0, 30.0, 45.0]);
    }

    #[tokio::test]
    async fn test_probe_failure_extracts_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let extractor = FakeExtractor::new(60.0, gray);
        let generator = ThumbnailGenerator::new(extractor.clone());
        let result = generator
            .generate(Path::new("broken.txt"), &options(dir.path()).with_count(3))
            .await;

        assert!(matches!(result, Err(MediaError::InvalidVideo(_))));
        assert!(extractor.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_storyboard_and_cover() {
        let dir = tempfile::tempdir().unwrap();
        let generator = ThumbnailGenerator::new(FakeExtractor::new(40.0, gray));
        let board = generator
            .generate_storyboard(
                Path::new("video.mp4"),
                dir.path(),
                &StoryboardOptions {
                    columns: 3,
                    rows: 2,
                    thumbnail_size: ThumbnailSize::preview(),
                },
            )
            .await
            .unwrap();
        assert_eq!(board.total_thumbnails, 6);
        assert_eq!((board.sprite.columns, board.sprite.rows), (3, 2));
        assert!(board.sprite.path.exists());

        let cover_path = dir.path().join("cover.jpg");
        let cover = generator
            .generate_cover_thumbnail(Path::new("video.mp4"), &cover_path)
            .await
            .unwrap();
        assert_eq!(cover.timestamp, 20.0);
        assert_eq!(cover.size, ThumbnailSize::large());
        assert!(cover_path.exists());
    }

    #[test]
    fn test_even_timestamps_stay_inside() {
        let stamps = even_timestamps(10.0, 4);
        assert_eq!(stamps, vec![2.0, 4.0, 6.0, 8.0]);
        assert!(even_timestamps(0.0, 3).iter().all(|&t| t == 0.0));
        assert!(clamp_timestamp(99.0, 10.0) < 10.0);
    }

    #[test]
    fn test_sprite_size_prefers_small() {
        let sizes = vec![ThumbnailSize::large(), ThumbnailSize::small(), ThumbnailSize::preview()];
        assert_eq!(sprite_size(&sizes).name, "small");
        let sizes = vec![ThumbnailSize::large(), ThumbnailSize::preview()];
        assert_eq!(sprite_size(&sizes).name, "preview");
    }
}
