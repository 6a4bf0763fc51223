//! Slide-to-frame synthesis.
//!
//! Each slide is composed once (background, images, then text), then written
//! as `round(duration * fps)` numbered PNG frames. Numbering is global across
//! the job and starts at 1, so the directory can be fed straight to the
//! encoder as `frame_%06d.png`.

use fontdue::layout::{CoordinateSystem, Layout, LayoutSettings, TextStyle, WrapStyle};
use fontdue::{Font, FontSettings};
use image::codecs::png::PngEncoder;
use image::imageops::{self, FilterType};
use image::{ColorType, DynamicImage, GenericImageView, ImageEncoder, Rgb, RgbImage, Rgba, RgbaImage};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use reel_models::slide::{
    parse_color, total_frames, validate_slides, DEFAULT_FONT_SIZE, DEFAULT_TEXT_COLOR,
};
use reel_models::{
    Background, ImageElement, PixelRect, RenderSettings, Slide, SlideElement, TextElement,
    TransitionKind,
};

use crate::error::{MediaError, MediaResult};
use crate::metrics::MetricsCollector;
use crate::progress::MonotonicProgress;

/// printf-style pattern matching the files written by [`FrameGenerator`].
pub const FRAME_PATTERN: &str = "frame_%06d.png";

/// Frames composed per parallel batch; progress is reported between batches.
const BATCH_SIZE: usize = 24;

/// Fonts tried when no font path is configured.
const SYSTEM_FONTS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/Library/Fonts/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

/// File name of the frame with 1-based global `index`.
pub fn frame_file_name(index: u64) -> String {
    format!("frame_{:06}.png", index)
}

/// A recoverable problem found while composing a slide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlideWarning {
    pub slide_id: String,
    /// Global index of the slide's first frame
    pub first_frame: u64,
    pub message: String,
}

/// Result of one generation run.
#[derive(Debug, Clone, Default)]
pub struct FrameGeneration {
    /// Written frames in index order
    pub frames: Vec<PathBuf>,
    pub warnings: Vec<SlideWarning>,
}

impl FrameGeneration {
    pub fn frame_count(&self) -> u64 {
        self.frames.len() as u64
    }
}

#[derive(Debug, Clone)]
pub struct FrameGeneratorConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// TrueType/OpenType font used for all text
    pub font_path: Option<PathBuf>,
    /// Size of the composition thread pool
    pub threads: usize,
}

impl FrameGeneratorConfig {
    pub fn from_settings(settings: &RenderSettings) -> Self {
        let (width, height) = settings.resolution.dimensions();
        Self {
            width,
            height,
            fps: settings.fps,
            font_path: None,
            threads: default_threads(),
        }
    }

    pub fn with_font_path(mut self, path: Option<PathBuf>) -> Self {
        self.font_path = path;
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }
}

fn default_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
        .min(8)
}

/// Renders slides into numbered frame files.
pub struct FrameGenerator {
    config: FrameGeneratorConfig,
    font: Option<Font>,
    pool: rayon::ThreadPool,
    metrics: Option<MetricsCollector>,
    cancel: Option<Arc<AtomicBool>>,
}

impl FrameGenerator {
    pub fn new(config: FrameGeneratorConfig) -> MediaResult<Self> {
        if config.width == 0 || config.height == 0 || config.fps == 0 {
            return Err(MediaError::invalid_input(format!(
                "frame size {}x{} at {} fps",
                config.width, config.height, config.fps
            )));
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.threads.max(1))
            .thread_name(|i| format!("reel-frames-{}", i))
            .build()
            .map_err(|e| MediaError::internal(format!("frame thread pool: {}", e)))?;

        let font = load_font(config.font_path.as_deref());

        Ok(Self {
            config,
            font,
            pool,
            metrics: None,
            cancel: None,
        })
    }

    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Stop with [`MediaError::Cancelled`] at the next batch once `flag` is set.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    fn ensure_not_cancelled(&self) -> MediaResult<()> {
        match &self.cancel {
            Some(flag) if flag.load(Ordering::Relaxed) => Err(MediaError::Cancelled),
            _ => Ok(()),
        }
    }

    pub fn config(&self) -> &FrameGeneratorConfig {
        &self.config
    }

    /// Write all frames for `slides` into `output_dir`.
    ///
    /// `on_progress` receives non-decreasing percentages and always ends at 100.
    /// Bad assets become warnings; only invalid slide structure or I/O
    /// failures abort.
    pub fn generate<F>(
        &self,
        slides: &[Slide],
        output_dir: &Path,
        mut on_progress: F,
    ) -> MediaResult<FrameGeneration>
    where
        F: FnMut(u8),
    {
        let started = Instant::now();
        let ordered = validate_slides(slides)?;
        std::fs::create_dir_all(output_dir)?;

        let fps = self.config.fps;
        let total = total_frames(&ordered, fps);
        info!(
            slides = ordered.len(),
            total_frames = total,
            width = self.config.width,
            height = self.config.height,
            fps,
            "Generating frames"
        );

        let mut tracker = MonotonicProgress::new();
        if let Some(p) = tracker.update(0) {
            on_progress(p);
        }

        let mut result = FrameGeneration {
            frames: Vec::with_capacity(total as usize),
            warnings: Vec::new(),
        };
        let mut next_index: u64 = 1;
        let mut done: u64 = 0;

        for slide in &ordered {
            let count = slide.frame_count(fps);
            let first_frame = next_index;

            if count == 0 {
                push_warning(&mut result.warnings, slide, first_frame, "slide contributes zero frames");
                continue;
            }

            let mut notes = Vec::new();
            let base = self.pool.install(|| self.compose(slide, &mut notes));
            for note in notes {
                push_warning(&mut result.warnings, slide, first_frame, note);
            }
            let base = DynamicImage::ImageRgba8(base).into_rgb8();
            let still = encode_png(&base)?;
            let fade_frames = fade_frame_count(slide, fps, count);

            let offsets: Vec<u64> = (0..count).collect();
            for batch in offsets.chunks(BATCH_SIZE) {
                self.ensure_not_cancelled()?;
                let written: MediaResult<Vec<PathBuf>> = self.pool.install(|| {
                    batch
                        .par_iter()
                        .map(|&offset| -> MediaResult<PathBuf> {
                            let path = output_dir.join(frame_file_name(first_frame + offset));
                            if offset < fade_frames {
                                let factor = offset as f32 / fade_frames as f32;
                                std::fs::write(&path, encode_png(&fade(&base, factor))?)?;
                            } else {
                                std::fs::write(&path, &still)?;
                            }
                            Ok(path)
                        })
                        .collect()
                });
                result.frames.extend(written?);

                done += batch.len() as u64;
                if let Some(p) = tracker.update((done * 100 / total) as u8) {
                    on_progress(p);
                }
            }

            debug!(slide_id = %slide.id, first_frame, count, "Slide frames written");
            next_index += count;
        }

        if let Some(p) = tracker.finish() {
            on_progress(p);
        }

        let elapsed = started.elapsed().as_secs_f64();
        if let Some(metrics) = &self.metrics {
            metrics.add_counter("frames_generated_total", result.frame_count(), &[]);
            metrics.record_histogram("frame_generation_seconds", elapsed, &[]);
        }
        info!(
            frames = result.frame_count(),
            warnings = result.warnings.len(),
            elapsed_secs = format!("{:.2}", elapsed),
            "Frame generation complete"
        );

        Ok(result)
    }

    /// Paint the static content of one slide.
    fn compose(&self, slide: &Slide, notes: &mut Vec<String>) -> RgbaImage {
        let (w, h) = (self.config.width, self.config.height);
        let mut canvas = RgbaImage::new(w, h);
        let content = &slide.content;

        paint_background(&mut canvas, &content.background, notes);

        for image in content.images.iter().flatten() {
            self.paint_image(&mut canvas, image, notes);
        }
        for element in &content.elements {
            match element {
                SlideElement::Image(image) => self.paint_image(&mut canvas, image, notes),
                SlideElement::Text(_) => {}
                SlideElement::Unknown => notes.push("unknown element kind skipped".to_string()),
            }
        }

        let mut texts: Vec<TextElement> = Vec::new();
        if let Some(title) = content.title.as_deref().filter(|t| !t.trim().is_empty()) {
            texts.push(TextElement {
                text: title.to_string(),
                x: 96.0,
                y: 80.0,
                width: 1728.0,
                height: 180.0,
                font_size: Some(DEFAULT_FONT_SIZE * 1.5),
                color: None,
            });
        }
        if let Some(body) = content.text.as_deref().filter(|t| !t.trim().is_empty()) {
            texts.push(TextElement {
                text: body.to_string(),
                x: 96.0,
                y: 300.0,
                width: 1728.0,
                height: 700.0,
                font_size: None,
                color: None,
            });
        }
        texts.extend(content.elements.iter().filter_map(|e| match e {
            SlideElement::Text(t) => Some(t.clone()),
            _ => None,
        }));

        if texts.is_empty() {
            return canvas;
        }
        match &self.font {
            Some(font) => {
                for text in &texts {
                    paint_text(&mut canvas, font, text, notes);
                }
            }
            None => notes.push("no font available, text skipped".to_string()),
        }

        canvas
    }

    fn paint_image(&self, canvas: &mut RgbaImage, element: &ImageElement, notes: &mut Vec<String>) {
        let rect = PixelRect::from_design(
            element.x,
            element.y,
            element.width,
            element.height,
            canvas.width(),
            canvas.height(),
        );
        if rect.is_empty() {
            notes.push(format!("image {} has an empty box", element.src));
            return;
        }
        let Some(visible) = rect.clip_to(canvas.width(), canvas.height()) else {
            debug!(src = %element.src, "Image box is off the frame");
            return;
        };
        match image::open(&element.src) {
            Ok(img) => {
                let scaled = scale_visible(&img, rect, visible);
                imageops::overlay(canvas, &scaled, visible.x, visible.y);
            }
            Err(e) => notes.push(format!("image {} skipped: {}", element.src, e)),
        }
    }
}

/// Scale the part of `img` that lands in `visible` when `img` fills `rect`.
/// The output is never larger than `visible`, whatever the size of `rect`.
fn scale_visible(img: &DynamicImage, rect: PixelRect, visible: PixelRect) -> RgbaImage {
    let (iw, ih) = img.dimensions();
    let sx = iw as f64 / rect.width as f64;
    let sy = ih as f64 / rect.height as f64;
    let dx = (visible.x - rect.x) as f64;
    let dy = (visible.y - rect.y) as f64;

    let left = ((dx * sx).floor() as u32).min(iw.saturating_sub(1));
    let top = ((dy * sy).floor() as u32).min(ih.saturating_sub(1));
    let right = (((dx + visible.width as f64) * sx).ceil() as u32).clamp(left + 1, iw.max(left + 1));
    let bottom = (((dy + visible.height as f64) * sy).ceil() as u32).clamp(top + 1, ih.max(top + 1));

    img.crop_imm(left, top, right - left, bottom - top)
        .resize_exact(visible.width, visible.height, FilterType::Triangle)
        .into_rgba8()
}

fn push_warning(warnings: &mut Vec<SlideWarning>, slide: &Slide, first_frame: u64, message: impl Into<String>) {
    let message = message.into();
    warn!(slide_id = %slide.id, first_frame, "{}", message);
    warnings.push(SlideWarning {
        slide_id: slide.id.clone(),
        first_frame,
        message,
    });
}

fn load_font(configured: Option<&Path>) -> Option<Font> {
    let candidates: Vec<PathBuf> = match configured {
        Some(path) => vec![path.to_path_buf()],
        None => SYSTEM_FONTS.iter().map(PathBuf::from).collect(),
    };

    for path in candidates {
        let Ok(bytes) = std::fs::read(&path) else {
            continue;
        };
        match Font::from_bytes(bytes, FontSettings::default()) {
            Ok(font) => {
                debug!("Loaded font {}", path.display());
                return Some(font);
            }
            Err(e) => warn!("Failed to parse font {}: {}", path.display(), e),
        }
    }

    warn!("No usable font found, slide text will be skipped");
    None
}

fn color_or(value: Option<&str>, fallback: &str, notes: &mut Vec<String>) -> [u8; 4] {
    match value {
        Some(v) => parse_color(v).unwrap_or_else(|| {
            notes.push(format!("invalid color '{}'", v));
            parse_color(fallback).unwrap_or([0, 0, 0, 255])
        }),
        None => parse_color(fallback).unwrap_or([0, 0, 0, 255]),
    }
}

fn paint_background(canvas: &mut RgbaImage, background: &Background, notes: &mut Vec<String>) {
    match background {
        Background::Solid { color } => {
            let c = color_or(Some(color), "#000000", notes);
            fill(canvas, [c[0], c[1], c[2], 255]);
        }
        Background::Gradient { from, to } => {
            let top = color_or(Some(from), "#000000", notes);
            let bottom = color_or(Some(to), "#000000", notes);
            let height = canvas.height().max(2) - 1;
            for (_, y, pixel) in canvas.enumerate_pixels_mut() {
                let t = y as f32 / height as f32;
                let mix = |a: u8, b: u8| (a as f32 + (b as f32 - a as f32) * t).round() as u8;
                *pixel = Rgba([mix(top[0], bottom[0]), mix(top[1], bottom[1]), mix(top[2], bottom[2]), 255]);
            }
        }
        Background::Image { image, color } => {
            let c = color_or(color.as_deref(), "#000000", notes);
            fill(canvas, [c[0], c[1], c[2], 255]);
            match image::open(image) {
                Ok(img) => {
                    let cover = cover_fill(&img, canvas.width(), canvas.height());
                    imageops::overlay(canvas, &cover, 0, 0);
                }
                Err(e) => notes.push(format!("background image {} skipped: {}", image, e)),
            }
        }
    }
}

/// Center-crop `img` to the `width` x `height` aspect, then scale it to that size.
fn cover_fill(img: &DynamicImage, width: u32, height: u32) -> RgbaImage {
    let (iw, ih) = img.dimensions();
    let scale = (iw as f64 / width as f64).min(ih as f64 / height as f64);
    let cw = ((width as f64 * scale).round() as u32).clamp(1, iw.max(1));
    let ch = ((height as f64 * scale).round() as u32).clamp(1, ih.max(1));
    img.crop_imm((iw - cw) / 2, (ih - ch) / 2, cw, ch)
        .resize_exact(width, height, FilterType::Triangle)
        .into_rgba8()
}

fn fill(canvas: &mut RgbaImage, color: [u8; 4]) {
    for pixel in canvas.pixels_mut() {
        *pixel = Rgba(color);
    }
}

fn paint_text(canvas: &mut RgbaImage, font: &Font, element: &TextElement, notes: &mut Vec<String>) {
    let rect = PixelRect::from_design(
        element.x,
        element.y,
        element.width,
        element.height,
        canvas.width(),
        canvas.height(),
    );
    let Some(clip) = rect.clip_to(canvas.width(), canvas.height()) else {
        return;
    };
    let scale = canvas.height() as f32 / reel_models::slide::DESIGN_HEIGHT as f32;
    let size = (element.font_size.unwrap_or(DEFAULT_FONT_SIZE) * scale).max(1.0);
    let color = color_or(element.color.as_deref(), DEFAULT_TEXT_COLOR, notes);

    let mut layout = Layout::new(CoordinateSystem::PositiveYDown);
    layout.reset(&LayoutSettings {
        x: rect.x as f32,
        y: rect.y as f32,
        max_width: Some(rect.width as f32),
        max_height: Some(rect.height as f32),
        wrap_style: WrapStyle::Word,
        ..LayoutSettings::default()
    });
    layout.append(&[font], &TextStyle::new(&element.text, size, 0));

    for glyph in layout.glyphs() {
        if glyph.width == 0 || glyph.height == 0 {
            continue;
        }
        let (metrics, coverage) = font.rasterize_config(glyph.key);
        blend_glyph(
            canvas,
            glyph.x.round() as i64,
            glyph.y.round() as i64,
            metrics.width,
            &coverage,
            color,
            clip,
        );
    }
}

fn blend_glyph(
    canvas: &mut RgbaImage,
    x: i64,
    y: i64,
    glyph_width: usize,
    coverage: &[u8],
    color: [u8; 4],
    clip: PixelRect,
) {
    if glyph_width == 0 {
        return;
    }
    let (x0, y0) = (clip.x, clip.y);
    let (x1, y1) = (clip.x + clip.width as i64, clip.y + clip.height as i64);

    for (i, &cov) in coverage.iter().enumerate() {
        if cov == 0 {
            continue;
        }
        let px = x + (i % glyph_width) as i64;
        let py = y + (i / glyph_width) as i64;
        if px < x0 || py < y0 || px >= x1 || py >= y1 {
            continue;
        }
        let alpha = (cov as f32 / 255.0) * (color[3] as f32 / 255.0);
        let pixel = canvas.get_pixel_mut(px as u32, py as u32);
        for c in 0..3 {
            let under = pixel.0[c] as f32;
            pixel.0[c] = (under + (color[c] as f32 - under) * alpha).round() as u8;
        }
    }
}

fn fade_frame_count(slide: &Slide, fps: u32, count: u64) -> u64 {
    match &slide.transition {
        Some(t) if t.kind == TransitionKind::Fade && t.duration_seconds > 0.0 => {
            ((t.duration_seconds * fps as f64).round() as u64).min(count)
        }
        _ => 0,
    }
}

/// Scale all channels by `factor` (0 = black).
fn fade(base: &RgbImage, factor: f32) -> RgbImage {
    let factor = factor.clamp(0.0, 1.0);
    let mut out = base.clone();
    for pixel in out.pixels_mut() {
        let Rgb([r, g, b]) = *pixel;
        *pixel = Rgb([
            (r as f32 * factor) as u8,
            (g as f32 * factor) as u8,
            (b as f32 * factor) as u8,
        ]);
    }
    out
}

fn encode_png(image: &RgbImage) -> MediaResult<Vec<u8>> {
    let mut buf = Vec::new();
    PngEncoder::new(&mut buf).write_image(
        image.as_raw(),
        image.width(),
        image.height(),
        ColorType::Rgb8,
    )?;
    Ok(buf)
}
