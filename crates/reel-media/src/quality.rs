//! Brightness/contrast scoring of candidate frames.

use image::DynamicImage;
use std::path::Path;

use reel_models::FrameQuality;

use crate::error::MediaResult;

/// Mean luma below which a frame counts as black.
pub const BLACK_THRESHOLD: f64 = 20.0;
/// Luma that scores best.
const IDEAL_BRIGHTNESS: f64 = 140.0;
/// Contrast at or above which the contrast score saturates.
const FULL_CONTRAST: f64 = 0.5;
/// Score multiplier applied to black frames.
const BLACK_PENALTY: f64 = 0.1;

/// Measure brightness, contrast and the composite score of an image.
pub fn analyze_image(image: &DynamicImage) -> FrameQuality {
    let rgb = image.to_rgb8();
    let count = (rgb.width() as u64 * rgb.height() as u64).max(1) as f64;

    let (mut sum, mut sum_sq) = (0.0f64, 0.0f64);
    for pixel in rgb.pixels() {
        let y = luma(pixel.0);
        sum += y;
        sum_sq += y * y;
    }

    let brightness = sum / count;
    let variance = (sum_sq / count - brightness * brightness).max(0.0);
    let contrast = (variance.sqrt() / 127.5).min(1.0);

    score(brightness, contrast)
}

/// Load a frame file and analyze it.
pub fn analyze_file(path: &Path) -> MediaResult<FrameQuality> {
    let image = image::open(path)?;
    Ok(analyze_image(&image))
}

/// Rec.601 luma.
pub fn luma(rgb: [u8; 3]) -> f64 {
    0.299 * rgb[0] as f64 + 0.587 * rgb[1] as f64 + 0.114 * rgb[2] as f64
}

fn score(brightness: f64, contrast: f64) -> FrameQuality {
    let is_black = brightness < BLACK_THRESHOLD;
    let brightness_score = (1.0 - (brightness - IDEAL_BRIGHTNESS).abs() / IDEAL_BRIGHTNESS).clamp(0.0, 1.0);
    let contrast_score = (contrast / FULL_CONTRAST).min(1.0);

    let mut score = (0.5 * brightness_score + 0.5 * contrast_score) * 100.0;
    if is_black {
        score *= BLACK_PENALTY;
    }

    FrameQuality {
        brightness,
        contrast,
        is_black,
        score: score.clamp(0.0, 100.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn checker(w: u32, h: u32, a: u8, b: u8) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(w, h, |x, y| {
            if (x + y) % 2 == 0 {
                Rgb([a, a, a])
            } else {
                Rgb([b, b, b])
            }
        }))
    }

    #[test]
    fn test_black_frame_is_flagged() {
        let black = DynamicImage::ImageRgb8(RgbImage::from_pixel(32, 18, Rgb([3, 3, 3])));
        let q = analyze_image(&black);
        assert!(q.is_black);
        assert!(q.brightness < BLACK_THRESHOLD);
        assert!(q.score < 10.0);
    }

    #[test]
    fn test_ranges() {
        for img in [checker(16, 16, 0, 255), checker(16, 16, 128, 128), checker(16, 16, 250, 255)] {
            let q = analyze_image(&img);
            assert!((0.0..=255.0).contains(&q.brightness));
            assert!((0.0..=1.0).contains(&q.contrast));
            assert!((0.0..=100.0).contains(&q.score));
        }
    }

    #[test]
    fn test_contrast_is_rewarded() {
        let flat = analyze_image(&checker(16, 16, 128, 128));
        let busy = analyze_image(&checker(16, 16, 60, 220));
        assert!(flat.contrast < 0.01);
        assert!(busy.contrast > 0.5);
        assert!(busy.score > flat.score);
        assert!(!busy.is_black);
    }

    #[test]
    fn test_luma_weights() {
        assert!((luma([255, 255, 255]) - 255.0).abs() < 1e-9);
        assert!(luma([0, 255, 0]) > luma([255, 0, 0]));
    }
}
