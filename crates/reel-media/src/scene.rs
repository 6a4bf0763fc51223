//! Scene boundary detection over uniformly sampled frames.
//!
//! Consecutive samples are compared with a 64-bin luma histogram. The
//! difference is `1 - intersection`, so identical frames score 0 and frames
//! with disjoint tonal ranges score 1. A boundary is declared when the
//! difference exceeds the threshold.

use image::DynamicImage;
use tracing::debug;

use reel_models::Scene;

use crate::quality::luma;

/// Difference above which two samples belong to different scenes.
pub const SCENE_THRESHOLD: f64 = 0.3;
/// Luma histogram resolution.
pub const HISTOGRAM_BINS: usize = 64;

/// Seconds between samples.
const SAMPLE_INTERVAL_SECS: f64 = 1.0;
const MIN_SAMPLES: usize = 8;
const MAX_SAMPLES: usize = 120;

/// Normalized luma histogram.
#[derive(Debug, Clone, PartialEq)]
pub struct LumaHistogram {
    bins: [f64; HISTOGRAM_BINS],
}

impl LumaHistogram {
    pub fn from_image(image: &DynamicImage) -> Self {
        let rgb = image.to_rgb8();
        let mut bins = [0.0f64; HISTOGRAM_BINS];
        let mut total = 0.0f64;

        for pixel in rgb.pixels() {
            let bin = ((luma(pixel.0) / 256.0) * HISTOGRAM_BINS as f64) as usize;
            bins[bin.min(HISTOGRAM_BINS - 1)] += 1.0;
            total += 1.0;
        }
        if total > 0.0 {
            for bin in bins.iter_mut() {
                *bin /= total;
            }
        }

        Self { bins }
    }

    /// `1 - Σ min(a, b)`, in 0..=1.
    pub fn difference(&self, other: &LumaHistogram) -> f64 {
        let intersection: f64 = self
            .bins
            .iter()
            .zip(other.bins.iter())
            .map(|(a, b)| a.min(*b))
            .sum();
        (1.0 - intersection).clamp(0.0, 1.0)
    }
}

/// Streaming detector fed samples in increasing time order.
#[derive(Debug, Clone)]
pub struct SceneDetector {
    threshold: f64,
    previous: Option<LumaHistogram>,
    scene_count: u32,
}

impl Default for SceneDetector {
    fn default() -> Self {
        Self::new(SCENE_THRESHOLD)
    }
}

impl SceneDetector {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            previous: None,
            scene_count: 0,
        }
    }

    /// Feed the next sample; returns a scene when it starts a new one.
    pub fn push(&mut self, timestamp: f64, image: &DynamicImage) -> Option<Scene> {
        let histogram = LumaHistogram::from_image(image);
        let scene = match &self.previous {
            Some(previous) => {
                let difference = previous.difference(&histogram);
                if difference > self.threshold {
                    self.scene_count += 1;
                    debug!(
                        timestamp,
                        difference = format!("{:.3}", difference),
                        scene = self.scene_count,
                        "Scene boundary"
                    );
                    Some(Scene {
                        timestamp,
                        scene_number: self.scene_count,
                        confidence: difference,
                    })
                } else {
                    None
                }
            }
            None => None,
        };
        self.previous = Some(histogram);
        scene
    }

    pub fn scene_count(&self) -> u32 {
        self.scene_count
    }
}

/// Uniform sample timestamps across `duration` seconds, excluding the end.
pub fn sample_timestamps(duration: f64) -> Vec<f64> {
    if !duration.is_finite() || duration <= 0.0 {
        return Vec::new();
    }
    let n = ((duration / SAMPLE_INTERVAL_SECS).ceil() as usize).clamp(MIN_SAMPLES, MAX_SAMPLES);
    (0..n).map(|i| duration * i as f64 / n as f64).collect()
}

/// The `count` most confident scenes, returned in time order.
pub fn top_scenes(scenes: &[Scene], count: usize) -> Vec<Scene> {
    let mut ranked = scenes.to_vec();
    ranked.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    ranked.truncate(count);
    ranked.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn flat(v: u8) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(16, 9, Rgb([v, v, v])))
    }

    #[test]
    fn test_difference_bounds() {
        let dark = LumaHistogram::from_image(&flat(10));
        let light = LumaHistogram::from_image(&flat(240));
        assert!(dark.difference(&dark).abs() < 1e-9);
        assert!((dark.difference(&light) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_detector_numbers_boundaries() {
        let mut detector = SceneDetector::default();
        let samples = [flat(10), flat(11), flat(202), flat(203), flat(40)];
        let scenes: Vec<Scene> = samples
            .iter()
            .enumerate()
            .filter_map(|(i, img)| detector.push(i as f64, img))
            .collect();

        assert_eq!(scenes.len(), 2);
        assert_eq!(scenes[0].scene_number, 1);
        assert_eq!(scenes[0].timestamp, 2.0);
        assert_eq!(scenes[1].scene_number, 2);
        assert!(scenes.iter().all(|s| s.confidence > SCENE_THRESHOLD && s.confidence <= 1.0));
    }

    #[test]
    fn test_sample_timestamps() {
        assert!(sample_timestamps(0.0).is_empty());
        let short = sample_timestamps(2.0);
        assert_eq!(short.len(), MIN_SAMPLES);
        assert_eq!(short[0], 0.0);
        assert!(short.windows(2).all(|w| w[0] < w[1]));
        assert!(*short.last().unwrap() < 2.0);
        assert_eq!(sample_timestamps(3600.0).len(), MAX_SAMPLES);
    }

    #[test]
    fn test_top_scenes_time_ordered() {
        let scenes = vec![
            Scene { timestamp: 1.0, scene_number: 1, confidence: 0.4 },
            Scene { timestamp: 5.0, scene_number: 2, confidence: 0.9 },
            Scene { timestamp: 9.0, scene_number: 3, confidence: 0.7 },
        ];
        let top = top_scenes(&scenes, 2);
        assert_eq!(top.iter().map(|s| s.timestamp).collect::<Vec<_>>(), vec![5.0, 9.0]);
    }
}
