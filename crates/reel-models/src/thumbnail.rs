//! Preview artifacts derived from a rendered video.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Named thumbnail size.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct ThumbnailSize {
    pub width: u32,
    pub height: u32,
    pub name: String,
}

impl ThumbnailSize {
    pub fn new(width: u32, height: u32, name: impl Into<String>) -> Self {
        Self {
            width,
            height,
            name: name.into(),
        }
    }

    pub fn large() -> Self {
        Self::new(1280, 720, "large")
    }

    pub fn medium() -> Self {
        Self::new(640, 360, "medium")
    }

    pub fn small() -> Self {
        Self::new(320, 180, "small")
    }

    pub fn preview() -> Self {
        Self::new(160, 90, "preview")
    }

    /// Look up one of [`STANDARD_SIZES`] by name.
    pub fn standard(name: &str) -> Option<Self> {
        STANDARD_SIZES
            .iter()
            .find(|(n, _, _)| *n == name)
            .map(|(n, w, h)| Self::new(*w, *h, *n))
    }

    pub fn pixels(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// Standard sizes as `(name, width, height)`.
pub const STANDARD_SIZES: [(&str, u32, u32); 4] = [
    ("large", 1280, 720),
    ("medium", 640, 360),
    ("small", 320, 180),
    ("preview", 160, 90),
];

/// Image quality measurements for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FrameQuality {
    /// Mean luma, 0-255
    pub brightness: f64,
    /// Normalized luma standard deviation, 0-1
    pub contrast: f64,
    pub is_black: bool,
    /// Composite score, 0-100
    pub score: f64,
}

/// One extracted thumbnail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Thumbnail {
    /// Position in the video, seconds
    pub timestamp: f64,
    pub size: ThumbnailSize,
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<FrameQuality>,
}

impl Thumbnail {
    pub fn score(&self) -> Option<f64> {
        self.quality.map(|q| q.score)
    }
}

/// A detected scene boundary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Scene {
    pub timestamp: f64,
    /// 1-based, increasing with time
    pub scene_number: u32,
    /// 0-1
    pub confidence: f64,
}

/// Sprite sheet and its cue file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Sprite {
    pub path: PathBuf,
    pub columns: u32,
    pub rows: u32,
    pub cell_width: u32,
    pub cell_height: u32,
    pub vtt_path: PathBuf,
    /// Number of cues written to the VTT file
    pub cue_count: usize,
}

impl Sprite {
    /// Near-square grid for `n` cells: `(columns, rows)`.
    pub fn grid_for(n: usize) -> (u32, u32) {
        if n == 0 {
            return (0, 0);
        }
        let columns = (n as f64).sqrt().ceil() as usize;
        let rows = n.div_ceil(columns);
        (columns as u32, rows as u32)
    }

    /// Pixel origin of cell `index` in row-major order.
    pub fn cell_origin(&self, index: usize) -> (u32, u32) {
        let columns = self.columns.max(1) as usize;
        let col = (index % columns) as u32;
        let row = (index / columns) as u32;
        (col * self.cell_width, row * self.cell_height)
    }
}

/// Storyboard grid produced from evenly spaced frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Storyboard {
    pub sprite: Sprite,
    pub total_thumbnails: usize,
}
