//! Render settings: resolution, codec and quality profiles.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{ModelError, ModelResult};

/// Default frame rate.
pub const DEFAULT_FPS: u32 = 30;
/// Highest frame rate accepted by validation.
pub const MAX_FPS: u32 = 120;
/// Default encoder preset for x264/x265.
pub const DEFAULT_PRESET: &str = "medium";
/// Pixel format for broad player compatibility.
pub const DEFAULT_PIXEL_FORMAT: &str = "yuv420p";

/// Output resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
pub enum Resolution {
    #[serde(rename = "480p")]
    P480,
    #[serde(rename = "720p")]
    #[default]
    P720,
    #[serde(rename = "1080p")]
    P1080,
    #[serde(rename = "4k")]
    K4,
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::P480 => "480p",
            Resolution::P720 => "720p",
            Resolution::P1080 => "1080p",
            Resolution::K4 => "4k",
        }
    }

    /// Pixel dimensions (width, height).
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Resolution::P480 => (854, 480),
            Resolution::P720 => (1280, 720),
            Resolution::P1080 => (1920, 1080),
            Resolution::K4 => (3840, 2160),
        }
    }

    pub fn width(&self) -> u32 {
        self.dimensions().0
    }

    pub fn height(&self) -> u32 {
        self.dimensions().1
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "480p" => Ok(Resolution::P480),
            "720p" => Ok(Resolution::P720),
            "1080p" => Ok(Resolution::P1080),
            "4k" | "2160p" => Ok(Resolution::K4),
            other => Err(ModelError::UnsupportedResolution(other.to_string())),
        }
    }
}

/// Video codec allow-list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    #[default]
    H264,
    H265,
    Vp9,
}

impl Codec {
    pub fn as_str(&self) -> &'static str {
        match self {
            Codec::H264 => "h264",
            Codec::H265 => "h265",
            Codec::Vp9 => "vp9",
        }
    }

    /// Container extension produced for this codec.
    pub fn container(&self) -> &'static str {
        match self {
            Codec::H264 | Codec::H265 => "mp4",
            Codec::Vp9 => "webm",
        }
    }

    /// FFmpeg encoder name.
    pub fn ffmpeg_encoder(&self) -> &'static str {
        match self {
            Codec::H264 => "libx264",
            Codec::H265 => "libx265",
            Codec::Vp9 => "libvpx-vp9",
        }
    }

    /// MIME type of the produced container.
    pub fn content_type(&self) -> &'static str {
        match self {
            Codec::H264 | Codec::H265 => "video/mp4",
            Codec::Vp9 => "video/webm",
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Codec {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "h264" => Ok(Codec::H264),
            "h265" | "hevc" => Ok(Codec::H265),
            "vp9" => Ok(Codec::Vp9),
            other => Err(ModelError::UnsupportedCodec(other.to_string())),
        }
    }
}

/// Quality profile, mapped to a constant-rate factor per codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Low,
    #[default]
    Medium,
    High,
    Ultra,
}

impl Quality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::Low => "low",
            Quality::Medium => "medium",
            Quality::High => "high",
            Quality::Ultra => "ultra",
        }
    }

    /// CRF value for the given codec. VP9 uses a 0-63 scale.
    pub fn crf(&self, codec: Codec) -> u8 {
        match (codec, self) {
            (Codec::H264, Quality::Low) => 28,
            (Codec::H264, Quality::Medium) => 23,
            (Codec::H264, Quality::High) => 20,
            (Codec::H264, Quality::Ultra) => 17,
            (Codec::H265, Quality::Low) => 32,
            (Codec::H265, Quality::Medium) => 28,
            (Codec::H265, Quality::High) => 24,
            (Codec::H265, Quality::Ultra) => 20,
            (Codec::Vp9, Quality::Low) => 40,
            (Codec::Vp9, Quality::Medium) => 33,
            (Codec::Vp9, Quality::High) => 28,
            (Codec::Vp9, Quality::Ultra) => 24,
        }
    }
}

impl FromStr for Quality {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" | "draft" => Ok(Quality::Low),
            "medium" => Ok(Quality::Medium),
            "high" => Ok(Quality::High),
            "ultra" | "max" => Ok(Quality::Ultra),
            other => Err(ModelError::invalid_settings(format!("unknown quality '{}'", other))),
        }
    }
}

/// Settings for one render job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RenderSettings {
    /// Output resolution
    #[serde(default)]
    pub resolution: Resolution,

    /// Frames per second
    #[serde(default = "default_fps")]
    pub fps: u32,

    /// Quality profile
    #[serde(default)]
    pub quality: Quality,

    /// Video codec
    #[serde(default)]
    pub codec: Codec,

    /// Encoder speed preset (x264/x265 names, e.g. "ultrafast")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preset: Option<String>,
}

fn default_fps() -> u32 {
    DEFAULT_FPS
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            resolution: Resolution::default(),
            fps: DEFAULT_FPS,
            quality: Quality::default(),
            codec: Codec::default(),
            preset: None,
        }
    }
}

impl RenderSettings {
    pub fn new(resolution: Resolution, fps: u32, quality: Quality, codec: Codec) -> Self {
        Self {
            resolution,
            fps,
            quality,
            codec,
            preset: None,
        }
    }

    pub fn with_preset(mut self, preset: impl Into<String>) -> Self {
        self.preset = Some(preset.into());
        self
    }

    /// Validate before any work starts.
    pub fn validate(&self) -> ModelResult<()> {
        if self.fps == 0 || self.fps > MAX_FPS {
            return Err(ModelError::invalid_settings(format!(
                "fps must be between 1 and {}, got {}",
                MAX_FPS, self.fps
            )));
        }
        if let Some(preset) = &self.preset {
            if preset.is_empty() || !preset.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Err(ModelError::invalid_settings(format!(
                    "invalid encoder preset '{}'",
                    preset
                )));
            }
        }
        Ok(())
    }

    /// Output file name for a job with this codec.
    pub fn output_file_name(&self, stem: &str) -> String {
        format!("{}.{}", stem, self.codec.container())
    }
}
