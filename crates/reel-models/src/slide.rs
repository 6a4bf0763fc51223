//! Slide descriptions consumed by the frame generator.
//!
//! Slides are immutable input owned by the project subsystem. Element
//! coordinates are expressed in a fixed design canvas ([`DESIGN_WIDTH`] x
//! [`DESIGN_HEIGHT`]) and scaled to the output resolution at render time.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};

/// Design canvas width that slide coordinates refer to.
pub const DESIGN_WIDTH: u32 = 1920;
/// Design canvas height that slide coordinates refer to.
pub const DESIGN_HEIGHT: u32 = 1080;

/// Default background color when none is given.
pub const DEFAULT_BACKGROUND: &str = "#000000";
/// Default text color.
pub const DEFAULT_TEXT_COLOR: &str = "#ffffff";
/// Default body font size in design-canvas pixels.
pub const DEFAULT_FONT_SIZE: f32 = 48.0;

/// One slide of a render request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Slide {
    pub id: String,

    /// Render position, contiguous from 0
    pub order_index: u32,

    /// On-screen duration in seconds
    pub duration_seconds: f64,

    #[serde(default)]
    pub content: SlideContent,

    /// Entry transition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transition: Option<Transition>,
}

impl Slide {
    pub fn new(id: impl Into<String>, order_index: u32, duration_seconds: f64) -> Self {
        Self {
            id: id.into(),
            order_index,
            duration_seconds,
            content: SlideContent::default(),
            transition: None,
        }
    }

    pub fn with_content(mut self, content: SlideContent) -> Self {
        self.content = content;
        self
    }

    pub fn with_transition(mut self, transition: Transition) -> Self {
        self.transition = Some(transition);
        self
    }

    /// Number of frames this slide contributes at `fps`.
    ///
    /// Rounded per slide, so a very short slide may contribute zero frames.
    pub fn frame_count(&self, fps: u32) -> u64 {
        if !self.duration_seconds.is_finite() || self.duration_seconds <= 0.0 {
            return 0;
        }
        (self.duration_seconds * fps as f64).round() as u64
    }
}

/// Structured slide content.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct SlideContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Positioned images (legacy shape, rendered like `SlideElement::Image`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<ImageElement>>,

    /// Free-form positioned elements
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub elements: Vec<SlideElement>,

    #[serde(default)]
    pub background: Background,
}

/// Slide background.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Background {
    Solid {
        color: String,
    },
    /// Vertical gradient, top to bottom
    Gradient {
        from: String,
        to: String,
    },
    /// Cover-scaled image, `color` painted underneath
    Image {
        image: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        color: Option<String>,
    },
}

impl Default for Background {
    fn default() -> Self {
        Background::Solid {
            color: DEFAULT_BACKGROUND.to_string(),
        }
    }
}

/// Positioned image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ImageElement {
    /// Local path of the image
    pub src: String,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Positioned text block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TextElement {
    pub text: String,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_size: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

/// A slide element. Unrecognized kinds deserialize to [`SlideElement::Unknown`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SlideElement {
    Text(TextElement),
    Image(ImageElement),
    #[serde(other)]
    Unknown,
}

/// Slide entry transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Transition {
    #[serde(default)]
    pub kind: TransitionKind,
    #[serde(default = "default_transition_duration")]
    pub duration_seconds: f64,
}

fn default_transition_duration() -> f64 {
    0.5
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum TransitionKind {
    #[default]
    None,
    Fade,
}

/// Parse a `#rgb`, `#rrggbb` or `#rrggbbaa` color into RGBA.
pub fn parse_color(value: &str) -> Option<[u8; 4]> {
    let hex = value.trim().strip_prefix('#')?;
    if !hex.is_ascii() {
        return None;
    }
    let channel = |s: &str| u8::from_str_radix(s, 16).ok();
    match hex.len() {
        3 => {
            let mut rgb = [0u8; 3];
            for (i, c) in hex.chars().enumerate() {
                let v = c.to_digit(16)? as u8;
                rgb[i] = v * 17;
            }
            Some([rgb[0], rgb[1], rgb[2], 255])
        }
        6 => Some([
            channel(&hex[0..2])?,
            channel(&hex[2..4])?,
            channel(&hex[4..6])?,
            255,
        ]),
        8 => Some([
            channel(&hex[0..2])?,
            channel(&hex[2..4])?,
            channel(&hex[4..6])?,
            channel(&hex[6..8])?,
        ]),
        _ => None,
    }
}

/// Sort slides by `order_index` and check the structural invariants:
/// indices contiguous from 0, finite non-negative durations.
pub fn validate_slides(slides: &[Slide]) -> ModelResult<Vec<Slide>> {
    let mut ordered = slides.to_vec();
    ordered.sort_by_key(|s| s.order_index);

    for (expected, slide) in ordered.iter().enumerate() {
        if slide.order_index as usize != expected {
            return Err(ModelError::invalid_slides(format!(
                "order_index must be contiguous from 0: expected {}, found {} (slide {})",
                expected, slide.order_index, slide.id
            )));
        }
        if !slide.duration_seconds.is_finite() || slide.duration_seconds < 0.0 {
            return Err(ModelError::invalid_slides(format!(
                "slide {} has invalid duration {}",
                slide.id, slide.duration_seconds
            )));
        }
    }

    Ok(ordered)
}

/// Total frame count for an ordered slide list.
pub fn total_frames(slides: &[Slide], fps: u32) -> u64 {
    slides.iter().map(|s| s.frame_count(fps)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_count_rounds_per_slide() {
        let slides = vec![Slide::new("a", 0, 3.0), Slide::new("b", 1, 2.0)];
        assert_eq!(total_frames(&slides, 30), 150);

        assert_eq!(Slide::new("c", 0, 0.01).frame_count(30), 0);
        assert_eq!(Slide::new("d", 0, 0.02).frame_count(30), 1);
        assert_eq!(Slide::new("e", 0, 0.0).frame_count(30), 0);
    }

    #[test]
    fn test_validate_sorts_and_checks_contiguity() {
        let slides = vec![Slide::new("b", 1, 1.0), Slide::new("a", 0, 1.0)];
        let ordered = validate_slides(&slides).unwrap();
        assert_eq!(ordered[0].id, "a");

        let gap = vec![Slide::new("a", 0, 1.0), Slide::new("c", 2, 1.0)];
        assert!(matches!(
            validate_slides(&gap),
            Err(ModelError::InvalidSlides(_))
        ));
    }

    #[test]
    fn test_validate_rejects_bad_duration() {
        assert!(validate_slides(&[Slide::new("a", 0, -1.0)]).is_err());
        assert!(validate_slides(&[Slide::new("a", 0, f64::NAN)]).is_err());
        assert!(validate_slides(&[Slide::new("a", 0, 0.0)]).is_ok());
    }

    #[test]
    fn test_unknown_element_kind() {
        let json = r##"{
            "id": "s1",
            "order_index": 0,
            "duration_seconds": 2.0,
            "content": {
                "title": "Hello",
                "elements": [
                    {"kind": "text", "text": "Hi", "x": 10, "y": 20, "width": 300, "height": 60},
                    {"kind": "chart", "series": [1, 2, 3]}
                ],
                "background": {"type": "gradient", "from": "#000", "to": "#336699"}
            }
        }"##;
        let slide: Slide = serde_json::from_str(json).unwrap();
        assert_eq!(slide.content.elements.len(), 2);
        assert!(matches!(slide.content.elements[0], SlideElement::Text(_)));
        assert_eq!(slide.content.elements[1], SlideElement::Unknown);
        assert!(matches!(slide.content.background, Background::Gradient { .. }));
    }

    #[test]
    fn test_default_background() {
        let slide: Slide =
            serde_json::from_str(r#"{"id":"s","order_index":0,"duration_seconds":1}"#).unwrap();
        assert_eq!(slide.content.background, Background::default());
    }

    #[test]
    fn test_parse_color() {
        assert_eq!(parse_color("#fff"), Some([255, 255, 255, 255]));
        assert_eq!(parse_color("#336699"), Some([0x33, 0x66, 0x99, 255]));
        assert_eq!(parse_color("#00000080"), Some([0, 0, 0, 0x80]));
        assert_eq!(parse_color("red"), None);
        assert_eq!(parse_color("#12345"), None);
    }
}
