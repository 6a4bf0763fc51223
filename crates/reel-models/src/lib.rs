//! Shared data models for the slide render pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Slides and their tagged element content
//! - Render settings (resolution, codec, quality)
//! - Render jobs and the job state machine
//! - Thumbnails, scenes and sprite sheets
//! - Progress events

pub mod encoding;
pub mod error;
pub mod event;
pub mod job;
pub mod rect;
pub mod slide;
pub mod thumbnail;
pub mod timestamp;

// Re-export common types
pub use encoding::{Codec, Quality, RenderSettings, Resolution};
pub use error::{ModelError, ModelResult};
pub use event::RenderEvent;
pub use job::{ErrorKind, JobId, JobStatus, RenderJob, RenderRequest, RenderStage};
pub use rect::PixelRect;
pub use slide::{
    Background, ImageElement, Slide, SlideContent, SlideElement, TextElement, Transition,
    TransitionKind,
};
pub use thumbnail::{FrameQuality, Scene, Sprite, Storyboard, Thumbnail, ThumbnailSize, STANDARD_SIZES};
