//! Render job worker.
//!
//! This crate provides:
//! - Job controller with a bounded pool, cancellation and status lookup
//! - The render pipeline: frames, encode, upload
//! - Job records in memory or Redis
//! - Slide sources and artifact upload
//! - Structured job logging

pub mod config;
pub mod controller;
pub mod error;
pub mod logging;
pub mod render_job;
pub mod slides;
pub mod store;
pub mod uploader;

pub use config::{JobStoreKind, WorkerConfig};
pub use controller::JobController;
pub use error::{WorkerError, WorkerResult};
pub use logging::JobLogger;
pub use render_job::{JobUpdate, RenderContext, RenderJobWorker};
pub use slides::{InMemorySlideSource, JsonDirSlideSource, SlideSource};
pub use store::{JobStore, MemoryJobStore, RedisJobStore};
pub use uploader::{ArtifactUploader, UploadRequest, UploadResult, VideoMetadata};
