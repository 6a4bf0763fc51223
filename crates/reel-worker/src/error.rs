//! Worker error types.

use thiserror::Error;

use reel_media::MediaError;
use reel_models::{ErrorKind, ModelError};
use reel_storage::StorageError;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Slides unavailable: {0}")]
    SlidesUnavailable(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Job store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Job cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Model(#[from] ModelError),

    #[error("{0}")]
    Media(#[from] MediaError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn slides_unavailable(msg: impl Into<String>) -> Self {
        Self::SlidesUnavailable(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Classification persisted with a failed job.
    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkerError::InvalidInput(_) | WorkerError::Model(_) => ErrorKind::Input,
            WorkerError::SlidesUnavailable(_) | WorkerError::Io(_) => ErrorKind::Resource,
            WorkerError::Cancelled => ErrorKind::Cancelled,
            WorkerError::Storage(_) => ErrorKind::Storage,
            WorkerError::JobNotFound(_)
            | WorkerError::Store(_)
            | WorkerError::ConfigError(_)
            | WorkerError::Internal(_) => ErrorKind::Internal,
            WorkerError::Media(e) => media_kind(e),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            WorkerError::Cancelled | WorkerError::Media(MediaError::Cancelled)
        )
    }
}

fn media_kind(error: &MediaError) -> ErrorKind {
    match error {
        MediaError::InvalidInput(_) | MediaError::UnsupportedFormat(_) => ErrorKind::Input,
        MediaError::Cancelled => ErrorKind::Cancelled,
        MediaError::Timeout(_) => ErrorKind::Timeout,
        MediaError::FfmpegFailed { .. }
        | MediaError::FfprobeFailed { .. }
        | MediaError::FfmpegNotFound
        | MediaError::FfprobeNotFound => ErrorKind::Subprocess,
        MediaError::FileNotFound(_)
        | MediaError::InvalidVideo(_)
        | MediaError::Io(_)
        | MediaError::Image(_) => ErrorKind::Resource,
        MediaError::JsonParse(_) | MediaError::Internal(_) => ErrorKind::Internal,
    }
}

impl From<redis::RedisError> for WorkerError {
    fn from(e: redis::RedisError) -> Self {
        WorkerError::Store(e.to_string())
    }
}

impl From<serde_json::Error> for WorkerError {
    fn from(e: serde_json::Error) -> Self {
        WorkerError::Store(format!("job record encoding: {}", e))
    }
}
