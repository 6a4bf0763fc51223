//! Validation errors for render inputs.

use thiserror::Error;

/// Result type for model validation.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors raised while validating render inputs or job transitions.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    #[error("Unsupported codec: {0}")]
    UnsupportedCodec(String),

    #[error("Unsupported resolution: {0}")]
    UnsupportedResolution(String),

    #[error("Invalid render settings: {0}")]
    InvalidSettings(String),

    #[error("Invalid slides: {0}")]
    InvalidSlides(String),

    #[error("Illegal job transition from {from} to {to}")]
    IllegalTransition { from: String, to: String },
}

impl ModelError {
    pub fn invalid_settings(msg: impl Into<String>) -> Self {
        Self::InvalidSettings(msg.into())
    }

    pub fn invalid_slides(msg: impl Into<String>) -> Self {
        Self::InvalidSlides(msg.into())
    }
}
