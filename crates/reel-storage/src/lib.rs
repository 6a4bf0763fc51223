//! Object storage for rendered artifacts.
//!
//! This crate provides:
//! - The [`ObjectStore`] trait (put, exists, stat, public URL)
//! - A Cloudflare R2 / S3-compatible backend
//! - A local filesystem backend
//! - Backend selection from the environment

pub mod client;
pub mod error;
pub mod local;
pub mod object;

use std::sync::Arc;

pub use client::{R2Client, R2Config};
pub use error::{StorageError, StorageResult};
pub use local::LocalObjectStore;
pub use object::{content_type_for, validate_key, ObjectInfo, ObjectStore, PutOptions};

/// Storage backend selected by `STORAGE_BACKEND`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    S3,
    Local,
}

impl std::str::FromStr for StorageBackend {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "s3" | "r2" => Ok(Self::S3),
            "local" => Ok(Self::Local),
            other => Err(StorageError::config_error(format!(
                "unknown STORAGE_BACKEND '{}', expected s3 or local",
                other
            ))),
        }
    }
}

impl StorageBackend {
    /// `STORAGE_BACKEND`, defaulting to `s3`.
    pub fn from_env() -> StorageResult<Self> {
        match std::env::var("STORAGE_BACKEND") {
            Ok(value) if !value.trim().is_empty() => value.parse(),
            _ => Ok(Self::S3),
        }
    }

    /// Build the configured store.
    pub async fn open(self) -> StorageResult<Arc<dyn ObjectStore>> {
        Ok(match self {
            Self::S3 => Arc::new(R2Client::from_env().await?),
            Self::Local => Arc::new(LocalObjectStore::from_env()?),
        })
    }
}
