//! The object store abstraction shared by the R2 and local backends.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::error::{StorageError, StorageResult};

/// Options for a single put.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PutOptions {
    /// Defaults to a type derived from the key's extension
    pub content_type: Option<String>,
    pub metadata: HashMap<String, String>,
}

impl PutOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// The explicit content type, or one guessed from `key`.
    pub fn content_type_for(&self, key: &str) -> String {
        self.content_type
            .clone()
            .unwrap_or_else(|| content_type_for(key).to_string())
    }
}

/// Information about a stored object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectInfo {
    /// Object key
    pub key: String,
    /// Size in bytes
    pub size: u64,
    pub content_type: Option<String>,
    /// Last modified timestamp (milliseconds since epoch)
    pub last_modified: Option<u64>,
}

/// Durable storage for rendered artifacts.
///
/// Puts are single attempts; callers decide whether to retry.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload a local file under `key`.
    async fn put_file(&self, path: &Path, key: &str, options: &PutOptions) -> StorageResult<ObjectInfo>;

    /// Upload an in-memory body under `key`.
    async fn put_bytes(&self, data: Vec<u8>, key: &str, options: &PutOptions) -> StorageResult<ObjectInfo>;

    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Metadata for `key`; [`StorageError::NotFound`] when absent.
    async fn stat(&self, key: &str) -> StorageResult<ObjectInfo>;

    /// Public URL under which `key` is served.
    fn public_url(&self, key: &str) -> String;
}

/// Reject keys that are empty, absolute, or escape their prefix.
pub fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty() {
        return Err(StorageError::invalid_key("empty key"));
    }
    if key.starts_with('/') || key.contains('\\') || key.contains('\0') {
        return Err(StorageError::invalid_key(key));
    }
    if key.split('/').any(|part| part.is_empty() || part == "." || part == "..") {
        return Err(StorageError::invalid_key(key));
    }
    Ok(())
}

/// Content type by file extension.
pub fn content_type_for(key: &str) -> &'static str {
    let ext = key
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "vtt" => "text/vtt",
        "json" => "application/json",
        _ => "application/octet-stream",
    }
}

/// Join a base URL and a key with exactly one slash.
pub fn join_url(base: &str, key: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), key.trim_start_matches('/'))
}
