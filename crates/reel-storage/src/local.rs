//! Filesystem-backed object store for development and tests.
//!
//! Objects live at `{root}/{key}`; content type and metadata are kept in a
//! `{key}.meta.json` sidecar. Puts write `{key}.part` and rename it over the
//! key, so a failed put never leaves a partial object behind.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::UNIX_EPOCH;
use tracing::{debug, info, warn};

use crate::error::{StorageError, StorageResult};
use crate::object::{join_url, validate_key, ObjectInfo, ObjectStore, PutOptions};

const SIDECAR_SUFFIX: &str = ".meta.json";
const PART_SUFFIX: &str = ".part";

#[derive(Debug, Serialize, Deserialize)]
struct Sidecar {
    content_type: String,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

/// Object store rooted at a local directory.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
    base_url: String,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.into(),
        }
    }

    /// `LOCAL_STORE_ROOT` (required) and `LOCAL_STORE_BASE_URL` (default `file://{root}`).
    pub fn from_env() -> StorageResult<Self> {
        let root = std::env::var("LOCAL_STORE_ROOT")
            .map_err(|_| StorageError::config_error("LOCAL_STORE_ROOT not set"))?;
        let base_url = std::env::var("LOCAL_STORE_BASE_URL")
            .unwrap_or_else(|_| format!("file://{}", root.trim_end_matches('/')));
        Ok(Self::new(root, base_url))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem path of `key`.
    pub fn object_path(&self, key: &str) -> StorageResult<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    /// Metadata stored alongside `key`.
    pub async fn metadata(&self, key: &str) -> StorageResult<HashMap<String, String>> {
        Ok(self.read_sidecar(key).await?.map(|s| s.metadata).unwrap_or_default())
    }

    async fn prepare(&self, key: &str) -> StorageResult<PathBuf> {
        let path = self.object_path(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(path)
    }

    async fn write_sidecar(&self, path: &Path, key: &str, options: &PutOptions) -> StorageResult<String> {
        let content_type = options.content_type_for(key);
        let sidecar = Sidecar {
            content_type: content_type.clone(),
            metadata: options.metadata.clone(),
        };
        tokio::fs::write(sidecar_path(path), serde_json::to_vec_pretty(&sidecar)?).await?;
        Ok(content_type)
    }

    async fn read_sidecar(&self, key: &str) -> StorageResult<Option<Sidecar>> {
        let path = self.object_path(key)?;
        match tokio::fs::read(sidecar_path(&path)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

fn sidecar_path(path: &Path) -> PathBuf {
    with_suffix(path, SIDECAR_SUFFIX)
}

fn part_path(path: &Path) -> PathBuf {
    with_suffix(path, PART_SUFFIX)
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Move a fully written `.part` file over `dest`, removing it on failure.
async fn commit_part(part: &Path, dest: &Path, written: StorageResult<u64>) -> StorageResult<u64> {
    let result = match written {
        Ok(size) => tokio::fs::rename(part, dest).await.map(|_| size).map_err(StorageError::from),
        Err(e) => Err(e),
    };
    if result.is_err() {
        match tokio::fs::remove_file(part).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove {}: {}", part.display(), e),
        }
    }
    result
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put_file(&self, path: &Path, key: &str, options: &PutOptions) -> StorageResult<ObjectInfo> {
        let dest = self.prepare(key).await?;
        let part = part_path(&dest);
        debug!("Copying {} to {}", path.display(), dest.display());
        let copied = tokio::fs::copy(path, &part)
            .await
            .map_err(|e| StorageError::upload_failed(format!("{}: {}", key, e)));
        let size = commit_part(&part, &dest, copied).await?;
        let content_type = self.write_sidecar(&dest, key, options).await?;

        info!("Stored {} as {} ({} bytes)", path.display(), key, size);
        Ok(ObjectInfo {
            key: key.to_string(),
            size,
            content_type: Some(content_type),
            last_modified: None,
        })
    }

    async fn put_bytes(&self, data: Vec<u8>, key: &str, options: &PutOptions) -> StorageResult<ObjectInfo> {
        let dest = self.prepare(key).await?;
        let part = part_path(&dest);
        let size = data.len() as u64;
        let written = tokio::fs::write(&part, data)
            .await
            .map(|_| size)
            .map_err(|e| StorageError::upload_failed(format!("{}: {}", key, e)));
        commit_part(&part, &dest, written).await?;
        let content_type = self.write_sidecar(&dest, key, options).await?;

        Ok(ObjectInfo {
            key: key.to_string(),
            size,
            content_type: Some(content_type),
            last_modified: None,
        })
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.object_path(key)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    async fn stat(&self, key: &str) -> StorageResult<ObjectInfo> {
        let path = self.object_path(key)?;
        let meta = match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => meta,
            Ok(_) => return Err(StorageError::not_found(key)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(StorageError::not_found(key)),
            Err(e) => return Err(e.into()),
        };
        let sidecar = self.read_sidecar(key).await?;

        Ok(ObjectInfo {
            key: key.to_string(),
            size: meta.len(),
            content_type: sidecar.map(|s| s.content_type),
            last_modified: meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_millis() as u64),
        })
    }

    fn public_url(&self, key: &str) -> String {
        join_url(&self.base_url, key)
    }
}
