//! S3-compatible (Cloudflare R2) object store.

use std::path::Path;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Builder;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use aws_types::region::Region;
use tracing::{debug, info};

use crate::error::{StorageError, StorageResult};
use crate::object::{join_url, validate_key, ObjectInfo, ObjectStore, PutOptions};

/// Configuration for R2 client.
#[derive(Debug, Clone)]
pub struct R2Config {
    /// R2 endpoint URL (S3 API endpoint)
    pub endpoint_url: String,
    /// Access key ID
    pub access_key_id: String,
    /// Secret access key
    pub secret_access_key: String,
    /// Bucket name
    pub bucket_name: String,
    /// Region (usually "auto" for R2)
    pub region: String,
    /// Public base URL (custom domain or r2.dev); falls back to `{endpoint}/{bucket}`
    pub public_url: Option<String>,
}

impl R2Config {
    /// Create config from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        Ok(Self {
            endpoint_url: std::env::var("R2_ENDPOINT_URL")
                .map_err(|_| StorageError::config_error("R2_ENDPOINT_URL not set"))?,
            access_key_id: std::env::var("R2_ACCESS_KEY_ID")
                .map_err(|_| StorageError::config_error("R2_ACCESS_KEY_ID not set"))?,
            secret_access_key: std::env::var("R2_SECRET_ACCESS_KEY")
                .map_err(|_| StorageError::config_error("R2_SECRET_ACCESS_KEY not set"))?,
            bucket_name: std::env::var("R2_BUCKET_NAME")
                .map_err(|_| StorageError::config_error("R2_BUCKET_NAME not set"))?,
            region: std::env::var("R2_REGION").unwrap_or_else(|_| "auto".to_string()),
            public_url: std::env::var("R2_PUBLIC_URL").ok().filter(|s| !s.is_empty()),
        })
    }

    /// Base under which objects are publicly served.
    pub fn public_base(&self) -> String {
        match &self.public_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => join_url(&self.endpoint_url, &self.bucket_name),
        }
    }
}

/// Cloudflare R2 storage client.
#[derive(Clone)]
pub struct R2Client {
    client: Client,
    bucket: String,
    public_base: String,
}

impl R2Client {
    /// Create a new R2 client from configuration.
    pub async fn new(config: R2Config) -> StorageResult<Self> {
        let public_base = config.public_base();
        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "r2",
        );

        let sdk_config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&config.endpoint_url)
            .region(Region::new(config.region))
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Ok(Self {
            client: Client::from_conf(sdk_config),
            bucket: config.bucket_name,
            public_base,
        })
    }

    /// Create from environment variables.
    pub async fn from_env() -> StorageResult<Self> {
        let config = R2Config::from_env()?;
        Self::new(config).await
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Check connectivity to R2 by performing a head bucket operation.
    pub async fn check_connectivity(&self) -> StorageResult<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| StorageError::AwsSdk(format!("R2 connectivity check failed: {}", e)))?;
        Ok(())
    }

    async fn put(&self, body: ByteStream, size: u64, key: &str, options: &PutOptions) -> StorageResult<ObjectInfo> {
        let content_type = options.content_type_for(key);
        let metadata = (!options.metadata.is_empty()).then(|| options.metadata.clone());

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .content_type(&content_type)
            .set_metadata(metadata)
            .send()
            .await
            .map_err(|e| StorageError::upload_failed(format!("{}: {}", key, e)))?;

        Ok(ObjectInfo {
            key: key.to_string(),
            size,
            content_type: Some(content_type),
            last_modified: None,
        })
    }
}

#[async_trait]
impl ObjectStore for R2Client {
    async fn put_file(&self, path: &Path, key: &str, options: &PutOptions) -> StorageResult<ObjectInfo> {
        validate_key(key)?;
        let size = tokio::fs::metadata(path).await?.len();
        debug!("Uploading {} to {}", path.display(), key);

        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;
        let info = self.put(body, size, key, options).await?;

        info!("Uploaded {} to {} ({} bytes)", path.display(), key, size);
        Ok(info)
    }

    async fn put_bytes(&self, data: Vec<u8>, key: &str, options: &PutOptions) -> StorageResult<ObjectInfo> {
        validate_key(key)?;
        let size = data.len() as u64;
        debug!("Uploading {} bytes to {}", size, key);
        self.put(ByteStream::from(data), size, key, options).await
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        match self.stat(key).await {
            Ok(_) => Ok(true),
            Err(StorageError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn stat(&self, key: &str) -> StorageResult<ObjectInfo> {
        validate_key(key)?;
        let response = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_not_found()) {
                    StorageError::not_found(key)
                } else {
                    StorageError::AwsSdk(e.to_string())
                }
            })?;

        Ok(ObjectInfo {
            key: key.to_string(),
            size: response.content_length().unwrap_or(0).max(0) as u64,
            content_type: response.content_type().map(str::to_string),
            last_modified: response
                .last_modified()
                .and_then(|t| t.to_millis().ok())
                .map(|ms| ms as u64),
        })
    }

    fn public_url(&self, key: &str) -> String {
        join_url(&self.public_base, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(public_url: Option<&str>) -> R2Config {
        R2Config {
            endpoint_url: "https://acct.r2.cloudflarestorage.com".into(),
            access_key_id: "key".into(),
            secret_access_key: "secret".into(),
            bucket_name: "renders".into(),
            region: "auto".into(),
            public_url: public_url.map(Into::into),
        }
    }

    #[test]
    fn test_public_base() {
        assert_eq!(
            config(None).public_base(),
            "https://acct.r2.cloudflarestorage.com/renders"
        );
        assert_eq!(
            config(Some("https://cdn.example.com/")).public_base(),
            "https://cdn.example.com"
        );
    }

    #[tokio::test]
    async fn test_public_url_and_key_validation() {
        let client = R2Client::new(config(Some("https://cdn.example.com"))).await.unwrap();
        assert_eq!(
            client.public_url("renders/p/j/video.mp4"),
            "https://cdn.example.com/renders/p/j/video.mp4"
        );
        let result = client.put_bytes(vec![1], "../escape", &PutOptions::new()).await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));
    }
}
