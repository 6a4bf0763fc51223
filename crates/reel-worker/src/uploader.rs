//! Upload of the rendered video and its cover thumbnail.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use reel_media::{MediaError, ProgressSink, ThumbnailGenerator};
use reel_models::{JobId, RenderSettings};
use reel_storage::{ObjectStore, PutOptions};

use crate::error::WorkerResult;

const COVER_FILE_NAME: &str = "thumbnail.jpg";

/// Object metadata attached to the uploaded video.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoMetadata {
    pub resolution: String,
    pub fps: u32,
    pub codec: String,
    pub format: String,
    pub duration_seconds: Option<f64>,
}

impl VideoMetadata {
    pub fn from_settings(settings: &RenderSettings, duration_seconds: Option<f64>) -> Self {
        Self {
            resolution: settings.resolution.to_string(),
            fps: settings.fps,
            codec: settings.codec.to_string(),
            format: settings.codec.container().to_string(),
            duration_seconds,
        }
    }

    fn to_map(&self) -> HashMap<String, String> {
        let mut map = HashMap::from([
            ("resolution".to_string(), self.resolution.clone()),
            ("fps".to_string(), self.fps.to_string()),
            ("codec".to_string(), self.codec.clone()),
            ("format".to_string(), self.format.clone()),
        ]);
        if let Some(duration) = self.duration_seconds {
            map.insert("duration".to_string(), format!("{:.3}", duration));
        }
        map
    }
}

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub video_path: PathBuf,
    pub project_id: String,
    pub user_id: String,
    pub job_id: JobId,
    pub metadata: VideoMetadata,
    /// Existing cover image; generated from the video when `None`
    pub thumbnail_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadResult {
    pub video_url: String,
    pub thumbnail_url: String,
    /// Bytes uploaded for the video
    pub file_size: u64,
    pub upload_time: Duration,
}

/// `renders/{project_id}/{job_id}/video.{ext}`
pub fn video_key(project_id: &str, job_id: &JobId, extension: &str) -> String {
    format!("renders/{}/{}/video.{}", project_id, job_id, extension)
}

/// `renders/{project_id}/{job_id}/thumbnail.jpg`
pub fn thumbnail_key(project_id: &str, job_id: &JobId) -> String {
    format!("renders/{}/{}/{}", project_id, job_id, COVER_FILE_NAME)
}

/// Puts rendered artifacts into object storage.
#[derive(Clone)]
pub struct ArtifactUploader {
    store: Arc<dyn ObjectStore>,
    thumbnails: ThumbnailGenerator,
}

impl ArtifactUploader {
    pub fn new(store: Arc<dyn ObjectStore>, thumbnails: ThumbnailGenerator) -> Self {
        Self { store, thumbnails }
    }

    /// Upload the video, then a cover thumbnail.
    ///
    /// A missing video fails before storage is touched. The video put is a
    /// single attempt. A cover failure fails the upload; the video object
    /// already put stays in storage. `on_progress` gets 50 once the video is
    /// stored.
    pub async fn upload_video(
        &self,
        request: &UploadRequest,
        on_progress: Option<ProgressSink>,
    ) -> WorkerResult<UploadResult> {
        let started = Instant::now();
        let video = &request.video_path;
        match tokio::fs::metadata(video).await {
            Ok(meta) if meta.is_file() => {}
            _ => return Err(MediaError::FileNotFound(video.clone()).into()),
        }

        let extension = video
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_else(|| request.metadata.format.clone());
        let key = video_key(&request.project_id, &request.job_id, &extension);

        let mut options = PutOptions::new()
            .with_metadata("project_id", request.project_id.as_str())
            .with_metadata("user_id", request.user_id.as_str())
            .with_metadata("job_id", request.job_id.as_str());
        options.metadata.extend(request.metadata.to_map());

        let info = self.store.put_file(video, &key, &options).await?;
        let video_url = self.store.public_url(&key);
        if let Some(sink) = on_progress {
            sink(50);
        }

        let thumbnail_url = match self.upload_cover(request).await {
            Ok(url) => url,
            Err(e) => {
                warn!(job_id = %request.job_id, key = %key, error = %e, "Cover failed after video upload");
                return Err(e);
            }
        };
        let upload_time = started.elapsed();

        info!(
            job_id = %request.job_id,
            key = %key,
            bytes = info.size,
            elapsed_ms = upload_time.as_millis() as u64,
            "Uploaded render"
        );

        Ok(UploadResult {
            video_url,
            thumbnail_url,
            file_size: info.size,
            upload_time,
        })
    }

    async fn upload_cover(&self, request: &UploadRequest) -> WorkerResult<String> {
        let cover = match &request.thumbnail_path {
            Some(path) => path.clone(),
            None => {
                let path = cover_path(&request.video_path);
                self.thumbnails
                    .generate_cover_thumbnail(&request.video_path, &path)
                    .await?;
                path
            }
        };

        let key = thumbnail_key(&request.project_id, &request.job_id);
        self.store.put_file(&cover, &key, &PutOptions::new()).await?;
        Ok(self.store.public_url(&key))
    }
}

fn cover_path(video: &Path) -> PathBuf {
    video
        .parent()
        .map(|dir| dir.join(COVER_FILE_NAME))
        .unwrap_or_else(|| PathBuf::from(COVER_FILE_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use reel_media::{FrameExtractor, MediaResult, VideoInfo};
    use reel_models::ThumbnailSize;
    use reel_storage::{LocalObjectStore, StorageError};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct StubExtractor {
        fail: bool,
    }

    #[async_trait]
    impl FrameExtractor for StubExtractor {
        async fn probe(&self, _video: &Path) -> MediaResult<VideoInfo> {
            if self.fail {
                return Err(MediaError::InvalidVideo("unreadable".into()));
            }
            Ok(VideoInfo {
                duration: 4.0,
                width: 1280,
                height: 720,
                fps: 30.0,
                codec: "h264".into(),
                size: 10,
                bitrate: 1,
            })
        }

        async fn extract(&self, _: &Path, _: f64, size: &ThumbnailSize, output: &Path) -> MediaResult<()> {
            let img = image::RgbImage::from_pixel(size.width, size.height, image::Rgb([90, 120, 200]));
            img.save(output)?;
            Ok(())
        }
    }

    /// Store that counts puts and can refuse them.
    struct CountingStore {
        inner: LocalObjectStore,
        puts: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl ObjectStore for CountingStore {
        async fn put_file(&self, path: &Path, key: &str, options: &PutOptions) -> reel_storage::StorageResult<reel_storage::ObjectInfo> {
            self.puts.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(StorageError::upload_failed("connection refused"));
            }
            self.inner.put_file(path, key, options).await
        }

        async fn put_bytes(&self, data: Vec<u8>, key: &str, options: &PutOptions) -> reel_storage::StorageResult<reel_storage::ObjectInfo> {
            self.puts.fetch_add(1, Ordering::SeqCst);
            self.inner.put_bytes(data, key, options).await
        }

        async fn exists(&self, key: &str) -> reel_storage::StorageResult<bool> {
            self.inner.exists(key).await
        }

        async fn stat(&self, key: &str) -> reel_storage::StorageResult<reel_storage::ObjectInfo> {
            self.inner.stat(key).await
        }

        fn public_url(&self, key: &str) -> String {
            self.inner.public_url(key)
        }
    }

    fn setup(dir: &Path, store_fails: bool, extractor_fails: bool) -> (ArtifactUploader, Arc<CountingStore>) {
        let store = Arc::new(CountingStore {
            inner: LocalObjectStore::new(dir.join("bucket"), "https://cdn.test"),
            puts: AtomicUsize::new(0),
            fail: store_fails,
        });
        let thumbnails = ThumbnailGenerator::new(Arc::new(StubExtractor { fail: extractor_fails }));
        (ArtifactUploader::new(store.clone(), thumbnails), store)
    }

    fn request(video: PathBuf) -> UploadRequest {
        UploadRequest {
            video_path: video,
            project_id: "proj".into(),
            user_id: "user".into(),
            job_id: JobId::from_string("job1"),
            metadata: VideoMetadata::from_settings(&RenderSettings::default(), Some(4.0)),
            thumbnail_path: None,
        }
    }

    #[tokio::test]
    async fn test_upload_with_generated_cover() {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("work").join("video.mp4");
        std::fs::create_dir_all(video.parent().unwrap()).unwrap();
        std::fs::write(&video, vec![0u8; 2048]).unwrap();

        let (uploader, store) = setup(dir.path(), false, false);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = seen.clone();
        let sink: ProgressSink = Arc::new(move |p| sink_seen.lock().unwrap().push(p));
        let result = uploader.upload_video(&request(video), Some(sink)).await.unwrap();

        assert_eq!(result.video_url, "https://cdn.test/renders/proj/job1/video.mp4");
        assert_eq!(result.thumbnail_url, "https://cdn.test/renders/proj/job1/thumbnail.jpg");
        assert_eq!(result.file_size, 2048);
        assert_eq!(store.puts.load(Ordering::SeqCst), 2);
        assert_eq!(*seen.lock().unwrap(), vec![50]);

        let metadata = store.inner.metadata("renders/proj/job1/video.mp4").await.unwrap();
        assert_eq!(metadata.get("codec").map(String::as_str), Some("h264"));
        assert_eq!(metadata.get("resolution").map(String::as_str), Some("720p"));
        assert_eq!(metadata.get("duration").map(String::as_str), Some("4.000"));
    }

    #[tokio::test]
    async fn test_missing_video_touches_no_storage() {
        let dir = tempfile::tempdir().unwrap();
        let (uploader, store) = setup(dir.path(), false, false);
        let result = uploader.upload_video(&request(dir.path().join("nope.mp4")), None).await;

        assert!(result.is_err());
        assert_eq!(store.puts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_storage_failure_is_single_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("video.mp4");
        std::fs::write(&video, b"data").unwrap();

        let (uploader, store) = setup(dir.path(), true, false);
        let result = uploader.upload_video(&request(video), None).await;

        assert!(matches!(result, Err(crate::WorkerError::Storage(_))));
        assert_eq!(store.puts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cover_failure_fails_upload_and_keeps_video() {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("video.webm");
        std::fs::write(&video, b"data").unwrap();

        let (uploader, store) = setup(dir.path(), false, true);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = seen.clone();
        let sink: ProgressSink = Arc::new(move |p| sink_seen.lock().unwrap().push(p));
        let result = uploader.upload_video(&request(video), Some(sink)).await;

        assert!(matches!(result, Err(crate::WorkerError::Media(_))));
        assert_eq!(store.puts.load(Ordering::SeqCst), 1);
        assert!(store.exists("renders/proj/job1/video.webm").await.unwrap());
        assert!(!store.exists("renders/proj/job1/thumbnail.jpg").await.unwrap());
        assert_eq!(*seen.lock().unwrap(), vec![50]);
    }

    #[test]
    fn test_keys() {
        let id = JobId::from_string("j");
        assert_eq!(video_key("p", &id, "mp4"), "renders/p/j/video.mp4");
        assert_eq!(thumbnail_key("p", &id), "renders/p/j/thumbnail.jpg");
    }
}
