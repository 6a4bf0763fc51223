//! Job control: start, status, cancel and event subscription.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{broadcast, watch, Semaphore};
use tracing::{info, warn};

use reel_media::{FfmpegEncoder, MetricsCollector, ThumbnailGenerator};
use reel_models::{JobId, RenderEvent, RenderJob, RenderSettings};
use reel_storage::StorageBackend;

use crate::config::{JobStoreKind, WorkerConfig};
use crate::error::{WorkerError, WorkerResult};
use crate::render_job::{wait_cancelled, RenderContext, RenderJobWorker};
use crate::slides::{JsonDirSlideSource, SlideSource};
use crate::store::{JobStore, MemoryJobStore, RedisJobStore};
use crate::uploader::ArtifactUploader;

/// Runs render jobs on tokio tasks, at most `max_concurrent_jobs` at once.
pub struct JobController {
    worker: RenderJobWorker,
    store: Arc<dyn JobStore>,
    events: broadcast::Sender<RenderEvent>,
    job_semaphore: Arc<Semaphore>,
    /// Cancel flags of jobs that have not finished yet
    running: Arc<Mutex<HashMap<JobId, watch::Sender<bool>>>>,
}

impl JobController {
    pub fn new(config: WorkerConfig, ctx: RenderContext) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let job_semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1)));
        let store = ctx.store.clone();
        let worker = RenderJobWorker::new(Arc::new(config), ctx, events.clone());

        Self {
            worker,
            store,
            events,
            job_semaphore,
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Wire up ffmpeg, the configured job store, slide directory and object store.
    pub async fn from_config(config: WorkerConfig) -> WorkerResult<Self> {
        let metrics = MetricsCollector::new();

        let store: Arc<dyn JobStore> = match config.job_store {
            JobStoreKind::Memory => Arc::new(MemoryJobStore::new()),
            JobStoreKind::Redis => {
                let url = config.redis_url.as_deref().ok_or_else(|| {
                    WorkerError::config_error("REDIS_URL is required when JOB_STORE=redis")
                })?;
                Arc::new(RedisJobStore::new(url, config.job_ttl)?)
            }
        };

        let slides: Arc<dyn SlideSource> = match &config.slides_dir {
            Some(dir) => Arc::new(JsonDirSlideSource::new(dir)),
            None => return Err(WorkerError::config_error("WORKER_SLIDES_DIR is not set")),
        };

        let objects = StorageBackend::from_env()?.open().await?;
        let encoder = FfmpegEncoder::new(config.encode_timeout.as_secs()).with_metrics(metrics.clone());
        let thumbnails = ThumbnailGenerator::default().with_metrics(metrics.clone());

        let ctx = RenderContext {
            slides,
            encoder: Arc::new(encoder),
            uploader: ArtifactUploader::new(objects, thumbnails),
            store,
            metrics,
        };
        Ok(Self::new(config, ctx))
    }

    /// Record a queued job and schedule it.
    ///
    /// Invalid settings are rejected here and no record is written.
    pub async fn start(
        &self,
        project_id: impl Into<String>,
        user_id: impl Into<String>,
        settings: RenderSettings,
    ) -> WorkerResult<JobId> {
        settings.validate()?;
        let job = RenderJob::new(project_id, user_id, settings);
        let job_id = job.id.clone();

        self.store.insert(&job).await?;
        let _ = self.events.send(RenderEvent::from_job(&job));

        let (cancel_tx, cancel_rx) = watch::channel(false);
        self.lock_running().insert(job_id.clone(), cancel_tx);

        let worker = self.worker.clone();
        let semaphore = Arc::clone(&self.job_semaphore);
        let running = Arc::clone(&self.running);
        info!(job_id = %job_id, project_id = %job.project_id, "Queued render job");

        tokio::spawn(async move {
            let id = job.id.clone();
            let permit = tokio::select! {
                permit = semaphore.acquire_owned() => permit.ok(),
                _ = wait_cancelled(cancel_rx.clone()) => None,
            };

            let finished = match permit {
                Some(_permit) if !*cancel_rx.borrow() => {
                    worker.process_render_job(job, cancel_rx).await
                }
                Some(_) => worker.fail_unstarted(job, WorkerError::Cancelled).await,
                None if *cancel_rx.borrow() => {
                    worker.fail_unstarted(job, WorkerError::Cancelled).await
                }
                None => {
                    worker
                        .fail_unstarted(job, WorkerError::internal("job pool closed"))
                        .await
                }
            };

            running
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&id);
            info!(job_id = %id, summary = %finished.summary(), "Render job finished");
        });

        Ok(job_id)
    }

    pub async fn get_status(&self, job_id: &JobId) -> WorkerResult<Option<RenderJob>> {
        self.store.get(job_id).await
    }

    /// Request cancellation. Returns `false` for unknown or finished jobs.
    pub async fn cancel(&self, job_id: &JobId) -> bool {
        match self.store.get(job_id).await {
            Ok(Some(job)) if !job.is_terminal() => {}
            Ok(_) => return false,
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Status lookup failed during cancel");
            }
        }

        match self.lock_running().get(job_id) {
            Some(flag) => {
                flag.send_replace(true);
                info!(job_id = %job_id, "Cancellation requested");
                true
            }
            None => false,
        }
    }

    /// Cancel every job this controller is running.
    pub fn cancel_all(&self) -> usize {
        let running = self.lock_running();
        for flag in running.values() {
            flag.send_replace(true);
        }
        running.len()
    }

    /// Receive a [`RenderEvent`] for every checkpoint of every job.
    pub fn subscribe(&self) -> broadcast::Receiver<RenderEvent> {
        self.events.subscribe()
    }

    /// Wait until the job reaches a terminal state and return its record.
    pub async fn wait(&self, job_id: &JobId) -> WorkerResult<RenderJob> {
        let mut events = self.subscribe();
        loop {
            match self.store.get(job_id).await? {
                Some(job) if job.is_terminal() => return Ok(job),
                Some(_) => {}
                None => return Err(WorkerError::JobNotFound(job_id.to_string())),
            }

            // Recheck the store after any event for this job or a lag.
            loop {
                match events.recv().await {
                    Ok(event) if &event.job_id == job_id && event.is_terminal() => break,
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => break,
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(WorkerError::internal("event channel closed"))
                    }
                }
            }
        }
    }

    /// Jobs started here that have not finished.
    pub fn active_jobs(&self) -> usize {
        self.lock_running().len()
    }

    pub fn metrics(&self) -> &MetricsCollector {
        self.worker.metrics()
    }

    fn lock_running(&self) -> std::sync::MutexGuard<'_, HashMap<JobId, watch::Sender<bool>>> {
        self.running.lock().unwrap_or_else(|e| e.into_inner())
    }
}
