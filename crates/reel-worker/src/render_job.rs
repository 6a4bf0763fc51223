//! Render job processing.
//!
//! One job runs `frames -> encode -> upload` in order. Stages report into a
//! [`JobUpdate`] channel drained by a recorder task that owns the job record,
//! persists every change and publishes it as a [`RenderEvent`]. Nothing else
//! writes the record while the job runs.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, error, warn, Instrument};

use reel_media::{
    EncodeRequest, FrameGeneration, FrameGenerator, FrameGeneratorConfig, MediaError,
    MetricsCollector, ProgressSink, VideoEncoder, FRAME_PATTERN,
};
use reel_models::{ErrorKind, RenderEvent, RenderJob, RenderStage, Slide};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::slides::SlideSource;
use crate::store::JobStore;
use crate::uploader::{ArtifactUploader, UploadRequest, VideoMetadata};

const FRAMES_DIR: &str = "frames";
const VIDEO_STEM: &str = "video";

/// Shared services a render job needs.
#[derive(Clone)]
pub struct RenderContext {
    pub slides: Arc<dyn SlideSource>,
    pub encoder: Arc<dyn VideoEncoder>,
    pub uploader: ArtifactUploader,
    pub store: Arc<dyn JobStore>,
    pub metrics: MetricsCollector,
}

/// A change to the running job, applied by the recorder in arrival order.
#[derive(Debug, Clone)]
pub enum JobUpdate {
    Advance {
        stage: RenderStage,
        progress: u8,
    },
    Complete {
        output_url: String,
        thumbnail_url: String,
        duration_ms: u64,
    },
    Fail {
        error: String,
        kind: ErrorKind,
    },
}

/// Sole writer of a job record while the job runs.
struct JobRecorder {
    job: RenderJob,
    store: Arc<dyn JobStore>,
    events: broadcast::Sender<RenderEvent>,
}

impl JobRecorder {
    async fn run(mut self, mut updates: mpsc::UnboundedReceiver<JobUpdate>) -> RenderJob {
        self.publish().await;
        while let Some(update) = updates.recv().await {
            self.apply(update).await;
        }
        self.job
    }

    async fn apply(&mut self, update: JobUpdate) {
        let changed = match update {
            JobUpdate::Advance { stage, progress } => self.job.advance(stage, progress),
            JobUpdate::Complete {
                output_url,
                thumbnail_url,
                duration_ms,
            } => self
                .job
                .complete(output_url, Some(thumbnail_url), duration_ms)
                .map(|_| true),
            JobUpdate::Fail { error, kind } => self.job.fail(error, kind).map(|_| true),
        };

        match changed {
            Ok(true) => self.publish().await,
            Ok(false) => {}
            Err(e) => debug!(job_id = %self.job.id, error = %e, "Dropped job update"),
        }
    }

    async fn publish(&self) {
        if let Err(e) = self.store.put(&self.job).await {
            warn!(job_id = %self.job.id, error = %e, "Failed to persist job record");
        }
        // No receivers is fine.
        let _ = self.events.send(RenderEvent::from_job(&self.job));
    }
}

/// What a successful pipeline produced.
struct RenderOutput {
    video_url: String,
    thumbnail_url: String,
}

/// Runs render jobs end to end.
#[derive(Clone)]
pub struct RenderJobWorker {
    config: Arc<WorkerConfig>,
    ctx: RenderContext,
    events: broadcast::Sender<RenderEvent>,
}

impl RenderJobWorker {
    pub fn new(
        config: Arc<WorkerConfig>,
        ctx: RenderContext,
        events: broadcast::Sender<RenderEvent>,
    ) -> Self {
        Self {
            config,
            ctx,
            events,
        }
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.ctx.metrics
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.ctx.store
    }

    /// Process a queued job to a terminal state and return the final record.
    ///
    /// Errors never escape: they end up in the record as `failed` with the
    /// error message and kind, at the stage and progress where the job
    /// stopped.
    pub async fn process_render_job(
        &self,
        mut job: RenderJob,
        cancel: watch::Receiver<bool>,
    ) -> RenderJob {
        let logger = JobLogger::new(&job.id, "render");
        let span = logger.create_span();

        if let Err(e) = job.start() {
            logger.log_warning(&format!("not started: {}", e));
            return job;
        }
        logger.log_start(&format!(
            "project {} at {} {}fps {}",
            job.project_id, job.settings.resolution, job.settings.fps, job.settings.codec
        ));

        let snapshot = job.clone();
        let (updates, rx) = mpsc::unbounded_channel();
        let recorder = JobRecorder {
            job,
            store: self.ctx.store.clone(),
            events: self.events.clone(),
        };
        let recorder = tokio::spawn(recorder.run(rx).instrument(span.clone()));

        let started = Instant::now();
        let job_dir = self.config.job_dir(snapshot.id.as_str());
        let frames_dir = job_dir.join(FRAMES_DIR);

        let result = self
            .run_stages(&snapshot, &job_dir, &frames_dir, &updates, &cancel, &logger)
            .instrument(span)
            .await;
        remove_frames(&frames_dir).await;

        let status = match result {
            Ok(output) => {
                let duration_ms = started.elapsed().as_millis() as u64;
                logger.log_completion(&format!("{} in {}ms", output.video_url, duration_ms));
                let _ = updates.send(JobUpdate::Complete {
                    output_url: output.video_url,
                    thumbnail_url: output.thumbnail_url,
                    duration_ms,
                });
                "completed"
            }
            Err(e) => {
                logger.log_error(&e.to_string());
                let _ = updates.send(JobUpdate::Fail {
                    error: e.to_string(),
                    kind: e.kind(),
                });
                if e.is_cancelled() {
                    "cancelled"
                } else {
                    "failed"
                }
            }
        };
        self.ctx
            .metrics
            .increment_counter("render_jobs_total", &[("status", status)]);
        self.ctx.metrics.record_histogram(
            "render_job_seconds",
            started.elapsed().as_secs_f64(),
            &[("status", status)],
        );

        drop(updates);
        match recorder.await {
            Ok(job) => job,
            Err(e) => {
                error!(job_id = %snapshot.id, error = %e, "Job recorder task failed");
                snapshot
            }
        }
    }

    /// Fail a job that never started, e.g. cancelled while queued.
    pub async fn fail_unstarted(&self, mut job: RenderJob, error: WorkerError) -> RenderJob {
        if let Err(e) = job.fail(error.to_string(), error.kind()) {
            debug!(job_id = %job.id, error = %e, "Job already terminal");
            return job;
        }
        JobLogger::new(&job.id, "render").log_warning(&error.to_string());
        let recorder = JobRecorder {
            job,
            store: self.ctx.store.clone(),
            events: self.events.clone(),
        };
        recorder.publish().await;
        recorder.job
    }

    async fn run_stages(
        &self,
        job: &RenderJob,
        job_dir: &Path,
        frames_dir: &Path,
        updates: &mpsc::UnboundedSender<JobUpdate>,
        cancel: &watch::Receiver<bool>,
        logger: &JobLogger,
    ) -> WorkerResult<RenderOutput> {
        let settings = &job.settings;
        settings.validate()?;

        let slides = self.ctx.slides.load_slides(&job.project_id).await?;
        if slides.is_empty() {
            return Err(WorkerError::invalid_input(format!(
                "project {} has no slides",
                job.project_id
            )));
        }
        tokio::fs::create_dir_all(job_dir).await?;

        // Frames
        ensure_not_cancelled(cancel)?;
        logger.log_stage(RenderStage::Frames, RenderStage::Frames.scale(0));
        let stage_start = Instant::now();
        let generation = self
            .generate_frames(job, slides, frames_dir, updates, cancel)
            .await?;
        for warning in &generation.warnings {
            logger.log_warning(&format!("slide {}: {}", warning.slide_id, warning.message));
        }
        if generation.frame_count() == 0 {
            return Err(WorkerError::invalid_input(
                "slides produce no frames at this frame rate",
            ));
        }
        self.stage_done(logger, RenderStage::Frames, stage_start);

        // Encode
        ensure_not_cancelled(cancel)?;
        let _ = updates.send(JobUpdate::Advance {
            stage: RenderStage::Encode,
            progress: RenderStage::Encode.scale(0),
        });
        logger.log_stage(RenderStage::Encode, RenderStage::Encode.scale(0));
        let stage_start = Instant::now();

        let output = job_dir.join(settings.output_file_name(VIDEO_STEM));
        let request = EncodeRequest::new(frames_dir.join(FRAME_PATTERN), &output, settings)
            .with_total_frames(generation.frame_count())
            .with_timeout(self.config.encode_timeout.as_secs());
        let video = self
            .ctx
            .encoder
            .encode(&request, Some(stage_sink(updates, RenderStage::Encode)), Some(cancel.clone()))
            .await?;
        remove_frames(frames_dir).await;
        self.stage_done(logger, RenderStage::Encode, stage_start);

        // Upload
        ensure_not_cancelled(cancel)?;
        let _ = updates.send(JobUpdate::Advance {
            stage: RenderStage::Upload,
            progress: RenderStage::Upload.scale(0),
        });
        logger.log_stage(RenderStage::Upload, RenderStage::Upload.scale(0));
        let stage_start = Instant::now();

        let duration_seconds = generation.frame_count() as f64 / settings.fps as f64;
        let upload = UploadRequest {
            video_path: video,
            project_id: job.project_id.clone(),
            user_id: job.user_id.clone(),
            job_id: job.id.clone(),
            metadata: VideoMetadata::from_settings(settings, Some(duration_seconds)),
            thumbnail_path: None,
        };
        let uploaded = tokio::select! {
            result = self
                .ctx
                .uploader
                .upload_video(&upload, Some(stage_sink(updates, RenderStage::Upload))) => result?,
            _ = wait_cancelled(cancel.clone()) => return Err(WorkerError::Cancelled),
        };
        self.ctx.metrics.add_counter(
            "render_upload_bytes_total",
            uploaded.file_size,
            &[("codec", settings.codec.as_str())],
        );
        self.stage_done(logger, RenderStage::Upload, stage_start);

        Ok(RenderOutput {
            video_url: uploaded.video_url,
            thumbnail_url: uploaded.thumbnail_url,
        })
    }

    /// Compose frames on the blocking pool. On cancellation the generator
    /// stops at its next batch and is awaited, so no frame is written after
    /// this returns.
    async fn generate_frames(
        &self,
        job: &RenderJob,
        slides: Vec<Slide>,
        frames_dir: &Path,
        updates: &mpsc::UnboundedSender<JobUpdate>,
        cancel: &watch::Receiver<bool>,
    ) -> WorkerResult<FrameGeneration> {
        let mut config = FrameGeneratorConfig::from_settings(&job.settings)
            .with_font_path(self.config.font_path.clone());
        if let Some(threads) = self.config.frame_threads {
            config = config.with_threads(threads);
        }
        let stop = Arc::new(AtomicBool::new(false));
        let generator = Arc::new(
            FrameGenerator::new(config)?
                .with_metrics(self.ctx.metrics.clone())
                .with_cancel_flag(stop.clone()),
        );

        let output_dir: PathBuf = frames_dir.to_path_buf();
        let tx = updates.clone();
        let mut task = tokio::task::spawn_blocking(move || {
            generator.generate(&slides, &output_dir, |local| {
                let _ = tx.send(JobUpdate::Advance {
                    stage: RenderStage::Frames,
                    progress: RenderStage::Frames.scale(local),
                });
            })
        });

        tokio::select! {
            joined = &mut task => match joined {
                Ok(result) => Ok(result?),
                Err(e) => Err(WorkerError::from(MediaError::internal(format!(
                    "frame generation task: {}",
                    e
                )))),
            },
            _ = wait_cancelled(cancel.clone()) => {
                stop.store(true, Ordering::Relaxed);
                if let Err(e) = task.await {
                    warn!(job_id = %job.id, error = %e, "Frame generation task failed after cancel");
                }
                Err(WorkerError::Cancelled)
            }
        }
    }

    fn stage_done(&self, logger: &JobLogger, stage: RenderStage, started: Instant) {
        let secs = started.elapsed().as_secs_f64();
        logger.log_stage_done(stage, secs);
        self.ctx
            .metrics
            .record_histogram("render_stage_seconds", secs, &[("stage", stage.as_str())]);
    }
}

/// Progress sink that maps stage-local percentages into the stage window.
fn stage_sink(updates: &mpsc::UnboundedSender<JobUpdate>, stage: RenderStage) -> ProgressSink {
    let tx = updates.clone();
    Arc::new(move |local| {
        let _ = tx.send(JobUpdate::Advance {
            stage,
            progress: stage.scale(local),
        });
    })
}

fn ensure_not_cancelled(cancel: &watch::Receiver<bool>) -> WorkerResult<()> {
    if *cancel.borrow() {
        return Err(WorkerError::Cancelled);
    }
    Ok(())
}

/// Resolves once the flag is set; never resolves if the sender is gone.
pub(crate) async fn wait_cancelled(mut cancel: watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

async fn remove_frames(dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => debug!(dir = %dir.display(), "Removed frames"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(dir = %dir.display(), error = %e, "Failed to remove frames"),
    }
}
