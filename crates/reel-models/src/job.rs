//! Render job record and its state machine.
//!
//! `queued -> processing -> {completed | failed}`. Terminal states are
//! write-once and progress never decreases within a job.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::encoding::RenderSettings;
use crate::error::{ModelError, ModelResult};

/// Unique identifier for a render job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Job lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for a worker slot
    #[default]
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Check if this is a terminal state (no more updates expected).
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline stage, ordered as executed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum RenderStage {
    #[default]
    Frames,
    Encode,
    Upload,
}

impl RenderStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            RenderStage::Frames => "frames",
            RenderStage::Encode => "encode",
            RenderStage::Upload => "upload",
        }
    }

    /// Overall progress window `[start, end]` this stage maps its own 0-100 into.
    pub fn progress_window(&self) -> (u8, u8) {
        match self {
            RenderStage::Frames => (0, 40),
            RenderStage::Encode => (40, 80),
            RenderStage::Upload => (80, 100),
        }
    }

    /// Scale a stage-local percentage into overall job progress.
    pub fn scale(&self, local: u8) -> u8 {
        let (start, end) = self.progress_window();
        let local = local.min(100) as u32;
        (start as u32 + (end - start) as u32 * local / 100) as u8
    }
}

impl fmt::Display for RenderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of a job failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad settings, slides or codec
    Input,
    /// Unreadable asset or missing directory
    Resource,
    /// Encoder exited non-zero
    Subprocess,
    Timeout,
    Cancelled,
    Storage,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Input => "input",
            ErrorKind::Resource => "resource",
            ErrorKind::Subprocess => "subprocess",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Storage => "storage",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request to render one project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RenderRequest {
    pub project_id: String,
    pub user_id: String,
    #[serde(default)]
    pub settings: RenderSettings,
}

/// The durable unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RenderJob {
    pub id: JobId,
    pub project_id: String,
    pub user_id: String,

    #[serde(default)]
    pub status: JobStatus,

    /// Last stage entered
    #[serde(default)]
    pub stage: RenderStage,

    /// Overall progress (0-100), non-decreasing
    #[serde(default)]
    pub progress: u8,

    pub settings: RenderSettings,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,

    /// Wall clock for the whole pipeline
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl RenderJob {
    /// Create a queued job.
    pub fn new(
        project_id: impl Into<String>,
        user_id: impl Into<String>,
        settings: RenderSettings,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            project_id: project_id.into(),
            user_id: user_id.into(),
            status: JobStatus::Queued,
            stage: RenderStage::Frames,
            progress: 0,
            settings,
            output_url: None,
            thumbnail_url: None,
            duration_ms: None,
            error: None,
            error_kind: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn from_request(request: RenderRequest) -> Self {
        Self::new(request.project_id, request.user_id, request.settings)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn illegal(&self, to: JobStatus) -> ModelError {
        ModelError::IllegalTransition {
            from: self.status.to_string(),
            to: to.to_string(),
        }
    }

    /// `queued -> processing`, stage `frames`, progress 0.
    pub fn start(&mut self) -> ModelResult<()> {
        if self.status != JobStatus::Queued {
            return Err(self.illegal(JobStatus::Processing));
        }
        let now = Utc::now();
        self.status = JobStatus::Processing;
        self.stage = RenderStage::Frames;
        self.progress = 0;
        self.started_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Record a progress checkpoint.
    ///
    /// Neither stage nor progress ever move backwards; a stale tick is
    /// absorbed. Returns whether the record changed.
    pub fn advance(&mut self, stage: RenderStage, progress: u8) -> ModelResult<bool> {
        if self.status != JobStatus::Processing {
            return Err(self.illegal(JobStatus::Processing));
        }
        let stage = stage.max(self.stage);
        let progress = progress.min(100).max(self.progress);
        if stage == self.stage && progress == self.progress {
            return Ok(false);
        }
        self.stage = stage;
        self.progress = progress;
        self.updated_at = Utc::now();
        Ok(true)
    }

    /// `processing -> completed`, progress 100.
    pub fn complete(
        &mut self,
        output_url: impl Into<String>,
        thumbnail_url: Option<String>,
        duration_ms: u64,
    ) -> ModelResult<()> {
        if self.status != JobStatus::Processing {
            return Err(self.illegal(JobStatus::Completed));
        }
        let now = Utc::now();
        self.status = JobStatus::Completed;
        self.progress = 100;
        self.output_url = Some(output_url.into());
        self.thumbnail_url = thumbnail_url;
        self.duration_ms = Some(duration_ms);
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// `queued | processing -> failed`. Stage and progress are kept so the
    /// caller can see where the job stopped.
    pub fn fail(&mut self, error: impl Into<String>, kind: ErrorKind) -> ModelResult<()> {
        if self.is_terminal() {
            return Err(self.illegal(JobStatus::Failed));
        }
        let now = Utc::now();
        self.status = JobStatus::Failed;
        self.error = Some(error.into());
        self.error_kind = Some(kind);
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Short human-readable summary, e.g. "failed at encode, 62%".
    pub fn summary(&self) -> String {
        match self.status {
            JobStatus::Failed => format!("failed at {}, {}%", self.stage, self.progress),
            JobStatus::Processing => format!("{} {}%", self.stage, self.progress),
            status => status.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> RenderJob {
        RenderJob::new("project-1", "user-1", RenderSettings::default())
    }

    #[test]
    fn test_new_job_is_queued() {
        let job = job();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.progress, 0);
        assert!(job.output_url.is_none());
        assert!(!job.is_terminal());
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut job = job();
        job.start().unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert!(job.started_at.is_some());

        assert!(job.advance(RenderStage::Encode, 55).unwrap());
        job.complete("https://cdn/video.mp4", Some("https://cdn/t.jpg".into()), 1200)
            .unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert_eq!(job.duration_ms, Some(1200));
    }

    #[test]
    fn test_progress_never_regresses() {
        let mut job = job();
        job.start().unwrap();
        job.advance(RenderStage::Encode, 60).unwrap();
        assert!(!job.advance(RenderStage::Frames, 30).unwrap());
        assert_eq!(job.stage, RenderStage::Encode);
        assert_eq!(job.progress, 60);
        job.advance(RenderStage::Encode, 200).unwrap();
        assert_eq!(job.progress, 100);
    }

    #[test]
    fn test_terminal_states_are_write_once() {
        let mut job = job();
        job.start().unwrap();
        job.advance(RenderStage::Encode, 62).unwrap();
        job.fail("encoder exited with code 1", ErrorKind::Subprocess)
            .unwrap();

        assert!(matches!(
            job.complete("x", None, 1),
            Err(ModelError::IllegalTransition { .. })
        ));
        assert!(job.fail("again", ErrorKind::Internal).is_err());
        assert!(job.advance(RenderStage::Upload, 90).is_err());
        assert_eq!(job.error.as_deref(), Some("encoder exited with code 1"));
        assert_eq!(job.summary(), "failed at encode, 62%");
    }

    #[test]
    fn test_queued_job_can_fail() {
        let mut job = job();
        job.fail("cancelled", ErrorKind::Cancelled).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.start().is_err());
    }

    #[test]
    fn test_stage_scaling() {
        assert_eq!(RenderStage::Frames.scale(0), 0);
        assert_eq!(RenderStage::Frames.scale(100), 40);
        assert_eq!(RenderStage::Encode.scale(50), 60);
        assert_eq!(RenderStage::Upload.scale(100), 100);
    }

    #[test]
    fn test_serialized_shape() {
        let mut job = job();
        job.start().unwrap();
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["status"], "processing");
        assert_eq!(value["stage"], "frames");
        assert!(value.get("output_url").is_none());

        let back: RenderJob = serde_json::from_value(value).unwrap();
        assert_eq!(back, job);
    }
}
