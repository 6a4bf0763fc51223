//! Progress events published while a job runs.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::job::{JobId, JobStatus, RenderJob, RenderStage};

/// One checkpoint of a job, as seen by listeners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RenderEvent {
    pub job_id: JobId,
    pub stage: RenderStage,
    pub progress: u8,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RenderEvent {
    /// Snapshot the current state of a job.
    pub fn from_job(job: &RenderJob) -> Self {
        Self {
            job_id: job.id.clone(),
            stage: job.stage,
            progress: job.progress,
            status: job.status,
            error: job.error.clone(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::RenderSettings;

    #[test]
    fn test_event_from_job() {
        let mut job = RenderJob::new("p", "u", RenderSettings::default());
        job.start().unwrap();
        job.advance(RenderStage::Encode, 47).unwrap();

        let event = RenderEvent::from_job(&job);
        assert_eq!(event.stage, RenderStage::Encode);
        assert_eq!(event.progress, 47);
        assert!(!event.is_terminal());

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""stage":"encode""#));
    }
}
