//! Structured job logging utilities.
//!
//! Provides consistent, structured logging for render jobs with
//! tracing spans and contextual information.

use tracing::{error, info, warn, Span};

use reel_models::{JobId, RenderStage};

/// Job logger for structured logging with consistent formatting.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    operation: String,
}

impl JobLogger {
    /// Create a new job logger for a specific job and operation.
    pub fn new(job_id: &JobId, operation: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            operation: operation.to_string(),
        }
    }

    /// Log the start of a job operation.
    pub fn log_start(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = %self.operation,
            "Job started: {}", message
        );
    }

    /// Log entry into a pipeline stage.
    pub fn log_stage(&self, stage: RenderStage, progress: u8) {
        info!(
            job_id = %self.job_id,
            operation = %self.operation,
            stage = %stage,
            progress,
            "Job stage"
        );
    }

    /// Log a stage's wall time.
    pub fn log_stage_done(&self, stage: RenderStage, elapsed_secs: f64) {
        info!(
            job_id = %self.job_id,
            operation = %self.operation,
            stage = %stage,
            elapsed_secs = format!("{:.2}", elapsed_secs),
            "Job stage finished"
        );
    }

    /// Log a warning during job execution.
    pub fn log_warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            operation = %self.operation,
            "Job warning: {}", message
        );
    }

    /// Log an error during job execution.
    pub fn log_error(&self, message: &str) {
        error!(
            job_id = %self.job_id,
            operation = %self.operation,
            "Job error: {}", message
        );
    }

    /// Log the completion of a job operation.
    pub fn log_completion(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = %self.operation,
            "Job completed: {}", message
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Create a tracing span for this job.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            job_id = %self.job_id,
            operation = %self.operation
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_logger_creation() {
        let job_id = JobId::new();
        let logger = JobLogger::new(&job_id, "render");

        assert_eq!(logger.job_id(), job_id.to_string());
        assert_eq!(logger.operation(), "render");
    }
}
