//! Worker configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use reel_media::DEFAULT_ENCODE_TIMEOUT_SECS;

use crate::error::WorkerError;

/// Where job records are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JobStoreKind {
    #[default]
    Memory,
    Redis,
}

impl FromStr for JobStoreKind {
    type Err = WorkerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "redis" => Ok(Self::Redis),
            other => Err(WorkerError::config_error(format!(
                "unknown JOB_STORE '{}', expected memory or redis",
                other
            ))),
        }
    }
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum concurrent jobs
    pub max_concurrent_jobs: usize,
    /// Work directory; each job owns `{work_dir}/{job_id}`
    pub work_dir: PathBuf,
    /// Kill the encoder after this long
    pub encode_timeout: Duration,
    /// Frame composition threads per job (default: available cores, at most 8)
    pub frame_threads: Option<usize>,
    /// Font for slide text; system fonts are tried when unset
    pub font_path: Option<PathBuf>,
    /// Directory of `{project_id}.json` slide files
    pub slides_dir: Option<PathBuf>,
    pub job_store: JobStoreKind,
    pub redis_url: Option<String>,
    /// Expiry of job records in Redis
    pub job_ttl: Duration,
    /// Capacity of the progress event broadcast channel
    pub event_capacity: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 2,
            work_dir: PathBuf::from("/tmp/reel"),
            encode_timeout: Duration::from_secs(DEFAULT_ENCODE_TIMEOUT_SECS),
            frame_threads: None,
            font_path: None,
            slides_dir: None,
            job_store: JobStoreKind::Memory,
            redis_url: None,
            job_ttl: Duration::from_secs(7 * 24 * 60 * 60),
            event_capacity: 256,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Result<Self, WorkerError> {
        let defaults = Self::default();
        let job_store = match std::env::var("JOB_STORE") {
            Ok(value) if !value.trim().is_empty() => value.parse()?,
            _ => JobStoreKind::Memory,
        };

        Ok(Self {
            max_concurrent_jobs: env_parse("WORKER_MAX_JOBS")
                .unwrap_or(defaults.max_concurrent_jobs)
                .max(1),
            work_dir: std::env::var("WORKER_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            encode_timeout: Duration::from_secs(
                env_parse("WORKER_ENCODE_TIMEOUT_SECS").unwrap_or(DEFAULT_ENCODE_TIMEOUT_SECS),
            ),
            frame_threads: env_parse("WORKER_FRAME_THREADS"),
            font_path: env_path("WORKER_FONT_PATH"),
            slides_dir: env_path("WORKER_SLIDES_DIR"),
            job_store,
            redis_url: std::env::var("REDIS_URL").ok().filter(|s| !s.is_empty()),
            job_ttl: env_parse("WORKER_JOB_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.job_ttl),
            event_capacity: defaults.event_capacity,
        })
    }

    /// Scratch directory of one job.
    pub fn job_dir(&self, job_id: &str) -> PathBuf {
        self.work_dir.join(job_id)
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

fn env_path(name: &str) -> Option<PathBuf> {
    std::env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.max_concurrent_jobs, 2);
        assert_eq!(config.encode_timeout, Duration::from_secs(1800));
        assert_eq!(config.job_store, JobStoreKind::Memory);
        assert_eq!(config.job_dir("abc"), PathBuf::from("/tmp/reel/abc"));
    }

    #[test]
    fn test_job_store_kind() {
        assert_eq!("Redis".parse::<JobStoreKind>().unwrap(), JobStoreKind::Redis);
        assert_eq!("memory".parse::<JobStoreKind>().unwrap(), JobStoreKind::Memory);
        assert!("postgres".parse::<JobStoreKind>().is_err());
    }
}
