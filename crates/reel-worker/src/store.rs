//! Persisted job records.
//!
//! Only the render worker writes records once a job is running; readers
//! see whatever was last written.

use async_trait::async_trait;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::debug;

use reel_models::{JobId, RenderJob};

use crate::error::{WorkerError, WorkerResult};

/// Storage of [`RenderJob`] records, last writer wins.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Store a new record; fails if the id is taken.
    async fn insert(&self, job: &RenderJob) -> WorkerResult<()>;

    async fn get(&self, id: &JobId) -> WorkerResult<Option<RenderJob>>;

    /// Overwrite the record.
    async fn put(&self, job: &RenderJob) -> WorkerResult<()>;
}

/// Process-local job store.
#[derive(Debug, Clone, Default)]
pub struct MemoryJobStore {
    jobs: Arc<RwLock<HashMap<JobId, RenderJob>>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.jobs.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, job: &RenderJob) -> WorkerResult<()> {
        let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
        if jobs.contains_key(&job.id) {
            return Err(WorkerError::store(format!("job {} already exists", job.id)));
        }
        jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn get(&self, id: &JobId) -> WorkerResult<Option<RenderJob>> {
        Ok(self
            .jobs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned())
    }

    async fn put(&self, job: &RenderJob) -> WorkerResult<()> {
        self.jobs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(job.id.clone(), job.clone());
        Ok(())
    }
}

/// Redis-backed job store: one JSON value per `render_job:{id}` key with a TTL.
#[derive(Clone)]
pub struct RedisJobStore {
    client: redis::Client,
    ttl: Duration,
}

impl RedisJobStore {
    pub fn new(redis_url: &str, ttl: Duration) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client, ttl })
    }

    fn key(id: &JobId) -> String {
        format!("render_job:{}", id)
    }

    async fn connection(&self) -> WorkerResult<redis::aio::MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn insert(&self, job: &RenderJob) -> WorkerResult<()> {
        let mut conn = self.connection().await?;
        let body = serde_json::to_string(job)?;

        let result: Option<String> = redis::cmd("SET")
            .arg(Self::key(&job.id))
            .arg(body)
            .arg("NX")
            .arg("EX")
            .arg(self.ttl.as_secs())
            .query_async(&mut conn)
            .await?;
        if result.is_none() {
            return Err(WorkerError::store(format!("job {} already exists", job.id)));
        }
        debug!(job_id = %job.id, "Inserted job record");
        Ok(())
    }

    async fn get(&self, id: &JobId) -> WorkerResult<Option<RenderJob>> {
        let mut conn = self.connection().await?;
        let body: Option<String> = conn.get(Self::key(id)).await?;
        match body {
            Some(body) => Ok(Some(serde_json::from_str(&body)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, job: &RenderJob) -> WorkerResult<()> {
        let mut conn = self.connection().await?;
        let body = serde_json::to_string(job)?;
        let _: () = conn.set_ex(Self::key(&job.id), body, self.ttl.as_secs()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reel_models::{JobStatus, RenderSettings, RenderStage};

    fn job() -> RenderJob {
        RenderJob::new("project", "user", RenderSettings::default())
    }

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryJobStore::new();
        let mut job = job();
        tokio_test::assert_ok!(store.insert(&job).await);
        tokio_test::assert_err!(store.insert(&job).await);

        job.start().unwrap();
        job.advance(RenderStage::Encode, 55).unwrap();
        store.put(&job).await.unwrap();

        let loaded = store.get(&job.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Processing);
        assert_eq!(loaded.progress, 55);
        assert!(store.get(&JobId::new()).await.unwrap().is_none());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    #[ignore = "requires Redis"]
    async fn test_redis_store_roundtrip() {
        let store = RedisJobStore::new("redis://localhost:6379", Duration::from_secs(60)).unwrap();
        let mut job = job();
        store.insert(&job).await.unwrap();
        assert!(store.insert(&job).await.is_err());

        job.start().unwrap();
        store.put(&job).await.unwrap();
        let loaded = store.get(&job.id).await.unwrap().unwrap();
        assert_eq!(loaded, job);
    }
}
