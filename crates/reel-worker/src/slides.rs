//! Loading a project's slides.
//!
//! Slides are owned by the project subsystem; the worker only reads them.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tracing::debug;

use reel_models::Slide;

use crate::error::{WorkerError, WorkerResult};

/// Source of the slides to render for a project.
#[async_trait]
pub trait SlideSource: Send + Sync {
    async fn load_slides(&self, project_id: &str) -> WorkerResult<Vec<Slide>>;
}

/// Slides held in memory, keyed by project id.
#[derive(Debug, Clone, Default)]
pub struct InMemorySlideSource {
    projects: Arc<RwLock<HashMap<String, Vec<Slide>>>>,
}

impl InMemorySlideSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, project_id: impl Into<String>, slides: Vec<Slide>) {
        self.projects
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(project_id.into(), slides);
    }
}

#[async_trait]
impl SlideSource for InMemorySlideSource {
    async fn load_slides(&self, project_id: &str) -> WorkerResult<Vec<Slide>> {
        self.projects
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(project_id)
            .cloned()
            .ok_or_else(|| WorkerError::slides_unavailable(format!("no slides for project {}", project_id)))
    }
}

/// Either a bare slide array or an object with a `slides` field.
#[derive(Deserialize)]
#[serde(untagged)]
enum SlideFile {
    Bare(Vec<Slide>),
    Wrapped { slides: Vec<Slide> },
}

/// Reads `{dir}/{project_id}.json`.
#[derive(Debug, Clone)]
pub struct JsonDirSlideSource {
    dir: PathBuf,
}

impl JsonDirSlideSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, project_id: &str) -> WorkerResult<PathBuf> {
        let valid = !project_id.is_empty()
            && project_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(WorkerError::invalid_input(format!(
                "invalid project id '{}'",
                project_id
            )));
        }
        Ok(self.dir.join(format!("{}.json", project_id)))
    }
}

#[async_trait]
impl SlideSource for JsonDirSlideSource {
    async fn load_slides(&self, project_id: &str) -> WorkerResult<Vec<Slide>> {
        let path = self.path_for(project_id)?;
        let bytes = tokio::fs::read(&path).await.map_err(|e| {
            WorkerError::slides_unavailable(format!("{}: {}", path.display(), e))
        })?;
        let file: SlideFile = serde_json::from_slice(&bytes).map_err(|e| {
            WorkerError::invalid_input(format!("malformed slides in {}: {}", path.display(), e))
        })?;

        let slides = match file {
            SlideFile::Bare(slides) | SlideFile::Wrapped { slides } => slides,
        };
        debug!(project_id, slides = slides.len(), "Loaded slides");
        Ok(slides)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory() {
        let source = InMemorySlideSource::new();
        source.insert("p1", vec![Slide::new("a", 0, 1.0)]);
        assert_eq!(source.load_slides("p1").await.unwrap().len(), 1);
        assert!(matches!(
            source.load_slides("p2").await,
            Err(WorkerError::SlidesUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_json_dir_formats() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("bare.json"),
            r#"[{"id":"a","order_index":0,"duration_seconds":2}]"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("wrapped.json"),
            r#"{"slides":[{"id":"a","order_index":0,"duration_seconds":1},{"id":"b","order_index":1,"duration_seconds":1}]}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("broken.json"), "{not json").unwrap();

        let source = JsonDirSlideSource::new(dir.path());
        assert_eq!(source.load_slides("bare").await.unwrap().len(), 1);
        assert_eq!(source.load_slides("wrapped").await.unwrap().len(), 2);
        assert!(matches!(
            source.load_slides("broken").await,
            Err(WorkerError::InvalidInput(_))
        ));
        assert!(matches!(
            source.load_slides("missing").await,
            Err(WorkerError::SlidesUnavailable(_))
        ));
        assert!(matches!(
            source.load_slides("../etc/passwd").await,
            Err(WorkerError::InvalidInput(_))
        ));
    }
}
