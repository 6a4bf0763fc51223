//! Render worker binary.
//!
//! Usage: `reel-worker <request.json>` where the file holds
//! `{"project_id": ..., "user_id": ..., "settings": {...}}`.

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use reel_models::{JobStatus, RenderRequest};
use reel_worker::{JobController, WorkerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing()?;

    let path = std::env::args()
        .nth(1)
        .context("usage: reel-worker <request.json>")?;
    let body = tokio::fs::read(&path)
        .await
        .with_context(|| format!("reading {}", path))?;
    let request: RenderRequest =
        serde_json::from_slice(&body).with_context(|| format!("parsing {}", path))?;

    let config = WorkerConfig::from_env()?;
    info!("Worker config: {:?}", config);

    let controller = JobController::from_config(config).await?;
    let job_id = controller
        .start(request.project_id, request.user_id, request.settings)
        .await?;

    let mut events = controller.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            info!(
                job_id = %event.job_id,
                stage = %event.stage,
                progress = event.progress,
                status = %event.status,
                "Progress"
            );
        }
    });

    let job = tokio::select! {
        job = controller.wait(&job_id) => job?,
        _ = tokio::signal::ctrl_c() => {
            warn!(job_id = %job_id, "Received shutdown signal, cancelling");
            controller.cancel(&job_id).await;
            controller.wait(&job_id).await?
        }
    };

    println!("{}", serde_json::to_string_pretty(&job)?);

    if job.status != JobStatus::Completed {
        error!(job_id = %job.id, summary = %job.summary(), "Render failed");
        std::process::exit(1);
    }
    info!("Worker shutdown complete");
    Ok(())
}

/// Colored output for dev, JSON when `LOG_FORMAT=json`.
fn init_tracing() -> anyhow::Result<()> {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env()
        .add_directive("reel=info".parse()?)
        .add_directive("reel_worker=info".parse()?)
        .add_directive("reel_media=info".parse()?);

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
    Ok(())
}
