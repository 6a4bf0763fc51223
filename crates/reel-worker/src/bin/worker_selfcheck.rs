use std::path::Path;

use reel_storage::StorageBackend;
use reel_worker::{JobStoreKind, WorkerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = WorkerConfig::from_env()?;

    println!(
        "worker-selfcheck: starting with work_dir={}",
        config.work_dir.display()
    );
    ensure_workdir(&config.work_dir).await?;

    let ffmpeg = reel_media::check_ffmpeg()?;
    let ffprobe = reel_media::check_ffprobe()?;
    println!(
        "worker-selfcheck: ffmpeg={} ffprobe={}",
        ffmpeg.display(),
        ffprobe.display()
    );

    ensure_env_present(&["WORKER_SLIDES_DIR"])?;
    if config.job_store == JobStoreKind::Redis {
        ensure_env_present(&["REDIS_URL"])?;
    }
    match StorageBackend::from_env()? {
        StorageBackend::S3 => ensure_env_present(&[
            "R2_ENDPOINT_URL",
            "R2_ACCESS_KEY_ID",
            "R2_SECRET_ACCESS_KEY",
            "R2_BUCKET_NAME",
        ])?,
        StorageBackend::Local => ensure_env_present(&["LOCAL_STORE_ROOT"])?,
    }

    println!("worker-selfcheck: ok");
    Ok(())
}

async fn ensure_workdir<P: AsRef<Path>>(path: P) -> anyhow::Result<()> {
    let path = path.as_ref();
    tokio::fs::create_dir_all(path).await?;
    Ok(())
}

fn ensure_env_present(vars: &[&str]) -> anyhow::Result<()> {
    for var in vars {
        if std::env::var(var).is_err() {
            return Err(anyhow::anyhow!("missing required env var {}", var));
        }
    }
    Ok(())
}
