use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use fragman::config::Config;
use fragman::ffmpeg;
use fragman::job::Job;
use fragman::pipeline;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cfg = Config::from_env()?;

    let event_path = std::env::var("GITHUB_EVENT_PATH")
        .map(PathBuf::from)
        .context("GITHUB_EVENT_PATH is not set; no trigger event to process")?;
    let job = Job::from_event_file(&event_path).await?;

    if !ffmpeg::check_available().await {
        warn!("ffmpeg not found in PATH; every render step will fail");
    }

    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(30))
        .build()
        .context("failed to build HTTP client")?;

    let code = pipeline::run_job(&cfg, &client, &job).await?;
    std::process::exit(code);
}
