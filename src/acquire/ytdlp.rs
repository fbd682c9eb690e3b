use crate::acquire::{AcquisitionRequest, Strategy, StrategyError};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Native downloader CLI, first in the chain.
pub struct YtDlpStrategy {
    timeout: Duration,
    min_bytes: u64,
    max_attempts: u32,
}

impl YtDlpStrategy {
    pub fn new(timeout: Duration, min_bytes: u64, max_attempts: u32) -> Self {
        Self {
            timeout,
            min_bytes,
            max_attempts,
        }
    }
}

fn classify_stderr(stderr: &str) -> StrategyError {
    let last = stderr.lines().last().unwrap_or("unknown error").to_string();
    if stderr.contains("429")
        || stderr.contains("Too Many Requests")
        || stderr.contains("rate limit")
        || stderr.contains("Sign in to confirm")
    {
        StrategyError::QuotaExceeded(last)
    } else if stderr.contains("Video unavailable")
        || stderr.contains("This video is not available")
        || stderr.contains("Private video")
        || stderr.contains("has been removed")
    {
        StrategyError::NotFound(last)
    } else {
        StrategyError::Transient(last)
    }
}

#[async_trait]
impl Strategy for YtDlpStrategy {
    fn name(&self) -> &str {
        "ytdlp"
    }

    fn min_valid_bytes(&self) -> u64 {
        self.min_bytes
    }

    fn attempts(&self) -> u32 {
        self.max_attempts
    }

    async fn attempt(
        &self,
        request: &AcquisitionRequest,
        dest: &Path,
    ) -> Result<(), StrategyError> {
        let reference = request
            .reference
            .as_deref()
            .ok_or_else(|| StrategyError::Fatal("content reference required".to_string()))?;
        let url = format!("https://www.youtube.com/watch?v={}", reference);

        let args = [
            "--no-playlist",
            "--no-warnings",
            "--quiet",
            "--socket-timeout",
            "30",
            "--retries",
            "1",
            "-f",
            "best[ext=mp4][height<=1080]/best[ext=mp4]/best",
            "-o",
        ];

        let child = Command::new("yt-dlp")
            .args(args)
            .arg(dest)
            .arg(&url)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output();

        let output = match tokio::time::timeout(self.timeout, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(err)) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(StrategyError::Fatal("yt-dlp not found in PATH".to_string()));
            }
            Ok(Err(err)) => return Err(StrategyError::Transient(err.to_string())),
            Err(_) => {
                return Err(StrategyError::Transient(format!(
                    "download timed out after {:?}",
                    self.timeout
                )));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!("yt-dlp stderr: {}", stderr);
            return Err(classify_stderr(&stderr));
        }

        Ok(())
    }
}
