use anyhow::{Context, Result};
use chrono::Utc;
use reqwest::multipart;
use std::path::Path;
use std::time::Duration;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::{info, warn};

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(180);

/// Upload the finished artifact to the caller-supplied callback endpoint.
/// One multipart POST, never retried; a non-2xx response is a logged
/// delivery failure. The file is streamed into the request body, never
/// buffered whole.
pub async fn upload(
    client: &reqwest::Client,
    callback: &str,
    artifact: &Path,
    film_id: &str,
    status: &str,
) -> Result<bool> {
    let file = File::open(artifact)
        .await
        .with_context(|| format!("failed to open artifact: {}", artifact.display()))?;
    let size = file
        .metadata()
        .await
        .with_context(|| format!("failed to stat artifact: {}", artifact.display()))?
        .len();

    let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
    let video_part = multipart::Part::stream_with_length(body, size)
        .file_name(format!("fragman_{}.mp4", film_id))
        .mime_str("video/mp4")
        .context("invalid mime type for video part")?;

    let form = multipart::Form::new()
        .part("video", video_part)
        .text("film_id", film_id.to_string())
        .text("status", status.to_string())
        .text("completed_at", Utc::now().to_rfc3339());

    info!("delivering {} bytes to {}", size, callback);

    let resp = client
        .post(callback)
        .multipart(form)
        .timeout(DELIVERY_TIMEOUT)
        .send()
        .await
        .context("delivery POST failed")?;

    let code = resp.status().as_u16();
    if resp.status().is_success() {
        info!("delivery accepted: HTTP {}", code);
        Ok(true)
    } else {
        warn!("delivery rejected: HTTP {}", code);
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_artifact_fails_before_any_request() {
        let client = reqwest::Client::new();
        let err = upload(
            &client,
            "http://127.0.0.1:1/upload",
            Path::new("/nonexistent/fragman_1.mp4"),
            "1",
            "completed",
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("failed to open artifact"));
    }
}
