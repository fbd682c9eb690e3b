use anyhow::{Context, Result};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::fs;
use walkdir::WalkDir;
use tracing::{info, warn};

/// Inbound trigger event, GitHub-Actions style: the interesting part lives
/// under `client_payload`.
#[derive(Debug, Deserialize)]
struct TriggerEvent {
    client_payload: RawPayload,
}

#[derive(Debug, Deserialize)]
struct RawPayload {
    #[serde(default, deserialize_with = "de_opt_string_or_number")]
    film_id: Option<String>,
    #[serde(default, deserialize_with = "de_opt_string_or_number")]
    tmdb_id: Option<String>,
    #[serde(default)]
    film_adi: Option<String>,
    #[serde(default)]
    ses_url: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    callback: Option<String>,
}

/// Where the narration track comes from: a pre-rendered audio URL, or raw
/// text we synthesize ourselves.
#[derive(Debug, Clone, PartialEq)]
pub enum NarrationSource {
    AudioUrl(String),
    Text(String),
}

/// One fragman request. Immutable for the duration of processing; nothing is
/// persisted once the job ends.
#[derive(Debug, Clone)]
pub struct Job {
    pub film_id: String,
    pub tmdb_id: String,
    pub title: String,
    pub narration: NarrationSource,
    pub callback: String,
}

impl Job {
    pub async fn from_event_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read event payload: {}", path.display()))?;
        Self::from_event_json(&raw)
    }

    pub fn from_event_json(raw: &str) -> Result<Self> {
        let event: TriggerEvent =
            serde_json::from_str(raw).context("event payload is not valid JSON")?;
        let p = event.client_payload;

        let film_id = p.film_id.context("payload missing required field: film_id")?;
        let tmdb_id = p.tmdb_id.context("payload missing required field: tmdb_id")?;
        let title = p
            .film_adi
            .filter(|t| !t.trim().is_empty())
            .context("payload missing required field: film_adi")?;
        let callback = p
            .callback
            .filter(|c| !c.trim().is_empty())
            .context("payload missing required field: callback")?;

        let narration = match (p.ses_url, p.text) {
            (Some(url), _) if !url.trim().is_empty() => NarrationSource::AudioUrl(url),
            (_, Some(text)) if !text.trim().is_empty() => NarrationSource::Text(text),
            _ => anyhow::bail!("payload missing narration source (ses_url or text)"),
        };

        Ok(Self {
            film_id,
            tmdb_id,
            title,
            narration,
            callback,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Cover,
    Content,
    Combined,
    Final,
    Audio,
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AssetKind::Cover => "cover",
            AssetKind::Content => "content",
            AssetKind::Combined => "combined",
            AssetKind::Final => "final",
            AssetKind::Audio => "audio",
        };
        f.write_str(name)
    }
}

/// A retrieved or generated file, owned by the job that produced it.
#[derive(Debug, Clone)]
pub struct MediaAsset {
    pub path: PathBuf,
    pub kind: AssetKind,
    pub duration: Option<f64>,
    pub bytes: u64,
}

impl MediaAsset {
    pub async fn from_path(kind: AssetKind, path: PathBuf) -> Result<Self> {
        let meta = fs::metadata(&path)
            .await
            .with_context(|| format!("{} asset missing: {}", kind, path.display()))?;
        Ok(Self {
            path,
            kind,
            duration: None,
            bytes: meta.len(),
        })
    }
}

/// Per-job scratch directory. Every intermediate file lives here, uniquely
/// namespaced by job id; the final sweep runs whether or not the job
/// succeeded, with the TempDir Drop as a backstop.
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub fn create(film_id: &str) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(&format!("fragman_{}_", film_id))
            .tempdir()
            .context("failed to create job workspace")?;
        info!("workspace: {}", dir.path().display());
        Ok(Self { dir })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Remove everything under the workspace, logging what gets swept.
    pub async fn cleanup(&self) {
        let mut removed = 0usize;
        for entry in WalkDir::new(self.dir.path())
            .min_depth(1)
            .contents_first(true)
        {
            let entry = match entry {
                Ok(e) => e,
                Err(err) => {
                    warn!("cleanup walk error: {}", err);
                    continue;
                }
            };
            let path = entry.path();
            let ok = if path.is_dir() {
                fs::remove_dir(path).await.is_ok()
            } else {
                fs::remove_file(path).await.is_ok()
            };
            if ok {
                removed += 1;
            }
        }
        info!("cleanup: removed {} workspace entries", removed);
    }
}

fn de_opt_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value: Option<serde_json::Value> = Option::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) if !s.trim().is_empty() => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(body: &str) -> String {
        format!(r#"{{"client_payload": {body}}}"#)
    }

    #[test]
    fn full_payload_parses() {
        let raw = payload(
            r#"{"film_id": 42, "tmdb_id": "603", "film_adi": "The Matrix",
                "ses_url": "https://example.com/ses.mp3", "callback": "https://cb.example/up"}"#,
        );
        let job = Job::from_event_json(&raw).unwrap();
        assert_eq!(job.film_id, "42");
        assert_eq!(job.tmdb_id, "603");
        assert_eq!(job.title, "The Matrix");
        assert_eq!(
            job.narration,
            NarrationSource::AudioUrl("https://example.com/ses.mp3".to_string())
        );
    }

    #[test]
    fn text_only_variant_parses() {
        let raw = payload(
            r#"{"film_id": "7", "tmdb_id": 550, "film_adi": "Fight Club",
                "text": "Bu film hakkinda...", "callback": "https://cb.example/up"}"#,
        );
        let job = Job::from_event_json(&raw).unwrap();
        assert!(matches!(job.narration, NarrationSource::Text(_)));
    }

    #[test]
    fn missing_callback_is_fatal() {
        let raw = payload(
            r#"{"film_id": 1, "tmdb_id": 2, "film_adi": "X", "text": "hello"}"#,
        );
        let err = Job::from_event_json(&raw).unwrap_err();
        assert!(err.to_string().contains("callback"));
    }

    #[test]
    fn missing_narration_source_is_fatal() {
        let raw = payload(
            r#"{"film_id": 1, "tmdb_id": 2, "film_adi": "X", "callback": "https://cb"}"#,
        );
        let err = Job::from_event_json(&raw).unwrap_err();
        assert!(err.to_string().contains("narration source"));
    }

    #[test]
    fn ses_url_preferred_over_text() {
        let raw = payload(
            r#"{"film_id": 1, "tmdb_id": 2, "film_adi": "X",
                "ses_url": "https://a/ses.mp3", "text": "ignored", "callback": "https://cb"}"#,
        );
        let job = Job::from_event_json(&raw).unwrap();
        assert!(matches!(job.narration, NarrationSource::AudioUrl(_)));
    }

    #[tokio::test]
    async fn workspace_cleanup_removes_everything() {
        let ws = Workspace::create("t1").unwrap();
        let inner = ws.file("nested");
        tokio::fs::create_dir(&inner).await.unwrap();
        tokio::fs::write(ws.file("a.mp4"), b"x").await.unwrap();
        tokio::fs::write(inner.join("b.mp3"), b"y").await.unwrap();

        ws.cleanup().await;

        let mut entries = tokio::fs::read_dir(ws.root()).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }
}
