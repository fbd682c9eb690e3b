use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::warn;

const TMDB_BASE: &str = "https://api.themoviedb.org/3";
const IMAGE_BASE: &str = "https://image.tmdb.org/t/p/original";

#[derive(Debug, Clone, Deserialize)]
struct ImageEntry {
    file_path: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ImageLists {
    #[serde(default)]
    backdrops: Vec<ImageEntry>,
    #[serde(default)]
    posters: Vec<ImageEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MovieDetails {
    #[serde(default)]
    backdrop_path: Option<String>,
    #[serde(default)]
    poster_path: Option<String>,
    #[serde(default)]
    release_date: Option<String>,
    #[serde(default)]
    images: ImageLists,
}

impl MovieDetails {
    /// Top-level backdrop, falling back to the first entry of the appended
    /// images list.
    pub fn backdrop(&self) -> Option<&str> {
        self.backdrop_path
            .as_deref()
            .or_else(|| self.images.backdrops.first().map(|e| e.file_path.as_str()))
    }

    pub fn poster(&self) -> Option<&str> {
        self.poster_path
            .as_deref()
            .or_else(|| self.images.posters.first().map(|e| e.file_path.as_str()))
    }

    pub fn year(&self) -> Option<&str> {
        self.release_date
            .as_deref()
            .filter(|d| d.len() >= 4)
            .map(|d| &d[..4])
    }

    /// "Title (Year)" when the release year is known.
    pub fn display_title(&self, title: &str) -> String {
        match self.year() {
            Some(year) => format!("{} ({})", title, year),
            None => title.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct VideoRef {
    #[serde(default)]
    site: String,
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    key: String,
}

#[derive(Debug, Deserialize)]
struct VideosResponse {
    #[serde(default)]
    results: Vec<VideoRef>,
}

pub struct TmdbClient {
    client: reqwest::Client,
    api_key: String,
    timeout: Duration,
}

impl TmdbClient {
    pub fn new(client: reqwest::Client, api_key: String, timeout: Duration) -> Self {
        Self {
            client,
            api_key,
            timeout,
        }
    }

    pub async fn movie_details(&self, tmdb_id: &str) -> Result<MovieDetails> {
        let url = format!("{}/movie/{}", TMDB_BASE, tmdb_id);
        let resp = self
            .client
            .get(&url)
            .query(&[
                ("api_key", self.api_key.as_str()),
                ("language", "tr-TR"),
                ("append_to_response", "images"),
            ])
            .timeout(self.timeout)
            .send()
            .await
            .context("TMDB details request failed")?;

        if !resp.status().is_success() {
            anyhow::bail!("TMDB details HTTP {}", resp.status().as_u16());
        }

        resp.json::<MovieDetails>()
            .await
            .context("TMDB details response parse failed")
    }

    /// Platform video id of the best candidate trailer: YouTube-hosted,
    /// preferring type "Trailer" over "Teaser", else the first YouTube entry.
    pub async fn trailer_reference(&self, tmdb_id: &str) -> Result<Option<String>> {
        let url = format!("{}/movie/{}/videos", TMDB_BASE, tmdb_id);
        let resp = self
            .client
            .get(&url)
            .query(&[("api_key", self.api_key.as_str()), ("language", "tr-TR")])
            .timeout(self.timeout)
            .send()
            .await
            .context("TMDB videos request failed")?;

        if !resp.status().is_success() {
            warn!("TMDB videos HTTP {}", resp.status().as_u16());
            return Ok(None);
        }

        let body: VideosResponse = resp
            .json()
            .await
            .context("TMDB videos response parse failed")?;
        Ok(pick_trailer(&body.results))
    }

    /// Fetch a TMDB image path into the workspace.
    pub async fn download_image(&self, image_path: &str, dest: &Path) -> Result<bool> {
        let url = format!("{}{}", IMAGE_BASE, image_path);
        let resp = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(20))
            .send()
            .await
            .context("TMDB image request failed")?;

        if !resp.status().is_success() {
            warn!("TMDB image HTTP {} for {}", resp.status().as_u16(), url);
            return Ok(false);
        }

        let bytes = resp.bytes().await.context("TMDB image read failed")?;
        if bytes.is_empty() {
            return Ok(false);
        }
        fs::write(dest, &bytes)
            .await
            .with_context(|| format!("failed to write image: {}", dest.display()))?;
        Ok(true)
    }
}

fn pick_trailer(results: &[VideoRef]) -> Option<String> {
    let youtube = |v: &&VideoRef| v.site.eq_ignore_ascii_case("YouTube") && !v.key.is_empty();

    results
        .iter()
        .filter(youtube)
        .find(|v| v.kind.eq_ignore_ascii_case("Trailer"))
        .or_else(|| {
            results
                .iter()
                .filter(youtube)
                .find(|v| v.kind.eq_ignore_ascii_case("Teaser"))
        })
        .or_else(|| results.iter().find(youtube))
        .map(|v| v.key.clone())
}

static VIDEO_ID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:v=|youtu\.be/|/embed/)([A-Za-z0-9_-]{6,})").unwrap()
});

/// Pull the platform video id out of a watch URL, short URL, embed URL, or a
/// bare id.
pub fn extract_video_id(url: &str) -> Option<String> {
    let url = url.trim();
    if url.is_empty() {
        return None;
    }

    if let Some(cap) = VIDEO_ID_RE.captures(url) {
        return Some(cap[1].to_string());
    }

    if !url.contains('/') && !url.contains('=') {
        return Some(url.to_string());
    }

    url.rsplit('/').next().filter(|s| !s.is_empty()).map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video(site: &str, kind: &str, key: &str) -> VideoRef {
        VideoRef {
            site: site.to_string(),
            kind: kind.to_string(),
            key: key.to_string(),
        }
    }

    #[test]
    fn trailer_preferred_over_teaser() {
        let refs = vec![
            video("YouTube", "Teaser", "teaser1"),
            video("YouTube", "Trailer", "trailer1"),
        ];
        assert_eq!(pick_trailer(&refs), Some("trailer1".to_string()));
    }

    #[test]
    fn non_youtube_hosts_are_ignored() {
        let refs = vec![
            video("Vimeo", "Trailer", "vimeo1"),
            video("YouTube", "Clip", "clip1"),
        ];
        assert_eq!(pick_trailer(&refs), Some("clip1".to_string()));
    }

    #[test]
    fn no_candidates_yields_none() {
        let refs = vec![video("Vimeo", "Trailer", "vimeo1")];
        assert_eq!(pick_trailer(&refs), None);
    }

    #[test]
    fn extract_id_from_watch_url() {
        assert_eq!(
            extract_video_id("https://www.youtube.com/watch?v=dQw4w9WgXcQ&t=1"),
            Some("dQw4w9WgXcQ".to_string())
        );
    }

    #[test]
    fn extract_id_from_short_url() {
        assert_eq!(
            extract_video_id("https://youtu.be/dQw4w9WgXcQ?si=x"),
            Some("dQw4w9WgXcQ".to_string())
        );
    }

    #[test]
    fn extract_id_from_embed_url() {
        assert_eq!(
            extract_video_id("https://www.youtube.com/embed/dQw4w9WgXcQ"),
            Some("dQw4w9WgXcQ".to_string())
        );
    }

    #[test]
    fn bare_id_passes_through() {
        assert_eq!(
            extract_video_id("dQw4w9WgXcQ"),
            Some("dQw4w9WgXcQ".to_string())
        );
    }

    #[test]
    fn empty_input_yields_none() {
        assert_eq!(extract_video_id("  "), None);
    }

    #[test]
    fn details_backdrop_falls_back_to_image_list() {
        let details: MovieDetails = serde_json::from_str(
            r#"{"poster_path": null, "backdrop_path": null,
                "release_date": "1999-03-30",
                "images": {"backdrops": [{"file_path": "/bd.jpg"}],
                           "posters": [{"file_path": "/po.jpg"}]}}"#,
        )
        .unwrap();
        assert_eq!(details.backdrop(), Some("/bd.jpg"));
        assert_eq!(details.poster(), Some("/po.jpg"));
        assert_eq!(details.display_title("The Matrix"), "The Matrix (1999)");
    }
}
