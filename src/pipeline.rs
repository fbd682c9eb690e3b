//! Orchestrator: drives one job through the state machine, substituting
//! degraded artifacts where a step allows it and aborting only on the
//! failures nothing can stand in for.

use crate::acquire::{
    frontend::FrontendStrategy, proxy::ProxyStrategy, synthetic::SyntheticStrategy,
    ytdlp::YtDlpStrategy, AcquisitionChain, AcquisitionRequest,
};
use crate::compose::Composer;
use crate::config::Config;
use crate::deliver;
use crate::ffmpeg;
use crate::job::{AssetKind, Job, MediaAsset, NarrationSource, Workspace};
use crate::speech::{
    download_narration, EdgeTtsEngine, ElevenLabsEngine, SpeechEngine, SpeechPipeline,
};
use crate::tmdb::{extract_video_id, TmdbClient};
use anyhow::{Context, Result};
use std::fmt;
use std::path::PathBuf;
use tracing::{error, info, warn};

/// Fallback content length when the narration duration cannot be probed.
const DEFAULT_TARGET_DURATION: f64 = 180.0;

/// Proxy error pages tend to be larger than platform ones, so the proxy
/// strategy carries a stiffer floor.
const PROXY_MIN_BYTES_FACTOR: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    FetchingMetadata,
    AcquiringCover,
    SynthesizingNarration,
    AcquiringContent,
    Composing,
    Delivering,
    CleaningUp,
    Done,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobState::FetchingMetadata => "fetching-metadata",
            JobState::AcquiringCover => "acquiring-cover",
            JobState::SynthesizingNarration => "synthesizing-narration",
            JobState::AcquiringContent => "acquiring-content",
            JobState::Composing => "composing",
            JobState::Delivering => "delivering",
            JobState::CleaningUp => "cleaning-up",
            JobState::Done => "done",
        };
        f.write_str(name)
    }
}

fn enter(state: JobState) {
    info!("state: {}", state);
}

/// The chain's target duration follows the narration so a synthetic clip (or
/// a short trailer) never cuts the voice track short at the final mux.
fn content_target_duration(narration: Option<f64>) -> f64 {
    match narration {
        Some(duration) if duration > 0.0 => duration,
        _ => DEFAULT_TARGET_DURATION,
    }
}

struct MetadataBundle {
    display_title: String,
    trailer_reference: Option<String>,
    backdrop: Option<PathBuf>,
    poster: Option<PathBuf>,
}

/// Assemble the acquisition chain in its fixed priority order: native
/// downloader, proxy APIs (only when credentials exist), open frontends,
/// synthetic render.
pub fn build_chain(
    cfg: &Config,
    client: &reqwest::Client,
    backdrop: Option<PathBuf>,
) -> AcquisitionChain {
    let mut chain = AcquisitionChain::new(cfg.backoff_base).push(Box::new(YtDlpStrategy::new(
        cfg.download_timeout,
        cfg.min_content_bytes,
        cfg.strategy_attempts,
    )));

    if !cfg.proxy_keys.is_empty() {
        chain = chain.push(Box::new(ProxyStrategy::new(
            client.clone(),
            cfg.proxy_keys.clone(),
            cfg.download_timeout,
            cfg.min_content_bytes * PROXY_MIN_BYTES_FACTOR,
            cfg.strategy_attempts,
        )));
    }

    chain = chain.push(Box::new(FrontendStrategy::new(
        client.clone(),
        cfg.frontend_instances.clone(),
        cfg.download_timeout,
        cfg.min_content_bytes,
        cfg.strategy_attempts,
    )));

    chain.push(Box::new(SyntheticStrategy::new(
        backdrop,
        cfg.transcode_timeout,
    )))
}

fn build_speech_pipeline(cfg: &Config, client: &reqwest::Client) -> SpeechPipeline {
    let primary: Box<dyn SpeechEngine> = Box::new(EdgeTtsEngine::new(
        cfg.edge_voice.clone(),
        cfg.transcode_timeout,
    ));
    let secondary: Option<Box<dyn SpeechEngine>> = cfg.elevenlabs_key.as_ref().map(|key| {
        Box::new(ElevenLabsEngine::new(
            client.clone(),
            key.clone(),
            cfg.eleven_voice_id.clone(),
            cfg.eleven_model_id.clone(),
        )) as Box<dyn SpeechEngine>
    });
    SpeechPipeline::new(primary, secondary, cfg.chunk_budget, cfg.transcode_timeout)
}

async fn fetch_metadata(
    cfg: &Config,
    client: &reqwest::Client,
    job: &Job,
    workspace: &Workspace,
) -> Result<MetadataBundle> {
    let Some(api_key) = cfg.tmdb_api_key.clone() else {
        // from_env already rejected this combination when degrade is off
        warn!("no metadata API key; degrading to a text-only cover");
        return Ok(MetadataBundle {
            display_title: job.title.clone(),
            trailer_reference: None,
            backdrop: None,
            poster: None,
        });
    };

    let tmdb = TmdbClient::new(client.clone(), api_key, cfg.metadata_timeout);

    let details = match tmdb.movie_details(&job.tmdb_id).await {
        Ok(details) => details,
        Err(err) if cfg.allow_degraded_cover => {
            warn!("metadata fetch failed ({}); degrading to text-only cover", err);
            return Ok(MetadataBundle {
                display_title: job.title.clone(),
                trailer_reference: None,
                backdrop: None,
                poster: None,
            });
        }
        Err(err) => return Err(err.context("metadata fetch failed with no degrade path")),
    };

    // the provider usually returns a bare id, but normalize in case a full
    // watch URL sneaks through
    let trailer_reference = match tmdb.trailer_reference(&job.tmdb_id).await {
        Ok(reference) => reference.as_deref().and_then(extract_video_id),
        Err(err) => {
            warn!("trailer lookup failed: {}", err);
            None
        }
    };

    let mut backdrop = None;
    if let Some(path) = details.backdrop() {
        let dest = workspace.file("backdrop.jpg");
        if tmdb.download_image(path, &dest).await.unwrap_or(false) {
            backdrop = Some(dest);
        }
    }

    let mut poster = None;
    if let Some(path) = details.poster() {
        let dest = workspace.file("poster.jpg");
        if tmdb.download_image(path, &dest).await.unwrap_or(false) {
            poster = Some(dest);
        }
    }

    Ok(MetadataBundle {
        display_title: details.display_title(&job.title),
        trailer_reference,
        backdrop,
        poster,
    })
}

async fn obtain_narration(
    cfg: &Config,
    client: &reqwest::Client,
    job: &Job,
    workspace: &Workspace,
) -> Result<PathBuf> {
    match &job.narration {
        NarrationSource::AudioUrl(url) => {
            let dest = workspace.file("narration.mp3");
            if !download_narration(client, url, &dest, cfg.download_timeout).await? {
                anyhow::bail!("narration download failed: {}", url);
            }
            Ok(dest)
        }
        NarrationSource::Text(text) => {
            let pipeline = build_speech_pipeline(cfg, client);
            pipeline.run(text, workspace).await
        }
    }
}

/// Run one job start to finish. Returns the process exit code; cleanup runs
/// whether the pipeline succeeded or not.
pub async fn run_job(cfg: &Config, client: &reqwest::Client, job: &Job) -> Result<i32> {
    info!("job {}: {} (tmdb {})", job.film_id, job.title, job.tmdb_id);

    let workspace = Workspace::create(&job.film_id)?;
    let code = match run_states(cfg, client, job, &workspace).await {
        Ok(code) => code,
        Err(err) => {
            error!("job {} failed: {:#}", job.film_id, err);
            1
        }
    };

    enter(JobState::CleaningUp);
    workspace.cleanup().await;

    enter(JobState::Done);
    info!(
        "job {} finished with exit code {}",
        job.film_id, code
    );
    Ok(code)
}

async fn run_states(
    cfg: &Config,
    client: &reqwest::Client,
    job: &Job,
    workspace: &Workspace,
) -> Result<i32> {
    enter(JobState::FetchingMetadata);
    let metadata = fetch_metadata(cfg, client, job, workspace).await?;
    if metadata.trailer_reference.is_none() {
        info!("no trailer reference; reference-bound strategies will be skipped");
    }

    enter(JobState::AcquiringCover);
    let composer = Composer::new(cfg.cover_duration, cfg.transcode_timeout);
    let cover = composer
        .render_cover(
            metadata.backdrop.as_deref(),
            metadata.poster.as_deref(),
            &metadata.display_title,
            workspace,
        )
        .await;

    enter(JobState::SynthesizingNarration);
    let narration_path = obtain_narration(cfg, client, job, workspace)
        .await
        .context("narration synthesis failed")?;
    let narration_duration = ffmpeg::probe_duration_seconds(&narration_path).await.ok();
    if let Some(duration) = narration_duration {
        info!("narration ready: {:.1}s", duration);
    }

    enter(JobState::AcquiringContent);
    let content_path = workspace.file("content.mp4");
    let chain = build_chain(cfg, client, metadata.backdrop.clone());
    let request = AcquisitionRequest {
        reference: metadata.trailer_reference.clone(),
        title: metadata.display_title.clone(),
        target_duration: content_target_duration(narration_duration),
    };
    let report = chain.acquire(&request, &content_path).await;
    for record in &report.records {
        info!(
            "acquisition {} -> {:?} ({} attempt(s)){}",
            record.strategy,
            record.outcome,
            record.attempts_made,
            record
                .reason
                .as_deref()
                .map(|r| format!(": {}", r))
                .unwrap_or_default()
        );
    }
    if !report.succeeded() {
        anyhow::bail!("content acquisition exhausted every strategy");
    }
    let content = MediaAsset::from_path(AssetKind::Content, content_path).await?;
    info!(
        "content acquired via {} ({} bytes)",
        report.winner.as_deref().unwrap_or("?"),
        content.bytes
    );

    enter(JobState::Composing);
    let final_path = composer
        .compose(
            cover.as_deref(),
            &content.path,
            Some(&narration_path),
            workspace,
            &job.film_id,
        )
        .await
        .context("composition produced no final artifact")?;

    let mut final_asset = MediaAsset::from_path(AssetKind::Final, final_path).await?;
    final_asset.duration = ffmpeg::probe_duration_seconds(&final_asset.path).await.ok();
    info!(
        "final artifact: {} ({} bytes, {:.1}s)",
        final_asset.path.display(),
        final_asset.bytes,
        final_asset.duration.unwrap_or(0.0)
    );

    enter(JobState::Delivering);
    let delivered = deliver::upload(
        client,
        &job.callback,
        &final_asset.path,
        &job.film_id,
        "completed",
    )
    .await
    .unwrap_or_else(|err| {
        warn!("delivery error: {:#}", err);
        false
    });

    if delivered {
        Ok(0)
    } else {
        // the artifact never reached the caller; surface it in the exit code
        warn!("delivery failed; artifact was not confirmed by the callback");
        Ok(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_config(pairs: &[(&str, &str)]) -> Config {
        let map: std::collections::HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned()).unwrap()
    }

    #[test]
    fn chain_includes_proxy_only_with_credentials() {
        let client = reqwest::Client::new();

        let without_keys = test_config(&[]);
        let chain = build_chain(&without_keys, &client, None);
        assert_eq!(chain.len(), 3);

        let with_keys = test_config(&[("RAPIDAPI_KEYS", "k1,k2")]);
        let chain = build_chain(&with_keys, &client, None);
        assert_eq!(chain.len(), 4);
    }

    #[test]
    fn state_names_are_stable() {
        let order = [
            JobState::FetchingMetadata,
            JobState::AcquiringCover,
            JobState::SynthesizingNarration,
            JobState::AcquiringContent,
            JobState::Composing,
            JobState::Delivering,
            JobState::CleaningUp,
            JobState::Done,
        ];
        let names: Vec<String> = order.iter().map(|s| s.to_string()).collect();
        assert_eq!(
            names,
            vec![
                "fetching-metadata",
                "acquiring-cover",
                "synthesizing-narration",
                "acquiring-content",
                "composing",
                "delivering",
                "cleaning-up",
                "done",
            ]
        );
    }

    #[test]
    fn content_target_follows_narration_duration() {
        // a 200s narration must never be trimmed to a shorter synthetic clip
        assert_eq!(content_target_duration(Some(200.0)), 200.0);
        assert_eq!(content_target_duration(Some(12.5)), 12.5);
    }

    #[test]
    fn content_target_falls_back_when_probe_fails() {
        assert_eq!(content_target_duration(None), DEFAULT_TARGET_DURATION);
        assert_eq!(content_target_duration(Some(0.0)), DEFAULT_TARGET_DURATION);
    }

    #[test]
    fn backoff_base_flows_from_config() {
        let cfg = test_config(&[("FRAGMAN_BACKOFF_BASE_SECS", "7")]);
        assert_eq!(cfg.backoff_base, Duration::from_secs(7));
    }
}
