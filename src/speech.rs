//! Narration synthesis: sentence-bounded chunking, per-chunk engine
//! fallback, ordered lossless concatenation, optional mastering pass.

use crate::ffmpeg;
use crate::job::Workspace;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::fs;
use tokio::process::Command;
use tracing::{info, warn};

/// Split narration text into chunks no longer than `budget` characters,
/// breaking at sentence boundaries and falling back to word boundaries only
/// for single sentences that exceed the budget on their own.
pub fn split_into_chunks(text: &str, budget: usize) -> Vec<String> {
    let budget = budget.max(1);
    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    let mut flush = |current: &mut String, current_len: &mut usize, chunks: &mut Vec<String>| {
        let trimmed = current.trim();
        if !trimmed.is_empty() {
            chunks.push(trimmed.to_string());
        }
        current.clear();
        *current_len = 0;
    };

    for sentence in split_sentences(text) {
        let sentence_len = sentence.chars().count();

        if sentence_len > budget {
            // a single runaway sentence: emit what we have, then split the
            // sentence itself at word boundaries
            flush(&mut current, &mut current_len, &mut chunks);
            for piece in split_words(&sentence, budget) {
                chunks.push(piece);
            }
            continue;
        }

        let joiner = if current_len == 0 { 0 } else { 1 };
        if current_len + joiner + sentence_len > budget {
            flush(&mut current, &mut current_len, &mut chunks);
        }
        if current_len > 0 {
            current.push(' ');
            current_len += 1;
        }
        current.push_str(&sentence);
        current_len += sentence_len;
    }

    flush(&mut current, &mut current_len, &mut chunks);
    chunks
}

fn split_sentences(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();

    for ch in text.chars() {
        if ch == '\n' {
            let trimmed = current.trim();
            if !trimmed.is_empty() {
                out.push(trimmed.to_string());
            }
            current.clear();
            continue;
        }
        current.push(ch);
        if matches!(ch, '.' | '!' | '?') {
            let trimmed = current.trim();
            if !trimmed.is_empty() {
                out.push(trimmed.to_string());
            }
            current.clear();
        }
    }

    let trimmed = current.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
    out
}

fn split_words(sentence: &str, budget: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for word in sentence.split_whitespace() {
        let word_len = word.chars().count();
        let joiner = if current_len == 0 { 0 } else { 1 };
        if current_len > 0 && current_len + joiner + word_len > budget {
            out.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if current_len > 0 {
            current.push(' ');
            current_len += 1;
        }
        current.push_str(word);
        current_len += word_len;
    }

    if !current.is_empty() {
        out.push(current);
    }
    out
}

/// One synthesis backend. `Ok(false)` is a soft failure the pipeline can
/// recover from with the secondary engine.
#[async_trait]
pub trait SpeechEngine: Send + Sync {
    fn name(&self) -> &str;
    async fn synthesize(&self, text: &str, out_path: &Path) -> Result<bool>;
}

/// Primary engine: the edge-tts CLI (voice id, text, output path).
pub struct EdgeTtsEngine {
    voice: String,
    timeout: Duration,
}

impl EdgeTtsEngine {
    pub fn new(voice: String, timeout: Duration) -> Self {
        Self { voice, timeout }
    }
}

#[async_trait]
impl SpeechEngine for EdgeTtsEngine {
    fn name(&self) -> &str {
        "edge-tts"
    }

    async fn synthesize(&self, text: &str, out_path: &Path) -> Result<bool> {
        let child = Command::new("edge-tts")
            .arg("--voice")
            .arg(&self.voice)
            .arg("--text")
            .arg(text)
            .arg("--write-media")
            .arg(out_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output();

        let output = match tokio::time::timeout(self.timeout, child).await {
            Ok(result) => result.context("edge-tts execution failed")?,
            Err(_) => {
                warn!("edge-tts timed out after {:?}", self.timeout);
                return Ok(false);
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(
                "edge-tts failed (exit {:?}): {}",
                output.status.code(),
                stderr.lines().last().unwrap_or("no stderr")
            );
            return Ok(false);
        }

        Ok(fs::metadata(out_path).await.map(|m| m.len() > 0).unwrap_or(false))
    }
}

/// Secondary engine: the ElevenLabs HTTP API.
pub struct ElevenLabsEngine {
    client: reqwest::Client,
    api_key: String,
    voice_id: String,
    model_id: String,
}

impl ElevenLabsEngine {
    pub fn new(
        client: reqwest::Client,
        api_key: String,
        voice_id: String,
        model_id: String,
    ) -> Self {
        Self {
            client,
            api_key,
            voice_id,
            model_id,
        }
    }
}

#[async_trait]
impl SpeechEngine for ElevenLabsEngine {
    fn name(&self) -> &str {
        "elevenlabs"
    }

    async fn synthesize(&self, text: &str, out_path: &Path) -> Result<bool> {
        let url = format!(
            "https://api.elevenlabs.io/v1/text-to-speech/{}?output_format=mp3_44100_128",
            self.voice_id
        );

        let body = serde_json::json!({
            "text": text,
            "model_id": self.model_id,
        });

        let resp = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .header("xi-api-key", &self.api_key)
            .json(&body)
            .timeout(Duration::from_secs(300))
            .send()
            .await
            .context("ElevenLabs request failed")?;

        if !resp.status().is_success() {
            warn!("ElevenLabs TTS failed HTTP {}", resp.status().as_u16());
            return Ok(false);
        }

        let bytes = resp.bytes().await.context("ElevenLabs response read failed")?;
        if bytes.is_empty() {
            return Ok(false);
        }
        fs::write(out_path, &bytes).await?;
        Ok(true)
    }
}

pub struct SpeechPipeline {
    primary: Box<dyn SpeechEngine>,
    secondary: Option<Box<dyn SpeechEngine>>,
    chunk_budget: usize,
    transcode_timeout: Duration,
}

impl SpeechPipeline {
    pub fn new(
        primary: Box<dyn SpeechEngine>,
        secondary: Option<Box<dyn SpeechEngine>>,
        chunk_budget: usize,
        transcode_timeout: Duration,
    ) -> Self {
        Self {
            primary,
            secondary,
            chunk_budget,
            transcode_timeout,
        }
    }

    /// Synthesize each chunk, primary engine first, secondary exactly once
    /// per chunk when the primary fails. Any chunk failing both engines is
    /// fatal: partial narration is worse than none.
    async fn synthesize_chunks(&self, chunks: &[String], dir: &Path) -> Result<Vec<PathBuf>> {
        let mut outputs = Vec::with_capacity(chunks.len());

        for (idx, chunk) in chunks.iter().enumerate() {
            let out_path = dir.join(format!("chunk_{:03}.mp3", idx + 1));
            info!(
                "tts chunk {}/{} ({} chars) -> {}",
                idx + 1,
                chunks.len(),
                chunk.chars().count(),
                out_path.display()
            );

            let primary_ok = match self.primary.synthesize(chunk, &out_path).await {
                Ok(ok) => ok,
                Err(err) => {
                    warn!("{} failed on chunk {}: {}", self.primary.name(), idx + 1, err);
                    false
                }
            };

            if !primary_ok {
                let secondary = self.secondary.as_ref().with_context(|| {
                    format!(
                        "chunk {} failed on {} and no secondary engine configured",
                        idx + 1,
                        self.primary.name()
                    )
                })?;

                warn!(
                    "chunk {}: falling back to {}",
                    idx + 1,
                    secondary.name()
                );
                let secondary_ok = match secondary.synthesize(chunk, &out_path).await {
                    Ok(ok) => ok,
                    Err(err) => {
                        warn!("{} failed on chunk {}: {}", secondary.name(), idx + 1, err);
                        false
                    }
                };
                if !secondary_ok {
                    anyhow::bail!(
                        "chunk {} failed on both synthesis engines",
                        idx + 1
                    );
                }
            }

            outputs.push(out_path);
        }

        Ok(outputs)
    }

    /// Full pipeline: chunk, synthesize, concatenate in order, master.
    /// Returns the finished narration track inside the workspace.
    pub async fn run(&self, text: &str, workspace: &Workspace) -> Result<PathBuf> {
        let chunks = split_into_chunks(text, self.chunk_budget);
        if chunks.is_empty() {
            anyhow::bail!("narration text is empty after chunking");
        }
        info!("narration split into {} chunk(s)", chunks.len());

        let chunk_files = self.synthesize_chunks(&chunks, workspace.root()).await?;

        let raw_track = if chunk_files.len() == 1 {
            chunk_files[0].clone()
        } else {
            let list_path = workspace.file("narration_concat.txt");
            let refs: Vec<&Path> = chunk_files.iter().map(PathBuf::as_path).collect();
            ffmpeg::write_concat_list(&refs, &list_path).await?;

            let concat_out = workspace.file("narration_raw.mp3");
            if !ffmpeg::concat_audio_list(&list_path, &concat_out, self.transcode_timeout).await? {
                anyhow::bail!("narration concatenation failed");
            }
            concat_out
        };

        let mastered = workspace.file("narration.mp3");
        match ffmpeg::master_audio(&raw_track, &mastered, self.transcode_timeout).await {
            Ok(true) => Ok(mastered),
            Ok(false) | Err(_) => {
                warn!("mastering pass failed; keeping unmastered narration");
                Ok(raw_track)
            }
        }
    }
}

/// The ses_url variant: the caller already synthesized the narration and
/// hands us a URL.
pub async fn download_narration(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
    timeout: Duration,
) -> Result<bool> {
    let resp = client
        .get(url)
        .timeout(timeout)
        .send()
        .await
        .context("narration download request failed")?;

    if !resp.status().is_success() {
        warn!("narration download HTTP {}", resp.status().as_u16());
        return Ok(false);
    }

    let bytes = resp.bytes().await.context("narration download read failed")?;
    if bytes.is_empty() {
        return Ok(false);
    }
    fs::write(dest, &bytes)
        .await
        .with_context(|| format!("failed to write narration: {}", dest.display()))?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn normalize_ws(s: &str) -> String {
        s.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn chunks_respect_budget() {
        let text = "One sentence here. Another sentence follows. And a third one. Plus a fourth.";
        for chunk in split_into_chunks(text, 40) {
            assert!(chunk.chars().count() <= 40, "oversized chunk: {chunk:?}");
        }
    }

    #[test]
    fn chunks_reconstruct_original_text() {
        let text = "Bu film harika. Oyunculuk mukemmel! Peki ya muzikler? Kesinlikle izleyin.";
        let chunks = split_into_chunks(text, 30);
        assert_eq!(normalize_ws(&chunks.join(" ")), normalize_ws(text));
    }

    #[test]
    fn sentences_are_not_split_when_they_fit() {
        let text = "Short one. A somewhat longer second sentence. Tail.";
        let chunks = split_into_chunks(text, 60);
        for chunk in &chunks {
            // every chunk must end at a sentence boundary
            assert!(
                chunk.ends_with('.') || chunk.ends_with('!') || chunk.ends_with('?'),
                "chunk ends mid-sentence: {chunk:?}"
            );
        }
    }

    #[test]
    fn runaway_sentence_splits_at_word_boundaries() {
        let text = "word ".repeat(50);
        let chunks = split_into_chunks(&text, 20);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 20);
            assert!(!chunk.contains("wo rd"), "split inside a word: {chunk:?}");
        }
        assert_eq!(normalize_ws(&chunks.join(" ")), normalize_ws(&text));
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(split_into_chunks("   \n ", 100).is_empty());
    }

    #[test]
    fn unicode_budget_counts_chars_not_bytes() {
        let text = "Müthiş bir yapım. Görüntü yönetmeni çok başarılı.";
        let chunks = split_into_chunks(text, 25);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 25);
        }
    }

    struct ScriptedEngine {
        label: String,
        // per-call results, consumed in order; missing entries mean success
        failures: Vec<bool>,
        calls: Arc<AtomicU32>,
    }

    impl ScriptedEngine {
        fn new(label: &str, failures: Vec<bool>) -> (Self, Arc<AtomicU32>) {
            let calls = Arc::new(AtomicU32::new(0));
            (
                Self {
                    label: label.to_string(),
                    failures,
                    calls: Arc::clone(&calls),
                },
                calls,
            )
        }
    }

    #[async_trait]
    impl SpeechEngine for ScriptedEngine {
        fn name(&self) -> &str {
            &self.label
        }

        async fn synthesize(&self, _text: &str, out_path: &Path) -> Result<bool> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
            let fail = self.failures.get(call).copied().unwrap_or(false);
            if fail {
                return Ok(false);
            }
            tokio::fs::write(out_path, b"audio-bytes").await?;
            Ok(true)
        }
    }

    fn pipeline(
        primary: ScriptedEngine,
        secondary: Option<ScriptedEngine>,
    ) -> SpeechPipeline {
        SpeechPipeline::new(
            Box::new(primary),
            secondary.map(|s| Box::new(s) as Box<dyn SpeechEngine>),
            450,
            Duration::from_secs(10),
        )
    }

    #[tokio::test]
    async fn secondary_invoked_exactly_once_for_failed_chunk() {
        let dir = tempfile::tempdir().unwrap();
        // chunk 2 fails on primary, succeeds on secondary
        let (primary, primary_calls) = ScriptedEngine::new("p", vec![false, true, false]);
        let (secondary, secondary_calls) = ScriptedEngine::new("s", vec![]);

        let chunks = vec!["a.".to_string(), "b.".to_string(), "c.".to_string()];
        let pipe = pipeline(primary, Some(secondary));
        let outputs = pipe.synthesize_chunks(&chunks, dir.path()).await.unwrap();

        assert_eq!(outputs.len(), 3);
        assert_eq!(primary_calls.load(Ordering::SeqCst), 3);
        assert_eq!(secondary_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn both_engines_failing_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let (primary, _) = ScriptedEngine::new("p", vec![true]);
        let (secondary, secondary_calls) = ScriptedEngine::new("s", vec![true]);

        let chunks = vec!["a.".to_string()];
        let pipe = pipeline(primary, Some(secondary));
        let err = pipe.synthesize_chunks(&chunks, dir.path()).await.unwrap_err();

        assert!(err.to_string().contains("both synthesis engines"));
        assert_eq!(secondary_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn primary_failure_without_secondary_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let (primary, _) = ScriptedEngine::new("p", vec![true]);

        let chunks = vec!["a.".to_string()];
        let pipe = pipeline(primary, None);
        let err = pipe.synthesize_chunks(&chunks, dir.path()).await.unwrap_err();
        assert!(err.to_string().contains("no secondary engine"));
    }

    #[tokio::test]
    async fn chunk_files_are_ordered() {
        let dir = tempfile::tempdir().unwrap();
        let (primary, _) = ScriptedEngine::new("p", vec![]);

        let chunks = vec!["a.".to_string(), "b.".to_string()];
        let pipe = pipeline(primary, None);
        let outputs = pipe.synthesize_chunks(&chunks, dir.path()).await.unwrap();

        let names: Vec<String> = outputs
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["chunk_001.mp3", "chunk_002.mp3"]);
    }
}
