use crate::filter::{Chain, FilterGraph, Node};
use anyhow::{Context, Result};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::fs;
use tokio::process::Command;
use tracing::warn;

/// Mastering chain applied once to the full concatenated narration track,
/// never per-chunk.
const MASTERING_FILTER: &str = "highpass=f=80,acompressor=threshold=-18dB:ratio=3:attack=20:release=250,alimiter=limit=0.95,loudnorm=I=-16:TP=-1.5:LRA=11";

pub async fn check_available() -> bool {
    match Command::new("ffmpeg").arg("-version").output().await {
        Ok(output) => output.status.success(),
        Err(_) => false,
    }
}

async fn run_cmd(args: &[String], timeout: Duration) -> Result<bool> {
    if args.is_empty() {
        return Ok(false);
    }

    let mut cmd = Command::new(&args[0]);
    if args.len() > 1 {
        cmd.args(&args[1..]);
    }
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());

    let child = cmd.output();
    let output = match tokio::time::timeout(timeout, child).await {
        Ok(result) => result.context("command execution failed")?,
        Err(_) => {
            warn!("command timed out after {:?}: {:?}", timeout, args[0]);
            return Ok(false);
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail = stderr.lines().last().unwrap_or("no stderr");
        warn!("{} failed (exit {:?}): {}", args[0], output.status.code(), tail);
        return Ok(false);
    }

    Ok(true)
}

/// Exit-code success alone is not trusted: the output must exist and carry a
/// plausible byte count.
async fn output_ok(path: &Path, min_bytes: u64) -> bool {
    match fs::metadata(path).await {
        Ok(meta) => meta.len() >= min_bytes,
        Err(_) => false,
    }
}

pub async fn probe_duration_seconds(path: &Path) -> Result<f64> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(path)
        .output()
        .await
        .context("ffprobe duration failed")?;

    if !output.status.success() {
        return Err(anyhow::anyhow!("ffprobe failed"));
    }

    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let duration = text.parse::<f64>().unwrap_or(-1.0);
    if duration <= 0.1 {
        return Err(anyhow::anyhow!("invalid duration"));
    }
    Ok(duration)
}

pub async fn probe_dimensions(path: &Path) -> Result<(i32, i32)> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height",
            "-of",
            "csv=s=x:p=0",
        ])
        .arg(path)
        .output()
        .await
        .context("ffprobe execution failed")?;

    if !output.status.success() {
        return Err(anyhow::anyhow!("ffprobe failed"));
    }

    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let mut parts = text.split('x');
    let w = parts.next().and_then(|v| v.parse::<i32>().ok()).unwrap_or(0);
    let h = parts.next().and_then(|v| v.parse::<i32>().ok()).unwrap_or(0);

    if w <= 0 || h <= 0 {
        return Err(anyhow::anyhow!("invalid dimensions"));
    }

    Ok((w, h))
}

/// Render a filter graph whose final label is `out_label` into a video file
/// with a silent stereo track, bounded to `duration` seconds.
pub async fn render_graph(
    graph: &FilterGraph,
    out_label: &str,
    duration: f64,
    out_path: &Path,
    timeout: Duration,
) -> Result<bool> {
    let args = vec![
        "ffmpeg".to_string(),
        "-y".to_string(),
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-f".to_string(),
        "lavfi".to_string(),
        "-i".to_string(),
        "anullsrc=channel_layout=stereo:sample_rate=44100".to_string(),
        "-filter_complex".to_string(),
        graph.render(),
        "-map".to_string(),
        format!("[{}]", out_label),
        "-map".to_string(),
        "0:a".to_string(),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-preset".to_string(),
        "fast".to_string(),
        "-crf".to_string(),
        "22".to_string(),
        "-c:a".to_string(),
        "aac".to_string(),
        "-b:a".to_string(),
        "128k".to_string(),
        "-t".to_string(),
        format!("{:.3}", duration),
        "-r".to_string(),
        "25".to_string(),
        out_path.display().to_string(),
    ];

    if !run_cmd(&args, timeout).await? {
        return Ok(false);
    }
    Ok(output_ok(out_path, 1).await)
}

/// Animate a still image with a `-vf` filter chain for `duration` seconds.
pub async fn render_still(
    image: &Path,
    vf: &str,
    duration: f64,
    out_path: &Path,
    timeout: Duration,
) -> Result<bool> {
    let args = vec![
        "ffmpeg".to_string(),
        "-y".to_string(),
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-loop".to_string(),
        "1".to_string(),
        "-i".to_string(),
        image.display().to_string(),
        "-f".to_string(),
        "lavfi".to_string(),
        "-i".to_string(),
        "anullsrc=channel_layout=stereo:sample_rate=44100".to_string(),
        "-vf".to_string(),
        vf.to_string(),
        "-map".to_string(),
        "0:v".to_string(),
        "-map".to_string(),
        "1:a".to_string(),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-preset".to_string(),
        "fast".to_string(),
        "-c:a".to_string(),
        "aac".to_string(),
        "-t".to_string(),
        format!("{:.3}", duration),
        "-r".to_string(),
        "25".to_string(),
        out_path.display().to_string(),
    ];

    if !run_cmd(&args, timeout).await? {
        return Ok(false);
    }
    Ok(output_ok(out_path, 1).await)
}

/// Re-encode to the common 1920x1080 @ 25fps canvas so a cover and a trailer
/// of different formats can share a concat.
pub async fn normalize_video(in_path: &Path, out_path: &Path, timeout: Duration) -> Result<bool> {
    let args = vec![
        "ffmpeg".to_string(),
        "-y".to_string(),
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-i".to_string(),
        in_path.display().to_string(),
        "-vf".to_string(),
        "scale=1920:1080:force_original_aspect_ratio=decrease,pad=1920:1080:(ow-iw)/2:(oh-ih)/2,fps=25".to_string(),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-preset".to_string(),
        "veryfast".to_string(),
        "-crf".to_string(),
        "22".to_string(),
        "-c:a".to_string(),
        "aac".to_string(),
        "-b:a".to_string(),
        "128k".to_string(),
        "-ar".to_string(),
        "44100".to_string(),
        out_path.display().to_string(),
    ];

    if !run_cmd(&args, timeout).await? {
        return Ok(false);
    }
    Ok(output_ok(out_path, 1).await)
}

/// Concatenate two clips with both video and audio streams re-encoded.
pub async fn concat_pair(
    first: &Path,
    second: &Path,
    out_path: &Path,
    timeout: Duration,
) -> Result<bool> {
    let graph = FilterGraph::new().chain(
        Chain::from_all(&["0:v", "0:a", "1:v", "1:a"])
            .then(Node::Concat {
                segments: 2,
                audio: true,
            })
            .out("outv")
            .out("outa"),
    );

    let args = vec![
        "ffmpeg".to_string(),
        "-y".to_string(),
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-i".to_string(),
        first.display().to_string(),
        "-i".to_string(),
        second.display().to_string(),
        "-filter_complex".to_string(),
        graph.render(),
        "-map".to_string(),
        "[outv]".to_string(),
        "-map".to_string(),
        "[outa]".to_string(),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-preset".to_string(),
        "fast".to_string(),
        "-c:a".to_string(),
        "aac".to_string(),
        "-b:a".to_string(),
        "192k".to_string(),
        out_path.display().to_string(),
    ];

    if !run_cmd(&args, timeout).await? {
        return Ok(false);
    }
    Ok(output_ok(out_path, 1).await)
}

/// Write a concat-demuxer list file enumerating `paths` in order.
pub async fn write_concat_list(paths: &[&Path], list_path: &Path) -> Result<()> {
    let mut body = String::new();
    for path in paths {
        let name = path.display().to_string().replace('\'', "'\\''");
        body.push_str(&format!("file '{}'\n", name));
    }
    fs::write(list_path, body)
        .await
        .with_context(|| format!("failed to write concat list: {}", list_path.display()))?;
    Ok(())
}

/// Lossless same-format audio concatenation via the concat demuxer.
pub async fn concat_audio_list(
    list_path: &Path,
    out_path: &Path,
    timeout: Duration,
) -> Result<bool> {
    let args = vec![
        "ffmpeg".to_string(),
        "-y".to_string(),
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-f".to_string(),
        "concat".to_string(),
        "-safe".to_string(),
        "0".to_string(),
        "-i".to_string(),
        list_path.display().to_string(),
        "-c".to_string(),
        "copy".to_string(),
        out_path.display().to_string(),
    ];

    if !run_cmd(&args, timeout).await? {
        return Ok(false);
    }
    Ok(output_ok(out_path, 1).await)
}

/// Replace the video's audio with the narration track, trimmed to the
/// shorter of the two.
pub async fn mux_narration(
    video: &Path,
    narration: &Path,
    out_path: &Path,
    timeout: Duration,
) -> Result<bool> {
    let args = vec![
        "ffmpeg".to_string(),
        "-y".to_string(),
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-i".to_string(),
        video.display().to_string(),
        "-i".to_string(),
        narration.display().to_string(),
        "-c:v".to_string(),
        "copy".to_string(),
        "-c:a".to_string(),
        "aac".to_string(),
        "-map".to_string(),
        "0:v:0".to_string(),
        "-map".to_string(),
        "1:a:0".to_string(),
        "-shortest".to_string(),
        "-movflags".to_string(),
        "+faststart".to_string(),
        out_path.display().to_string(),
    ];

    if !run_cmd(&args, timeout).await? {
        return Ok(false);
    }
    Ok(output_ok(out_path, 1).await)
}

/// Single mastering pass over the full narration track.
pub async fn master_audio(in_path: &Path, out_path: &Path, timeout: Duration) -> Result<bool> {
    let args = vec![
        "ffmpeg".to_string(),
        "-y".to_string(),
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-i".to_string(),
        in_path.display().to_string(),
        "-af".to_string(),
        MASTERING_FILTER.to_string(),
        "-c:a".to_string(),
        "libmp3lame".to_string(),
        "-b:a".to_string(),
        "192k".to_string(),
        out_path.display().to_string(),
    ];

    if !run_cmd(&args, timeout).await? {
        return Ok(false);
    }
    Ok(output_ok(out_path, 1).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[tokio::test]
    async fn concat_list_enumerates_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let list = dir.path().join("list.txt");
        let a = PathBuf::from("/tmp/chunk_1.mp3");
        let b = PathBuf::from("/tmp/chunk_2.mp3");
        let c = PathBuf::from("/tmp/chunk_3.mp3");

        write_concat_list(&[&a, &b, &c], &list).await.unwrap();

        let body = tokio::fs::read_to_string(&list).await.unwrap();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(
            lines,
            vec![
                "file '/tmp/chunk_1.mp3'",
                "file '/tmp/chunk_2.mp3'",
                "file '/tmp/chunk_3.mp3'",
            ]
        );
    }

    #[tokio::test]
    async fn concat_list_quotes_awkward_names() {
        let dir = tempfile::tempdir().unwrap();
        let list = dir.path().join("list.txt");
        let odd = PathBuf::from("/tmp/it's.mp3");

        write_concat_list(&[&odd], &list).await.unwrap();

        let body = tokio::fs::read_to_string(&list).await.unwrap();
        assert_eq!(body, "file '/tmp/it'\\''s.mp3'\n");
    }
}
