//! Composition: cover render, normalization, concatenation, narration mux.
//! One subprocess per step; every step fails soft toward a reduced artifact.

use crate::ffmpeg;
use crate::filter::{Chain, FilterGraph, Node};
use crate::job::Workspace;
use anyhow::Result;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

const COVER_SUBTITLE: &str = "İ N C E L E M E";
const SUBTITLE_COLOR: &str = "#40E0D0";

pub struct Composer {
    cover_duration: f64,
    timeout: Duration,
}

/// Cinematic cover graph: dimmed backdrop (or solid black), poster overlaid
/// on the right, faded-in title, subtitle with an underline rule, film grain,
/// fade in/out.
pub fn cover_graph(
    backdrop: Option<&Path>,
    poster: Option<&Path>,
    display_title: &str,
    duration: f64,
) -> FilterGraph {
    let mut graph = FilterGraph::new();

    let bg_chain = match backdrop {
        Some(image) => Chain::source(Node::MovieSource {
            path: image.display().to_string(),
        })
        .then(Node::FitPad {
            width: 1920,
            height: 1080,
        })
        .then(Node::Dim { alpha: 0.6 })
        .then(Node::ZoomPan {
            zoom: "1.00".to_string(),
            frames: (duration * 25.0).round() as u32,
            width: 1920,
            height: 1080,
        })
        .out("bg"),
        None => Chain::source(Node::ColorSource {
            color: "black".to_string(),
            width: 1920,
            height: 1080,
            duration,
        })
        .out("bg"),
    };
    graph = graph.chain(bg_chain);

    let bg_label = if let Some(image) = poster {
        graph = graph
            .chain(
                Chain::source(Node::MovieSource {
                    path: image.display().to_string(),
                })
                .then(Node::Scale {
                    width: 400,
                    height: -1,
                })
                .out("poster"),
            )
            .chain(
                Chain::from_all(&["bg", "poster"])
                    .then(Node::Overlay {
                        x: "W-w-80".to_string(),
                        y: "(H-h)/2".to_string(),
                    })
                    .out("bg_with_poster"),
            );
        "bg_with_poster"
    } else {
        "bg"
    };

    graph
        .chain(
            Chain::from(bg_label)
                .then(Node::DrawText {
                    text: display_title.to_string(),
                    font_size: 86,
                    color: "white".to_string(),
                    x: "(w-text_w)/2".to_string(),
                    y: "(h-text_h)/2-50".to_string(),
                    border_width: 4,
                    border_color: "black@0.8".to_string(),
                    alpha: Some("if(lt(t,1),0,if(lt(t,2),(t-1)/1,1))".to_string()),
                    boxed: false,
                })
                .out("with_title"),
        )
        .chain(
            Chain::from("with_title")
                .then(Node::DrawText {
                    text: COVER_SUBTITLE.to_string(),
                    font_size: 42,
                    color: SUBTITLE_COLOR.to_string(),
                    x: "(w-text_w)/2".to_string(),
                    y: "(h-text_h)/2+60".to_string(),
                    border_width: 2,
                    border_color: "black@0.6".to_string(),
                    alpha: None,
                    boxed: false,
                })
                .then(Node::DrawBox {
                    x: "(w-180)/2".to_string(),
                    y: "(h-text_h)/2+110".to_string(),
                    width: "180".to_string(),
                    height: "3".to_string(),
                    color: SUBTITLE_COLOR.to_string(),
                })
                .out("styled"),
        )
        .chain(
            Chain::from("styled")
                .then(Node::Grain { strength: 8 })
                .then(Node::FadeIn {
                    start: 0.0,
                    duration: 1.0,
                })
                .then(Node::FadeOut {
                    start: (duration - 1.0).max(0.0),
                    duration: 1.0,
                })
                .out("cover"),
        )
}

fn simple_cover_graph(title: &str, duration: f64) -> FilterGraph {
    FilterGraph::new().chain(
        Chain::source(Node::ColorSource {
            color: "black".to_string(),
            width: 1920,
            height: 1080,
            duration,
        })
        .then(Node::DrawText {
            text: title.to_string(),
            font_size: 72,
            color: "white".to_string(),
            x: "(w-text_w)/2".to_string(),
            y: "(h-text_h)/2".to_string(),
            border_width: 0,
            border_color: String::new(),
            alpha: None,
            boxed: false,
        })
        .out("cover"),
    )
}

impl Composer {
    pub fn new(cover_duration: f64, timeout: Duration) -> Self {
        Self {
            cover_duration,
            timeout,
        }
    }

    /// Render the cover clip. Degrades from the cinematic graph to a plain
    /// title card, and returns `None` only when both renders fail; the
    /// pipeline then continues cover-less.
    pub async fn render_cover(
        &self,
        backdrop: Option<&Path>,
        poster: Option<&Path>,
        display_title: &str,
        workspace: &Workspace,
    ) -> Option<PathBuf> {
        let out = workspace.file("cover.mp4");

        if backdrop.is_some() || poster.is_some() {
            let graph = cover_graph(backdrop, poster, display_title, self.cover_duration);
            match ffmpeg::render_graph(&graph, "cover", self.cover_duration, &out, self.timeout)
                .await
            {
                Ok(true) => {
                    info!("cover rendered: {}", out.display());
                    return Some(out);
                }
                Ok(false) => warn!("cinematic cover render failed; trying plain title card"),
                Err(err) => warn!("cinematic cover render error: {}", err),
            }
        }

        let graph = simple_cover_graph(display_title, self.cover_duration);
        match ffmpeg::render_graph(&graph, "cover", self.cover_duration, &out, self.timeout).await {
            Ok(true) => {
                info!("plain title card rendered: {}", out.display());
                Some(out)
            }
            Ok(false) => {
                warn!("cover render failed entirely; continuing without a cover");
                None
            }
            Err(err) => {
                warn!("cover render error: {}; continuing without a cover", err);
                None
            }
        }
    }

    /// Combine cover + content + narration into the final artifact. Each
    /// step that fails drops us to the previous intermediate rather than
    /// aborting.
    pub async fn compose(
        &self,
        cover: Option<&Path>,
        content: &Path,
        narration: Option<&Path>,
        workspace: &Workspace,
        film_id: &str,
    ) -> Result<PathBuf> {
        let mut video: PathBuf = content.to_path_buf();

        if let Some(cover) = cover {
            // bring the trailer onto the cover's canvas before the concat;
            // skip the re-encode when it already matches
            let concat_input = if matches!(ffmpeg::probe_dimensions(content).await, Ok((1920, 1080)))
            {
                content.to_path_buf()
            } else {
                let normalized = workspace.file("content_normalized.mp4");
                match ffmpeg::normalize_video(content, &normalized, self.timeout).await {
                    Ok(true) => normalized,
                    Ok(false) | Err(_) => {
                        warn!("content normalization failed; concatenating as-is");
                        content.to_path_buf()
                    }
                }
            };

            let combined = workspace.file("combined.mp4");
            match ffmpeg::concat_pair(cover, &concat_input, &combined, self.timeout).await {
                Ok(true) => {
                    info!("cover + content concatenated");
                    video = combined;
                }
                Ok(false) | Err(_) => {
                    warn!("concatenation failed; using content only");
                }
            }
        }

        let final_path = workspace.file(format!("fragman_{}.mp4", film_id).as_str());

        if let Some(narration) = narration {
            match ffmpeg::mux_narration(&video, narration, &final_path, self.timeout).await {
                Ok(true) => {
                    info!("narration muxed onto video");
                    return Ok(final_path);
                }
                Ok(false) | Err(_) => {
                    warn!("narration mux failed; delivering video with its own audio");
                }
            }
        }

        tokio::fs::rename(&video, &final_path).await?;
        Ok(final_path)
    }
}
