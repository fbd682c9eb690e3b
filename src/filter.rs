//! Typed ffmpeg filter-graph construction.
//!
//! Graphs are composed from typed nodes and serialized to the
//! `-filter_complex` expression syntax only at the subprocess boundary, so
//! graph composition stays unit-testable without spawning ffmpeg.

use std::fmt::Write as _;

/// One filter node. The variants cover exactly what the composition and
/// synthetic-render steps need.
#[derive(Debug, Clone)]
pub enum Node {
    /// `movie=<path>` lavfi source.
    MovieSource { path: String },
    /// `color=c=<color>:s=<w>x<h>:d=<dur>` lavfi source.
    ColorSource {
        color: String,
        width: u32,
        height: u32,
        duration: f64,
    },
    Scale {
        width: i32,
        height: i32,
    },
    /// Scale preserving aspect, then pad to the exact canvas, centered.
    FitPad {
        width: u32,
        height: u32,
    },
    Overlay {
        x: String,
        y: String,
    },
    DrawText {
        text: String,
        font_size: u32,
        color: String,
        x: String,
        y: String,
        border_width: u32,
        border_color: String,
        alpha: Option<String>,
        boxed: bool,
    },
    DrawBox {
        x: String,
        y: String,
        width: String,
        height: String,
        color: String,
    },
    /// Ken Burns pan/zoom over a still: `zoompan=z=<expr>:d=<frames>:s=<w>x<h>`.
    ZoomPan {
        zoom: String,
        frames: u32,
        width: u32,
        height: u32,
    },
    FadeIn {
        start: f64,
        duration: f64,
    },
    FadeOut {
        start: f64,
        duration: f64,
    },
    /// `colorchannelmixer=aa=<alpha>` dimming pass.
    Dim {
        alpha: f64,
    },
    /// Film grain: `noise=c0s=<strength>:allf=t`.
    Grain {
        strength: u32,
    },
    /// `concat=n=<segments>:v=1:a=<audio streams>`.
    Concat {
        segments: u32,
        audio: bool,
    },
}

/// Escape a string for use inside a filter argument (drawtext text, movie
/// path). Backslash first, then the filter-syntax metacharacters.
pub fn escape_arg(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            ':' => out.push_str("\\:"),
            ',' => out.push_str("\\,"),
            '[' => out.push_str("\\["),
            ']' => out.push_str("\\]"),
            ';' => out.push_str("\\;"),
            _ => out.push(ch),
        }
    }
    out
}

impl Node {
    fn render(&self) -> String {
        match self {
            Node::MovieSource { path } => format!("movie={}", escape_arg(path)),
            Node::ColorSource {
                color,
                width,
                height,
                duration,
            } => format!("color=c={}:s={}x{}:d={}", color, width, height, duration),
            Node::Scale { width, height } => format!("scale={}:{}", width, height),
            Node::FitPad { width, height } => format!(
                "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2",
                w = width,
                h = height
            ),
            Node::Overlay { x, y } => format!("overlay=x={}:y={}", x, y),
            Node::DrawText {
                text,
                font_size,
                color,
                x,
                y,
                border_width,
                border_color,
                alpha,
                boxed,
            } => {
                let mut out = format!(
                    "drawtext=text='{}':fontcolor={}:fontsize={}",
                    escape_arg(text),
                    color,
                    font_size
                );
                if *border_width > 0 {
                    let _ = write!(out, ":borderw={}:bordercolor={}", border_width, border_color);
                }
                if *boxed {
                    out.push_str(":box=1:boxcolor=black@0.5");
                }
                let _ = write!(out, ":x={}:y={}", x, y);
                if let Some(alpha) = alpha {
                    let _ = write!(out, ":alpha='{}'", alpha);
                }
                out
            }
            Node::DrawBox {
                x,
                y,
                width,
                height,
                color,
            } => format!(
                "drawbox=x={}:y={}:w={}:h={}:color={}:t=fill",
                x, y, width, height, color
            ),
            Node::ZoomPan {
                zoom,
                frames,
                width,
                height,
            } => format!(
                "zoompan=z='{}':d={}:s={}x{}",
                zoom, frames, width, height
            ),
            Node::FadeIn { start, duration } => {
                format!("fade=t=in:st={}:d={}", start, duration)
            }
            Node::FadeOut { start, duration } => {
                format!("fade=t=out:st={}:d={}", start, duration)
            }
            Node::Dim { alpha } => format!("colorchannelmixer=aa={}", alpha),
            Node::Grain { strength } => format!("noise=c0s={}:allf=t", strength),
            Node::Concat { segments, audio } => format!(
                "concat=n={}:v=1:a={}",
                segments,
                if *audio { 1 } else { 0 }
            ),
        }
    }
}

/// Render a plain `-vf` chain (no labels) from a node sequence.
pub fn vf_chain(nodes: &[Node]) -> String {
    nodes
        .iter()
        .map(Node::render)
        .collect::<Vec<_>>()
        .join(",")
}

/// One linear chain: optional input labels, comma-joined nodes, optional
/// output labels.
#[derive(Debug, Clone, Default)]
pub struct Chain {
    inputs: Vec<String>,
    nodes: Vec<Node>,
    outputs: Vec<String>,
}

impl Chain {
    pub fn source(node: Node) -> Self {
        Self {
            inputs: Vec::new(),
            nodes: vec![node],
            outputs: Vec::new(),
        }
    }

    pub fn from(label: &str) -> Self {
        Self {
            inputs: vec![label.to_string()],
            nodes: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn from_all(labels: &[&str]) -> Self {
        Self {
            inputs: labels.iter().map(|l| l.to_string()).collect(),
            nodes: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn then(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn out(mut self, label: &str) -> Self {
        self.outputs.push(label.to_string());
        self
    }

    fn render(&self) -> String {
        let mut out = String::new();
        for input in &self.inputs {
            let _ = write!(out, "[{}]", input);
        }
        out.push_str(
            &self
                .nodes
                .iter()
                .map(Node::render)
                .collect::<Vec<_>>()
                .join(","),
        );
        for output in &self.outputs {
            let _ = write!(out, "[{}]", output);
        }
        out
    }
}

/// A full `-filter_complex` graph: chains joined by `;`.
#[derive(Debug, Clone, Default)]
pub struct FilterGraph {
    chains: Vec<Chain>,
}

impl FilterGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chain(mut self, chain: Chain) -> Self {
        self.chains.push(chain);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }

    pub fn render(&self) -> String {
        self.chains
            .iter()
            .map(Chain::render)
            .collect::<Vec<_>>()
            .join(";")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_chain_renders_in_order() {
        let graph = FilterGraph::new().chain(
            Chain::from("0:v")
                .then(Node::Scale {
                    width: 1920,
                    height: 1080,
                })
                .then(Node::FadeIn {
                    start: 0.0,
                    duration: 1.0,
                })
                .out("v"),
        );
        assert_eq!(graph.render(), "[0:v]scale=1920:1080,fade=t=in:st=0:d=1[v]");
    }

    #[test]
    fn source_chain_has_no_input_labels() {
        let graph = FilterGraph::new().chain(
            Chain::source(Node::ColorSource {
                color: "black".to_string(),
                width: 1920,
                height: 1080,
                duration: 5.0,
            })
            .out("bg"),
        );
        assert_eq!(graph.render(), "color=c=black:s=1920x1080:d=5[bg]");
    }

    #[test]
    fn multiple_chains_joined_by_semicolon() {
        let graph = FilterGraph::new()
            .chain(
                Chain::source(Node::MovieSource {
                    path: "poster.jpg".to_string(),
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
                    .out("out"),
            );
        assert_eq!(
            graph.render(),
            "movie=poster.jpg,scale=400:-1[poster];[bg][poster]overlay=x=W-w-80:y=(H-h)/2[out]"
        );
    }

    #[test]
    fn drawtext_escapes_metacharacters() {
        let node = Node::DrawText {
            text: "It's a: test, really".to_string(),
            font_size: 86,
            color: "white".to_string(),
            x: "(w-text_w)/2".to_string(),
            y: "(h-text_h)/2".to_string(),
            border_width: 4,
            border_color: "black@0.8".to_string(),
            alpha: None,
            boxed: false,
        };
        let rendered = node.render();
        assert!(rendered.contains("It\\'s a\\: test\\, really"));
        assert!(rendered.contains("borderw=4"));
    }

    #[test]
    fn concat_with_and_without_audio() {
        assert_eq!(
            Node::Concat {
                segments: 2,
                audio: true
            }
            .render(),
            "concat=n=2:v=1:a=1"
        );
        assert_eq!(
            Node::Concat {
                segments: 3,
                audio: false
            }
            .render(),
            "concat=n=3:v=1:a=0"
        );
    }

    #[test]
    fn zoompan_matches_tool_syntax() {
        let node = Node::ZoomPan {
            zoom: "min(zoom+0.0005,1.2)".to_string(),
            frames: 125,
            width: 1920,
            height: 1080,
        };
        assert_eq!(
            node.render(),
            "zoompan=z='min(zoom+0.0005,1.2)':d=125:s=1920x1080"
        );
    }
}
