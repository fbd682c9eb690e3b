use crate::acquire::{AcquisitionRequest, Strategy, StrategyError};
use crate::ffmpeg;
use crate::filter::{vf_chain, Chain, FilterGraph, Node};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

const SYNTHETIC_MIN_BYTES: u64 = 10 * 1024;

/// Last resort: generate the content clip ourselves so the chain never comes
/// up empty-handed. With a backdrop image available the clip is a slow
/// pan/zoom over it; otherwise a title card over a solid background.
pub struct SyntheticStrategy {
    backdrop: Option<PathBuf>,
    timeout: Duration,
}

impl SyntheticStrategy {
    pub fn new(backdrop: Option<PathBuf>, timeout: Duration) -> Self {
        Self { backdrop, timeout }
    }

    fn panzoom_filter(&self, image_duration: f64, title: &str) -> String {
        let frames = (image_duration * 25.0).round().max(25.0) as u32;
        vf_chain(&[
            Node::Scale {
                width: 1920,
                height: 1080,
            },
            Node::ZoomPan {
                zoom: "min(zoom+0.0005,1.2)".to_string(),
                frames,
                width: 1920,
                height: 1080,
            },
            Node::DrawText {
                text: title.to_string(),
                font_size: 36,
                color: "white".to_string(),
                x: "(w-text_w)/2".to_string(),
                y: "h-100".to_string(),
                border_width: 0,
                border_color: String::new(),
                alpha: None,
                boxed: true,
            },
        ])
    }

    fn title_card_graph(&self, duration: f64, title: &str) -> FilterGraph {
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
            .out("v"),
        )
    }
}

#[async_trait]
impl Strategy for SyntheticStrategy {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn requires_reference(&self) -> bool {
        false
    }

    fn min_valid_bytes(&self) -> u64 {
        SYNTHETIC_MIN_BYTES
    }

    fn attempts(&self) -> u32 {
        1
    }

    async fn attempt(
        &self,
        request: &AcquisitionRequest,
        dest: &Path,
    ) -> Result<(), StrategyError> {
        let duration = request.target_duration.max(1.0);

        if let Some(backdrop) = &self.backdrop {
            info!("synthetic: animating backdrop for {:.1}s", duration);
            let vf = self.panzoom_filter(duration, &request.title);
            let ok = ffmpeg::render_still(backdrop, &vf, duration, dest, self.timeout)
                .await
                .map_err(|e| StrategyError::Fatal(e.to_string()))?;
            if ok {
                return Ok(());
            }
            // fall through to the title card when the backdrop render fails
        }

        info!("synthetic: rendering title card for {:.1}s", duration);
        let graph = self.title_card_graph(duration, &request.title);
        let ok = ffmpeg::render_graph(&graph, "v", duration, dest, self.timeout)
            .await
            .map_err(|e| StrategyError::Fatal(e.to_string()))?;
        if ok {
            Ok(())
        } else {
            Err(StrategyError::Fatal("synthetic render failed".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panzoom_filter_scales_frames_with_duration() {
        let strategy = SyntheticStrategy::new(None, Duration::from_secs(300));
        let vf = strategy.panzoom_filter(10.0, "Film");
        assert!(vf.contains("zoompan"));
        assert!(vf.contains(":d=250:"));
        assert!(vf.contains("box=1"));
    }

    #[test]
    fn title_card_graph_renders_color_source() {
        let strategy = SyntheticStrategy::new(None, Duration::from_secs(300));
        let graph = strategy.title_card_graph(5.0, "The Matrix");
        let rendered = graph.render();
        assert!(rendered.starts_with("color=c=black:s=1920x1080:d=5"));
        assert!(rendered.contains("The Matrix"));
        assert!(rendered.ends_with("[v]"));
    }
}
