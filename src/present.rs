//! Headless presenter
//!
//! Stands in for a renderer when running from a terminal: gives every new
//! preview surface a layout size so capture can start, and logs the
//! published analysis state whenever its summary changes.

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::capture::{LayoutSize, PreviewSurface};
use crate::shared::LiveState;

/// Parse a `WIDTHxHEIGHT` layout size, e.g. `1280x720`
pub fn parse_layout_size(s: &str) -> Result<LayoutSize, String> {
    let (w, h) = s
        .trim()
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{}'", s))?;
    let width = w.trim().parse::<u32>().map_err(|e| format!("invalid width '{}': {}", w, e))?;
    let height = h.trim().parse::<u32>().map_err(|e| format!("invalid height '{}': {}", h, e))?;
    Ok(LayoutSize::new(width, height))
}

/// One-line description of the published state
pub fn summarize(state: &LiveState) -> String {
    if !state.is_analyzing {
        return "idle".to_string();
    }

    let mut parts = Vec::new();
    if let Some(text) = &state.response_text {
        parts.push(format!("backend: {}", text));
    } else if !state.result.objects.is_empty() {
        let objects: Vec<String> = state
            .result
            .objects
            .iter()
            .map(|o| format!("{} {:.0}%", o.label, o.confidence * 100.0))
            .collect();
        parts.push(format!("objects: {}", objects.join(", ")));
    }
    if !state.result.gestures.is_empty() {
        parts.push(format!("gestures: {}", state.result.gestures.join(", ")));
    }
    let text = state.result.recognized_text.replace('\n', " / ");
    if !text.is_empty() {
        parts.push(format!("text: \"{}\"", text));
    }

    if parts.is_empty() {
        "nothing detected".to_string()
    } else {
        parts.join(" | ")
    }
}

/// Logs state changes and lays out preview surfaces
pub struct ConsolePresenter {
    layout: LayoutSize,
}

impl ConsolePresenter {
    pub fn new(layout: LayoutSize) -> Self {
        Self { layout }
    }

    /// Run until both sources close
    pub fn spawn(
        self,
        mut previews: watch::Receiver<Option<PreviewSurface>>,
        mut state: watch::Receiver<LiveState>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut last_summary = String::new();
            let mut previews_open = true;
            let mut state_open = true;

            // A surface may already exist before the presenter starts
            if let Some(surface) = previews.borrow_and_update().clone() {
                self.lay_out(&surface);
            }

            while previews_open || state_open {
                tokio::select! {
                    changed = previews.changed(), if previews_open => {
                        if changed.is_err() {
                            previews_open = false;
                            continue;
                        }
                        let surface = previews.borrow_and_update().clone();
                        if let Some(surface) = surface {
                            self.lay_out(&surface);
                        }
                    }
                    changed = state.changed(), if state_open => {
                        if changed.is_err() {
                            state_open = false;
                            continue;
                        }
                        let summary = summarize(&state.borrow_and_update());
                        if summary != last_summary {
                            info!("{}", summary);
                            last_summary = summary;
                        }
                    }
                }
            }
            debug!("Presenter finished");
        })
    }

    fn lay_out(&self, surface: &PreviewSurface) {
        debug!(
            "Laying out preview {} at {}x{}",
            surface.id(),
            self.layout.width,
            self.layout.height
        );
        surface.report_layout(self.layout);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::AnalysisResult;
    use crate::vision::{DetectedObject, NormalizedRect};

    #[test]
    fn test_parse_layout_size() {
        assert_eq!(parse_layout_size("1280x720").unwrap(), LayoutSize::new(1280, 720));
        assert_eq!(parse_layout_size(" 640X480 ").unwrap(), LayoutSize::new(640, 480));
        assert!(parse_layout_size("640").is_err());
        assert!(parse_layout_size("axb").is_err());
    }

    #[test]
    fn test_summarize() {
        assert_eq!(summarize(&LiveState::default()), "idle");

        let mut state = LiveState {
            is_analyzing: true,
            ..Default::default()
        };
        assert_eq!(summarize(&state), "nothing detected");

        state.result = AnalysisResult {
            objects: vec![DetectedObject::new("cup", 0.87, NormalizedRect::default())],
            gestures: Vec::new(),
            recognized_text: "EXIT\nHERE".to_string(),
        };
        assert_eq!(summarize(&state), "objects: cup 87% | text: \"EXIT / HERE\"");

        state.response_text = Some("cup a 1.0m".to_string());
        state.result.gestures = vec!["wave".to_string()];
        state.result.recognized_text.clear();
        assert_eq!(summarize(&state), "backend: cup a 1.0m | gestures: wave");
    }
}
