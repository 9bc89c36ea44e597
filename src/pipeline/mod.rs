//! Live analysis orchestrator
//!
//! Subscribes to the capture frame stream and runs one analysis cycle at a
//! time, either on this machine (detector and recognizer joined on the same
//! frame) or by streaming frames to the remote service. Frames that arrive
//! while a cycle is in flight are dropped; the next cycle always picks up
//! the newest frame.
//!
//! The published [`LiveState`] is replaced atomically per cycle.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::capture::{CaptureService, Frame};
use crate::config::AnalysisMode;
use crate::link::BackendLink;
use crate::shared::{describe_response, AnalysisResult, LiveState, OrchestratorResponse};
use crate::vision::{ObjectDetector, TextRecognizer};

/// Where each frame gets analyzed
#[derive(Clone)]
pub enum AnalysisPath {
    OnDevice {
        detector: Arc<dyn ObjectDetector>,
        recognizer: Arc<dyn TextRecognizer>,
    },
    Backend {
        link: Arc<BackendLink>,
        endpoint: String,
        jpeg_quality: u8,
    },
}

impl AnalysisPath {
    pub fn mode(&self) -> AnalysisMode {
        match self {
            AnalysisPath::OnDevice { .. } => AnalysisMode::OnDevice,
            AnalysisPath::Backend { .. } => AnalysisMode::Backend,
        }
    }
}

struct Running {
    cancel: CancellationToken,
    frame_loop: JoinHandle<()>,
    responses: Option<JoinHandle<()>>,
}

/// Coordinates capture, analysis and the published state
pub struct LiveAnalysis {
    capture: Arc<CaptureService>,
    path: AnalysisPath,
    state: Arc<watch::Sender<LiveState>>,
    /// Size of the frame most recently sent to the backend
    last_sent_size: Arc<Mutex<(u32, u32)>>,
    running: Mutex<Option<Running>>,
}

impl LiveAnalysis {
    pub fn new(capture: Arc<CaptureService>, path: AnalysisPath) -> Self {
        let (state, _) = watch::channel(LiveState::default());
        Self {
            capture,
            path,
            state: Arc::new(state),
            last_sent_size: Arc::new(Mutex::new((0, 0))),
            running: Mutex::new(None),
        }
    }

    pub fn mode(&self) -> AnalysisMode {
        self.path.mode()
    }

    /// Configure and start capture, open the backend connection when
    /// streaming, and begin analyzing frames. A no-op while already
    /// analyzing.
    pub async fn on_appear(&self) {
        if self.running.lock().is_some() {
            debug!("Analysis already running");
            return;
        }

        // First appearance defers the start until the preview has a size;
        // later ones restart directly
        if self.capture.state().is_configured {
            self.capture.restart_if_needed();
        } else {
            self.capture.configure();
        }

        let responses = match &self.path {
            AnalysisPath::Backend { link, endpoint, .. } => {
                // Subscribe before connecting so no early response is missed
                let rx = link.subscribe();
                if let Err(e) = link.connect(endpoint).await {
                    warn!("Backend connection failed: {}", e);
                }
                Some(tokio::spawn(apply_responses(
                    rx,
                    self.state.clone(),
                    self.last_sent_size.clone(),
                )))
            }
            AnalysisPath::OnDevice { .. } => None,
        };

        let cancel = CancellationToken::new();
        let frame_loop = tokio::spawn(run_frames(
            self.capture.manager().frames(),
            self.path.clone(),
            self.state.clone(),
            self.last_sent_size.clone(),
            cancel.clone(),
        ));

        {
            let mut running = self.running.lock();
            if running.is_some() {
                // Lost a race with a concurrent on_appear
                cancel.cancel();
                frame_loop.abort();
                if let Some(handle) = responses {
                    handle.abort();
                }
                return;
            }
            *running = Some(Running {
                cancel,
                frame_loop,
                responses,
            });
        }

        self.state.send_modify(|s| s.is_analyzing = true);
        info!("Live analysis started ({:?})", self.mode());
    }

    /// The user answered; analysis is over for this screen
    pub async fn on_answer(&self) {
        info!("Answer requested, stopping analysis");
        self.stop().await;
    }

    pub async fn on_disappear(&self) {
        self.stop().await;
    }

    /// Swap cameras without touching the analysis state
    pub fn switch_camera(&self) {
        self.capture.switch_camera();
    }

    pub fn subscribe(&self) -> watch::Receiver<LiveState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> LiveState {
        self.state.borrow().clone()
    }

    pub fn capture(&self) -> &Arc<CaptureService> {
        &self.capture
    }

    async fn stop(&self) {
        let running = self.running.lock().take();

        self.capture.stop();

        if let Some(running) = running {
            // The frame loop exits at its next wait; a cycle already in
            // flight still completes and publishes
            running.cancel.cancel();
            drop(running.frame_loop);
            if let Some(handle) = running.responses {
                handle.abort();
            }
        }

        if let AnalysisPath::Backend { link, .. } = &self.path {
            link.disconnect().await;
        }

        self.state.send_modify(|s| s.is_analyzing = false);
        info!("Live analysis stopped");
    }
}

impl Drop for LiveAnalysis {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.cancel.cancel();
            if let Some(handle) = running.responses {
                handle.abort();
            }
        }
    }
}

async fn run_frames(
    mut frames: watch::Receiver<Option<Frame>>,
    path: AnalysisPath,
    state: Arc<watch::Sender<LiveState>>,
    last_sent_size: Arc<Mutex<(u32, u32)>>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = frames.changed() => {
                if changed.is_err() {
                    debug!("Frame source closed");
                    break;
                }
            }
        }

        let latest = frames.borrow_and_update().clone();
        let Some(frame) = latest else {
            continue;
        };

        match &path {
            AnalysisPath::OnDevice {
                detector,
                recognizer,
            } => analyze_on_device(detector.as_ref(), recognizer.as_ref(), &state, frame).await,
            AnalysisPath::Backend {
                link, jpeg_quality, ..
            } => stream_frame(link, *jpeg_quality, &last_sent_size, frame).await,
        }
    }
    debug!("Frame loop ended");
}

async fn analyze_on_device(
    detector: &dyn ObjectDetector,
    recognizer: &dyn TextRecognizer,
    state: &watch::Sender<LiveState>,
    frame: Frame,
) {
    let (objects, recognized_text) = tokio::join!(detector.analyze(&frame), recognizer.analyze(&frame));
    debug!(
        "Frame {}: {} objects, {} chars of text",
        frame.sequence,
        objects.len(),
        recognized_text.len()
    );

    state.send_modify(|s| {
        s.result = AnalysisResult {
            objects,
            gestures: Vec::new(),
            recognized_text,
        };
        s.cycle += 1;
        s.frame_sequence = Some(frame.sequence);
    });
}

async fn stream_frame(link: &BackendLink, quality: u8, last_sent_size: &Mutex<(u32, u32)>, frame: Frame) {
    let size = frame.dimensions();
    let sequence = frame.sequence;
    let encoded = tokio::task::spawn_blocking(move || frame.encode_jpeg(quality)).await;

    match encoded {
        Ok(Ok(bytes)) => {
            *last_sent_size.lock() = size;
            debug!("Sending frame {} ({} bytes)", sequence, bytes.len());
            link.send(bytes);
        }
        Ok(Err(e)) => warn!("Failed to encode frame {}: {}", sequence, e),
        Err(e) => warn!("Encoder task failed for frame {}: {}", sequence, e),
    }
}

/// Apply backend responses in arrival order, last write wins
async fn apply_responses(
    mut responses: broadcast::Receiver<Arc<OrchestratorResponse>>,
    state: Arc<watch::Sender<LiveState>>,
    last_sent_size: Arc<Mutex<(u32, u32)>>,
) {
    loop {
        let response = match responses.recv().await {
            Ok(response) => response,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!("Skipped {} stale backend responses", skipped);
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        let size = *last_sent_size.lock();
        let result = AnalysisResult::from_response(&response, size);
        let response_text = describe_response(&response);
        state.send_modify(|s| {
            s.result = result;
            s.response_text = response_text;
            s.cycle += 1;
            s.frame_sequence = None;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::synthetic::SyntheticProvider;
    use crate::capture::{CaptureConfig, CaptureSessionManager, LayoutSize};
    use crate::error::VisionError;
    use crate::vision::{DetectedObject, NormalizedRect};
    use async_trait::async_trait;
    use futures_util::{SinkExt, StreamExt};
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;
    use tokio_tungstenite::tungstenite::Message;

    /// Labels each object with the frame it came from
    struct SequenceDetector;

    #[async_trait]
    impl ObjectDetector for SequenceDetector {
        async fn detect(&self, frame: &Frame) -> Result<Vec<DetectedObject>, VisionError> {
            tokio::time::sleep(Duration::from_millis(15)).await;
            Ok(vec![DetectedObject::new(
                format!("frame-{}", frame.sequence),
                0.9,
                NormalizedRect::from_corners(0.1, 0.1, 0.5, 0.5),
            )])
        }
    }

    /// Reads the frame sequence as text, slower than the detector
    struct SequenceRecognizer;

    #[async_trait]
    impl TextRecognizer for SequenceRecognizer {
        async fn recognize(&self, frame: &Frame) -> Result<String, VisionError> {
            tokio::time::sleep(Duration::from_millis(40)).await;
            Ok(frame.sequence.to_string())
        }
    }

    struct FailingDetector;

    #[async_trait]
    impl ObjectDetector for FailingDetector {
        async fn detect(&self, _frame: &Frame) -> Result<Vec<DetectedObject>, VisionError> {
            Err(VisionError::Inference("model crashed".to_string()))
        }
    }

    struct FixedRecognizer(&'static str);

    #[async_trait]
    impl TextRecognizer for FixedRecognizer {
        async fn recognize(&self, _frame: &Frame) -> Result<String, VisionError> {
            Ok(self.0.to_string())
        }
    }

    fn capture() -> Arc<CaptureService> {
        let provider = Arc::new(SyntheticProvider::new(64, 48));
        let config = CaptureConfig {
            max_fps: 60,
            switch_settle: Duration::ZERO,
            ..Default::default()
        };
        let manager = Arc::new(CaptureSessionManager::new(provider, config).unwrap());
        Arc::new(CaptureService::new(manager))
    }

    /// Stand in for the presenter: give the preview a size once it exists
    fn lay_out_preview(capture: &CaptureService) {
        let mut preview = capture.preview();
        tokio::spawn(async move {
            let surface = preview.wait_for(|s| s.is_some()).await.unwrap().clone();
            if let Some(surface) = surface {
                surface.report_layout(LayoutSize::new(320, 240));
            }
        });
    }

    async fn wait_for_state(
        analysis: &LiveAnalysis,
        cond: impl FnMut(&LiveState) -> bool,
    ) -> LiveState {
        let mut rx = analysis.subscribe();
        let state = tokio::time::timeout(Duration::from_secs(10), rx.wait_for(cond))
            .await
            .unwrap()
            .unwrap()
            .clone();
        state
    }

    fn on_device(
        capture: Arc<CaptureService>,
        detector: impl ObjectDetector + 'static,
        recognizer: impl TextRecognizer + 'static,
    ) -> LiveAnalysis {
        LiveAnalysis::new(
            capture,
            AnalysisPath::OnDevice {
                detector: Arc::new(detector),
                recognizer: Arc::new(recognizer),
            },
        )
    }

    #[tokio::test]
    async fn test_objects_and_text_come_from_same_frame() {
        let capture = capture();
        lay_out_preview(&capture);
        let analysis = on_device(capture, SequenceDetector, SequenceRecognizer);

        let mut rx = analysis.subscribe();
        analysis.on_appear().await;

        let mut checked = 0;
        while checked < 5 {
            tokio::time::timeout(Duration::from_secs(10), rx.changed())
                .await
                .unwrap()
                .unwrap();
            let state = rx.borrow_and_update().clone();
            if state.cycle == 0 {
                continue;
            }
            let sequence = state.frame_sequence.unwrap();
            assert_eq!(state.result.recognized_text, sequence.to_string());
            assert_eq!(state.result.objects.len(), 1);
            assert_eq!(state.result.objects[0].label, format!("frame-{}", sequence));
            checked += 1;
        }

        analysis.on_disappear().await;
    }

    #[tokio::test]
    async fn test_detector_failure_still_publishes_text() {
        let capture = capture();
        lay_out_preview(&capture);
        let analysis = on_device(capture, FailingDetector, FixedRecognizer("HELLO"));

        analysis.on_appear().await;
        let state = wait_for_state(&analysis, |s| s.cycle > 0).await;

        assert!(state.is_analyzing);
        assert!(state.result.objects.is_empty());
        assert_eq!(state.result.recognized_text, "HELLO");

        analysis.on_disappear().await;
    }

    #[tokio::test]
    async fn test_stop_and_restart() {
        let capture = capture();
        lay_out_preview(&capture);
        let analysis = on_device(capture.clone(), FailingDetector, FixedRecognizer("x"));

        analysis.on_appear().await;
        analysis.on_appear().await;
        wait_for_state(&analysis, |s| s.cycle > 0).await;
        assert_eq!(capture.manager().setup_count(), 1);

        analysis.on_answer().await;
        assert!(!analysis.state().is_analyzing);
        assert!(!capture.state().is_running);

        analysis.on_appear().await;
        assert!(capture.state().is_running);
        let resumed_from = analysis.state().cycle;
        wait_for_state(&analysis, |s| s.cycle > resumed_from).await;
        assert_eq!(capture.manager().setup_count(), 1);

        analysis.on_disappear().await;
    }

    #[tokio::test]
    async fn test_reappear_before_layout_waits_for_preview() {
        let capture = capture();
        let analysis = on_device(capture.clone(), FailingDetector, FixedRecognizer("x"));
        let mut preview = capture.preview();

        analysis.on_appear().await;
        let surface = tokio::time::timeout(Duration::from_secs(3), preview.wait_for(|p| p.is_some()))
            .await
            .unwrap()
            .unwrap()
            .clone()
            .unwrap();

        analysis.on_disappear().await;
        analysis.on_appear().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        capture.manager().flush().unwrap();
        assert!(!capture.manager().is_running());

        surface.report_layout(LayoutSize::new(320, 240));
        wait_for_state(&analysis, |s| s.cycle > 0).await;
        assert!(capture.state().is_running);

        analysis.on_disappear().await;
    }

    #[tokio::test]
    async fn test_switch_camera_keeps_analysis_state() {
        let capture = capture();
        lay_out_preview(&capture);
        let analysis = on_device(capture.clone(), FailingDetector, FixedRecognizer("x"));

        analysis.on_appear().await;
        wait_for_state(&analysis, |s| s.cycle > 0).await;

        analysis.switch_camera();
        capture.manager().flush().unwrap();
        assert_eq!(capture.manager().current_facing(), Some(crate::capture::Facing::Front));
        assert!(analysis.state().is_analyzing);

        analysis.on_disappear().await;
    }

    #[tokio::test]
    async fn test_backend_responses_update_state() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("ws://{}", listener.local_addr().unwrap());
        // Answer every uploaded frame with one object covering the top-left quarter
        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(tcp).await.unwrap();
            let mut frames = 0;
            while let Some(Ok(msg)) = ws.next().await {
                match msg {
                    Message::Binary(data) => {
                        assert!(image::load_from_memory(&data).is_ok());
                        frames += 1;
                        let reply = r#"{"vision":{"objects":[{"label":"cup","confidence":0.8,
                            "box":[0,0,32,24],"distance_m":1.5}]},"gestures":{"gestures":["wave"]}}"#;
                        if ws.send(Message::Text(reply.into())).await.is_err() {
                            break;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            frames
        });

        let capture = capture();
        lay_out_preview(&capture);
        let link = Arc::new(BackendLink::new(Duration::from_secs(5)));
        let analysis = LiveAnalysis::new(
            capture,
            AnalysisPath::Backend {
                link: link.clone(),
                endpoint,
                jpeg_quality: 50,
            },
        );
        assert_eq!(analysis.mode(), AnalysisMode::Backend);

        analysis.on_appear().await;
        let state = wait_for_state(&analysis, |s| s.response_text.is_some()).await;

        assert_eq!(state.response_text.as_deref(), Some("cup a 1.5m"));
        assert_eq!(state.result.gestures, vec!["wave"]);
        let rect = state.result.objects[0].bounding_box;
        assert!((rect.width - 0.5).abs() < 1e-6);
        assert!((rect.height - 0.5).abs() < 1e-6);

        analysis.on_disappear().await;
        assert!(link.connection_id().is_none());
        assert!(!analysis.state().is_analyzing);
        assert!(server.await.unwrap() >= 1);
    }

    #[tokio::test]
    async fn test_backend_unreachable_is_absorbed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("ws://{}", listener.local_addr().unwrap());
        drop(listener);

        let capture = capture();
        lay_out_preview(&capture);
        let link = Arc::new(BackendLink::new(Duration::from_secs(2)));
        let analysis = LiveAnalysis::new(
            capture.clone(),
            AnalysisPath::Backend {
                link: link.clone(),
                endpoint,
                jpeg_quality: 50,
            },
        );

        analysis.on_appear().await;
        assert!(analysis.state().is_analyzing);
        assert!(link.connection_id().is_none());
        analysis.on_disappear().await;
        assert!(!capture.state().is_running);
    }
}
