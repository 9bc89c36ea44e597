//! Application Coordinator
//!
//! Builds the capture stack, the analyzers and the orchestrator from the
//! loaded configuration and owns them for the lifetime of the process.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::capture::directory::DirectoryProvider;
use crate::capture::synthetic::SyntheticProvider;
use crate::capture::{CaptureService, CaptureSessionManager, DeviceProvider, LayoutSize};
use crate::config::{AnalysisMode, AppConfig, CaptureSettings, CaptureSource, DetectionSettings, OcrSettings};
use crate::link::BackendLink;
use crate::pipeline::{AnalysisPath, LiveAnalysis};
use crate::present::ConsolePresenter;
use crate::vision::{
    DisabledDetector, DisabledRecognizer, ModelManager, ModelType, ObjectDetector, OcrsRecognizer,
    TextRecognizer, YoloDetector,
};

/// Main application coordinator
pub struct AitanaApp {
    analysis: Arc<LiveAnalysis>,
    presenter: JoinHandle<()>,
}

impl AitanaApp {
    /// Wire everything up. Must be called inside a tokio runtime.
    pub async fn build(config: &AppConfig, preview: LayoutSize, download_models: bool) -> Result<Self> {
        let provider = build_provider(&config.capture)?;
        let manager = Arc::new(
            CaptureSessionManager::new(provider, config.capture.to_capture_config())
                .context("Failed to start capture session")?,
        );
        let capture = Arc::new(CaptureService::new(manager));

        let path = build_path(config, download_models).await;
        let analysis = Arc::new(LiveAnalysis::new(capture.clone(), path));

        let presenter = ConsolePresenter::new(preview).spawn(capture.preview(), analysis.subscribe());

        Ok(Self { analysis, presenter })
    }

    pub fn analysis(&self) -> &Arc<LiveAnalysis> {
        &self.analysis
    }

    /// Stop analysis and release the camera
    pub async fn shutdown(&self) {
        self.analysis.on_disappear().await;
        self.analysis.capture().manager().shutdown();
        info!("Capture shut down");
    }
}

impl Drop for AitanaApp {
    fn drop(&mut self) {
        self.presenter.abort();
    }
}

/// Device provider for the configured capture source
pub fn build_provider(settings: &CaptureSettings) -> Result<Arc<dyn DeviceProvider>> {
    match settings.source {
        CaptureSource::Synthetic => {
            info!(
                "Using synthetic cameras at {}x{}",
                settings.frame_width, settings.frame_height
            );
            Ok(Arc::new(SyntheticProvider::new(settings.frame_width, settings.frame_height)))
        }
        CaptureSource::Directory => {
            let dir = settings
                .frames_dir
                .as_ref()
                .context("capture.source is \"directory\" but capture.frames_dir is not set")?;
            info!("Replaying frames from {:?}", dir);
            Ok(Arc::new(DirectoryProvider::new(dir.clone())))
        }
    }
}

/// Analyzers or backend link for the configured mode
pub async fn build_path(config: &AppConfig, download_models: bool) -> AnalysisPath {
    match config.pipeline.mode {
        AnalysisMode::Backend => AnalysisPath::Backend {
            link: Arc::new(BackendLink::new(config.backend.connect_timeout())),
            endpoint: config.backend.endpoint.clone(),
            jpeg_quality: config.backend.jpeg_quality.clamp(1, 100),
        },
        AnalysisMode::OnDevice => {
            let models = match ModelManager::new() {
                Ok(models) => Some(models),
                Err(e) => {
                    warn!("Model cache unavailable: {}", e);
                    None
                }
            };
            AnalysisPath::OnDevice {
                detector: build_detector(&config.detection, models.as_ref()),
                recognizer: build_recognizer(&config.ocr, models.as_ref(), download_models).await,
            }
        }
    }
}

/// Detector from the configured or cached model, disabled when neither loads
pub fn build_detector(settings: &DetectionSettings, models: Option<&ModelManager>) -> Arc<dyn ObjectDetector> {
    let path = settings
        .model_path
        .clone()
        .or_else(|| models.map(|m| m.model_path(ModelType::ObjectDetection)));

    let Some(path) = path else {
        warn!("No object detection model configured, detection disabled");
        return Arc::new(DisabledDetector);
    };
    if !path.exists() {
        warn!("Object detection model not found at {:?}, detection disabled", path);
        return Arc::new(DisabledDetector);
    }

    match YoloDetector::new(&path, settings) {
        Ok(detector) => {
            info!("Object detector loaded from {:?}", path);
            Arc::new(detector)
        }
        Err(e) => {
            warn!("Failed to load object detector: {}, detection disabled", e);
            Arc::new(DisabledDetector)
        }
    }
}

/// Recognizer from the OCR model pair, downloading them if asked
pub async fn build_recognizer(
    settings: &OcrSettings,
    models: Option<&ModelManager>,
    download: bool,
) -> Arc<dyn TextRecognizer> {
    let custom = settings.models_dir.as_ref().and_then(|dir| {
        ModelManager::with_dir(dir.clone())
            .map_err(|e| warn!("OCR models directory unusable: {}", e))
            .ok()
    });
    let models = match &settings.models_dir {
        Some(_) => custom.as_ref(),
        None => models,
    };

    let Some(models) = models else {
        warn!("No OCR models available, text recognition disabled");
        return Arc::new(DisabledRecognizer);
    };

    if download && !models.ocr_models_ready() {
        if let Err(e) = models.ensure_ocr_models().await {
            warn!("OCR model download failed: {:#}", e);
        }
    }
    if !models.ocr_models_ready() {
        warn!(
            "OCR models missing from {:?} (run with --download-models), text recognition disabled",
            models.models_dir()
        );
        return Arc::new(DisabledRecognizer);
    }

    match load_recognizer(
        &models.model_path(ModelType::TextDetection),
        &models.model_path(ModelType::TextRecognition),
        settings,
    ) {
        Ok(recognizer) => recognizer,
        Err(e) => {
            warn!("Failed to load text recognizer: {:#}, text recognition disabled", e);
            Arc::new(DisabledRecognizer)
        }
    }
}

fn load_recognizer(detection: &Path, recognition: &Path, settings: &OcrSettings) -> Result<Arc<dyn TextRecognizer>> {
    let recognizer = OcrsRecognizer::new(detection, recognition, settings)?;
    info!("Text recognizer loaded ({:?})", settings.level);
    Ok(Arc::new(recognizer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{Facing, Frame};
    use tempfile::TempDir;

    #[test]
    fn test_directory_source_requires_frames_dir() {
        let settings = CaptureSettings {
            source: CaptureSource::Directory,
            frames_dir: None,
            ..Default::default()
        };
        assert!(build_provider(&settings).is_err());
    }

    #[test]
    fn test_synthetic_source() {
        let provider = build_provider(&CaptureSettings::default()).unwrap();
        assert!(provider.available().contains(&Facing::Back));
        assert!(provider.available().contains(&Facing::Front));
    }

    #[tokio::test]
    async fn test_missing_models_fall_back_to_disabled() {
        let dir = TempDir::new().unwrap();
        let models = ModelManager::with_dir(dir.path().to_path_buf()).unwrap();

        let detection = DetectionSettings::default();
        let detector = build_detector(&detection, Some(&models));
        let recognizer = build_recognizer(&OcrSettings::default(), Some(&models), false).await;

        let frame = Frame::new(vec![0; 4 * 4 * 4], 4, 4, 0, Facing::Back);
        assert!(detector.detect(&frame).await.unwrap().is_empty());
        assert_eq!(recognizer.recognize(&frame).await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_backend_mode_builds_link() {
        let mut config = AppConfig::default();
        config.pipeline.mode = AnalysisMode::Backend;
        config.backend.endpoint = "ws://127.0.0.1:9/stream".to_string();

        let path = build_path(&config, false).await;
        assert_eq!(path.mode(), AnalysisMode::Backend);
        match path {
            AnalysisPath::Backend {
                endpoint, jpeg_quality, ..
            } => {
                assert_eq!(endpoint, "ws://127.0.0.1:9/stream");
                assert_eq!(jpeg_quality, 50);
            }
            AnalysisPath::OnDevice { .. } => panic!("expected backend path"),
        }
    }
}
