//! Application Configuration
//!
//! User settings stored in TOML format. Every section falls back to its
//! defaults when omitted.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::capture::{CaptureConfig, Facing};
use crate::vision::RecognitionLevel;

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Camera settings
    pub capture: CaptureSettings,
    /// Object detector settings
    pub detection: DetectionSettings,
    /// Text recognizer settings
    pub ocr: OcrSettings,
    /// Streaming backend settings
    pub backend: BackendSettings,
    /// Pipeline settings
    pub pipeline: PipelineSettings,
}

/// Where frames come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureSource {
    /// Generated test-pattern cameras
    #[default]
    Synthetic,
    /// Still images replayed from `frames_dir`
    Directory,
}

/// Capture-related settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    pub source: CaptureSource,
    /// Folder replayed when `source = "directory"`
    pub frames_dir: Option<PathBuf>,
    /// Camera selected on configuration
    pub default_facing: Facing,
    /// Maximum capture FPS
    pub max_fps: u32,
    /// Pause after swapping cameras, in milliseconds
    pub switch_settle_ms: u64,
    /// Native size of synthetic cameras
    pub frame_width: u32,
    pub frame_height: u32,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            source: CaptureSource::Synthetic,
            frames_dir: None,
            default_facing: Facing::Back,
            max_fps: 30,
            switch_settle_ms: 150,
            frame_width: 640,
            frame_height: 480,
        }
    }
}

impl CaptureSettings {
    pub fn to_capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            default_facing: self.default_facing,
            max_fps: self.max_fps.max(1),
            switch_settle: Duration::from_millis(self.switch_settle_ms),
        }
    }
}

/// Object detection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionSettings {
    /// ONNX model; defaults to the models directory
    pub model_path: Option<PathBuf>,
    /// Label file, one name per line; COCO names when absent
    pub labels_path: Option<PathBuf>,
    /// Square model input size in pixels
    pub input_size: u32,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub max_detections: usize,
    /// ONNX Runtime intra-op threads
    pub intra_threads: usize,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            model_path: None,
            labels_path: None,
            input_size: 640,
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
            max_detections: 100,
            intra_threads: 4,
        }
    }
}

/// Text recognition settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrSettings {
    /// Language hints in BCP 47 form
    pub languages: Vec<String>,
    pub level: RecognitionLevel,
    pub language_correction: bool,
    /// Where the rten models live; defaults to the models directory
    pub models_dir: Option<PathBuf>,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            languages: vec!["es-ES".to_string(), "en-US".to_string()],
            level: RecognitionLevel::Accurate,
            language_correction: true,
            models_dir: None,
        }
    }
}

/// Streaming backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    /// WebSocket endpoint
    pub endpoint: String,
    /// JPEG quality of uploaded frames (1-100)
    pub jpeg_quality: u8,
    pub connect_timeout_secs: u64,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            endpoint: "ws://localhost/api/vision/stream/detect".to_string(),
            jpeg_quality: 50,
            connect_timeout_secs: 10,
        }
    }
}

impl BackendSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }
}

/// Which analysis path runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisMode {
    /// Detector and recognizer on this machine
    #[default]
    OnDevice,
    /// Frames streamed to the remote service
    Backend,
}

/// Pipeline settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub mode: AnalysisMode,
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
