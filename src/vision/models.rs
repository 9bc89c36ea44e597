//! Model management
//!
//! Locates, downloads and caches the model files the analyzers need, and
//! wraps ONNX Runtime session creation for the detector.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use futures_util::StreamExt;
use ort::session::{builder::GraphOptimizationLevel, Session};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

/// Model files used by the analyzers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelType {
    /// ocrs text detection model
    TextDetection,
    /// ocrs text recognition model
    TextRecognition,
    /// YOLO-family object detector exported to ONNX
    ObjectDetection,
}

impl ModelType {
    pub const ALL: [ModelType; 3] = [
        ModelType::TextDetection,
        ModelType::TextRecognition,
        ModelType::ObjectDetection,
    ];

    /// Get the filename for this model type
    pub fn filename(&self) -> &'static str {
        match self {
            ModelType::TextDetection => "text-detection.rten",
            ModelType::TextRecognition => "text-recognition.rten",
            ModelType::ObjectDetection => "yolo11s.onnx",
        }
    }

    /// Download location, if the model is publicly hosted
    ///
    /// The detector has to be exported and placed by hand.
    pub fn download_url(&self) -> Option<&'static str> {
        match self {
            ModelType::TextDetection => {
                Some("https://ocrs-models.s3-accelerate.amazonaws.com/text-detection.rten")
            }
            ModelType::TextRecognition => {
                Some("https://ocrs-models.s3-accelerate.amazonaws.com/text-recognition.rten")
            }
            ModelType::ObjectDetection => None,
        }
    }

    /// Plausible file size bounds, used to reject truncated downloads
    pub fn expected_size_range(&self) -> (u64, u64) {
        match self {
            ModelType::TextDetection => (500_000, 50_000_000),
            ModelType::TextRecognition => (500_000, 50_000_000),
            ModelType::ObjectDetection => (1_000_000, 500_000_000),
        }
    }

    /// Display name for progress reporting
    pub fn display_name(&self) -> &'static str {
        match self {
            ModelType::TextDetection => "Text Detection",
            ModelType::TextRecognition => "Text Recognition",
            ModelType::ObjectDetection => "Object Detection",
        }
    }
}

/// Model manifest tracking downloaded models
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ModelManifest {
    pub version: String,
    pub models: Vec<ModelInfo>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ModelInfo {
    pub model_type: String,
    pub filename: String,
    pub size_bytes: u64,
    pub sha256: String,
    pub downloaded_at: u64,
}

impl Default for ModelManifest {
    fn default() -> Self {
        Self {
            version: "1.0.0".to_string(),
            models: Vec::new(),
        }
    }
}

/// Model manager for downloading and caching model files
pub struct ModelManager {
    models_dir: PathBuf,
}

impl ModelManager {
    /// Manager rooted at the application data directory
    pub fn new() -> Result<Self> {
        let data_dir = crate::storage::get_data_dir()?;
        Self::with_dir(data_dir.join("models"))
    }

    /// Create model manager with custom directory
    pub fn with_dir(models_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&models_dir)
            .with_context(|| format!("Failed to create models directory {:?}", models_dir))?;
        Ok(Self { models_dir })
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// Get the path to a specific model file
    pub fn model_path(&self, model_type: ModelType) -> PathBuf {
        self.models_dir.join(model_type.filename())
    }

    /// Check if a model is present with a plausible size
    pub fn is_model_available(&self, model_type: ModelType) -> bool {
        match std::fs::metadata(self.model_path(model_type)) {
            Ok(metadata) => {
                let (min, max) = model_type.expected_size_range();
                (min..=max).contains(&metadata.len())
            }
            Err(_) => false,
        }
    }

    /// Both OCR models are in place
    pub fn ocr_models_ready(&self) -> bool {
        self.is_model_available(ModelType::TextDetection)
            && self.is_model_available(ModelType::TextRecognition)
    }

    /// Availability and on-disk size of every model
    pub fn get_model_status(&self) -> Vec<(ModelType, bool, Option<u64>)> {
        ModelType::ALL
            .iter()
            .map(|&model_type| {
                let size = std::fs::metadata(self.model_path(model_type)).ok().map(|m| m.len());
                (model_type, self.is_model_available(model_type), size)
            })
            .collect()
    }

    /// Download a model if not already available, returning its path
    pub async fn ensure_model(&self, model_type: ModelType) -> Result<PathBuf> {
        let path = self.model_path(model_type);

        if self.is_model_available(model_type) {
            debug!("Model {:?} already available at {:?}", model_type, path);
            return Ok(path);
        }

        let Some(url) = model_type.download_url() else {
            anyhow::bail!(
                "{} model is not downloadable; place it at {:?}",
                model_type.display_name(),
                path
            );
        };

        if std::env::var("AITANA_OFFLINE").is_ok() {
            anyhow::bail!(
                "Offline mode: cannot download models. Please download manually from {} and place at {:?}",
                url,
                path
            );
        }

        info!("Downloading {} model from {}", model_type.display_name(), url);
        let sha256 = download_file(url, &path).await?;

        if !self.is_model_available(model_type) {
            anyhow::bail!("Download completed but model verification failed");
        }
        self.record_download(model_type, sha256)?;

        info!("Successfully downloaded {} model", model_type.display_name());
        Ok(path)
    }

    /// Fetch both OCR models
    pub async fn ensure_ocr_models(&self) -> Result<(PathBuf, PathBuf)> {
        let detection = self.ensure_model(ModelType::TextDetection).await?;
        let recognition = self.ensure_model(ModelType::TextRecognition).await?;
        Ok((detection, recognition))
    }

    fn record_download(&self, model_type: ModelType, sha256: String) -> Result<()> {
        let mut manifest = self.load_manifest().unwrap_or_else(|e| {
            warn!("Ignoring unreadable model manifest: {}", e);
            ModelManifest::default()
        });

        let metadata = std::fs::metadata(self.model_path(model_type))?;
        let info = ModelInfo {
            model_type: format!("{:?}", model_type),
            filename: model_type.filename().to_string(),
            size_bytes: metadata.len(),
            sha256,
            downloaded_at: unix_now(),
        };

        match manifest.models.iter_mut().find(|m| m.filename == info.filename) {
            Some(existing) => *existing = info,
            None => manifest.models.push(info),
        }

        self.save_manifest(&manifest)
    }

    pub fn load_manifest(&self) -> Result<ModelManifest> {
        let manifest_path = self.models_dir.join("manifest.json");
        if !manifest_path.exists() {
            return Ok(ModelManifest::default());
        }
        let content = std::fs::read_to_string(&manifest_path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save_manifest(&self, manifest: &ModelManifest) -> Result<()> {
        let manifest_path = self.models_dir.join("manifest.json");
        std::fs::write(manifest_path, serde_json::to_string_pretty(manifest)?)?;
        Ok(())
    }
}

/// Stream a file to disk through a temp file; returns its SHA-256
async fn download_file(url: &str, path: &Path) -> Result<String> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(300))
        .build()
        .context("Failed to create HTTP client")?;

    let response = client
        .get(url)
        .send()
        .await
        .context("Failed to send download request")?;

    if !response.status().is_success() {
        anyhow::bail!("Download failed with status {}: {}", response.status(), url);
    }

    let total_size = response.content_length();
    debug!("Download size: {:?} bytes", total_size);

    let temp_path = path.with_extension("tmp");
    let mut file = std::fs::File::create(&temp_path).context("Failed to create temp file")?;

    let mut hasher = Sha256::new();
    let mut downloaded: u64 = 0;
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("Error reading download stream")?;
        file.write_all(&chunk).context("Failed to write to temp file")?;
        hasher.update(&chunk);
        downloaded += chunk.len() as u64;
    }

    file.flush().context("Failed to flush temp file")?;
    drop(file);
    debug!("Downloaded {} bytes from {}", downloaded, url);

    std::fs::rename(&temp_path, path).context("Failed to move downloaded file to final location")?;
    Ok(format!("{:x}", hasher.finalize()))
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// ONNX Runtime session wrapper
pub struct OnnxSession {
    session: Session,
    input_names: Vec<String>,
    output_names: Vec<String>,
}

impl OnnxSession {
    /// Create a new ONNX session from a model file
    pub fn new(model_path: &Path, intra_threads: usize) -> Result<Self> {
        info!("Loading ONNX model from {:?}", model_path);

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(intra_threads.max(1))?
            .commit_from_file(model_path)
            .context("Failed to load ONNX model")?;

        let input_names: Vec<String> = session.inputs.iter().map(|i| i.name.clone()).collect();
        let output_names: Vec<String> = session.outputs.iter().map(|o| o.name.clone()).collect();

        info!("Model loaded. Inputs: {:?}, Outputs: {:?}", input_names, output_names);

        Ok(Self {
            session,
            input_names,
            output_names,
        })
    }

    /// Get the underlying session mutably for running inference
    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    pub fn input_names(&self) -> &[String] {
        &self.input_names
    }

    pub fn output_names(&self) -> &[String] {
        &self.output_names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_model_type_filenames() {
        assert_eq!(ModelType::TextDetection.filename(), "text-detection.rten");
        assert_eq!(ModelType::TextRecognition.filename(), "text-recognition.rten");
        assert_eq!(ModelType::ObjectDetection.filename(), "yolo11s.onnx");
        assert!(ModelType::ObjectDetection.download_url().is_none());
    }

    #[test]
    fn test_model_status_in_empty_dir() {
        let dir = TempDir::new().unwrap();
        let manager = ModelManager::with_dir(dir.path().join("models")).unwrap();
        assert!(manager.models_dir().exists());
        assert!(!manager.ocr_models_ready());

        let status = manager.get_model_status();
        assert_eq!(status.len(), 3);
        assert!(status.iter().all(|(_, available, size)| !available && size.is_none()));
    }

    #[test]
    fn test_truncated_model_rejected() {
        let dir = TempDir::new().unwrap();
        let manager = ModelManager::with_dir(dir.path().to_path_buf()).unwrap();
        std::fs::write(manager.model_path(ModelType::TextDetection), b"tiny").unwrap();
        assert!(!manager.is_model_available(ModelType::TextDetection));
    }

    #[tokio::test]
    async fn test_detector_model_must_be_placed_manually() {
        let dir = TempDir::new().unwrap();
        let manager = ModelManager::with_dir(dir.path().to_path_buf()).unwrap();
        let err = manager.ensure_model(ModelType::ObjectDetection).await.unwrap_err();
        assert!(err.to_string().contains("not downloadable"));
    }

    #[test]
    fn test_manifest_roundtrip() {
        let dir = TempDir::new().unwrap();
        let manager = ModelManager::with_dir(dir.path().to_path_buf()).unwrap();
        assert!(manager.load_manifest().unwrap().models.is_empty());

        let mut manifest = ModelManifest::default();
        manifest.models.push(ModelInfo {
            model_type: "TextDetection".to_string(),
            filename: "text-detection.rten".to_string(),
            size_bytes: 42,
            sha256: "abc".to_string(),
            downloaded_at: 1,
        });
        manager.save_manifest(&manifest).unwrap();
        assert_eq!(manager.load_manifest().unwrap().models[0].size_bytes, 42);
    }
}
