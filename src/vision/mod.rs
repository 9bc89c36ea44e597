//! Vision Layer
//!
//! On-device analyzers that turn one frame into structured results:
//! - Object detection via an ONNX model (YOLO family)
//! - Text recognition via ocrs
//!
//! Analyzers never fail the pipeline. Each exposes a fallible method and
//! an `analyze` wrapper that logs the failure and yields an empty result.
//! Inference runs on tokio's blocking pool, so overlapping calls never
//! wait on each other.

pub mod detection;
pub mod models;
pub mod ocr;
pub mod preprocess;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::capture::Frame;
use crate::error::VisionError;

pub use detection::YoloDetector;
pub use models::{ModelManager, ModelType, OnnxSession};
pub use ocr::OcrsRecognizer;

/// Rectangle in frame-relative coordinates, every field in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct NormalizedRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl NormalizedRect {
    /// Build from corner coordinates, clamping to the unit square
    pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        let (x1, x2) = (x1.min(x2).clamp(0.0, 1.0), x1.max(x2).clamp(0.0, 1.0));
        let (y1, y2) = (y1.min(y2).clamp(0.0, 1.0), y1.max(y2).clamp(0.0, 1.0));
        Self {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
        }
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    /// Intersection over union with another rectangle
    pub fn iou(&self, other: &NormalizedRect) -> f32 {
        let ix = (self.x + self.width).min(other.x + other.width) - self.x.max(other.x);
        let iy = (self.y + self.height).min(other.y + other.height) - self.y.max(other.y);
        if ix <= 0.0 || iy <= 0.0 {
            return 0.0;
        }
        let inter = ix * iy;
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

/// One detected object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedObject {
    pub id: Uuid,
    pub label: String,
    /// Confidence score (0.0 - 1.0)
    pub confidence: f32,
    pub bounding_box: NormalizedRect,
}

impl DetectedObject {
    pub fn new(label: impl Into<String>, confidence: f32, bounding_box: NormalizedRect) -> Self {
        Self {
            id: Uuid::new_v4(),
            label: label.into(),
            confidence: confidence.clamp(0.0, 1.0),
            bounding_box,
        }
    }
}

/// Text recognition effort
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecognitionLevel {
    /// Slower, beam-search decoding
    #[default]
    Accurate,
    /// Greedy decoding
    Fast,
}

/// Bounding-box detector over a single frame
#[async_trait]
pub trait ObjectDetector: Send + Sync {
    async fn detect(&self, frame: &Frame) -> Result<Vec<DetectedObject>, VisionError>;

    /// Detect, treating any failure as "nothing found"
    async fn analyze(&self, frame: &Frame) -> Vec<DetectedObject> {
        match self.detect(frame).await {
            Ok(objects) => objects,
            Err(e) => {
                warn!("Object detection failed on frame {}: {}", frame.sequence, e);
                Vec::new()
            }
        }
    }
}

/// OCR over a single frame
#[async_trait]
pub trait TextRecognizer: Send + Sync {
    /// Recognized fragments joined with newlines
    async fn recognize(&self, frame: &Frame) -> Result<String, VisionError>;

    /// Recognize, treating any failure as "no text"
    async fn analyze(&self, frame: &Frame) -> String {
        match self.recognize(frame).await {
            Ok(text) => text,
            Err(e) => {
                warn!("Text recognition failed on frame {}: {}", frame.sequence, e);
                String::new()
            }
        }
    }
}

/// Detector used when no model is configured; always finds nothing
pub struct DisabledDetector;

#[async_trait]
impl ObjectDetector for DisabledDetector {
    async fn detect(&self, _frame: &Frame) -> Result<Vec<DetectedObject>, VisionError> {
        Ok(Vec::new())
    }
}

/// Recognizer used when no OCR models are available; always reads nothing
pub struct DisabledRecognizer;

#[async_trait]
impl TextRecognizer for DisabledRecognizer {
    async fn recognize(&self, _frame: &Frame) -> Result<String, VisionError> {
        Ok(String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::Facing;

    struct Failing;

    #[async_trait]
    impl ObjectDetector for Failing {
        async fn detect(&self, _frame: &Frame) -> Result<Vec<DetectedObject>, VisionError> {
            Err(VisionError::Model("weights missing".to_string()))
        }
    }

    #[async_trait]
    impl TextRecognizer for Failing {
        async fn recognize(&self, _frame: &Frame) -> Result<String, VisionError> {
            Err(VisionError::Inference("boom".to_string()))
        }
    }

    fn frame() -> Frame {
        Frame::new(vec![0; 16], 2, 2, 1, Facing::Back)
    }

    #[tokio::test]
    async fn test_analyze_absorbs_failures() {
        assert!(ObjectDetector::analyze(&Failing, &frame()).await.is_empty());
        assert_eq!(TextRecognizer::analyze(&Failing, &frame()).await, "");
    }

    #[tokio::test]
    async fn test_disabled_analyzers() {
        assert!(DisabledDetector.analyze(&frame()).await.is_empty());
        assert_eq!(DisabledRecognizer.analyze(&frame()).await, "");
    }

    #[test]
    fn test_rect_from_corners_clamps() {
        let rect = NormalizedRect::from_corners(0.8, -0.2, 1.3, 0.4);
        assert!((rect.x - 0.8).abs() < 1e-6);
        assert_eq!(rect.y, 0.0);
        assert!((rect.width - 0.2).abs() < 1e-6);
        assert!((rect.height - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_iou() {
        let a = NormalizedRect { x: 0.0, y: 0.0, width: 0.5, height: 0.5 };
        let b = NormalizedRect { x: 0.25, y: 0.0, width: 0.5, height: 0.5 };
        let c = NormalizedRect { x: 0.6, y: 0.6, width: 0.1, height: 0.1 };
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
        assert!((a.iou(&b) - (0.125 / 0.375)).abs() < 1e-5);
        assert_eq!(a.iou(&c), 0.0);
    }

    #[test]
    fn test_detected_object_confidence_clamped() {
        let obj = DetectedObject::new("cup", 1.7, NormalizedRect::default());
        assert_eq!(obj.confidence, 1.0);
        assert_ne!(obj.id, DetectedObject::new("cup", 0.5, NormalizedRect::default()).id);
    }
}
