//! Object detection with YOLO-family ONNX models
//!
//! Supports the anchor-free v8/v11 export layout: a single output of shape
//! `[1, 4 + classes, anchors]` (or its transpose) holding center-format
//! boxes in input pixels followed by per-class scores.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use ndarray::{ArrayView3, Ix3};
use ort::value::TensorRef;
use parking_lot::Mutex;
use tracing::{debug, info};

use super::models::OnnxSession;
use super::preprocess::frame_to_tensor;
use super::{DetectedObject, NormalizedRect, ObjectDetector};
use crate::capture::Frame;
use crate::config::DetectionSettings;
use crate::error::VisionError;

/// COCO class names (80 classes)
pub const COCO_CLASSES: &[&str] = &[
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat",
    "dog", "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack",
    "umbrella", "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball",
    "kite", "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket",
    "bottle", "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple",
    "sandwich", "orange", "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair",
    "couch", "potted plant", "bed", "dining table", "toilet", "tv", "laptop", "mouse",
    "remote", "keyboard", "cell phone", "microwave", "oven", "toaster", "sink", "refrigerator",
    "book", "clock", "vase", "scissors", "teddy bear", "hair drier", "toothbrush",
];

/// Label used when a class index has no name
const FALLBACK_LABEL: &str = "object";

/// Decoding thresholds
#[derive(Debug, Clone)]
pub struct DecodeParams {
    pub input_size: u32,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub max_detections: usize,
}

impl From<&DetectionSettings> for DecodeParams {
    fn from(settings: &DetectionSettings) -> Self {
        Self {
            input_size: settings.input_size,
            confidence_threshold: settings.confidence_threshold,
            iou_threshold: settings.iou_threshold,
            max_detections: settings.max_detections,
        }
    }
}

/// Candidate box before suppression
#[derive(Debug, Clone)]
struct Candidate {
    class: usize,
    score: f32,
    rect: NormalizedRect,
}

/// Decode raw model output into labeled, suppressed detections
pub fn decode_output(
    output: ArrayView3<f32>,
    labels: &[String],
    params: &DecodeParams,
) -> Vec<DetectedObject> {
    let shape = output.shape();
    // Channels are the short axis: 84 against 8400 anchors for COCO
    let (channels, anchors, transposed) = if shape[1] <= shape[2] {
        (shape[1], shape[2], false)
    } else {
        (shape[2], shape[1], true)
    };
    if channels <= 4 {
        return Vec::new();
    }
    let at = |anchor: usize, channel: usize| -> f32 {
        if transposed {
            output[[0, anchor, channel]]
        } else {
            output[[0, channel, anchor]]
        }
    };

    let scale = params.input_size.max(1) as f32;
    let mut candidates = Vec::new();

    for anchor in 0..anchors {
        let (class, score) = (4..channels)
            .map(|c| (c - 4, at(anchor, c)))
            .fold((0, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });

        if score < params.confidence_threshold {
            continue;
        }

        let (cx, cy, w, h) = (at(anchor, 0), at(anchor, 1), at(anchor, 2), at(anchor, 3));
        let rect = NormalizedRect::from_corners(
            (cx - w / 2.0) / scale,
            (cy - h / 2.0) / scale,
            (cx + w / 2.0) / scale,
            (cy + h / 2.0) / scale,
        );
        if rect.area() <= 0.0 {
            continue;
        }
        candidates.push(Candidate { class, score, rect });
    }

    non_max_suppression(candidates, params.iou_threshold, params.max_detections)
        .into_iter()
        .map(|c| {
            let label = labels.get(c.class).map(String::as_str).unwrap_or(FALLBACK_LABEL);
            DetectedObject::new(label, c.score, c.rect)
        })
        .collect()
}

/// Class-aware greedy NMS, highest score first
fn non_max_suppression(
    mut candidates: Vec<Candidate>,
    iou_threshold: f32,
    max_detections: usize,
) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut kept: Vec<Candidate> = Vec::new();
    for candidate in candidates {
        if kept.len() >= max_detections {
            break;
        }
        let overlaps = kept
            .iter()
            .any(|k| k.class == candidate.class && k.rect.iou(&candidate.rect) > iou_threshold);
        if !overlaps {
            kept.push(candidate);
        }
    }
    kept
}

/// Load label names, one per line
pub fn load_labels(path: &Path) -> Result<Vec<String>, VisionError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| VisionError::Model(format!("Failed to read labels {:?}: {}", path, e)))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect())
}

/// Default COCO labels
pub fn coco_labels() -> Vec<String> {
    COCO_CLASSES.iter().map(|s| s.to_string()).collect()
}

/// YOLO detector backed by ONNX Runtime
///
/// The session runs one inference at a time; overlapping `detect` calls
/// queue on the blocking pool.
pub struct YoloDetector {
    session: Arc<Mutex<OnnxSession>>,
    labels: Arc<Vec<String>>,
    params: DecodeParams,
}

impl YoloDetector {
    /// Load the model and labels described by the detection settings
    pub fn new(model_path: &Path, settings: &DetectionSettings) -> Result<Self, VisionError> {
        let session = OnnxSession::new(model_path, settings.intra_threads)
            .map_err(|e| VisionError::Model(format!("{:#}", e)))?;

        if session.output_names().is_empty() {
            return Err(VisionError::Model("model declares no outputs".to_string()));
        }

        let labels = match &settings.labels_path {
            Some(path) => load_labels(path)?,
            None => coco_labels(),
        };
        info!("Object detector ready with {} labels", labels.len());

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            labels: Arc::new(labels),
            params: DecodeParams::from(settings),
        })
    }

    fn run(
        session: &Mutex<OnnxSession>,
        labels: &[String],
        params: &DecodeParams,
        frame: &Frame,
    ) -> Result<Vec<DetectedObject>, VisionError> {
        let start = Instant::now();
        let input = frame_to_tensor(frame, params.input_size)?;

        let mut guard = session.lock();
        let output_name = guard.output_names()[0].clone();
        let outputs = guard
            .session_mut()
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let raw = outputs[output_name.as_str()].try_extract_array::<f32>()?;
        let raw = raw
            .into_dimensionality::<Ix3>()
            .map_err(|e| VisionError::Inference(format!("unexpected output rank: {}", e)))?;

        let objects = decode_output(raw, labels, params);
        debug!(
            "Detection on frame {} found {} objects in {:?}",
            frame.sequence,
            objects.len(),
            start.elapsed()
        );
        Ok(objects)
    }
}

#[async_trait]
impl ObjectDetector for YoloDetector {
    async fn detect(&self, frame: &Frame) -> Result<Vec<DetectedObject>, VisionError> {
        let session = self.session.clone();
        let labels = self.labels.clone();
        let params = self.params.clone();
        let frame = frame.clone();

        tokio::task::spawn_blocking(move || Self::run(&session, &labels, &params, &frame)).await?
    }
}
