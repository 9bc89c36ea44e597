//! Wire messages received from the remote inference service

use serde::{Deserialize, Serialize};

use crate::vision::{DetectedObject, NormalizedRect};

/// Full response from the orchestrator service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorResponse {
    #[serde(default)]
    pub vision: Option<VisionPayload>,
    #[serde(default)]
    pub gestures: Option<GesturePayload>,
}

/// The `vision` object
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VisionPayload {
    #[serde(default)]
    pub objects: Vec<RemoteObject>,
}

/// The `gestures` object
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GesturePayload {
    #[serde(default)]
    pub gestures: Vec<String>,
}

/// One object detected by the remote service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteObject {
    pub label: String,
    pub confidence: f64,
    /// Pixel corners `[x1, y1, x2, y2]` in the uploaded frame
    #[serde(rename = "box", default)]
    pub bbox: Vec<i32>,
    #[serde(default)]
    pub distance_m: Option<f64>,
    #[serde(default)]
    pub dominant_color_hex: Option<String>,
}

impl RemoteObject {
    /// Project into the local object shape, normalizing the box against
    /// the size of the frame that was sent. Boxes that are not four
    /// integers, or a zero-sized frame, give an empty rectangle.
    pub fn to_detected(&self, frame_size: (u32, u32)) -> DetectedObject {
        let (w, h) = (frame_size.0 as f32, frame_size.1 as f32);
        let rect = match self.bbox.as_slice() {
            [x1, y1, x2, y2] if w > 0.0 && h > 0.0 => NormalizedRect::from_corners(
                *x1 as f32 / w,
                *y1 as f32 / h,
                *x2 as f32 / w,
                *y2 as f32 / h,
            ),
            _ => NormalizedRect::default(),
        };
        DetectedObject::new(self.label.clone(), self.confidence as f32, rect)
    }

    /// Label with distance when known, e.g. `chair a 1.2m`
    pub fn describe(&self) -> String {
        match self.distance_m {
            Some(distance) => format!("{} a {:.1}m", self.label, distance),
            None => self.label.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_full_response() {
        let json = r##"{
            "vision": {"objects": [
                {"label": "chair", "confidence": 0.91, "box": [10, 20, 110, 220],
                 "distance_m": 1.25, "dominant_color_hex": "#aa3300"}
            ]},
            "gestures": {"gestures": ["wave"]}
        }"##;
        let response: OrchestratorResponse = serde_json::from_str(json).unwrap();
        let vision = response.vision.unwrap();
        assert_eq!(vision.objects[0].label, "chair");
        assert_eq!(vision.objects[0].bbox, vec![10, 20, 110, 220]);
        assert_eq!(vision.objects[0].distance_m, Some(1.25));
        assert_eq!(vision.objects[0].dominant_color_hex.as_deref(), Some("#aa3300"));
        assert_eq!(response.gestures.unwrap().gestures, vec!["wave"]);
    }

    #[test]
    fn test_missing_and_unknown_fields() {
        let json = r#"{"vision": {"objects": [{"label": "cup", "confidence": 0.5, "box": []}]},
                       "latency_ms": 12}"#;
        let response: OrchestratorResponse = serde_json::from_str(json).unwrap();
        assert!(response.gestures.is_none());
        let obj = &response.vision.unwrap().objects[0];
        assert!(obj.distance_m.is_none());
        assert!(obj.dominant_color_hex.is_none());

        let empty: OrchestratorResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(empty, OrchestratorResponse::default());
    }

    #[test]
    fn test_to_detected_normalizes_box() {
        let obj = RemoteObject {
            label: "door".to_string(),
            confidence: 0.8,
            bbox: vec![64, 48, 320, 480],
            distance_m: None,
            dominant_color_hex: None,
        };
        let detected = obj.to_detected((640, 480));
        assert_eq!(detected.label, "door");
        let b = detected.bounding_box;
        assert!((b.x - 0.1).abs() < 1e-6);
        assert!((b.y - 0.1).abs() < 1e-6);
        assert!((b.width - 0.4).abs() < 1e-6);
        assert!((b.height - 0.9).abs() < 1e-6);

        let odd = RemoteObject { bbox: vec![1, 2], ..obj };
        assert_eq!(odd.to_detected((640, 480)).bounding_box, NormalizedRect::default());
    }

    #[test]
    fn test_describe() {
        let mut obj = RemoteObject {
            label: "person".to_string(),
            confidence: 0.9,
            bbox: vec![],
            distance_m: Some(2.04),
            dominant_color_hex: None,
        };
        assert_eq!(obj.describe(), "person a 2.0m");
        obj.distance_m = None;
        assert_eq!(obj.describe(), "person");
    }
}
