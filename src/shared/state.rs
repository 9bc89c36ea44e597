//! Published analysis state
//!
//! The single externally observable state of the live pipeline. It is only
//! ever replaced as a whole, so readers never see objects from one frame
//! next to text from another.

use crate::vision::DetectedObject;

use super::messages::OrchestratorResponse;

/// Merged result of one analysis cycle
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalysisResult {
    pub objects: Vec<DetectedObject>,
    pub gestures: Vec<String>,
    pub recognized_text: String,
}

impl AnalysisResult {
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty() && self.gestures.is_empty() && self.recognized_text.is_empty()
    }

    /// Project a backend response, normalizing boxes against the size of
    /// the frame most recently sent
    pub fn from_response(response: &OrchestratorResponse, frame_size: (u32, u32)) -> Self {
        let objects = response
            .vision
            .as_ref()
            .map(|v| v.objects.iter().map(|o| o.to_detected(frame_size)).collect())
            .unwrap_or_default();
        let gestures = response
            .gestures
            .as_ref()
            .map(|g| g.gestures.clone())
            .unwrap_or_default();

        Self {
            objects,
            gestures,
            recognized_text: String::new(),
        }
    }
}

/// Human-readable summary of a backend response, `None` when it carries
/// no objects
pub fn describe_response(response: &OrchestratorResponse) -> Option<String> {
    let vision = response.vision.as_ref()?;
    if vision.objects.is_empty() {
        return None;
    }
    Some(
        vision
            .objects
            .iter()
            .map(|o| o.describe())
            .collect::<Vec<_>>()
            .join(", "),
    )
}

/// Everything a presenter renders from
#[derive(Debug, Clone, Default)]
pub struct LiveState {
    /// Analysis has been started and not stopped
    pub is_analyzing: bool,
    /// Latest completed cycle
    pub result: AnalysisResult,
    /// Summary of the latest backend response
    pub response_text: Option<String>,
    /// Number of cycles published so far
    pub cycle: u64,
    /// Sequence of the frame the result came from (on-device path)
    pub frame_sequence: Option<u64>,
}
