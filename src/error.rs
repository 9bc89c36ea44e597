//! Error types for the capture, vision and link layers

use thiserror::Error;

use crate::capture::Facing;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("No {0} camera available")]
    DeviceUnavailable(Facing),

    #[error("Failed to acquire {facing} camera: {reason}")]
    Acquisition { facing: Facing, reason: String },

    #[error("Camera read failed: {0}")]
    Read(String),

    #[error("Capture control thread is gone")]
    Disconnected,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

#[derive(Error, Debug)]
pub enum VisionError {
    #[error("Model error: {0}")]
    Model(String),

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("Malformed frame: {0}")]
    Frame(String),

    #[error("Analyzer task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl From<ort::Error> for VisionError {
    fn from(err: ort::Error) -> Self {
        VisionError::Inference(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum LinkError {
    #[error("Invalid endpoint {0}")]
    Endpoint(String),

    #[error("Connection to {0} timed out")]
    Timeout(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_error_display() {
        let err = CaptureError::DeviceUnavailable(Facing::Front);
        assert_eq!(err.to_string(), "No front camera available");

        let err = CaptureError::Acquisition {
            facing: Facing::Back,
            reason: "permission denied".to_string(),
        };
        assert!(err.to_string().contains("back"));
        assert!(err.to_string().contains("permission denied"));
    }

    #[test]
    fn test_vision_error_display() {
        let err = VisionError::Inference("bad tensor".to_string());
        assert!(err.to_string().contains("Inference error"));
        assert!(err.to_string().contains("bad tensor"));
    }

    #[test]
    fn test_link_error_from_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let link_err: LinkError = json_err.into();
        match link_err {
            LinkError::Decode(_) => {}
            _ => panic!("Expected Decode error"),
        }
    }
}
