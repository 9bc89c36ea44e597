//! Camera Capture Layer
//!
//! A session manager drives the camera on dedicated threads and a facade
//! exposes a simple lifecycle to the rest of the application. Devices are
//! injected through [`DeviceProvider`], so the same session logic runs
//! against synthetic cameras, replayed footage, or real hardware.

pub mod device;
pub mod directory;
pub mod frame;
pub mod preview;
pub mod service;
pub mod session;
pub mod synthetic;

use std::time::Duration;

pub use device::{CameraDevice, DeviceProvider, Facing, SessionPreset};
pub use frame::Frame;
pub use preview::{LayoutSize, PreviewSurface};
pub use service::{CaptureService, SessionState};
pub use session::CaptureSessionManager;

/// Capture session configuration
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Facing selected when the session is configured
    pub default_facing: Facing,
    /// Maximum frames per second to deliver
    pub max_fps: u32,
    /// Pause between swapping inputs and restarting the session
    pub switch_settle: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            default_facing: Facing::Back,
            max_fps: 30,
            switch_settle: Duration::from_millis(150),
        }
    }
}
