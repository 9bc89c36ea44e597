//! Camera device abstraction
//!
//! The session manager never talks to hardware directly. It asks a
//! [`DeviceProvider`] for a [`CameraDevice`] on a given facing and pulls
//! frames from whatever it gets back.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::frame::Frame;
use crate::error::CaptureError;

/// Which way a camera points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Facing {
    /// Rear-facing (the default)
    #[default]
    Back,
    /// User-facing
    Front,
}

impl Facing {
    /// The other facing
    pub fn opposite(self) -> Self {
        match self {
            Facing::Back => Facing::Front,
            Facing::Front => Facing::Back,
        }
    }
}

impl fmt::Display for Facing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Facing::Back => write!(f, "back"),
            Facing::Front => write!(f, "front"),
        }
    }
}

/// Capture quality preset, highest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionPreset {
    High,
    Medium,
    Low,
}

impl SessionPreset {
    /// Presets in descending quality order
    pub const DESCENDING: [SessionPreset; 3] =
        [SessionPreset::High, SessionPreset::Medium, SessionPreset::Low];

    /// Output size scale relative to the device's native resolution
    pub fn scale(self) -> f32 {
        match self {
            SessionPreset::High => 1.0,
            SessionPreset::Medium => 0.5,
            SessionPreset::Low => 0.25,
        }
    }
}

/// One acquired camera
pub trait CameraDevice: Send {
    /// Human-readable device name
    fn name(&self) -> &str;

    /// Which way the device points
    fn facing(&self) -> Facing;

    /// Whether the device can deliver frames at this preset
    fn supports_preset(&self, preset: SessionPreset) -> bool;

    /// Apply a quality preset
    fn set_preset(&mut self, preset: SessionPreset);

    /// Begin streaming
    fn start(&mut self) -> Result<(), CaptureError>;

    /// Stop streaming
    fn stop(&mut self);

    /// Grab the next frame. Errors are treated as runtime faults by the
    /// session manager.
    fn read_frame(&mut self, sequence: u64) -> Result<Frame, CaptureError>;
}

/// Source of camera devices
pub trait DeviceProvider: Send + Sync {
    /// Acquire the default device for a facing
    fn acquire(&self, facing: Facing) -> Result<Box<dyn CameraDevice>, CaptureError>;

    /// Facings currently available
    fn available(&self) -> Vec<Facing>;
}
