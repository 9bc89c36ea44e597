//! Synthetic test-pattern cameras
//!
//! Stands in for real hardware on machines without a camera and in tests.
//! Each facing draws a distinct pattern with a block that moves a little
//! every frame, so downstream stages see changing content.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;
use parking_lot::RwLock;
use tracing::debug;

use super::device::{CameraDevice, DeviceProvider, Facing, SessionPreset};
use super::frame::Frame;
use crate::error::CaptureError;

/// Provider of synthetic cameras
pub struct SyntheticProvider {
    width: u32,
    height: u32,
    available: RwLock<HashSet<Facing>>,
    presets: RwLock<HashMap<Facing, Vec<SessionPreset>>>,
    read_faults: Arc<AtomicU32>,
    start_faults: HashMap<Facing, Arc<AtomicU32>>,
    acquisitions: AtomicUsize,
}

impl SyntheticProvider {
    /// Provider with a rear and a front camera at the given native size
    pub fn new(width: u32, height: u32) -> Self {
        Self::with_facings(width, height, &[Facing::Back, Facing::Front])
    }

    /// Provider exposing only the listed facings
    pub fn with_facings(width: u32, height: u32, facings: &[Facing]) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            available: RwLock::new(facings.iter().copied().collect()),
            presets: RwLock::new(HashMap::new()),
            read_faults: Arc::new(AtomicU32::new(0)),
            start_faults: [Facing::Back, Facing::Front]
                .into_iter()
                .map(|f| (f, Arc::new(AtomicU32::new(0))))
                .collect(),
            acquisitions: AtomicUsize::new(0),
        }
    }

    /// Plug or unplug a facing
    pub fn set_available(&self, facing: Facing, available: bool) {
        let mut set = self.available.write();
        if available {
            set.insert(facing);
        } else {
            set.remove(&facing);
        }
    }

    /// Make the next `count` frame reads fail across all devices
    pub fn inject_read_faults(&self, count: u32) {
        self.read_faults.store(count, Ordering::SeqCst);
    }

    /// Restrict the presets cameras on `facing` report as supported.
    /// Applies to cameras acquired afterwards.
    pub fn set_supported_presets(&self, facing: Facing, presets: &[SessionPreset]) {
        self.presets.write().insert(facing, presets.to_vec());
    }

    /// Make the next `count` starts of cameras on `facing` fail
    pub fn fail_starts(&self, facing: Facing, count: u32) {
        if let Some(faults) = self.start_faults.get(&facing) {
            faults.store(count, Ordering::SeqCst);
        }
    }

    /// Number of successful device acquisitions so far
    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }
}

impl DeviceProvider for SyntheticProvider {
    fn acquire(&self, facing: Facing) -> Result<Box<dyn CameraDevice>, CaptureError> {
        if !self.available.read().contains(&facing) {
            return Err(CaptureError::DeviceUnavailable(facing));
        }
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        debug!("Acquired synthetic {} camera", facing);

        Ok(Box::new(SyntheticCamera {
            name: format!("Synthetic {} camera", facing),
            facing,
            native: (self.width, self.height),
            preset: SessionPreset::High,
            supported: self
                .presets
                .read()
                .get(&facing)
                .cloned()
                .unwrap_or_else(|| SessionPreset::DESCENDING.to_vec()),
            running: false,
            read_faults: self.read_faults.clone(),
            start_faults: self.start_faults.get(&facing).cloned().unwrap_or_default(),
        }))
    }

    fn available(&self) -> Vec<Facing> {
        let set = self.available.read();
        [Facing::Back, Facing::Front]
            .into_iter()
            .filter(|f| set.contains(f))
            .collect()
    }
}

/// One synthetic camera
pub struct SyntheticCamera {
    name: String,
    facing: Facing,
    native: (u32, u32),
    preset: SessionPreset,
    supported: Vec<SessionPreset>,
    running: bool,
    read_faults: Arc<AtomicU32>,
    start_faults: Arc<AtomicU32>,
}

impl SyntheticCamera {
    fn output_size(&self) -> (u32, u32) {
        let scale = self.preset.scale();
        (
            ((self.native.0 as f32 * scale) as u32).max(1),
            ((self.native.1 as f32 * scale) as u32).max(1),
        )
    }

    fn render(&self, sequence: u64) -> RgbaImage {
        let (width, height) = self.output_size();
        let background = match self.facing {
            Facing::Back => Rgba([32, 48, 64, 255]),
            Facing::Front => Rgba([64, 40, 32, 255]),
        };
        let mut img = RgbaImage::from_pixel(width, height, background);

        let block_w = (width / 4).max(1);
        let block_h = (height / 4).max(1);
        let travel = (width - block_w).max(1) as u64;
        let x = (sequence * 4 % travel) as i32;
        let y = (height / 2 - block_h / 2) as i32;

        draw_filled_rect_mut(&mut img, Rect::at(x, y).of_size(block_w, block_h), Rgba([230, 230, 230, 255]));
        draw_hollow_rect_mut(
            &mut img,
            Rect::at(0, 0).of_size(width, height),
            Rgba([255, 200, 0, 255]),
        );
        img
    }
}

impl CameraDevice for SyntheticCamera {
    fn name(&self) -> &str {
        &self.name
    }

    fn facing(&self) -> Facing {
        self.facing
    }

    fn supports_preset(&self, preset: SessionPreset) -> bool {
        self.supported.contains(&preset)
    }

    fn set_preset(&mut self, preset: SessionPreset) {
        self.preset = preset;
    }

    fn start(&mut self) -> Result<(), CaptureError> {
        if take_fault(&self.start_faults) {
            return Err(CaptureError::Acquisition {
                facing: self.facing,
                reason: format!("{} refused to start", self.name),
            });
        }
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.running = false;
    }

    fn read_frame(&mut self, sequence: u64) -> Result<Frame, CaptureError> {
        if !self.running {
            return Err(CaptureError::Read(format!("{} is not streaming", self.name)));
        }
        if take_fault(&self.read_faults) {
            return Err(CaptureError::Read(format!("{} reported a media fault", self.name)));
        }
        Ok(Frame::from_image(self.render(sequence), sequence, self.facing))
    }
}

/// Consume one pending fault, if any
fn take_fault(faults: &AtomicU32) -> bool {
    faults
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}
