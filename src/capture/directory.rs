//! Replay camera backed by a folder of still images
//!
//! Useful for running the pipeline against recorded footage. Only a rear
//! camera is exposed; images are decoded once and looped.

use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::RgbaImage;
use tracing::{info, warn};

use super::device::{CameraDevice, DeviceProvider, Facing, SessionPreset};
use super::frame::Frame;
use crate::error::CaptureError;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "webp"];

/// Provider replaying the images in a directory
pub struct DirectoryProvider {
    dir: PathBuf,
}

impl DirectoryProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn image_paths(&self) -> Result<Vec<PathBuf>, CaptureError> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| is_image(p))
            .collect();
        paths.sort();
        Ok(paths)
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

impl DeviceProvider for DirectoryProvider {
    fn acquire(&self, facing: Facing) -> Result<Box<dyn CameraDevice>, CaptureError> {
        if facing != Facing::Back {
            return Err(CaptureError::DeviceUnavailable(facing));
        }

        let mut images = Vec::new();
        for path in self.image_paths()? {
            match image::open(&path) {
                Ok(img) => images.push(img.to_rgba8()),
                Err(e) => warn!("Skipping unreadable image {:?}: {}", path, e),
            }
        }
        if images.is_empty() {
            return Err(CaptureError::Acquisition {
                facing,
                reason: format!("no images in {:?}", self.dir),
            });
        }

        info!("Replay camera loaded {} images from {:?}", images.len(), self.dir);
        Ok(Box::new(ReplayCamera {
            name: format!("Replay {:?}", self.dir),
            images,
            preset: SessionPreset::High,
            cursor: 0,
            running: false,
        }))
    }

    fn available(&self) -> Vec<Facing> {
        match self.image_paths() {
            Ok(paths) if !paths.is_empty() => vec![Facing::Back],
            _ => vec![],
        }
    }
}

/// Camera looping over decoded images
pub struct ReplayCamera {
    name: String,
    images: Vec<RgbaImage>,
    preset: SessionPreset,
    cursor: usize,
    running: bool,
}

impl CameraDevice for ReplayCamera {
    fn name(&self) -> &str {
        &self.name
    }

    fn facing(&self) -> Facing {
        Facing::Back
    }

    fn supports_preset(&self, _preset: SessionPreset) -> bool {
        true
    }

    fn set_preset(&mut self, preset: SessionPreset) {
        self.preset = preset;
    }

    fn start(&mut self) -> Result<(), CaptureError> {
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
        let source = &self.images[self.cursor % self.images.len()];
        self.cursor = self.cursor.wrapping_add(1);

        let scale = self.preset.scale();
        let img = if scale < 1.0 {
            let w = ((source.width() as f32 * scale) as u32).max(1);
            let h = ((source.height() as f32 * scale) as u32).max(1);
            image::imageops::resize(source, w, h, FilterType::Triangle)
        } else {
            source.clone()
        };
        Ok(Frame::from_image(img, sequence, Facing::Back))
    }
}
