//! Frame data structures for captured camera content

use std::io::Cursor;
use std::sync::Arc;
use std::time::Instant;

use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, RgbImage, RgbaImage};

use super::Facing;
use crate::error::VisionError;

/// A captured camera frame
///
/// Pixel data is shared, so cloning a frame to hand it to several
/// analyzers never copies the buffer.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Raw RGBA pixel data
    data: Arc<[u8]>,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Position in the capture sequence
    pub sequence: u64,
    /// Facing of the device that produced this frame
    pub facing: Facing,
    /// Timestamp when frame was captured
    pub timestamp: Instant,
}

impl Frame {
    /// Create a new frame from RGBA pixels
    pub fn new(data: Vec<u8>, width: u32, height: u32, sequence: u64, facing: Facing) -> Self {
        Self {
            data: data.into(),
            width,
            height,
            sequence,
            facing,
            timestamp: Instant::now(),
        }
    }

    /// Create a frame from an RGBA image
    pub fn from_image(image: RgbaImage, sequence: u64, facing: Facing) -> Self {
        let (width, height) = image.dimensions();
        Self::new(image.into_raw(), width, height, sequence, facing)
    }

    /// Get frame dimensions as (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Raw RGBA bytes
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Copy the pixels into an RGB image, dropping alpha
    pub fn to_rgb(&self) -> Result<RgbImage, VisionError> {
        let expected = self.width as usize * self.height as usize * 4;
        if self.data.len() != expected || expected == 0 {
            return Err(VisionError::Frame(format!(
                "{}x{} frame carries {} bytes, expected {}",
                self.width,
                self.height,
                self.data.len(),
                expected
            )));
        }

        let rgb: Vec<u8> = self
            .data
            .chunks_exact(4)
            .flat_map(|px| [px[0], px[1], px[2]])
            .collect();

        RgbImage::from_raw(self.width, self.height, rgb)
            .ok_or_else(|| VisionError::Frame("pixel buffer size mismatch".to_string()))
    }

    /// Compress the frame to JPEG at the given quality (1-100)
    pub fn encode_jpeg(&self, quality: u8) -> Result<Vec<u8>, VisionError> {
        let rgb = self.to_rgb()?;
        let mut out = Cursor::new(Vec::new());
        JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
            .encode(rgb.as_raw(), self.width, self.height, ExtendedColorType::Rgb8)
            .map_err(|e| VisionError::Frame(format!("JPEG encoding failed: {}", e)))?;
        Ok(out.into_inner())
    }
}
