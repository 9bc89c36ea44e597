//! Image preprocessing for the detection model
//!
//! Frames are scale-filled (stretched, no letterboxing) to the model's
//! square input, so normalized model coordinates map straight back onto
//! the frame.

use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;

use crate::capture::Frame;
use crate::error::VisionError;

/// Resize an RGB image to `size` x `size`, ignoring aspect ratio
pub fn scale_fill(image: &RgbImage, size: u32) -> RgbImage {
    if image.dimensions() == (size, size) {
        return image.clone();
    }
    image::imageops::resize(image, size, size, FilterType::Triangle)
}

/// Convert HWC u8 pixels to an NCHW f32 tensor in [0, 1] (batch size 1)
pub fn to_nchw(image: &RgbImage) -> Array4<f32> {
    let (w, h) = image.dimensions();
    let mut tensor = Array4::<f32>::zeros((1, 3, h as usize, w as usize));

    for (x, y, pixel) in image.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = pixel[c] as f32 / 255.0;
        }
    }

    tensor
}

/// Full detector input pipeline for one frame
pub fn frame_to_tensor(frame: &Frame, size: u32) -> Result<Array4<f32>, VisionError> {
    if size == 0 {
        return Err(VisionError::Model("model input size must be non-zero".to_string()));
    }
    let rgb = frame.to_rgb()?;
    Ok(to_nchw(&scale_fill(&rgb, size)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::Facing;

    #[test]
    fn test_scale_fill_stretches() {
        let img = RgbImage::from_pixel(40, 10, image::Rgb([255, 0, 0]));
        let out = scale_fill(&img, 16);
        assert_eq!(out.dimensions(), (16, 16));
        assert_eq!(out.get_pixel(8, 8).0, [255, 0, 0]);
    }

    #[test]
    fn test_to_nchw_layout() {
        let mut img = RgbImage::new(2, 1);
        img.put_pixel(1, 0, image::Rgb([255, 0, 51]));
        let tensor = to_nchw(&img);
        assert_eq!(tensor.shape(), &[1, 3, 1, 2]);
        assert_eq!(tensor[[0, 0, 0, 1]], 1.0);
        assert_eq!(tensor[[0, 1, 0, 1]], 0.0);
        assert!((tensor[[0, 2, 0, 1]] - 0.2).abs() < 1e-6);
        assert_eq!(tensor[[0, 0, 0, 0]], 0.0);
    }

    #[test]
    fn test_frame_to_tensor_rejects_bad_frame() {
        let frame = Frame::new(vec![1, 2, 3], 4, 4, 0, Facing::Back);
        assert!(frame_to_tensor(&frame, 32).is_err());

        let frame = Frame::new(vec![0; 4 * 4 * 4], 4, 4, 0, Facing::Back);
        assert!(frame_to_tensor(&frame, 0).is_err());
        assert_eq!(frame_to_tensor(&frame, 8).unwrap().shape(), &[1, 3, 8, 8]);
    }
}
