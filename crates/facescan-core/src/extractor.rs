//! Embedding extraction seam and face patch cropping.

use crate::source::PixelBuffer;
use crate::types::{Embedding, Rect};
use thiserror::Error;

/// Side length of the square patch handed to extractors by default.
pub const DEFAULT_PATCH_SIZE: usize = 112;

#[derive(Error, Debug)]
pub enum ExtractorError {
    #[error("invalid face patch: {0}")]
    InvalidPatch(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("extractor produced a {got}-dim embedding, expected {expected}")]
    DimensionMismatch { expected: usize, got: usize },
}

/// A square grayscale face crop.
#[derive(Debug, Clone, PartialEq)]
pub struct FacePatch {
    /// Row-major pixels (size * size bytes).
    pub data: Vec<u8>,
    pub size: usize,
}

/// Computes an embedding for a face patch.
///
/// Implementations must be reentrant: the extraction stage calls one instance
/// from several worker threads at once.
pub trait Extractor: Send + Sync {
    /// Length of every embedding this extractor produces.
    fn dimension(&self) -> usize;

    fn embed(&self, patch: &FacePatch) -> Result<Embedding, ExtractorError>;
}

/// Crop `rect` out of `image` and resample it to a `size`×`size` patch.
///
/// Uses bilinear interpolation. Parts of the rectangle outside the image are
/// filled with 0 (black); a rectangle entirely outside is rejected.
pub fn crop_patch(image: &PixelBuffer, rect: &Rect, size: usize) -> Result<FacePatch, ExtractorError> {
    if size == 0 {
        return Err(ExtractorError::InvalidPatch("patch size must be non-zero".into()));
    }
    if rect.is_empty() {
        return Err(ExtractorError::InvalidPatch(format!("empty region {rect:?}")));
    }

    let (w, h) = (image.width as i64, image.height as i64);
    let (rx, ry) = (rect.x as i64, rect.y as i64);
    let (rw, rh) = (rect.width as i64, rect.height as i64);
    if rx >= w || ry >= h || rx + rw <= 0 || ry + rh <= 0 {
        return Err(ExtractorError::InvalidPatch(format!(
            "region {rect:?} lies outside {}x{} image",
            image.width, image.height
        )));
    }

    let sample = |x: i64, y: i64| -> f32 {
        if x >= 0 && x < w && y >= 0 && y < h {
            image.data[(y * w + x) as usize] as f32
        } else {
            0.0
        }
    };

    let scale_x = rect.width as f32 / size as f32;
    let scale_y = rect.height as f32 / size as f32;
    let mut data = vec![0u8; size * size];

    for oy in 0..size {
        let sy = rect.y as f32 + (oy as f32 + 0.5) * scale_y - 0.5;
        let y0 = sy.floor();
        let fy = sy - y0;
        for ox in 0..size {
            let sx = rect.x as f32 + (ox as f32 + 0.5) * scale_x - 0.5;
            let x0 = sx.floor();
            let fx = sx - x0;
            let (x0, y0) = (x0 as i64, y0 as i64);

            let val = sample(x0, y0) * (1.0 - fx) * (1.0 - fy)
                + sample(x0 + 1, y0) * fx * (1.0 - fy)
                + sample(x0, y0 + 1) * (1.0 - fx) * fy
                + sample(x0 + 1, y0 + 1) * fx * fy;

            data[oy * size + ox] = val.round().clamp(0.0, 255.0) as u8;
        }
    }

    Ok(FacePatch { data, size })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crop_output_size() {
        let image = PixelBuffer::filled(640, 480, 128);
        let patch = crop_patch(&image, &Rect::new(100, 100, 50, 80), 112).unwrap();
        assert_eq!(patch.size, 112);
        assert_eq!(patch.data.len(), 112 * 112);
    }

    #[test]
    fn test_crop_uniform_stays_uniform() {
        let image = PixelBuffer::filled(200, 200, 90);
        let patch = crop_patch(&image, &Rect::new(20, 30, 100, 100), 32).unwrap();
        assert!(patch.data.iter().all(|&p| p == 90));
    }

    #[test]
    fn test_crop_identity_scale_copies_pixels() {
        let data: Vec<u8> = (0..16).collect();
        let image = PixelBuffer::new(4, 4, data).unwrap();
        let patch = crop_patch(&image, &Rect::new(1, 1, 2, 2), 2).unwrap();
        assert_eq!(patch.data, vec![5, 6, 9, 10]);
    }

    #[test]
    fn test_crop_partially_outside_is_padded() {
        let image = PixelBuffer::filled(10, 10, 255);
        let patch = crop_patch(&image, &Rect::new(-5, 0, 10, 10), 10).unwrap();
        assert_eq!(patch.data[0], 0);
        assert_eq!(patch.data[9], 255);
    }

    #[test]
    fn test_crop_rejects_outside_and_empty() {
        let image = PixelBuffer::filled(10, 10, 1);
        assert!(crop_patch(&image, &Rect::new(20, 20, 5, 5), 8).is_err());
        assert!(crop_patch(&image, &Rect::new(0, 0, 0, 5), 8).is_err());
        assert!(crop_patch(&image, &Rect::new(0, 0, 5, 5), 0).is_err());
    }
}
