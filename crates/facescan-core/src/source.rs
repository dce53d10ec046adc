//! Decoded image buffers and the image-source seam.

use crate::types::ImageItem;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("unreadable image {path}: {reason}")]
    Unreadable { path: PathBuf, reason: String },
}

/// A decoded 8-bit grayscale image.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelBuffer {
    /// Row-major pixel data (width * height bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl PixelBuffer {
    /// Wrap raw grayscale pixels. Returns `None` if the length does not match.
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        if data.len() != width as usize * height as usize {
            return None;
        }
        Some(Self { data, width, height })
    }

    /// A uniformly filled buffer.
    pub fn filled(width: u32, height: u32, value: u8) -> Self {
        Self { data: vec![value; width as usize * height as usize], width, height }
    }
}

/// Turns an [`ImageItem`] into pixels.
pub trait ImageSource: Send + Sync {
    fn decode(&self, item: &ImageItem) -> Result<PixelBuffer, DecodeError>;
}

/// Reads images from disk through the `image` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileImageSource;

impl ImageSource for FileImageSource {
    fn decode(&self, item: &ImageItem) -> Result<PixelBuffer, DecodeError> {
        let decoded = image::open(&item.path).map_err(|e| DecodeError::Unreadable {
            path: item.path.clone(),
            reason: e.to_string(),
        })?;
        let gray = decoded.to_luma8();
        let (width, height) = gray.dimensions();
        Ok(PixelBuffer { data: gray.into_raw(), width, height })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_buffer_length_checked() {
        assert!(PixelBuffer::new(2, 2, vec![0; 3]).is_none());
        let buf = PixelBuffer::new(2, 2, vec![1, 2, 3, 4]).unwrap();
        assert_eq!(buf.data, vec![1, 2, 3, 4]);
        assert_eq!((buf.width, buf.height), (2, 2));
    }

    #[test]
    fn test_file_source_decodes_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("face.png");
        image::GrayImage::from_pixel(4, 3, image::Luma([200u8])).save(&path).unwrap();

        let buf = FileImageSource.decode(&ImageItem::new(1, &path)).unwrap();
        assert_eq!((buf.width, buf.height), (4, 3));
        assert!(buf.data.iter().all(|&p| p == 200));
    }

    #[test]
    fn test_file_source_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.jpg");
        std::fs::write(&path, b"not an image").unwrap();

        let err = FileImageSource.decode(&ImageItem::new(2, &path)).unwrap_err();
        assert!(matches!(err, DecodeError::Unreadable { .. }));
    }
}
