#![allow(dead_code)]

use facescan_core::{
    BoundingBox, DecodeError, Detector, DetectorError, Embedding, Extractor, ExtractorError, FacePatch, ImageItem,
    ImageSource, PixelBuffer,
};
use std::collections::HashMap;

/// A grey block painted into an image, with the detection covering it.
pub struct Face {
    pub x: u32,
    pub y: u32,
    pub size: u32,
    pub shade: u8,
}

impl Face {
    pub fn bbox(&self) -> BoundingBox {
        // Detection sits two pixels inside the painted block.
        BoundingBox::new(
            (self.x + 2) as f32,
            (self.y + 2) as f32,
            (self.size - 4) as f32,
            (self.size - 4) as f32,
        )
        .with_confidence(0.9)
    }
}

pub fn paint(width: u32, height: u32, faces: &[Face]) -> PixelBuffer {
    let mut pixels = PixelBuffer::filled(width, height, 0);
    for face in faces {
        for y in face.y..face.y + face.size {
            for x in face.x..face.x + face.size {
                pixels.data[(y * width + x) as usize] = face.shade;
            }
        }
    }
    pixels
}

/// Serves in-memory images by id; unknown ids are unreadable.
#[derive(Default)]
pub struct MemorySource {
    images: HashMap<i64, PixelBuffer>,
}

impl MemorySource {
    pub fn with(mut self, id: i64, pixels: PixelBuffer) -> Self {
        self.images.insert(id, pixels);
        self
    }
}

impl ImageSource for MemorySource {
    fn decode(&self, item: &ImageItem) -> Result<PixelBuffer, DecodeError> {
        self.images.get(&item.id).cloned().ok_or_else(|| DecodeError::Unreadable {
            path: item.path.clone(),
            reason: "not found".into(),
        })
    }
}

/// Returns canned detections keyed by image width.
#[derive(Default)]
pub struct WidthDetector {
    detections: HashMap<u32, Vec<BoundingBox>>,
}

impl WidthDetector {
    pub fn with(mut self, width: u32, faces: &[Face]) -> Self {
        self.detections.insert(width, faces.iter().map(Face::bbox).collect());
        self
    }
}

impl Detector for WidthDetector {
    fn detect(&self, image: &PixelBuffer) -> Result<Vec<BoundingBox>, DetectorError> {
        Ok(self.detections.get(&image.width).cloned().unwrap_or_default())
    }
}

/// Embeds a patch by its mean intensity, so a uniform face of shade `s`
/// always maps to [`shade_embedding`]`(s)`.
pub struct ShadeExtractor;

impl Extractor for ShadeExtractor {
    fn dimension(&self) -> usize {
        2
    }

    fn embed(&self, patch: &FacePatch) -> Result<Embedding, ExtractorError> {
        let mean = patch.data.iter().map(|&p| p as f32).sum::<f32>() / patch.data.len() as f32;
        Ok(shade_embedding(mean.round() as u8))
    }
}

pub fn shade_embedding(shade: u8) -> Embedding {
    let v = shade as f32 / 255.0;
    Embedding::new(vec![v, 1.0 - v])
}
