//! Per-image envelope carried through the stages.

use facescan_core::{BoundingBox, Embedding, FaceRegion, IdentityId, ImageItem, PixelBuffer, Recognition, Rect, TagKey};
use std::fmt;
use std::ops::BitOr;
use std::sync::Arc;

/// Set of stages that have processed a package.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ProcessFlags(u8);

impl ProcessFlags {
    pub const NONE: Self = Self(0);
    pub const DETECTION: Self = Self(1);
    pub const EXTRACTION: Self = Self(1 << 1);
    pub const RECOGNITION: Self = Self(1 << 2);
    pub const TRAINING: Self = Self(1 << 3);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn bits(self) -> u8 {
        self.0
    }
}

impl BitOr for ProcessFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for ProcessFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (Self::DETECTION, "DETECTION"),
            (Self::EXTRACTION, "EXTRACTION"),
            (Self::RECOGNITION, "RECOGNITION"),
            (Self::TRAINING, "TRAINING"),
        ];
        let set: Vec<&str> = names
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "ProcessFlags({})", set.join(" | "))
    }
}

/// One extracted face on its way to the writer and the recognizer.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceEmbedding {
    pub image_id: i64,
    pub tag_key: TagKey,
    pub rect: Rect,
    pub identity: Option<IdentityId>,
    pub embedding: Embedding,
}

#[derive(Debug, Clone)]
pub struct PipelinePackage {
    pub image: ImageItem,
    /// Decoded pixels; released once extraction is done.
    pub pixels: Option<Arc<PixelBuffer>>,
    pub detected_faces: Vec<BoundingBox>,
    /// Face regions known for this image.
    pub regions: Vec<FaceRegion>,
    pub embeddings: Vec<FaceEmbedding>,
    pub recognitions: Vec<Recognition>,
    flags: ProcessFlags,
}

impl PipelinePackage {
    pub fn new(image: ImageItem) -> Self {
        Self {
            image,
            pixels: None,
            detected_faces: Vec::new(),
            regions: Vec::new(),
            embeddings: Vec::new(),
            recognitions: Vec::new(),
            flags: ProcessFlags::NONE,
        }
    }

    /// A package carrying confirmed regions for the trainer.
    pub fn for_training(image: ImageItem, regions: Vec<FaceRegion>) -> Self {
        Self { regions, ..Self::new(image) }
    }

    pub fn flags(&self) -> ProcessFlags {
        self.flags
    }

    /// Record that `stage` processed this package. Flags are only ever added.
    pub fn mark(&mut self, stage: ProcessFlags) {
        self.flags = self.flags | stage;
    }

    pub fn is_processed_by(&self, stage: ProcessFlags) -> bool {
        self.flags.contains(stage)
    }
}
