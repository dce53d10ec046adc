//! facescan-core — face data model, KD-tree embedding index and recognition.
//!
//! Detection and embedding models are black boxes behind the [`Detector`]
//! and [`Extractor`] traits; everything else here is pure data and geometry.

pub mod cluster;
pub mod detector;
pub mod extractor;
pub mod kdtree;
pub mod recognizer;
pub mod source;
pub mod types;

pub use cluster::cluster;
pub use detector::{suppress_overlaps, Detector, DetectorError};
pub use extractor::{crop_patch, Extractor, ExtractorError, FacePatch};
pub use kdtree::{IndexError, KdNode, KdTree, Neighbor, NodeId};
pub use recognizer::{EmbeddingRecognizer, Match, NearestNeighborRecognizer};
pub use source::{DecodeError, FileImageSource, ImageSource, PixelBuffer};
pub use types::{
    Attributes, BoundingBox, Embedding, EmbeddingRecord, FaceRegion, FaceRole, Identity, IdentityId,
    IdentityLabel, ImageItem, NewEmbedding, Recognition, Rect, TagKey,
};
