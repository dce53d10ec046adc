use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Numeric identity id as stored in the identities table.
pub type IdentityId = i64;

/// Free-form identity attributes (`name`, `fullName`, `uuid`, ...).
pub type Attributes = BTreeMap<String, String>;

/// An image owned by an external collection, referenced by id and path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageItem {
    pub id: i64,
    pub path: PathBuf,
}

impl ImageItem {
    pub fn new(id: i64, path: impl Into<PathBuf>) -> Self {
        Self { id, path: path.into() }
    }
}

/// Bounding box for a detected face, in source image pixel coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    /// Detector score, when the detector reports one.
    pub confidence: Option<f32>,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height, confidence: None }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }

    /// Score used for ranking; detections without a score rank as certain.
    pub fn score(&self) -> f32 {
        self.confidence.unwrap_or(1.0)
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }
}

/// Integer pixel rectangle of a face region.
///
/// Regions are snapped to whole pixels so that the same detection always
/// produces the same [`TagKey`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl From<&BoundingBox> for Rect {
    fn from(b: &BoundingBox) -> Self {
        let x = b.x.round();
        let y = b.y.round();
        let right = (b.x + b.width).round();
        let bottom = (b.y + b.height).round();
        Self {
            x: x as i32,
            y: y as i32,
            width: (right - x).max(0.0) as u32,
            height: (bottom - y).max(0.0) as u32,
        }
    }
}

/// Stable key correlating a stored embedding with its source face:
/// the image id plus the region encoding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagKey(String);

impl TagKey {
    pub fn for_region(image_id: i64, rect: &Rect) -> Self {
        Self(format!(
            "{image_id}/{},{},{},{}",
            rect.x, rect.y, rect.width, rect.height
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for TagKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TagKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for TagKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Face embedding vector (fixed dimension per index instance).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding, if known.
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values, model_version: None }
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }
}

/// Squared Euclidean distance over the common prefix of two vectors.
pub fn squared_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Lifecycle role of a face region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaceRole {
    /// Freshly detected, not reviewed.
    New,
    /// Name confirmed by the user.
    Confirmed,
    /// Confirmed and queued for the trainer.
    ForTraining,
    /// Identity persisted to the embedding store.
    Trained,
}

/// Identity a region is (or should be) assigned to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdentityLabel {
    /// An identity that already exists.
    Id(IdentityId),
    /// Resolve by attributes, creating the identity if nothing matches.
    Attributes(Attributes),
}

/// A face region bound to a tag key and a role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceRegion {
    pub image_id: i64,
    pub rect: Rect,
    pub role: FaceRole,
    pub label: Option<IdentityLabel>,
}

impl FaceRegion {
    pub fn new(image_id: i64, rect: Rect) -> Self {
        Self { image_id, rect, role: FaceRole::New, label: None }
    }

    /// Confirm the region for `label` and queue it for training.
    pub fn confirm(mut self, label: IdentityLabel) -> Self {
        self.label = Some(label);
        self.role = FaceRole::ForTraining;
        self
    }

    pub fn tag_key(&self) -> TagKey {
        TagKey::for_region(self.image_id, &self.rect)
    }
}

/// A stored face embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub id: i64,
    pub tag_key: TagKey,
    /// `None` until the face is trained.
    pub identity: Option<IdentityId>,
    /// Training context label the record belongs to.
    pub context: String,
    pub embedding: Embedding,
}

/// An embedding waiting to be written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEmbedding {
    pub tag_key: TagKey,
    pub identity: Option<IdentityId>,
    pub context: String,
    pub embedding: Embedding,
}

/// A labelled individual known to the system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: IdentityId,
    pub attributes: Attributes,
}

impl Identity {
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn name(&self) -> Option<&str> {
        self.attribute("name")
    }

    pub fn uuid(&self) -> Option<&str> {
        self.attribute("uuid")
    }
}

/// Recognition outcome for one extracted face.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recognition {
    pub tag_key: TagKey,
    /// `None` means "unknown".
    pub identity: Option<IdentityId>,
    /// Distance to the matched neighbour, when matched.
    pub distance: Option<f32>,
}

impl Recognition {
    pub fn unknown(tag_key: TagKey) -> Self {
        Self { tag_key, identity: None, distance: None }
    }

    pub fn is_unknown(&self) -> bool {
        self.identity.is_none()
    }
}
