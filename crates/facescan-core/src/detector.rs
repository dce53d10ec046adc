//! Face detection seam and detection post-processing.
//!
//! The detection model itself is a black box behind [`Detector`]. Raw
//! detections are cleaned up here: low-confidence boxes are dropped and
//! overlapping boxes are merged with non-maximum suppression.

use crate::source::PixelBuffer;
use crate::types::BoundingBox;
use thiserror::Error;

pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.5;
pub const DEFAULT_NMS_THRESHOLD: f32 = 0.4;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("image not usable for detection: {0}")]
    InvalidImage(String),
}

/// Finds face rectangles in a decoded image.
///
/// Implementations must be pure and reentrant: one detector instance may be
/// shared by several detection stage workers.
pub trait Detector: Send + Sync {
    fn detect(&self, image: &PixelBuffer) -> Result<Vec<BoundingBox>, DetectorError>;
}

/// Drop detections under `min_confidence`, then suppress overlaps.
/// Results are sorted by descending confidence.
pub fn suppress_overlaps(
    detections: Vec<BoundingBox>,
    min_confidence: f32,
    iou_threshold: f32,
) -> Vec<BoundingBox> {
    let candidates = detections
        .into_iter()
        .filter(|d| d.score() >= min_confidence && d.area() > 0.0)
        .collect();
    nms(candidates, iou_threshold)
}

/// Non-Maximum Suppression: remove overlapping detections.
fn nms(mut detections: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    detections.sort_by(|a, b| b.score().total_cmp(&a.score()));

    let mut keep: Vec<BoundingBox> = Vec::with_capacity(detections.len());
    for candidate in detections {
        if keep.iter().all(|kept| iou(kept, &candidate) <= iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

/// Intersection-over-Union between two bounding boxes.
fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = a.area() + b.area() - inter;

    if union > 0.0 { inter / union } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_bbox(x: f32, y: f32, w: f32, h: f32, conf: f32) -> BoundingBox {
        BoundingBox::new(x, y, w, h).with_confidence(conf)
    }

    #[test]
    fn test_iou_identical() {
        let a = make_bbox(0.0, 0.0, 100.0, 100.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_partial() {
        let a = make_bbox(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = make_bbox(5.0, 0.0, 10.0, 10.0, 1.0);
        // Overlap: 5x10 = 50, union: 100+100-50 = 150
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_suppresses_overlapping() {
        let detections = vec![
            make_bbox(5.0, 5.0, 100.0, 100.0, 0.8),
            make_bbox(0.0, 0.0, 100.0, 100.0, 0.9),
            make_bbox(200.0, 200.0, 50.0, 50.0, 0.7),
        ];
        let result = suppress_overlaps(detections, 0.5, 0.4);
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].confidence, Some(0.9));
        assert_eq!(result[1].confidence, Some(0.7));
    }

    #[test]
    fn test_drops_low_confidence_and_empty() {
        let detections = vec![
            make_bbox(0.0, 0.0, 10.0, 10.0, 0.2),
            make_bbox(50.0, 50.0, 0.0, 10.0, 0.9),
            BoundingBox::new(80.0, 80.0, 10.0, 10.0),
        ];
        let result = suppress_overlaps(detections, 0.5, 0.4);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].confidence, None);
    }

    #[test]
    fn test_empty_input() {
        assert!(suppress_overlaps(vec![], 0.5, 0.4).is_empty());
    }
}
