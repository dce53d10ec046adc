use crate::channel::{BoundedChannel, Producer};
use crate::events::Progress;
use crate::package::{PipelinePackage, ProcessFlags};
use facescan_core::{suppress_overlaps, Detector, ImageItem, ImageSource};
use std::sync::Arc;

/// Decodes images and finds face rectangles in them.
///
/// Several instances may share one input channel; each holds a clone of the
/// output [`Producer`], so the output closes after the last one exits.
#[derive(Clone)]
pub struct DetectionStage {
    source: Arc<dyn ImageSource>,
    detector: Arc<dyn Detector>,
    progress: Arc<Progress>,
    min_confidence: f32,
    nms_threshold: f32,
}

impl DetectionStage {
    pub fn new(
        source: Arc<dyn ImageSource>,
        detector: Arc<dyn Detector>,
        progress: Arc<Progress>,
        min_confidence: f32,
        nms_threshold: f32,
    ) -> Self {
        Self { source, detector, progress, min_confidence, nms_threshold }
    }

    /// Detect faces in one image. Unreadable images yield `None`.
    pub fn process(&self, item: ImageItem) -> Option<PipelinePackage> {
        let pixels = match self.source.decode(&item) {
            Ok(pixels) => pixels,
            Err(e) => {
                tracing::warn!(image_id = item.id, error = %e, "skipping unreadable image");
                self.progress.skipped(item.id, e.to_string());
                return None;
            }
        };

        let raw = match self.detector.detect(&pixels) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(image_id = item.id, error = %e, "face detection failed, skipping image");
                self.progress.skipped(item.id, e.to_string());
                return None;
            }
        };
        let raw_count = raw.len();
        let faces = suppress_overlaps(raw, self.min_confidence, self.nms_threshold);
        tracing::debug!(image_id = item.id, raw = raw_count, kept = faces.len(), "faces detected");

        let mut package = PipelinePackage::new(item);
        package.pixels = Some(Arc::new(pixels));
        package.detected_faces = faces;
        package.mark(ProcessFlags::DETECTION);
        Some(package)
    }

    pub fn run(self, input: Arc<BoundedChannel<ImageItem>>, output: Producer<PipelinePackage>) {
        tracing::debug!("detection stage started");
        while let Some(item) = input.read() {
            if let Some(package) = self.process(item) {
                if !output.append(package) {
                    self.progress.canceled("detection");
                }
            }
        }
        tracing::debug!("detection stage exiting");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facescan_core::{BoundingBox, DecodeError, DetectorError, PixelBuffer};

    struct OneImage;

    impl ImageSource for OneImage {
        fn decode(&self, item: &ImageItem) -> Result<PixelBuffer, DecodeError> {
            if item.id == 1 {
                Ok(PixelBuffer::filled(100, 100, 0))
            } else {
                Err(DecodeError::Unreadable { path: item.path.clone(), reason: "missing".into() })
            }
        }
    }

    struct FixedDetector;

    impl Detector for FixedDetector {
        fn detect(&self, _image: &PixelBuffer) -> Result<Vec<BoundingBox>, DetectorError> {
            Ok(vec![
                BoundingBox::new(10.0, 10.0, 30.0, 30.0).with_confidence(0.9),
                BoundingBox::new(12.0, 12.0, 30.0, 30.0).with_confidence(0.8),
                BoundingBox::new(60.0, 60.0, 20.0, 20.0).with_confidence(0.1),
            ])
        }
    }

    fn stage(progress: Arc<Progress>) -> DetectionStage {
        DetectionStage::new(Arc::new(OneImage), Arc::new(FixedDetector), progress, 0.5, 0.4)
    }

    #[test]
    fn test_detects_and_suppresses() {
        let progress = Arc::new(Progress::new());
        let package = stage(progress).process(ImageItem::new(1, "one.jpg")).unwrap();
        assert_eq!(package.detected_faces.len(), 1);
        assert_eq!(package.detected_faces[0].confidence, Some(0.9));
        assert!(package.is_processed_by(ProcessFlags::DETECTION));
        assert!(package.pixels.is_some());
    }

    #[test]
    fn test_unreadable_image_is_skipped() {
        let progress = Arc::new(Progress::new());
        assert!(stage(Arc::clone(&progress)).process(ImageItem::new(2, "two.jpg")).is_none());
        assert_eq!(progress.snapshot().skipped, 1);
    }

    #[test]
    fn test_run_closes_output_on_exit() {
        let progress = Arc::new(Progress::new());
        let input = Arc::new(BoundedChannel::new(4));
        let output = Arc::new(BoundedChannel::new(4));
        input.append(ImageItem::new(1, "one.jpg"));
        input.append(ImageItem::new(2, "two.jpg"));
        input.cancel();

        stage(progress).run(Arc::clone(&input), Producer::new(Arc::clone(&output)));
        assert!(output.is_canceled());
        assert_eq!(output.read().map(|p| p.image.id), Some(1));
        assert!(output.read().is_none());
    }
}
