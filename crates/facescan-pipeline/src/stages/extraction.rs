use crate::channel::{BoundedChannel, Producer};
use crate::events::Progress;
use crate::package::{FaceEmbedding, PipelinePackage, ProcessFlags};
use facescan_core::{crop_patch, Extractor, ExtractorError, FaceRegion, IdentityLabel, PixelBuffer, Rect, TagKey};
use rayon::prelude::*;
use rayon::ThreadPool;
use std::sync::Arc;

/// Turns detected faces into embeddings.
///
/// The faces of one package are embedded in parallel on a dedicated rayon
/// pool; the package is forwarded only after every face has finished.
pub struct ExtractionStage {
    extractor: Arc<dyn Extractor>,
    pool: Arc<ThreadPool>,
    progress: Arc<Progress>,
    patch_size: usize,
    dimension: usize,
}

impl ExtractionStage {
    pub fn new(
        extractor: Arc<dyn Extractor>,
        pool: Arc<ThreadPool>,
        progress: Arc<Progress>,
        patch_size: usize,
        dimension: usize,
    ) -> Self {
        Self { extractor, pool, progress, patch_size, dimension }
    }

    pub fn process(&self, mut package: PipelinePackage) -> PipelinePackage {
        let image_id = package.image.id;
        let Some(pixels) = package.pixels.take() else {
            package.mark(ProcessFlags::EXTRACTION);
            return package;
        };

        let faces = &package.detected_faces;
        let results: Vec<(Rect, Result<FaceEmbedding, ExtractorError>)> = self.pool.install(|| {
            faces
                .par_iter()
                .map(|face| {
                    let rect = Rect::from(face);
                    (rect, self.extract_one(image_id, &pixels, rect))
                })
                .collect()
        });

        for (rect, result) in results {
            match result {
                Ok(mut face) => {
                    face.identity = known_identity(&package.regions, &rect);
                    if !package.regions.iter().any(|r| r.rect == rect) {
                        package.regions.push(FaceRegion::new(image_id, rect));
                    }
                    package.embeddings.push(face);
                }
                Err(e) => {
                    tracing::warn!(image_id, rect = ?rect, error = %e, "skipping face, extraction failed");
                }
            }
        }

        tracing::debug!(
            image_id,
            faces = package.detected_faces.len(),
            extracted = package.embeddings.len(),
            "faces extracted"
        );
        package.mark(ProcessFlags::EXTRACTION);
        package
    }

    fn extract_one(
        &self,
        image_id: i64,
        pixels: &PixelBuffer,
        rect: Rect,
    ) -> Result<FaceEmbedding, ExtractorError> {
        let patch = crop_patch(pixels, &rect, self.patch_size)?;
        let embedding = self.extractor.embed(&patch)?;
        if embedding.dimension() != self.dimension {
            return Err(ExtractorError::DimensionMismatch { expected: self.dimension, got: embedding.dimension() });
        }
        Ok(FaceEmbedding {
            image_id,
            tag_key: TagKey::for_region(image_id, &rect),
            rect,
            identity: None,
            embedding,
        })
    }

    /// Forward every embedding to the writer and the package to recognition.
    pub fn run(
        self,
        input: Arc<BoundedChannel<PipelinePackage>>,
        writes: Producer<FaceEmbedding>,
        recognition: Producer<PipelinePackage>,
    ) {
        tracing::debug!("extraction stage started");
        while let Some(package) = input.read() {
            let package = self.process(package);
            for face in &package.embeddings {
                if !writes.append(face.clone()) {
                    self.progress.canceled("extraction");
                }
            }
            if !recognition.append(package) {
                self.progress.canceled("extraction");
            }
        }
        tracing::debug!("extraction stage exiting");
    }
}

/// Identity already assigned to the region at `rect`, if any.
fn known_identity(regions: &[FaceRegion], rect: &Rect) -> Option<i64> {
    regions
        .iter()
        .find(|r| r.rect == *rect)
        .and_then(|r| match r.label {
            Some(IdentityLabel::Id(id)) => Some(id),
            _ => None,
        })
}
