use crate::channel::{BoundedChannel, Producer};
use crate::events::Progress;
use crate::package::{PipelinePackage, ProcessFlags};
use facescan_core::{EmbeddingRecognizer, Recognition};
use std::sync::Arc;

/// Classifies extracted embeddings against the trained identities.
///
/// The recognizer is built once when the pipeline starts; training that
/// lands while the pipeline runs is not seen until the next start.
pub struct RecognitionStage {
    recognizer: Arc<dyn EmbeddingRecognizer>,
    progress: Arc<Progress>,
}

impl RecognitionStage {
    pub fn new(recognizer: Arc<dyn EmbeddingRecognizer>, progress: Arc<Progress>) -> Self {
        Self { recognizer, progress }
    }

    pub fn process(&self, mut package: PipelinePackage) -> PipelinePackage {
        for face in &package.embeddings {
            let recognition = match self.recognizer.recognize(&face.embedding) {
                Ok(Some(m)) => Recognition {
                    tag_key: face.tag_key.clone(),
                    identity: Some(m.identity),
                    distance: Some(m.distance),
                },
                Ok(None) => Recognition::unknown(face.tag_key.clone()),
                Err(e) => {
                    tracing::warn!(tag_key = %face.tag_key, error = %e, "recognition failed, reporting unknown");
                    Recognition::unknown(face.tag_key.clone())
                }
            };
            package.recognitions.push(recognition);
        }

        package.mark(ProcessFlags::RECOGNITION);
        self.progress.processed(package.image.id, package.recognitions.len());
        package
    }

    pub fn run(self, input: Arc<BoundedChannel<PipelinePackage>>, output: Producer<PipelinePackage>) {
        tracing::debug!(trained = self.recognizer.len(), "recognition stage started");
        while let Some(package) = input.read() {
            let package = self.process(package);
            if !output.append(package) {
                self.progress.canceled("recognition");
            }
        }
        tracing::debug!("recognition stage exiting");
    }
}
