use crate::channel::BoundedChannel;
use crate::events::Progress;
use crate::package::{PipelinePackage, ProcessFlags};
use facescan_core::{FaceRegion, FaceRole, IdentityId, IdentityLabel};
use facescan_store::{EmbeddingCache, EmbeddingIndex, EmbeddingStore, IdentityStore, StoreError};
use std::sync::Arc;

/// Persists confirmed identity labels.
///
/// Regions flagged [`FaceRole::ForTraining`] get their identity resolved (or
/// created) and written onto the stored embedding for their tag key, then
/// move to [`FaceRole::Trained`]. Regions in any other role are left alone.
pub struct TrainerStage {
    identities: Arc<dyn IdentityStore>,
    store: Arc<dyn EmbeddingStore>,
    index: Arc<EmbeddingIndex>,
    cache: Arc<EmbeddingCache>,
    progress: Arc<Progress>,
    context: String,
}

impl TrainerStage {
    pub fn new(
        identities: Arc<dyn IdentityStore>,
        store: Arc<dyn EmbeddingStore>,
        index: Arc<EmbeddingIndex>,
        cache: Arc<EmbeddingCache>,
        progress: Arc<Progress>,
        context: impl Into<String>,
    ) -> Self {
        Self { identities, store, index, cache, progress, context: context.into() }
    }

    pub fn process(&self, mut package: PipelinePackage) -> PipelinePackage {
        let mut trained = 0usize;
        for region in package.regions.iter_mut() {
            match self.train_region(region) {
                Ok(true) => trained += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(tag_key = %region.tag_key(), error = %e, "failed to persist training label");
                }
            }
        }
        if trained > 0 {
            self.cache.invalidate();
        }

        package.mark(ProcessFlags::TRAINING);
        package
    }

    /// Returns true when the region moved to `Trained`.
    fn train_region(&self, region: &mut FaceRegion) -> Result<bool, StoreError> {
        if region.role != FaceRole::ForTraining {
            return Ok(false);
        }
        let tag_key = region.tag_key();
        let Some(label) = &region.label else {
            tracing::warn!(tag_key = %tag_key, "region queued for training has no label");
            return Ok(false);
        };
        let Some(identity) = self.resolve(label)? else {
            tracing::warn!(tag_key = %tag_key, label = ?label, "training label names an unknown identity");
            return Ok(false);
        };

        match self.store.set_identity(&tag_key, &self.context, Some(identity))? {
            Some(record_id) => {
                if !self.index.set_identity(record_id, Some(identity)) {
                    tracing::debug!(record_id, "trained record not in index yet");
                }
                region.role = FaceRole::Trained;
                tracing::info!(tag_key = %tag_key, identity, "face trained");
                self.progress.trained(tag_key, identity);
                Ok(true)
            }
            None => {
                tracing::warn!(tag_key = %tag_key, "no stored embedding for region, left queued for training");
                Ok(false)
            }
        }
    }

    fn resolve(&self, label: &IdentityLabel) -> Result<Option<IdentityId>, StoreError> {
        match label {
            IdentityLabel::Id(id) => Ok(self.identities.get(*id)?.map(|i| i.id)),
            IdentityLabel::Attributes(attributes) => match self.identities.find_identity(attributes)? {
                Some(identity) => Ok(Some(identity.id)),
                None => Ok(Some(self.identities.create(attributes)?.id)),
            },
        }
    }

    /// Train every package until the input closes; returns them in order.
    pub fn run(self, input: Arc<BoundedChannel<PipelinePackage>>) -> Vec<PipelinePackage> {
        tracing::debug!("trainer stage started");
        let mut done = Vec::new();
        while let Some(package) = input.read() {
            done.push(self.process(package));
        }
        tracing::debug!(packages = done.len(), "trainer stage exiting");
        done
    }
}
