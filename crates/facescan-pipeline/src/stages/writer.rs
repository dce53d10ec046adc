use crate::channel::BoundedChannel;
use crate::error::PipelineError;
use crate::events::Progress;
use crate::package::FaceEmbedding;
use facescan_core::{EmbeddingRecord, NewEmbedding};
use facescan_store::{EmbeddingCache, EmbeddingIndex, EmbeddingStore, StoreError};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    /// Successful batch writes.
    pub flushes: usize,
    pub written: usize,
    pub failed_flushes: usize,
}

/// Batches extracted embeddings into durable writes.
///
/// A full batch is flushed as soon as it reaches `batch_size`; the remainder
/// is flushed once when the input closes. A failed flush keeps its batch
/// pending: it is retried at the next batch boundary and at shutdown, and a
/// failure at shutdown is returned as [`PipelineError::Persistence`].
pub struct WriterStage {
    store: Arc<dyn EmbeddingStore>,
    index: Arc<EmbeddingIndex>,
    cache: Arc<EmbeddingCache>,
    progress: Arc<Progress>,
    batch_size: usize,
    context: String,
}

impl WriterStage {
    pub fn new(
        store: Arc<dyn EmbeddingStore>,
        index: Arc<EmbeddingIndex>,
        cache: Arc<EmbeddingCache>,
        progress: Arc<Progress>,
        batch_size: usize,
        context: impl Into<String>,
    ) -> Self {
        Self { store, index, cache, progress, batch_size: batch_size.max(1), context: context.into() }
    }

    pub fn run(self, input: Arc<BoundedChannel<FaceEmbedding>>) -> Result<WriteSummary, PipelineError> {
        tracing::debug!(batch_size = self.batch_size, "writer stage started");
        let mut pending: Vec<NewEmbedding> = Vec::with_capacity(self.batch_size);
        let mut summary = WriteSummary::default();
        let mut next_boundary = self.batch_size;

        while let Some(face) = input.read() {
            pending.push(NewEmbedding {
                tag_key: face.tag_key,
                identity: face.identity,
                context: self.context.clone(),
                embedding: face.embedding,
            });
            if pending.len() >= next_boundary {
                next_boundary = match self.flush(&mut pending, &mut summary) {
                    Ok(()) => self.batch_size,
                    // Failed batch stays pending until one more batch has arrived.
                    Err(_) => pending.len() + self.batch_size,
                };
            }
        }

        if !pending.is_empty() {
            if let Err(source) = self.flush(&mut pending, &mut summary) {
                tracing::error!(unflushed = pending.len(), "embeddings lost at shutdown");
                return Err(PipelineError::Persistence { unflushed: pending.len(), source });
            }
        }

        tracing::info!(
            flushes = summary.flushes,
            written = summary.written,
            failed = summary.failed_flushes,
            "writer stage exiting"
        );
        Ok(summary)
    }

    fn flush(&self, pending: &mut Vec<NewEmbedding>, summary: &mut WriteSummary) -> Result<(), StoreError> {
        let ids = match self.store.insert_batch(pending) {
            Ok(ids) => ids,
            Err(e) => {
                tracing::error!(pending = pending.len(), error = %e, "embedding batch flush failed");
                summary.failed_flushes += 1;
                self.progress.flush_failed(pending.len(), e.to_string());
                return Err(e);
            }
        };

        let records: Vec<EmbeddingRecord> = ids
            .into_iter()
            .zip(pending.drain(..))
            .map(|(id, e)| EmbeddingRecord {
                id,
                tag_key: e.tag_key,
                identity: e.identity,
                context: e.context,
                embedding: e.embedding,
            })
            .collect();

        summary.flushes += 1;
        summary.written += records.len();
        self.progress.saved(records.len());

        // Written data is durable; an index failure only degrades search.
        if let Err(e) = self.index.index_records(self.store.as_ref(), &records) {
            tracing::error!(error = %e, "failed to index written embeddings");
        }
        self.cache.invalidate();
        Ok(())
    }
}
