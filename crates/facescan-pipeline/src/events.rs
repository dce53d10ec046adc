//! Progress counters and notifications emitted by the stages.

use crossbeam_channel::Sender;
use facescan_core::{IdentityId, TagKey};
use std::sync::atomic::{AtomicU64, Ordering};

/// Notification consumed outside the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// An image finished recognition.
    Processed { image_id: i64, faces: usize },
    /// An image was dropped before producing a package.
    Skipped { image_id: i64, reason: String },
    /// A batch of embeddings became durable.
    Saved { count: usize },
    /// A batch flush failed; the batch stays pending.
    FlushFailed { pending: usize, error: String },
    /// A confirmed region was persisted for an identity.
    Trained { tag_key: TagKey, identity: IdentityId },
    /// A stage gave up on an item because its output was canceled.
    Canceled { stage: &'static str },
}

/// Stage counters, updated atomically from every stage thread.
#[derive(Debug, Default)]
pub struct Progress {
    processed: AtomicU64,
    saved: AtomicU64,
    canceled: AtomicU64,
    skipped: AtomicU64,
    flush_failed: AtomicU64,
    trained: AtomicU64,
    events: Option<Sender<PipelineEvent>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub processed: u64,
    pub saved: u64,
    pub canceled: u64,
    pub skipped: u64,
    pub flush_failed: u64,
    pub trained: u64,
}

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also forward every event to `sender`.
    pub fn with_events(sender: Sender<PipelineEvent>) -> Self {
        Self { events: Some(sender), ..Self::default() }
    }

    pub fn processed(&self, image_id: i64, faces: usize) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        self.emit(PipelineEvent::Processed { image_id, faces });
    }

    pub fn skipped(&self, image_id: i64, reason: String) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
        self.emit(PipelineEvent::Skipped { image_id, reason });
    }

    pub fn saved(&self, count: usize) {
        self.saved.fetch_add(count as u64, Ordering::Relaxed);
        self.emit(PipelineEvent::Saved { count });
    }

    pub fn flush_failed(&self, pending: usize, error: String) {
        self.flush_failed.fetch_add(1, Ordering::Relaxed);
        self.emit(PipelineEvent::FlushFailed { pending, error });
    }

    pub fn trained(&self, tag_key: TagKey, identity: IdentityId) {
        self.trained.fetch_add(1, Ordering::Relaxed);
        self.emit(PipelineEvent::Trained { tag_key, identity });
    }

    pub fn canceled(&self, stage: &'static str) {
        self.canceled.fetch_add(1, Ordering::Relaxed);
        self.emit(PipelineEvent::Canceled { stage });
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            saved: self.saved.load(Ordering::Relaxed),
            canceled: self.canceled.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            flush_failed: self.flush_failed.load(Ordering::Relaxed),
            trained: self.trained.load(Ordering::Relaxed),
        }
    }

    fn emit(&self, event: PipelineEvent) {
        if let Some(sender) = &self.events {
            // Listener gone: counters still track progress.
            let _ = sender.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_events() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let progress = Progress::with_events(tx);

        progress.saved(3);
        progress.saved(2);
        progress.skipped(7, "unreadable".into());
        progress.processed(1, 2);

        let snapshot = progress.snapshot();
        assert_eq!(snapshot.saved, 5);
        assert_eq!(snapshot.skipped, 1);
        assert_eq!(snapshot.processed, 1);

        let events: Vec<PipelineEvent> = rx.try_iter().collect();
        assert_eq!(events.len(), 4);
        assert_eq!(events[0], PipelineEvent::Saved { count: 3 });
    }

    #[test]
    fn test_dropped_listener_is_ignored() {
        let (tx, rx) = crossbeam_channel::unbounded();
        drop(rx);
        let progress = Progress::with_events(tx);
        progress.canceled("detection");
        assert_eq!(progress.snapshot().canceled, 1);
    }
}
