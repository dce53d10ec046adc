//! Shared KD-tree service over the embedding store.

use crate::error::StoreError;
use crate::sqlite::SqliteFaceDb;
use crate::traits::EmbeddingStore;
use facescan_core::{EmbeddingRecord, IdentityId, IndexError, KdTree, Neighbor};
use parking_lot::RwLock;

/// Outcome of [`EmbeddingIndex::index_records`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexUpdate {
    pub inserted: usize,
    /// Already indexed records whose identity was refreshed.
    pub updated: usize,
    /// Whether a moved record forced a rebuild from the store.
    pub rebuilt: bool,
}

/// KD-tree over every stored embedding, shared by reference among stages.
///
/// Single writer, many readers: searches take the read lock; inserts,
/// identity updates and rebuilds take the write lock.
pub struct EmbeddingIndex {
    tree: RwLock<KdTree>,
}

impl EmbeddingIndex {
    pub fn new(dimension: usize) -> Result<Self, StoreError> {
        Ok(Self { tree: RwLock::new(KdTree::new(dimension)?) })
    }

    /// Build an index from stored records.
    pub fn from_records(dimension: usize, records: &[EmbeddingRecord]) -> Result<Self, StoreError> {
        Ok(Self { tree: RwLock::new(build_tree(dimension, records)?) })
    }

    /// Open the index for `db`, preferring the persisted snapshot and
    /// rebuilding from the stored records when it is missing or stale.
    ///
    /// Fails with [`StoreError::DimensionMismatch`] if the database already
    /// holds embeddings of another dimension.
    pub fn open(db: &SqliteFaceDb, dimension: usize) -> Result<Self, StoreError> {
        if let Some(stored) = db.dimension()? {
            if stored != dimension {
                return Err(StoreError::DimensionMismatch { expected: stored, got: dimension });
            }
        }

        match db.load_index() {
            Ok(Some(tree)) if tree.dimension() == dimension => {
                tracing::info!(nodes = tree.len(), "kd-tree restored from snapshot");
                return Ok(Self { tree: RwLock::new(tree) });
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "kd-tree snapshot unusable, rebuilding"),
        }

        let records = db.fetch_all()?;
        let index = Self::from_records(dimension, &records)?;
        tracing::info!(nodes = records.len(), "kd-tree rebuilt from embeddings");
        Ok(index)
    }

    pub fn dimension(&self) -> usize {
        self.tree.read().dimension()
    }

    pub fn len(&self) -> usize {
        self.tree.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.read().is_empty()
    }

    /// Bring freshly written records into the index.
    ///
    /// New records are inserted. Records already indexed at the same
    /// position only get their identity refreshed, when one is given. The
    /// tree never removes single nodes, so a record whose stored vector
    /// changed triggers a full rebuild from `store`.
    pub fn index_records(
        &self,
        store: &dyn EmbeddingStore,
        records: &[EmbeddingRecord],
    ) -> Result<IndexUpdate, StoreError> {
        let mut update = IndexUpdate::default();
        let mut moved = false;
        {
            let mut tree = self.tree.write();
            for record in records {
                let position = &record.embedding.values;
                let unchanged = tree
                    .node_for_record(record.id)
                    .map(|node| node.position == *position);
                match unchanged {
                    Some(true) => {
                        // Rewrites without an identity keep the trained one, as the store does.
                        if record.identity.is_some() {
                            tree.set_identity(record.id, record.identity);
                        }
                        update.updated += 1;
                    }
                    Some(false) => moved = true,
                    None => {
                        tree.insert(record.id, record.identity, position)?;
                        update.inserted += 1;
                    }
                }
            }
        }

        if moved {
            self.rebuild(store)?;
            update.rebuilt = true;
        }
        Ok(update)
    }

    /// Update the identity cached on an indexed record.
    pub fn set_identity(&self, record_id: i64, identity: Option<IdentityId>) -> bool {
        self.tree.write().set_identity(record_id, identity)
    }

    pub fn nearest_neighbors(
        &self,
        query: &[f32],
        radius: f32,
        max_results: usize,
    ) -> Result<Vec<Neighbor>, IndexError> {
        self.tree.read().nearest_neighbors(query, radius, max_results)
    }

    /// Replace the tree with one built from every record in `store`.
    ///
    /// The write lock is held from the fetch to the swap, so identity
    /// updates issued meanwhile land on the new tree.
    pub fn rebuild(&self, store: &dyn EmbeddingStore) -> Result<usize, StoreError> {
        let mut current = self.tree.write();
        let records = store.fetch_all()?;
        let tree = build_tree(current.dimension(), &records)?;
        let nodes = tree.len();
        *current = tree;
        drop(current);
        tracing::debug!(nodes, "kd-tree rebuilt");
        Ok(nodes)
    }

    /// Write the current tree as the database's snapshot.
    pub fn persist(&self, db: &SqliteFaceDb) -> Result<(), StoreError> {
        let tree = self.tree.read();
        db.save_index(&tree)
    }

    /// Copy of the current tree.
    pub fn snapshot(&self) -> KdTree {
        self.tree.read().clone()
    }
}

fn build_tree(dimension: usize, records: &[EmbeddingRecord]) -> Result<KdTree, StoreError> {
    let tree = KdTree::build(
        dimension,
        records
            .iter()
            .map(|r| (r.id, r.identity, r.embedding.values.as_slice())),
    )?;
    Ok(tree)
}
