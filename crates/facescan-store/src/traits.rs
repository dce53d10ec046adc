//! Storage seams shared by the pipeline stages and the CLI.

use crate::error::StoreError;
use facescan_core::{Attributes, EmbeddingRecord, Identity, IdentityId, NewEmbedding, TagKey};

/// Durable store of face embeddings.
///
/// Records are unique per (tag key, context): inserting an existing pair
/// overwrites the stored vector in place and keeps the record id.
pub trait EmbeddingStore: Send + Sync {
    /// Embedding dimension fixed by the first insert, `None` while empty.
    fn dimension(&self) -> Result<Option<usize>, StoreError>;

    fn insert(&self, embedding: &NewEmbedding) -> Result<i64, StoreError> {
        let ids = self.insert_batch(std::slice::from_ref(embedding))?;
        ids.into_iter()
            .next()
            .ok_or_else(|| StoreError::Corrupt("insert returned no record id".into()))
    }

    /// Write a batch atomically. Returns record ids in input order.
    fn insert_batch(&self, batch: &[NewEmbedding]) -> Result<Vec<i64>, StoreError>;

    /// Assign `identity` to the record stored for `tag_key` in `context`.
    /// Returns the record id, or `None` when no such record exists.
    fn set_identity(
        &self,
        tag_key: &TagKey,
        context: &str,
        identity: Option<IdentityId>,
    ) -> Result<Option<i64>, StoreError>;

    /// Remove the embeddings of `identity`, limited to `context` when given.
    fn delete_by_identity(&self, identity: IdentityId, context: Option<&str>) -> Result<usize, StoreError>;

    /// Remove every embedding, limited to `context` when given.
    fn delete_all(&self, context: Option<&str>) -> Result<usize, StoreError>;

    fn fetch_all(&self) -> Result<Vec<EmbeddingRecord>, StoreError>;

    fn find_by_tag_key(&self, tag_key: &TagKey, context: &str) -> Result<Option<EmbeddingRecord>, StoreError>;
}

/// Identities and their attributes.
pub trait IdentityStore: Send + Sync {
    /// Create an identity. A fresh `uuid` attribute is assigned unless one is
    /// supplied; supplying a uuid that already exists returns that identity.
    fn create(&self, attributes: &Attributes) -> Result<Identity, StoreError>;

    fn get(&self, id: IdentityId) -> Result<Option<Identity>, StoreError>;

    fn find_by_attribute(&self, key: &str, value: &str) -> Result<Vec<Identity>, StoreError>;

    /// Resolve the identity best matching `attributes`.
    ///
    /// Tried in order: `uuid`, `fullName`, `name`, then any other attribute.
    /// A supplied uuid with no match ends the search.
    fn find_identity(&self, attributes: &Attributes) -> Result<Option<Identity>, StoreError> {
        if attributes.is_empty() {
            return Ok(None);
        }
        if let Some(uuid) = attributes.get("uuid") {
            return Ok(self.find_by_attribute("uuid", uuid)?.into_iter().next());
        }
        for key in ["fullName", "name"] {
            if let Some(value) = attributes.get(key) {
                if let Some(found) = self.find_by_attribute(key, value)?.into_iter().next() {
                    return Ok(Some(found));
                }
            }
        }
        for (key, value) in attributes {
            if matches!(key.as_str(), "uuid" | "fullName" | "name") {
                continue;
            }
            if let Some(found) = self.find_by_attribute(key, value)?.into_iter().next() {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    /// Merge `attributes` into the identity, replacing values of existing keys.
    fn add_attributes(&self, id: IdentityId, attributes: &Attributes) -> Result<(), StoreError>;

    /// Replace all attributes. The uuid is kept unless `attributes` sets one.
    fn set_attributes(&self, id: IdentityId, attributes: &Attributes) -> Result<(), StoreError>;

    /// Delete an identity and all of its embeddings. Returns false if unknown.
    fn delete(&self, id: IdentityId) -> Result<bool, StoreError>;

    fn list_all(&self) -> Result<Vec<Identity>, StoreError>;
}
