//! facescan-store — durable face database and the shared in-memory views
//! built on top of it: the KD-tree [`EmbeddingIndex`] and the
//! [`EmbeddingCache`].

pub mod cache;
pub mod error;
pub mod index;
pub mod sqlite;
pub mod traits;

pub use cache::{CacheEntry, CacheSnapshot, EmbeddingCache, Projection};
pub use error::StoreError;
pub use index::{EmbeddingIndex, IndexUpdate};
pub use sqlite::{DbStats, SqliteFaceDb};
pub use traits::{EmbeddingStore, IdentityStore};
