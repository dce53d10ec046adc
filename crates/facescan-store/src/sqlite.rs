//! SQLite-backed face database.
//!
//! One connection behind a mutex; every multi-row write runs in a single
//! transaction. A `revision` counter in the settings table is bumped by every
//! embedding mutation so that a persisted KD-tree snapshot can tell whether
//! it still reflects the stored records.

use crate::error::StoreError;
use crate::traits::{EmbeddingStore, IdentityStore};
use chrono::{DateTime, Utc};
use facescan_core::{
    Attributes, Embedding, EmbeddingRecord, Identity, IdentityId, IndexError, KdNode, KdTree, NewEmbedding,
    NodeId, TagKey,
};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

const KEY_DIMENSION: &str = "dimension";
const KEY_REVISION: &str = "revision";
const KEY_INDEX_REVISION: &str = "index_revision";
const KEY_INDEX_DIMENSION: &str = "index_dimension";

/// Summary counters for the management CLI.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DbStats {
    pub identities: usize,
    pub embeddings: usize,
    /// Embeddings with an identity assigned.
    pub trained: usize,
    pub contexts: Vec<String>,
    pub dimension: Option<usize>,
    pub index_nodes: usize,
    pub last_updated: Option<DateTime<Utc>>,
}

pub struct SqliteFaceDb {
    conn: Mutex<Connection>,
}

impl SqliteFaceDb {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref())?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        let db = Self::with_connection(conn)?;
        tracing::info!(path = %path.as_ref().display(), "face database opened");
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        init_schema(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Monotonic counter of embedding mutations.
    pub fn revision(&self) -> Result<u64, StoreError> {
        let conn = self.conn.lock();
        Ok(read_setting(&conn, KEY_REVISION)?.unwrap_or(0))
    }

    /// Replace the persisted KD-tree snapshot with `tree`.
    pub fn save_index(&self, tree: &KdTree) -> Result<(), StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM kd_nodes", [])?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO kd_nodes
                    (id, split_axis, record_id, identity, position, min_range, max_range, left_id, right_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            for node in tree.nodes() {
                stmt.execute(params![
                    node.id,
                    node.split_axis as i64,
                    node.record_id,
                    node.identity,
                    encode_vector(&node.position),
                    encode_vector(&node.min_range),
                    encode_vector(&node.max_range),
                    node.left,
                    node.right,
                ])?;
            }
        }
        let revision: u64 = read_setting(&tx, KEY_REVISION)?.unwrap_or(0);
        write_setting(&tx, KEY_INDEX_REVISION, revision)?;
        write_setting(&tx, KEY_INDEX_DIMENSION, tree.dimension() as u64)?;
        tx.commit()?;

        tracing::debug!(nodes = tree.len(), revision, "kd-tree snapshot saved");
        Ok(())
    }

    /// Load the persisted KD-tree snapshot.
    ///
    /// Returns `None` when no snapshot exists or when embeddings changed
    /// after it was taken.
    pub fn load_index(&self) -> Result<Option<KdTree>, StoreError> {
        let conn = self.conn.lock();
        let Some(dimension) = read_setting::<u64>(&conn, KEY_INDEX_DIMENSION)? else {
            return Ok(None);
        };
        let revision: u64 = read_setting(&conn, KEY_REVISION)?.unwrap_or(0);
        let snapshot_revision: u64 = read_setting(&conn, KEY_INDEX_REVISION)?.unwrap_or(0);
        if revision != snapshot_revision {
            tracing::debug!(revision, snapshot_revision, "kd-tree snapshot is stale");
            return Ok(None);
        }

        let mut stmt = conn.prepare(
            "SELECT id, split_axis, record_id, identity, position, min_range, max_range, left_id, right_id
             FROM kd_nodes ORDER BY id",
        )?;
        let rows = stmt.query_map([], |r| {
            Ok((
                r.get::<_, NodeId>(0)?,
                r.get::<_, i64>(1)?,
                r.get::<_, i64>(2)?,
                r.get::<_, Option<IdentityId>>(3)?,
                r.get::<_, Vec<u8>>(4)?,
                r.get::<_, Vec<u8>>(5)?,
                r.get::<_, Vec<u8>>(6)?,
                r.get::<_, Option<NodeId>>(7)?,
                r.get::<_, Option<NodeId>>(8)?,
            ))
        })?;

        let mut nodes = Vec::new();
        for row in rows {
            let (id, split_axis, record_id, identity, position, min_range, max_range, left, right) = row?;
            nodes.push(KdNode {
                id,
                split_axis: usize::try_from(split_axis)
                    .map_err(|_| StoreError::Corrupt(format!("kd node {id} has negative split axis")))?,
                record_id,
                identity,
                position: decode_vector(&position)?,
                min_range: decode_vector(&min_range)?,
                max_range: decode_vector(&max_range)?,
                left,
                right,
            });
        }

        Ok(Some(KdTree::from_nodes(dimension as usize, nodes)?))
    }

    /// Run SQLite's integrity check and validate stored vectors and the
    /// KD-tree snapshot. Returns the problems found; empty means healthy.
    pub fn integrity_check(&self) -> Result<Vec<String>, StoreError> {
        let mut problems = Vec::new();
        {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare("PRAGMA integrity_check")?;
            let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
            for row in rows {
                let message = row?;
                if message != "ok" {
                    problems.push(format!("sqlite: {message}"));
                }
            }
        }

        let dimension = self.dimension()?;
        match self.fetch_all() {
            Ok(records) => {
                for record in &records {
                    if Some(record.embedding.dimension()) != dimension {
                        problems.push(format!(
                            "embedding {} has dimension {}, store expects {:?}",
                            record.id,
                            record.embedding.dimension(),
                            dimension
                        ));
                    }
                }
            }
            Err(e) => problems.push(format!("embeddings: {e}")),
        }

        match self.load_index() {
            Ok(Some(tree)) => {
                if let Err(e) = tree.verify() {
                    problems.push(format!("kd-tree snapshot: {e}"));
                }
            }
            Ok(None) => {}
            Err(e) => problems.push(format!("kd-tree snapshot: {e}")),
        }

        if problems.is_empty() {
            tracing::info!("integrity check passed");
        } else {
            tracing::warn!(problems = problems.len(), "integrity check found problems");
        }
        Ok(problems)
    }

    /// Compact the database file.
    pub fn vacuum(&self) -> Result<(), StoreError> {
        self.conn.lock().execute_batch("VACUUM")?;
        tracing::info!("face database vacuumed");
        Ok(())
    }

    pub fn stats(&self) -> Result<DbStats, StoreError> {
        let conn = self.conn.lock();
        let count = |sql: &str| -> Result<usize, StoreError> {
            let n: i64 = conn.query_row(sql, [], |r| r.get(0))?;
            Ok(n as usize)
        };
        let identities = count("SELECT COUNT(*) FROM identities")?;
        let embeddings = count("SELECT COUNT(*) FROM face_embeddings")?;
        let trained = count("SELECT COUNT(*) FROM face_embeddings WHERE identity IS NOT NULL")?;
        let index_nodes = count("SELECT COUNT(*) FROM kd_nodes")?;

        let mut stmt = conn.prepare("SELECT DISTINCT context FROM face_embeddings ORDER BY context")?;
        let contexts = stmt
            .query_map([], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let last_updated: Option<String> =
            conn.query_row("SELECT MAX(updated_at) FROM face_embeddings", [], |r| r.get(0))?;
        let last_updated = last_updated
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|t| t.with_timezone(&Utc));

        Ok(DbStats {
            identities,
            embeddings,
            trained,
            contexts,
            dimension: read_setting::<u64>(&conn, KEY_DIMENSION)?.map(|d| d as usize),
            index_nodes,
            last_updated,
        })
    }
}

fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "BEGIN;
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS identities (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            created_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS identity_attributes (
            identity INTEGER NOT NULL REFERENCES identities(id) ON DELETE CASCADE,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            PRIMARY KEY (identity, key)
        );
        CREATE INDEX IF NOT EXISTS identity_attributes_kv_idx ON identity_attributes(key, value);
        CREATE TABLE IF NOT EXISTS face_embeddings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tag_key TEXT NOT NULL,
            context TEXT NOT NULL,
            identity INTEGER,
            model_version TEXT,
            embedding BLOB NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(tag_key, context)
        );
        CREATE INDEX IF NOT EXISTS face_embeddings_identity_idx ON face_embeddings(identity, context);
        CREATE TABLE IF NOT EXISTS kd_nodes (
            id INTEGER PRIMARY KEY,
            split_axis INTEGER NOT NULL,
            record_id INTEGER NOT NULL UNIQUE,
            identity INTEGER,
            position BLOB NOT NULL,
            min_range BLOB NOT NULL,
            max_range BLOB NOT NULL,
            left_id INTEGER,
            right_id INTEGER
        );
        COMMIT;",
    )?;
    Ok(())
}

fn read_setting<T: std::str::FromStr>(conn: &Connection, key: &str) -> Result<Option<T>, StoreError> {
    let value: Option<String> = conn
        .query_row("SELECT value FROM settings WHERE key = ?1", params![key], |r| r.get(0))
        .optional()?;
    value
        .map(|v| {
            v.parse()
                .map_err(|_| StoreError::Corrupt(format!("setting {key} has invalid value {v:?}")))
        })
        .transpose()
}

fn write_setting(conn: &Connection, key: &str, value: u64) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO settings (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value.to_string()],
    )?;
    Ok(())
}

fn bump_revision(conn: &Connection) -> Result<(), StoreError> {
    let current: u64 = read_setting(conn, KEY_REVISION)?.unwrap_or(0);
    write_setting(conn, KEY_REVISION, current + 1)
}

/// Little-endian f32 packing.
fn encode_vector(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_vector(bytes: &[u8]) -> Result<Vec<f32>, StoreError> {
    if bytes.len() % 4 != 0 {
        return Err(StoreError::Corrupt(format!("vector blob of {} bytes", bytes.len())));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

type RawRecord = (i64, String, String, Option<IdentityId>, Option<String>, Vec<u8>);

const RECORD_COLUMNS: &str = "id, tag_key, context, identity, model_version, embedding";

fn raw_record(r: &rusqlite::Row<'_>) -> rusqlite::Result<RawRecord> {
    Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?))
}

fn into_record(raw: RawRecord) -> Result<EmbeddingRecord, StoreError> {
    let (id, tag_key, context, identity, model_version, blob) = raw;
    Ok(EmbeddingRecord {
        id,
        tag_key: TagKey::from(tag_key),
        identity,
        context,
        embedding: Embedding { values: decode_vector(&blob)?, model_version },
    })
}

fn identity_exists(conn: &Connection, id: IdentityId) -> Result<bool, StoreError> {
    Ok(conn
        .query_row("SELECT 1 FROM identities WHERE id = ?1", params![id], |_| Ok(()))
        .optional()?
        .is_some())
}

fn load_identity(conn: &Connection, id: IdentityId) -> Result<Option<Identity>, StoreError> {
    if !identity_exists(conn, id)? {
        return Ok(None);
    }
    let mut stmt = conn.prepare_cached("SELECT key, value FROM identity_attributes WHERE identity = ?1")?;
    let attributes = stmt
        .query_map(params![id], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?
        .collect::<Result<Attributes, _>>()?;
    Ok(Some(Identity { id, attributes }))
}

fn insert_attributes(conn: &Connection, id: IdentityId, attributes: &Attributes) -> Result<(), StoreError> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO identity_attributes (identity, key, value) VALUES (?1, ?2, ?3)
         ON CONFLICT(identity, key) DO UPDATE SET value = excluded.value",
    )?;
    for (key, value) in attributes {
        stmt.execute(params![id, key, value])?;
    }
    Ok(())
}

impl EmbeddingStore for SqliteFaceDb {
    fn dimension(&self) -> Result<Option<usize>, StoreError> {
        let conn = self.conn.lock();
        Ok(read_setting::<u64>(&conn, KEY_DIMENSION)?.map(|d| d as usize))
    }

    fn insert_batch(&self, batch: &[NewEmbedding]) -> Result<Vec<i64>, StoreError> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let dimension = match read_setting::<u64>(&tx, KEY_DIMENSION)? {
            Some(d) => d as usize,
            None => {
                let d = batch[0].embedding.dimension();
                if d == 0 {
                    return Err(IndexError::ZeroDimension.into());
                }
                write_setting(&tx, KEY_DIMENSION, d as u64)?;
                d
            }
        };
        if let Some(bad) = batch.iter().find(|e| e.embedding.dimension() != dimension) {
            return Err(StoreError::DimensionMismatch { expected: dimension, got: bad.embedding.dimension() });
        }

        let now = Utc::now().to_rfc3339();
        let mut ids = Vec::with_capacity(batch.len());
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO face_embeddings (tag_key, context, identity, model_version, embedding, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(tag_key, context) DO UPDATE SET
                    identity = COALESCE(excluded.identity, face_embeddings.identity),
                    model_version = excluded.model_version,
                    embedding = excluded.embedding,
                    updated_at = excluded.updated_at
                 RETURNING id",
            )?;
            for e in batch {
                let id: i64 = stmt.query_row(
                    params![
                        e.tag_key.as_str(),
                        e.context,
                        e.identity,
                        e.embedding.model_version,
                        encode_vector(&e.embedding.values),
                        now,
                    ],
                    |r| r.get(0),
                )?;
                ids.push(id);
            }
        }
        bump_revision(&tx)?;
        tx.commit()?;

        tracing::debug!(count = ids.len(), "embedding batch written");
        Ok(ids)
    }

    fn set_identity(
        &self,
        tag_key: &TagKey,
        context: &str,
        identity: Option<IdentityId>,
    ) -> Result<Option<i64>, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let id: Option<i64> = tx
            .query_row(
                "UPDATE face_embeddings SET identity = ?1, updated_at = ?2
                 WHERE tag_key = ?3 AND context = ?4
                 RETURNING id",
                params![identity, Utc::now().to_rfc3339(), tag_key.as_str(), context],
                |r| r.get(0),
            )
            .optional()?;
        if id.is_some() {
            bump_revision(&tx)?;
        }
        tx.commit()?;
        Ok(id)
    }

    fn delete_by_identity(&self, identity: IdentityId, context: Option<&str>) -> Result<usize, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let removed = tx.execute(
            "DELETE FROM face_embeddings WHERE identity = ?1 AND (?2 IS NULL OR context = ?2)",
            params![identity, context],
        )?;
        if removed > 0 {
            bump_revision(&tx)?;
        }
        tx.commit()?;
        tracing::info!(identity, context, removed, "training cleared for identity");
        Ok(removed)
    }

    fn delete_all(&self, context: Option<&str>) -> Result<usize, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let removed = tx.execute(
            "DELETE FROM face_embeddings WHERE ?1 IS NULL OR context = ?1",
            params![context],
        )?;
        if removed > 0 {
            bump_revision(&tx)?;
        }
        tx.commit()?;
        tracing::info!(context, removed, "training cleared");
        Ok(removed)
    }

    fn fetch_all(&self) -> Result<Vec<EmbeddingRecord>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!("SELECT {RECORD_COLUMNS} FROM face_embeddings ORDER BY id"))?;
        let rows = stmt.query_map([], raw_record)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(into_record(row?)?);
        }
        Ok(records)
    }

    fn find_by_tag_key(&self, tag_key: &TagKey, context: &str) -> Result<Option<EmbeddingRecord>, StoreError> {
        let conn = self.conn.lock();
        let raw = conn
            .query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM face_embeddings WHERE tag_key = ?1 AND context = ?2"),
                params![tag_key.as_str(), context],
                raw_record,
            )
            .optional()?;
        raw.map(into_record).transpose()
    }
}

impl IdentityStore for SqliteFaceDb {
    fn create(&self, attributes: &Attributes) -> Result<Identity, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        if let Some(uuid) = attributes.get("uuid") {
            let existing: Option<IdentityId> = tx
                .query_row(
                    "SELECT identity FROM identity_attributes WHERE key = 'uuid' AND value = ?1 LIMIT 1",
                    params![uuid],
                    |r| r.get(0),
                )
                .optional()?;
            if let Some(id) = existing {
                tracing::debug!(id, uuid = %uuid, "identity with this uuid exists, returning it unchanged");
                return load_identity(&tx, id)?
                    .ok_or_else(|| StoreError::Corrupt(format!("attributes of missing identity {id}")));
            }
        }

        tx.execute("INSERT INTO identities (created_at) VALUES (?1)", params![Utc::now().to_rfc3339()])?;
        let id = tx.last_insert_rowid();

        let mut attributes = attributes.clone();
        attributes
            .entry("uuid".to_string())
            .or_insert_with(|| uuid::Uuid::new_v4().to_string());
        insert_attributes(&tx, id, &attributes)?;
        tx.commit()?;

        tracing::info!(id, name = attributes.get("name").map(String::as_str), "identity created");
        Ok(Identity { id, attributes })
    }

    fn get(&self, id: IdentityId) -> Result<Option<Identity>, StoreError> {
        load_identity(&self.conn.lock(), id)
    }

    fn find_by_attribute(&self, key: &str, value: &str) -> Result<Vec<Identity>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT identity FROM identity_attributes WHERE key = ?1 AND value = ?2 ORDER BY identity",
        )?;
        let ids = stmt
            .query_map(params![key, value], |r| r.get::<_, IdentityId>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        let mut found = Vec::with_capacity(ids.len());
        for id in ids {
            found.extend(load_identity(&conn, id)?);
        }
        Ok(found)
    }

    fn add_attributes(&self, id: IdentityId, attributes: &Attributes) -> Result<(), StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        if !identity_exists(&tx, id)? {
            return Err(StoreError::NotFound(format!("identity {id}")));
        }
        insert_attributes(&tx, id, attributes)?;
        tx.commit()?;
        Ok(())
    }

    fn set_attributes(&self, id: IdentityId, attributes: &Attributes) -> Result<(), StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let Some(current) = load_identity(&tx, id)? else {
            return Err(StoreError::NotFound(format!("identity {id}")));
        };

        let mut replacement = attributes.clone();
        if let Some(uuid) = current.uuid() {
            replacement.entry("uuid".to_string()).or_insert_with(|| uuid.to_string());
        }
        tx.execute("DELETE FROM identity_attributes WHERE identity = ?1", params![id])?;
        insert_attributes(&tx, id, &replacement)?;
        tx.commit()?;
        Ok(())
    }

    fn delete(&self, id: IdentityId) -> Result<bool, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let embeddings = tx.execute("DELETE FROM face_embeddings WHERE identity = ?1", params![id])?;
        tx.execute("DELETE FROM identity_attributes WHERE identity = ?1", params![id])?;
        let deleted = tx.execute("DELETE FROM identities WHERE id = ?1", params![id])? > 0;
        if embeddings > 0 {
            bump_revision(&tx)?;
        }
        tx.commit()?;

        if deleted {
            tracing::info!(id, embeddings, "identity deleted");
        }
        Ok(deleted)
    }

    fn list_all(&self) -> Result<Vec<Identity>, StoreError> {
        let conn = self.conn.lock();
        let mut identities: BTreeMap<IdentityId, Attributes> = BTreeMap::new();

        let mut stmt = conn.prepare("SELECT id FROM identities ORDER BY id")?;
        for id in stmt.query_map([], |r| r.get::<_, IdentityId>(0))? {
            identities.insert(id?, Attributes::new());
        }

        let mut stmt = conn.prepare("SELECT identity, key, value FROM identity_attributes")?;
        let rows = stmt.query_map([], |r| {
            Ok((r.get::<_, IdentityId>(0)?, r.get::<_, String>(1)?, r.get::<_, String>(2)?))
        })?;
        for row in rows {
            let (id, key, value) = row?;
            if let Some(attributes) = identities.get_mut(&id) {
                attributes.insert(key, value);
            }
        }

        Ok(identities
            .into_iter()
            .map(|(id, attributes)| Identity { id, attributes })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_embedding(tag: &str, identity: Option<IdentityId>, values: &[f32]) -> NewEmbedding {
        NewEmbedding {
            tag_key: TagKey::from(tag),
            identity,
            context: "default".into(),
            embedding: Embedding::new(values.to_vec()),
        }
    }

    #[test]
    fn test_vector_codec() {
        let values = vec![1.5f32, -0.25, 0.0, f32::MAX];
        assert_eq!(decode_vector(&encode_vector(&values)).unwrap(), values);
        assert!(matches!(decode_vector(&[0, 1, 2]), Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn test_first_insert_fixes_dimension() {
        let db = SqliteFaceDb::open_in_memory().unwrap();
        assert_eq!(db.dimension().unwrap(), None);
        db.insert(&new_embedding("1/0,0,1,1", None, &[0.0, 1.0])).unwrap();
        assert_eq!(db.dimension().unwrap(), Some(2));

        let err = db.insert(&new_embedding("1/2,2,1,1", None, &[0.0, 1.0, 2.0])).unwrap_err();
        assert!(matches!(err, StoreError::DimensionMismatch { expected: 2, got: 3 }));
        assert_eq!(db.fetch_all().unwrap().len(), 1);
    }

    #[test]
    fn test_mismatched_batch_writes_nothing() {
        let db = SqliteFaceDb::open_in_memory().unwrap();
        let batch = vec![new_embedding("a", None, &[1.0]), new_embedding("b", None, &[1.0, 2.0])];
        assert!(db.insert_batch(&batch).is_err());
        assert!(db.fetch_all().unwrap().is_empty());
    }

    #[test]
    fn test_revision_tracks_mutations() {
        let db = SqliteFaceDb::open_in_memory().unwrap();
        assert_eq!(db.revision().unwrap(), 0);
        db.insert(&new_embedding("a", None, &[1.0])).unwrap();
        assert_eq!(db.revision().unwrap(), 1);
        assert_eq!(db.set_identity(&TagKey::from("missing"), "default", Some(1)).unwrap(), None);
        assert_eq!(db.revision().unwrap(), 1);
        db.delete_all(None).unwrap();
        assert_eq!(db.revision().unwrap(), 2);
    }

    #[test]
    fn test_stats_counts() {
        let db = SqliteFaceDb::open_in_memory().unwrap();
        let id = db.create(&Attributes::from([("name".to_string(), "Ada".to_string())])).unwrap().id;
        db.insert_batch(&[new_embedding("a", Some(id), &[1.0]), new_embedding("b", None, &[2.0])])
            .unwrap();

        let stats = db.stats().unwrap();
        assert_eq!(stats.identities, 1);
        assert_eq!(stats.embeddings, 2);
        assert_eq!(stats.trained, 1);
        assert_eq!(stats.contexts, vec!["default".to_string()]);
        assert_eq!(stats.dimension, Some(1));
        assert!(stats.last_updated.is_some());
    }
}
