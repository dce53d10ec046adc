use facescan_core::{Embedding, NewEmbedding, TagKey};
use facescan_store::{EmbeddingCache, EmbeddingStore, SqliteFaceDb};
use std::sync::Arc;
use std::thread;

fn new_embedding(tag: &str, identity: Option<i64>, context: &str, values: &[f32]) -> NewEmbedding {
    NewEmbedding {
        tag_key: TagKey::from(tag),
        identity,
        context: context.into(),
        embedding: Embedding::new(values.to_vec()),
    }
}

fn seeded_db() -> Arc<SqliteFaceDb> {
    let db = Arc::new(SqliteFaceDb::open_in_memory().unwrap());
    db.insert_batch(&[
        new_embedding("1/0,0,1,1", Some(10), "default", &[0.0, 1.0, 0.0]),
        new_embedding("2/0,0,1,1", None, "default", &[1.0, 0.0, 0.0]),
        new_embedding("3/0,0,1,1", Some(11), "default", &[0.0, 0.0, 1.0]),
        new_embedding("4/0,0,1,1", Some(12), "other", &[1.0, 1.0, 1.0]),
    ])
    .unwrap();
    db
}

#[test]
fn cache_is_scoped_to_context() {
    let db = seeded_db();
    let cache = EmbeddingCache::new(db, "default", 1000);
    let snapshot = cache.get().unwrap();

    assert_eq!(snapshot.len(), 3);
    assert!(snapshot.get(&TagKey::from("4/0,0,1,1")).is_none());
    let known: Vec<i64> = snapshot.known_pairs().into_iter().map(|(id, _)| id).collect();
    assert_eq!(known, vec![10, 11]);
}

#[test]
fn snapshot_shared_until_invalidated() {
    let db = seeded_db();
    let cache = EmbeddingCache::new(db.clone(), "default", 1000);

    let first = cache.get().unwrap();
    let second = cache.get().unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    db.insert(&new_embedding("5/0,0,1,1", Some(10), "default", &[0.5, 0.5, 0.0])).unwrap();
    assert_eq!(cache.get().unwrap().len(), 3, "stale until invalidated");

    cache.invalidate();
    let rebuilt = cache.get().unwrap();
    assert!(!Arc::ptr_eq(&first, &rebuilt));
    assert_eq!(rebuilt.len(), 4);
    assert_eq!(rebuilt.generation(), cache.generation());
    // old readers keep their snapshot
    assert_eq!(first.len(), 3);
}

#[test]
fn concurrent_readers_share_one_rebuild() {
    let db = seeded_db();
    let cache = Arc::new(EmbeddingCache::new(db, "default", 1000));
    cache.invalidate();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || cache.get().unwrap())
        })
        .collect();
    let snapshots: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    for s in &snapshots[1..] {
        assert!(Arc::ptr_eq(&snapshots[0], s));
    }
}

#[test]
fn projection_only_below_threshold() {
    let db = seeded_db();

    let small = EmbeddingCache::new(db.clone(), "default", 10).with_projection_components(2);
    let snapshot = small.get().unwrap();
    let projection = snapshot.projection().expect("projection below threshold");
    assert_eq!(projection.components(), 2);
    let entry = snapshot.get(&TagKey::from("1/0,0,1,1")).unwrap();
    assert_eq!(entry.projected.as_ref().map(Vec::len), Some(2));

    let large = EmbeddingCache::new(db, "default", 3);
    let snapshot = large.get().unwrap();
    assert!(snapshot.projection().is_none());
    assert!(snapshot.entries().all(|(_, e)| e.projected.is_none()));
}
