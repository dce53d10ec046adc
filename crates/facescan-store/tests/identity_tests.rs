use facescan_core::{Attributes, Embedding, NewEmbedding, TagKey};
use facescan_store::{EmbeddingStore, IdentityStore, SqliteFaceDb, StoreError};
use tempfile::NamedTempFile;

fn attrs(pairs: &[(&str, &str)]) -> Attributes {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

fn embedding(tag: &str, identity: Option<i64>, context: &str) -> NewEmbedding {
    NewEmbedding {
        tag_key: TagKey::from(tag),
        identity,
        context: context.into(),
        embedding: Embedding::new(vec![0.1, 0.2, 0.3]),
    }
}

#[test]
fn create_assigns_uuid() {
    let db = SqliteFaceDb::open_in_memory().unwrap();
    let ada = db.create(&attrs(&[("name", "Ada")])).unwrap();
    let grace = db.create(&attrs(&[("name", "Grace")])).unwrap();

    assert!(ada.uuid().is_some());
    assert_ne!(ada.uuid(), grace.uuid());
    assert_eq!(db.get(ada.id).unwrap(), Some(ada));
}

#[test]
fn create_with_existing_uuid_returns_existing() {
    let db = SqliteFaceDb::open_in_memory().unwrap();
    let first = db.create(&attrs(&[("name", "Ada"), ("uuid", "fixed-uuid")])).unwrap();
    let second = db.create(&attrs(&[("name", "Someone else"), ("uuid", "fixed-uuid")])).unwrap();

    assert_eq!(first, second);
    assert_eq!(db.list_all().unwrap().len(), 1);
}

#[test]
fn find_identity_resolution_order() {
    let db = SqliteFaceDb::open_in_memory().unwrap();
    let by_name = db.create(&attrs(&[("name", "Ada")])).unwrap();
    let by_full = db.create(&attrs(&[("name", "Countess"), ("fullName", "Ada Lovelace")])).unwrap();
    let by_other = db.create(&attrs(&[("name", "Grace"), ("email", "grace@example.org")])).unwrap();

    // fullName wins over name
    let found = db
        .find_identity(&attrs(&[("name", "Ada"), ("fullName", "Ada Lovelace")]))
        .unwrap();
    assert_eq!(found.map(|i| i.id), Some(by_full.id));

    let found = db.find_identity(&attrs(&[("name", "Ada")])).unwrap();
    assert_eq!(found.map(|i| i.id), Some(by_name.id));

    let found = db.find_identity(&attrs(&[("email", "grace@example.org")])).unwrap();
    assert_eq!(found.map(|i| i.id), Some(by_other.id));

    assert_eq!(db.find_identity(&attrs(&[("name", "Nobody")])).unwrap(), None);
    assert_eq!(db.find_identity(&Attributes::new()).unwrap(), None);
}

#[test]
fn unmatched_uuid_stops_search() {
    let db = SqliteFaceDb::open_in_memory().unwrap();
    let ada = db.create(&attrs(&[("name", "Ada")])).unwrap();

    let found = db.find_identity(&attrs(&[("name", "Ada"), ("uuid", "unknown")])).unwrap();
    assert_eq!(found, None);

    let uuid = ada.uuid().unwrap().to_string();
    let found = db.find_identity(&attrs(&[("uuid", uuid.as_str())])).unwrap();
    assert_eq!(found.map(|i| i.id), Some(ada.id));
}

#[test]
fn add_and_set_attributes() {
    let db = SqliteFaceDb::open_in_memory().unwrap();
    let ada = db.create(&attrs(&[("name", "Ada")])).unwrap();
    let uuid = ada.uuid().unwrap().to_string();

    db.add_attributes(ada.id, &attrs(&[("fullName", "Ada Lovelace"), ("name", "Ada L.")]))
        .unwrap();
    let updated = db.get(ada.id).unwrap().unwrap();
    assert_eq!(updated.name(), Some("Ada L."));
    assert_eq!(updated.attribute("fullName"), Some("Ada Lovelace"));

    db.set_attributes(ada.id, &attrs(&[("name", "Augusta")])).unwrap();
    let replaced = db.get(ada.id).unwrap().unwrap();
    assert_eq!(replaced.name(), Some("Augusta"));
    assert_eq!(replaced.attribute("fullName"), None);
    assert_eq!(replaced.uuid(), Some(uuid.as_str()));

    assert!(matches!(
        db.add_attributes(999, &attrs(&[("name", "x")])),
        Err(StoreError::NotFound(_))
    ));
}

#[test]
fn delete_cascades_to_embeddings() {
    let db = SqliteFaceDb::open_in_memory().unwrap();
    let ada = db.create(&attrs(&[("name", "Ada")])).unwrap();
    let grace = db.create(&attrs(&[("name", "Grace")])).unwrap();
    db.insert_batch(&[
        embedding("1/0,0,10,10", Some(ada.id), "default"),
        embedding("2/0,0,10,10", Some(ada.id), "default"),
        embedding("3/0,0,10,10", Some(grace.id), "default"),
    ])
    .unwrap();

    assert!(db.delete(ada.id).unwrap());
    assert!(!db.delete(ada.id).unwrap());
    assert_eq!(db.get(ada.id).unwrap(), None);

    let remaining = db.fetch_all().unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].identity, Some(grace.id));
}

#[test]
fn clear_training_by_context() {
    let db = SqliteFaceDb::open_in_memory().unwrap();
    let ada = db.create(&attrs(&[("name", "Ada")])).unwrap();
    db.insert_batch(&[
        embedding("1/0,0,10,10", Some(ada.id), "default"),
        embedding("1/0,0,10,10", Some(ada.id), "review"),
        embedding("2/0,0,10,10", None, "review"),
    ])
    .unwrap();

    assert_eq!(db.delete_by_identity(ada.id, Some("review")).unwrap(), 1);
    assert_eq!(db.fetch_all().unwrap().len(), 2);

    assert_eq!(db.delete_all(Some("review")).unwrap(), 1);
    let remaining = db.fetch_all().unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].context, "default");

    assert_eq!(db.delete_all(None).unwrap(), 1);
    assert!(db.fetch_all().unwrap().is_empty());
}

#[test]
fn reinsert_same_region_overwrites_in_place() {
    let db = SqliteFaceDb::open_in_memory().unwrap();
    let first = db.insert(&embedding("5/1,1,20,20", Some(7), "default")).unwrap();

    let mut again = embedding("5/1,1,20,20", None, "default");
    again.embedding = Embedding::new(vec![0.9, 0.8, 0.7]);
    let second = db.insert(&again).unwrap();

    assert_eq!(first, second);
    let record = db.find_by_tag_key(&TagKey::from("5/1,1,20,20"), "default").unwrap().unwrap();
    assert_eq!(record.identity, Some(7), "identity kept when none is given");
    assert_eq!(record.embedding.values, vec![0.9, 0.8, 0.7]);
}

#[test]
fn set_identity_by_tag_key() {
    let db = SqliteFaceDb::open_in_memory().unwrap();
    let id = db.insert(&embedding("9/0,0,5,5", None, "default")).unwrap();

    assert_eq!(db.set_identity(&TagKey::from("9/0,0,5,5"), "default", Some(3)).unwrap(), Some(id));
    assert_eq!(db.set_identity(&TagKey::from("9/0,0,5,5"), "other", Some(3)).unwrap(), None);
    assert_eq!(db.fetch_all().unwrap()[0].identity, Some(3));
}

#[test]
fn data_survives_reopen() {
    let tf = NamedTempFile::new().unwrap();
    let path = tf.path().to_path_buf();
    {
        let db = SqliteFaceDb::open(&path).unwrap();
        let ada = db.create(&attrs(&[("name", "Ada")])).unwrap();
        db.insert(&embedding("1/0,0,10,10", Some(ada.id), "default")).unwrap();
    }

    let db = SqliteFaceDb::open(&path).unwrap();
    assert_eq!(db.list_all().unwrap().len(), 1);
    assert_eq!(db.fetch_all().unwrap().len(), 1);
    assert_eq!(db.dimension().unwrap(), Some(3));
    assert!(db.integrity_check().unwrap().is_empty());
    db.vacuum().unwrap();
}
