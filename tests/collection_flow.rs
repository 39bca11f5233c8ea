//! End-to-end coordinator scenarios: insert, stats, label mapping, query
//! plumbing, repair, and the lenient/strict error policies.

use std::sync::Arc;

use bson::Bson;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::tempdir;

use emberdb::catalog::LABELS;
use emberdb::store::{OpenOptions, ScanOptions, Store};
use emberdb::vector::normalize;
use emberdb::{Database, Document, EmberError, Query};

fn open_db(dir: &std::path::Path, name: &str) -> Database {
    let store = Arc::new(Store::open(dir, &OpenOptions::new().create(true)).unwrap());
    let db = Database::new(store, name);
    db.create_db().unwrap();
    db
}

fn random_unit_vector(rng: &mut StdRng, dim: usize) -> Vec<f32> {
    let mut v: Vec<f32> = (0..dim).map(|_| rng.gen::<f32>() - 0.5).collect();
    normalize(&mut v);
    v
}

fn documents(rng: &mut StdRng, count: usize, dim: usize) -> Vec<Document> {
    (0..count)
        .map(|i| {
            Document::new(
                format!("document {i}"),
                random_unit_vector(rng, dim),
                Bson::Null,
            )
        })
        .collect()
}

fn l2_sqr(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

#[test]
fn test_insert_populates_table_labels_and_stats() {
    let dir = tempdir().unwrap();
    let db = open_db(dir.path(), "main");
    db.create_collection("docs").unwrap();

    let mut rng = StdRng::seed_from_u64(7);
    let docs = documents(&mut rng, 3, 1536);
    db.insert_documents("docs", &docs).unwrap();

    let stats = db.collection_stats("docs").unwrap();
    assert_eq!(stats.doc_count, 3);
    assert!(stats.vector_index_size > 0.0);

    // Label i maps to the hex id of the i-th inserted document.
    for (label, doc) in docs.iter().enumerate() {
        let hex = db
            .store()
            .get_str(LABELS, &label.to_string())
            .unwrap()
            .expect("label mapping missing");
        assert_eq!(hex, doc.id.to_hex());
    }

    // The collection table holds exactly the three ids as raw 12-byte keys.
    let entry = db.collection_entry("docs").unwrap();
    let rows = db
        .store()
        .scan_bin(&entry.table_uri, &ScanOptions::default())
        .unwrap();
    let mut stored: Vec<Vec<u8>> = rows.into_iter().map(|(k, _)| k).collect();
    let mut expected: Vec<Vec<u8>> = docs.iter().map(|d| d.id.bytes().to_vec()).collect();
    stored.sort();
    expected.sort();
    assert_eq!(stored, expected);
}

#[test]
fn test_query_returns_documents_by_ascending_distance() {
    let dir = tempdir().unwrap();
    let db = open_db(dir.path(), "main");
    db.create_collection("docs").unwrap();

    let mut rng = StdRng::seed_from_u64(11);
    let docs = documents(&mut rng, 3, 1536);
    db.insert_documents("docs", &docs).unwrap();

    let query = Query::new(3, random_unit_vector(&mut rng, 1536));
    let result = db.query_collection("docs", &query).unwrap();
    assert!(result.last_error.is_none());
    assert_eq!(result.documents.len(), 3);

    let known: Vec<String> = docs.iter().map(|d| d.id.to_hex()).collect();
    for doc in &result.documents {
        assert!(known.contains(&doc.id.to_hex()));
    }
    for pair in result.documents.windows(2) {
        let d0 = l2_sqr(&query.embedding, &pair[0].embedding);
        let d1 = l2_sqr(&query.embedding, &pair[1].embedding);
        assert!(d0 <= d1, "results not in ascending distance order");
    }
}

#[test]
fn test_min_distance_zero_means_no_filter() {
    let dir = tempdir().unwrap();
    let db = open_db(dir.path(), "main");
    db.create_collection("docs").unwrap();

    let mut rng = StdRng::seed_from_u64(13);
    let docs = documents(&mut rng, 4, 32);
    db.insert_documents("docs", &docs).unwrap();

    let mut query = Query::new(4, docs[0].embedding.clone());
    query.min_distance = 0.0;
    let all = db.query_collection("docs", &query).unwrap();
    assert_eq!(all.documents.len(), 4);

    // A tiny positive bound keeps only the exact match.
    query.min_distance = 1e-6;
    let near = db.query_collection("docs", &query).unwrap();
    assert_eq!(near.documents.len(), 1);
    assert_eq!(near.documents[0].id, docs[0].id);
}

#[test]
fn test_metadata_filters() {
    let dir = tempdir().unwrap();
    let db = open_db(dir.path(), "main");
    db.create_collection("docs").unwrap();

    let mut rng = StdRng::seed_from_u64(17);
    let mut docs = documents(&mut rng, 2, 16);
    docs[0].metadata = bson::bson!({ "lang": "en" });
    docs[1].metadata = bson::bson!({ "lang": "de" });
    db.insert_documents("docs", &docs).unwrap();

    let mut query = Query::new(2, docs[0].embedding.clone());
    query.filters = bson::doc! { "lang": "de" };
    let result = db.query_collection("docs", &query).unwrap();
    assert_eq!(result.documents.len(), 1);
    assert_eq!(result.documents[0].id, docs[1].id);
}

#[test]
fn test_empty_insert_is_success() {
    let dir = tempdir().unwrap();
    let db = open_db(dir.path(), "main");
    db.create_collection("docs").unwrap();
    db.insert_documents("docs", &[]).unwrap();
    assert_eq!(db.collection_stats("docs").unwrap().doc_count, 0);
}

#[test]
fn test_missing_collection_is_not_found() {
    let dir = tempdir().unwrap();
    let db = open_db(dir.path(), "main");
    let docs = vec![Document::new("x", vec![0.0, 1.0], Bson::Null)];
    assert!(matches!(
        db.insert_documents("ghost", &docs),
        Err(EmberError::NotFound(_))
    ));
    assert!(matches!(
        db.query_collection("ghost", &Query::new(1, vec![0.0, 1.0])),
        Err(EmberError::NotFound(_))
    ));
}

#[test]
fn test_query_before_first_insert_is_not_found() {
    // The vector index file only exists after the first insert.
    let dir = tempdir().unwrap();
    let db = open_db(dir.path(), "main");
    db.create_collection("docs").unwrap();
    assert!(matches!(
        db.query_collection("docs", &Query::new(1, vec![0.0, 1.0])),
        Err(EmberError::NotFound(_))
    ));
}

#[test]
fn test_dimension_fixed_at_first_insert() {
    let dir = tempdir().unwrap();
    let db = open_db(dir.path(), "main");
    db.create_collection("docs").unwrap();

    db.insert_documents("docs", &[Document::new("a", vec![0.0, 1.0, 0.0], Bson::Null)])
        .unwrap();
    let mismatched = vec![Document::new("b", vec![0.0, 1.0], Bson::Null)];
    assert!(matches!(
        db.insert_documents("docs", &mismatched),
        Err(EmberError::InvalidArgument(_))
    ));
    assert!(matches!(
        db.query_collection("docs", &Query::new(1, vec![1.0])),
        Err(EmberError::InvalidArgument(_))
    ));
}

#[test]
fn test_duplicate_id_overwrites_but_consumes_fresh_label() {
    let dir = tempdir().unwrap();
    let db = open_db(dir.path(), "main");
    db.create_collection("docs").unwrap();

    let mut doc = Document::new("first body", vec![0.0, 1.0], Bson::Null);
    db.insert_documents("docs", &[doc.clone()]).unwrap();
    doc.content = "second body".to_string();
    db.insert_documents("docs", &[doc.clone()]).unwrap();

    // Both labels point at the same document; the row holds the last write.
    let hex = doc.id.to_hex();
    assert_eq!(db.store().get_str(LABELS, "0").unwrap(), Some(hex.clone()));
    assert_eq!(db.store().get_str(LABELS, "1").unwrap(), Some(hex));

    let result = db
        .query_collection("docs", &Query::new(2, vec![0.0, 1.0]))
        .unwrap();
    assert!(result
        .documents
        .iter()
        .all(|d| d.content == "second body"));
}

#[test]
fn test_labels_continue_across_batches() {
    let dir = tempdir().unwrap();
    let db = open_db(dir.path(), "main");
    db.create_collection("docs").unwrap();

    let mut rng = StdRng::seed_from_u64(23);
    let first = documents(&mut rng, 3, 8);
    let second = documents(&mut rng, 2, 8);
    db.insert_documents("docs", &first).unwrap();
    db.insert_documents("docs", &second).unwrap();

    // Labels form a contiguous prefix 0..5 across the two batches.
    let all: Vec<&Document> = first.iter().chain(second.iter()).collect();
    for (label, doc) in all.iter().enumerate() {
        assert_eq!(
            db.store().get_str(LABELS, &label.to_string()).unwrap(),
            Some(doc.id.to_hex())
        );
    }
    assert_eq!(db.store().get_str(LABELS, "5").unwrap(), None);
    assert_eq!(db.collection_stats("docs").unwrap().doc_count, 5);
}

#[test]
fn test_lenient_query_skips_bad_label_and_reports_last_error() {
    let dir = tempdir().unwrap();
    let db = open_db(dir.path(), "main");
    db.create_collection("docs").unwrap();

    let mut rng = StdRng::seed_from_u64(29);
    let docs = documents(&mut rng, 3, 16);
    db.insert_documents("docs", &docs).unwrap();

    // Corrupt one mapping: hex of the wrong length.
    db.store().put_str(LABELS, "1", "deadbeef").unwrap();

    let result = db
        .query_collection("docs", &Query::new(3, docs[0].embedding.clone()))
        .unwrap();
    assert_eq!(result.documents.len(), 2);
    assert!(matches!(
        result.last_error,
        Some(EmberError::InvariantViolated(_))
    ));
}

#[test]
fn test_strict_query_surfaces_invariant_violation() {
    let dir = tempdir().unwrap();
    let store = Arc::new(Store::open(dir.path(), &OpenOptions::new().create(true)).unwrap());
    let db = Database::new(store, "main").strict_validation(true);
    db.create_db().unwrap();
    db.create_collection("docs").unwrap();

    let mut rng = StdRng::seed_from_u64(31);
    let docs = documents(&mut rng, 2, 16);
    db.insert_documents("docs", &docs).unwrap();
    db.store().put_str(LABELS, "0", "deadbeef").unwrap();

    assert!(matches!(
        db.query_collection("docs", &Query::new(2, docs[0].embedding.clone())),
        Err(EmberError::InvariantViolated(_))
    ));
}

#[test]
fn test_rebuild_label_map_repairs_mappings() {
    let dir = tempdir().unwrap();
    let db = open_db(dir.path(), "main");
    db.create_collection("docs").unwrap();

    let mut rng = StdRng::seed_from_u64(37);
    let docs = documents(&mut rng, 4, 16);
    db.insert_documents("docs", &docs).unwrap();

    // Simulate an interrupted insert: clobber the label map.
    for label in 0..4 {
        db.store().delete_str(LABELS, &label.to_string()).unwrap();
    }

    let rebuilt = db.rebuild_label_map("docs").unwrap();
    assert_eq!(rebuilt, 4);
    assert_eq!(db.collection_stats("docs").unwrap().doc_count, 4);

    // Every label resolves again; the rebuilt index answers queries.
    let result = db
        .query_collection("docs", &Query::new(4, docs[0].embedding.clone()))
        .unwrap();
    assert!(result.last_error.is_none());
    assert_eq!(result.documents.len(), 4);
}

#[test]
fn test_list_collections_in_namespace_order() {
    let dir = tempdir().unwrap();
    let db = open_db(dir.path(), "main");
    for name in ["zcoll", "acoll", "mcoll"] {
        db.create_collection(name).unwrap();
    }

    let entries = db.list_collections().unwrap();
    let namespaces: Vec<&str> = entries.iter().map(|e| e.ns.as_str()).collect();
    assert_eq!(namespaces, vec!["main.acoll", "main.mcoll", "main.zcoll"]);
}

#[test]
fn test_list_collections_excludes_other_databases() {
    let dir = tempdir().unwrap();
    let store = Arc::new(Store::open(dir.path(), &OpenOptions::new().create(true)).unwrap());
    let first = Database::new(Arc::clone(&store), "alpha");
    first.create_db().unwrap();
    first.create_collection("one").unwrap();
    let second = Database::new(store, "beta");
    second.create_db().unwrap();
    second.create_collection("two").unwrap();

    let entries = first.list_collections().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].ns, "alpha.one");
}

#[test]
fn test_create_db_rejects_empty_name() {
    let dir = tempdir().unwrap();
    let store = Arc::new(Store::open(dir.path(), &OpenOptions::new().create(true)).unwrap());
    let db = Database::new(store, "");
    assert!(matches!(
        db.create_db(),
        Err(EmberError::InvalidArgument(_))
    ));
}

#[test]
fn test_create_collection_rejects_empty_name() {
    let dir = tempdir().unwrap();
    let db = open_db(dir.path(), "main");
    assert!(matches!(
        db.create_collection(""),
        Err(EmberError::InvalidArgument(_))
    ));
}

#[test]
fn test_create_db_is_idempotent() {
    let dir = tempdir().unwrap();
    let db = open_db(dir.path(), "main");
    db.create_db().unwrap();
    db.create_db().unwrap();
}

#[test]
fn test_ivf_collection_end_to_end() {
    let dir = tempdir().unwrap();
    let store = Arc::new(Store::open(dir.path(), &OpenOptions::new().create(true)).unwrap());
    let db = Database::new(store, "main").with_index_description("IVF4,Flat");
    db.create_db().unwrap();
    db.create_collection("docs").unwrap();

    let mut rng = StdRng::seed_from_u64(41);
    let docs = documents(&mut rng, 64, 8);
    db.insert_documents("docs", &docs).unwrap();
    assert_eq!(db.collection_stats("docs").unwrap().doc_count, 64);

    let result = db
        .query_collection("docs", &Query::new(5, docs[10].embedding.clone()))
        .unwrap();
    assert!(result.last_error.is_none());
    assert_eq!(result.documents.len(), 5);
    // The identical vector comes back first.
    assert_eq!(result.documents[0].id, docs[10].id);
}

#[test]
fn test_all_zero_query_is_not_an_error() {
    let dir = tempdir().unwrap();
    let db = open_db(dir.path(), "main");
    db.create_collection("docs").unwrap();

    let mut rng = StdRng::seed_from_u64(43);
    let docs = documents(&mut rng, 2, 8);
    db.insert_documents("docs", &docs).unwrap();

    // top_k larger than the collection produces -1 slots, which are skipped.
    let result = db
        .query_collection("docs", &Query::new(10, vec![0.0; 8]))
        .unwrap();
    assert!(result.last_error.is_none());
    assert_eq!(result.documents.len(), 2);
}
