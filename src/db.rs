// Copyright (c) 2025 EmberDB Contributors
// Licensed under the EmberDB License. See LICENSE file for details.

//! Collection coordinator: composes the store and the vector indexes into
//! the insert and query pipeline.
//!
//! A [`Database`] is an explicit value owned by the caller; it borrows
//! nothing global. It wraps a shared [`Store`] and adds:
//!
//! - the catalog/stats/label-map bookkeeping of [`crate::catalog`]
//! - one ANN index per collection, loaded from and flushed to a sidecar file
//! - the invariant linking vector labels to document ids
//!
//! # Insert/query pipeline
//!
//! On insert, each document is written to its collection table under the raw
//! 12 bytes of its id, its embedding is appended to the collection's index,
//! and the assigned label (`ntotal - 1` after the append) is mapped to the
//! document id in the label table. On query, labels come back from the index
//! search, are resolved through the label table, and the documents are
//! fetched and decoded from the collection table.
//!
//! Inserts are **not atomic**: a failure mid-batch can leave the collection
//! table, the in-memory index, the label map, and the stats entry mutually
//! inconsistent (the index file and stats are only flushed after the loop).
//! [`Database::rebuild_label_map`] repairs a collection by re-deriving the
//! index and label map from the document table.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use emberdb::store::{OpenOptions, Store};
//! use emberdb::{Database, Document, Query};
//!
//! fn main() -> emberdb::Result<()> {
//!     let store = Arc::new(Store::open(
//!         "ember_home".as_ref(),
//!         &OpenOptions::new().create(true),
//!     )?);
//!     let db = Database::new(store, "tenants");
//!     db.create_db()?;
//!     db.create_collection("notes")?;
//!
//!     let doc = Document::new("hello", vec![0.1, 0.2, 0.3], bson::Bson::Null);
//!     db.insert_documents("notes", &[doc])?;
//!
//!     let hits = db.query_collection("notes", &Query::new(3, vec![0.1, 0.2, 0.3]))?;
//!     println!("{} documents", hits.documents.len());
//!     Ok(())
//! }
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bson::oid::ObjectId;
use bson::Bson;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::catalog::{
    db_key, namespace, CollectionCatalogEntry, CollectionStats, DbCatalogEntry, CATALOG, LABELS,
    STATS,
};
use crate::error::{EmberError, Result};
use crate::store::{Store, TableSchema};
use crate::types::{Document, Query};
use crate::vector::{index_factory, read_index, AnnIndex, Metric};

/// Zero value of an [`ObjectId`]; never a legal document id.
const ZERO_OID: [u8; 12] = [0u8; 12];

/// Outcome of a lenient query: the accumulated documents plus the last
/// per-result failure, if any result was skipped.
#[derive(Debug)]
pub struct QueryResult {
    /// Documents in ascending distance order.
    pub documents: Vec<Document>,
    /// The last per-result failure that was logged and skipped.
    pub last_error: Option<EmberError>,
}

/// Coordinator for one named database inside a [`Store`].
pub struct Database {
    store: Arc<Store>,
    name: String,
    index_description: String,
    strict: bool,
    index_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Database {
    /// A coordinator for database `name` on the given store.
    pub fn new(store: Arc<Store>, name: impl Into<String>) -> Self {
        Self {
            store,
            name: name.into(),
            index_description: "Flat".to_string(),
            strict: false,
            index_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Recipe string for new collection indexes (default `"Flat"`).
    /// `IVF<n>,Flat` recipes are trained on the first insert batch.
    pub fn with_index_description(mut self, description: impl Into<String>) -> Self {
        self.index_description = description.into();
        self
    }

    /// In strict mode, query-path validation failures (bad label-map entries,
    /// missing or undecodable documents) abort the query with
    /// [`EmberError::InvariantViolated`] instead of being logged and skipped.
    pub fn strict_validation(mut self, yes: bool) -> Self {
        self.strict = yes;
        self
    }

    /// The database name this coordinator serves.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Ensures the catalog, stats, and label tables exist. Idempotent.
    fn ensure_tables(&self) -> Result<()> {
        self.store.create_table(CATALOG, TableSchema::binary())?;
        self.store.create_table(STATS, TableSchema::binary())?;
        self.store.create_table(LABELS, TableSchema::string())?;
        Ok(())
    }

    /// Creates (or re-creates, idempotently) the database catalog entry.
    ///
    /// Fails with [`EmberError::InvalidArgument`] on an empty name.
    pub fn create_db(&self) -> Result<()> {
        self.ensure_tables()?;
        if self.name.is_empty() {
            return Err(EmberError::InvalidArgument(
                "database name cannot be empty".into(),
            ));
        }
        let entry = DbCatalogEntry {
            uuid: ObjectId::new().to_hex(),
            name: self.name.clone(),
            config: HashMap::from([("index".to_string(), self.index_description.clone())]),
        };
        let raw = bson::to_vec(&entry)?;
        self.store
            .put_bin_with_str_key(CATALOG, &db_key(&self.name), &raw)
    }

    /// Creates a collection: a fresh id, a physical document table, a catalog
    /// entry, and a zeroed stats entry.
    pub fn create_collection(&self, collection: &str) -> Result<()> {
        self.ensure_tables()?;
        if collection.is_empty() {
            return Err(EmberError::InvalidArgument(
                "collection name cannot be empty".into(),
            ));
        }
        let id = ObjectId::new();
        let table_uri = format!("collection-{}-{}", id.to_hex(), self.name);
        self.store.create_table(&table_uri, TableSchema::binary())?;

        let now = bson::DateTime::now();
        let entry = CollectionCatalogEntry {
            id,
            ns: namespace(&self.name, collection),
            table_uri,
            vector_index_path: self.index_path(collection).to_string_lossy().into_owned(),
            indexes: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        let raw = bson::to_vec(&entry)?;
        self.store.put_bin_with_str_key(CATALOG, &entry.ns, &raw)?;

        let stats = CollectionStats::default();
        self.store
            .put_bin_with_str_key(STATS, &entry.ns, &bson::to_vec(&stats)?)
    }

    /// Inserts documents in order, appending their embeddings to the
    /// collection's vector index and extending the label map and stats.
    ///
    /// Duplicate ids overwrite the stored document but still consume a fresh
    /// label; labels are never reused. Empty input is a success. The batch is
    /// not atomic; see the module docs.
    pub fn insert_documents(&self, collection: &str, documents: &[Document]) -> Result<()> {
        if documents.is_empty() {
            return Ok(());
        }
        let entry = self.collection_entry(collection)?;
        let lock = self.collection_lock(&entry.ns);
        let _guard = lock.lock();

        let index_path = PathBuf::from(&entry.vector_index_path);
        let mut index = self.load_or_create_index(&index_path, documents)?;
        for document in documents {
            if document.embedding.len() != index.dim() {
                return Err(EmberError::InvalidArgument(format!(
                    "embedding dimension {} does not match collection dimension {}",
                    document.embedding.len(),
                    index.dim()
                )));
            }
        }

        let mut stats = self.load_stats(&entry.ns)?;
        for document in documents {
            let raw = bson::to_vec(document)?;
            self.store
                .put_bin(&entry.table_uri, &document.id.bytes(), &raw)?;
            index.add(&document.embedding, 1)?;
            let label = index.ntotal() - 1;
            self.store
                .put_str(LABELS, &label.to_string(), &document.id.to_hex())?;
            stats.doc_count += 1;
        }

        index.write_to_file(&index_path)?;
        stats.vector_index_size = fs::metadata(&index_path)?.len() as f64;
        self.store
            .put_bin_with_str_key(STATS, &entry.ns, &bson::to_vec(&stats)?)?;
        debug!(
            collection = %entry.ns,
            inserted = documents.len(),
            ntotal = index.ntotal(),
            "insert batch flushed"
        );
        Ok(())
    }

    /// Answers a top-K similarity query.
    ///
    /// Results come back in ascending distance order (ties broken by
    /// ascending label). In lenient mode (the default), per-result failures
    /// are logged and skipped and the last one is reported alongside the
    /// partial result; in strict mode they abort the query.
    pub fn query_collection(&self, collection: &str, query: &Query) -> Result<QueryResult> {
        let entry = self.collection_entry(collection)?;
        let lock = self.collection_lock(&entry.ns);
        let _guard = lock.lock();

        let index = read_index(Path::new(&entry.vector_index_path))?;
        if query.embedding.len() != index.dim() {
            return Err(EmberError::InvalidArgument(format!(
                "query embedding dimension {} does not match collection dimension {}",
                query.embedding.len(),
                index.dim()
            )));
        }

        let (distances, labels) = index.search(&query.embedding, 1, query.top_k)?;
        let mut ranked: Vec<(f32, i64)> = distances.into_iter().zip(labels).collect();
        ranked.sort_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.1.cmp(&b.1))
        });

        let mut documents = Vec::new();
        let mut last_error = None;
        for (distance, label) in ranked {
            // Unfilled result slots are not an error.
            if label < 0 {
                continue;
            }
            match self.resolve_result(&entry, label, distance, query) {
                Ok(Some(document)) => documents.push(document),
                Ok(None) => {}
                Err(err) if self.strict => return Err(err),
                Err(err) => {
                    warn!(collection = %entry.ns, label, %err, "skipping query result");
                    last_error = Some(err);
                }
            }
        }
        Ok(QueryResult {
            documents,
            last_error,
        })
    }

    /// Resolves one search hit to a document, enforcing the label-map
    /// invariants along the way. `Ok(None)` means the document was filtered
    /// out, not that resolution failed.
    fn resolve_result(
        &self,
        entry: &CollectionCatalogEntry,
        label: i64,
        distance: f32,
        query: &Query,
    ) -> Result<Option<Document>> {
        let hex = self
            .store
            .get_str(LABELS, &label.to_string())?
            .ok_or_else(|| {
                EmberError::InvariantViolated(format!("label {label} has no document mapping"))
            })?;
        if hex.len() != 24 {
            return Err(EmberError::InvariantViolated(format!(
                "label {label} maps to id hex of length {}, expected 24",
                hex.len()
            )));
        }
        let id = ObjectId::parse_str(&hex).map_err(|_| {
            EmberError::InvariantViolated(format!("label {label} maps to invalid id hex {hex:?}"))
        })?;
        if id.bytes() == ZERO_OID {
            return Err(EmberError::InvariantViolated(format!(
                "label {label} maps to the zero document id"
            )));
        }

        let raw = self
            .store
            .get_bin(&entry.table_uri, &id.bytes())?
            .ok_or_else(|| {
                EmberError::InvariantViolated(format!(
                    "label {label} points at missing document {hex}"
                ))
            })?;
        let document: Document = bson::from_slice(&raw)?;

        if !(query.min_distance == 0.0 || distance < query.min_distance) {
            return Ok(None);
        }
        if !matches_filters(&document, &query.filters) {
            return Ok(None);
        }
        Ok(Some(document))
    }

    /// Lists this database's collections in namespace order by range-scanning
    /// the catalog over `[<db>., <db>/)`.
    pub fn list_collections(&self) -> Result<Vec<CollectionCatalogEntry>> {
        self.ensure_tables()?;
        let lower = format!("{}.", self.name);
        // '/' is the successor byte of '.', so this bound covers exactly the
        // `<db>.` prefix.
        let upper = format!("{}/", self.name);
        let mut cursor = self
            .store
            .scan_range(CATALOG, lower.as_bytes(), upper.as_bytes())?;
        let mut entries = Vec::new();
        while cursor.next() {
            let (_, raw) = cursor.current()?;
            entries.push(bson::from_slice(&raw)?);
        }
        if let Some(err) = cursor.take_err() {
            return Err(err);
        }
        cursor.close()?;
        Ok(entries)
    }

    /// Rebuilds a collection's vector index, label map, and stats from its
    /// document table.
    ///
    /// This is the repair path for interrupted inserts: documents are read in
    /// key order, their embeddings re-added to a fresh index, and the label
    /// map rewritten to match. Returns the number of documents reindexed.
    pub fn rebuild_label_map(&self, collection: &str) -> Result<u64> {
        let entry = self.collection_entry(collection)?;
        let lock = self.collection_lock(&entry.ns);
        let _guard = lock.lock();

        // One pass over the table gathers ids and embeddings in key order;
        // IVF recipes need the full set up front for training.
        let mut ids = Vec::new();
        let mut embeddings: Vec<Vec<f32>> = Vec::new();
        let mut cursor = self.store.scan_range(&entry.table_uri, b"", b"")?;
        while cursor.next() {
            let (_, raw) = cursor.current()?;
            let document: Document = bson::from_slice(&raw)?;
            ids.push(document.id);
            embeddings.push(document.embedding);
        }
        if let Some(err) = cursor.take_err() {
            return Err(err);
        }
        cursor.close()?;

        let mut stats = self.load_stats(&entry.ns).unwrap_or_default();
        if ids.is_empty() {
            stats.doc_count = 0;
            self.store
                .put_bin_with_str_key(STATS, &entry.ns, &bson::to_vec(&stats)?)?;
            return Ok(0);
        }

        let dim = embeddings[0].len();
        let mut index = index_factory(dim, &self.index_description, Metric::L2)?;
        if !index.is_trained() {
            let packed: Vec<f32> = embeddings.iter().flatten().copied().collect();
            index.train(&packed, embeddings.len())?;
        }
        for (id, embedding) in ids.iter().zip(&embeddings) {
            if embedding.len() != dim {
                return Err(EmberError::InvariantViolated(format!(
                    "document {} has embedding dimension {}, collection uses {}",
                    id.to_hex(),
                    embedding.len(),
                    dim
                )));
            }
            index.add(embedding, 1)?;
            let label = index.ntotal() - 1;
            self.store
                .put_str(LABELS, &label.to_string(), &id.to_hex())?;
        }

        let index_path = PathBuf::from(&entry.vector_index_path);
        index.write_to_file(&index_path)?;
        stats.doc_count = ids.len() as u64;
        stats.vector_index_size = fs::metadata(&index_path)?.len() as f64;
        self.store
            .put_bin_with_str_key(STATS, &entry.ns, &bson::to_vec(&stats)?)?;
        debug!(
            collection = %entry.ns,
            reindexed = ids.len(),
            "label map rebuilt"
        );
        Ok(ids.len() as u64)
    }

    /// The collection's stats entry.
    pub fn collection_stats(&self, collection: &str) -> Result<CollectionStats> {
        let entry = self.collection_entry(collection)?;
        self.load_stats(&entry.ns)
    }

    /// The collection's catalog entry.
    pub fn collection_entry(&self, collection: &str) -> Result<CollectionCatalogEntry> {
        let ns = namespace(&self.name, collection);
        let raw = self
            .store
            .get_bin_with_str_key(CATALOG, &ns)?
            .ok_or_else(|| {
                EmberError::NotFound(format!("collection {collection:?} is not in the catalog"))
            })?;
        Ok(bson::from_slice(&raw)?)
    }

    fn load_stats(&self, ns: &str) -> Result<CollectionStats> {
        let raw = self
            .store
            .get_bin_with_str_key(STATS, ns)?
            .ok_or_else(|| EmberError::NotFound(format!("stats entry for {ns}")))?;
        Ok(bson::from_slice(&raw)?)
    }

    /// Loads the collection's index, or builds one sized to the first batch.
    ///
    /// An absent or unreadable file is treated as "no index yet": a fresh one
    /// is built from the configured recipe, trained on the batch when the
    /// recipe requires it, and persisted immediately so the sidecar exists
    /// even if a later step fails.
    fn load_or_create_index(&self, path: &Path, documents: &[Document]) -> Result<AnnIndex> {
        match read_index(path) {
            Ok(index) => Ok(index),
            Err(err) => {
                debug!(path = %path.display(), %err, "building fresh vector index");
                let dim = documents[0].embedding.len();
                if dim == 0 {
                    return Err(EmberError::InvalidArgument(
                        "documents carry empty embeddings".into(),
                    ));
                }
                let mut index = index_factory(dim, &self.index_description, Metric::L2)?;
                if !index.is_trained() {
                    let packed: Vec<f32> = documents
                        .iter()
                        .flat_map(|d| d.embedding.iter().copied())
                        .collect();
                    index.train(&packed, packed.len() / dim)?;
                }
                index.write_to_file(path)?;
                Ok(index)
            }
        }
    }

    fn index_path(&self, collection: &str) -> PathBuf {
        self.store.home().join(format!("{collection}.index"))
    }

    fn collection_lock(&self, ns: &str) -> Arc<Mutex<()>> {
        let mut locks = self.index_locks.lock();
        locks.entry(ns.to_string()).or_default().clone()
    }
}

/// Exact-match metadata predicates: every filter pair must be present and
/// equal in the document's metadata document.
fn matches_filters(document: &Document, filters: &bson::Document) -> bool {
    if filters.is_empty() {
        return true;
    }
    let metadata = match &document.metadata {
        Bson::Document(doc) => doc,
        _ => return false,
    };
    filters
        .iter()
        .all(|(key, value)| metadata.get(key) == Some(value))
}
