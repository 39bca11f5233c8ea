// Copyright (c) 2025 EmberDB Contributors
// Licensed under the EmberDB License. See LICENSE file for details.

//! Catalog, stats, and label-map schema.
//!
//! Three tables inside the store carry all database metadata:
//!
//! | table | key | value |
//! |-------|-----|-------|
//! | `catalog` | `db:<name>` or `<db>.<coll>` | BSON catalog entry |
//! | `stats` | `<db>.<coll>` | BSON [`CollectionStats`] |
//! | `labels` | decimal vector label | 24-hex document id |
//!
//! Catalog and stats values are BSON so they tolerate unknown fields across
//! versions; decoders here never rely on field order.

use std::collections::HashMap;

use bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

/// Catalog table: database and collection entries.
pub const CATALOG: &str = "catalog";

/// Stats table: per-collection counters.
pub const STATS: &str = "stats";

/// Label map: vector label (decimal string) to document id (24-hex).
pub const LABELS: &str = "labels";

/// Catalog key of a database entry: `db:<name>`.
pub fn db_key(name: &str) -> String {
    format!("db:{name}")
}

/// Namespace of a collection: `<db>.<coll>`. Used as both its catalog key and
/// its stats key.
pub fn namespace(db: &str, collection: &str) -> String {
    format!("{db}.{collection}")
}

/// Per-database catalog entry, stored under [`db_key`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbCatalogEntry {
    /// Opaque database id, rendered as 24-hex.
    #[serde(rename = "_uuid")]
    pub uuid: String,
    /// Database name. Never empty.
    pub name: String,
    /// Free-form configuration pairs.
    #[serde(default)]
    pub config: HashMap<String, String>,
}

/// A secondary-index definition. Reserved: round-tripped through the catalog
/// but not consulted by the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionIndex {
    #[serde(rename = "_id")]
    pub id: String,
    /// Field name to sort order (1 ascending, -1 descending).
    #[serde(default)]
    pub keys: HashMap<String, i32>,
    pub name: String,
    pub ns: String,
    #[serde(rename = "type")]
    pub index_type: String,
    #[serde(rename = "v")]
    pub version: i32,
}

/// Per-collection catalog entry, stored under [`namespace`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionCatalogEntry {
    /// Collection id; also part of the physical table name.
    #[serde(rename = "_id")]
    pub id: ObjectId,
    /// `<db>.<coll>`.
    pub ns: String,
    /// Name of the store table holding the collection's documents.
    pub table_uri: String,
    /// Filesystem path of the collection's vector index sidecar file.
    pub vector_index_path: String,
    /// Reserved secondary-index definitions.
    #[serde(default)]
    pub indexes: Vec<CollectionIndex>,
    pub created_at: bson::DateTime,
    pub updated_at: bson::DateTime,
}

/// Per-collection counters, stored in [`STATS`] under [`namespace`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectionStats {
    /// Number of documents in the collection's table.
    pub doc_count: u64,
    /// On-disk size of the vector index file after the most recent flush,
    /// in bytes.
    pub vector_index_size: f64,
}
