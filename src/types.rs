// Copyright (c) 2025 EmberDB Contributors
// Licensed under the EmberDB License. See LICENSE file for details.

//! Core data types: documents and queries.

use bson::oid::ObjectId;
use bson::Bson;
use serde::{Deserialize, Serialize};

/// A stored document: content, a dense embedding, and free-form metadata.
///
/// Documents are keyed by the raw 12 bytes of their id and stored as BSON in
/// their collection's table. The embedding length is fixed per collection at
/// first insert.
///
/// # Examples
///
/// ```rust
/// use emberdb::Document;
///
/// let doc = Document::new(
///     "the quick brown fox",
///     vec![0.1, 0.4, 0.2, 0.7],
///     bson::bson!({ "lang": "en" }),
/// );
/// assert_eq!(doc.id.to_hex().len(), 24);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Opaque 12-byte id, rendered as 24-hex.
    #[serde(rename = "_id")]
    pub id: ObjectId,
    /// Document body.
    pub content: String,
    /// Dense embedding. Length is fixed per collection.
    #[serde(default)]
    pub embedding: Vec<f32>,
    /// Arbitrary BSON metadata.
    #[serde(default = "default_metadata")]
    pub metadata: Bson,
}

fn default_metadata() -> Bson {
    Bson::Null
}

impl Document {
    /// A document with a freshly allocated id.
    pub fn new(content: impl Into<String>, embedding: Vec<f32>, metadata: Bson) -> Self {
        Self {
            id: ObjectId::new(),
            content: content.into(),
            embedding,
            metadata,
        }
    }
}

/// A top-K similarity query against one collection.
#[derive(Debug, Clone)]
pub struct Query {
    /// Number of nearest neighbors requested.
    pub top_k: usize,
    /// Distance filter. `0.0` means no filter; a positive value is an upper
    /// bound on the distance of returned documents.
    pub min_distance: f32,
    /// Query embedding. Must match the collection's dimension.
    pub embedding: Vec<f32>,
    /// Exact-match predicates on metadata fields. Empty matches everything.
    pub filters: bson::Document,
}

impl Query {
    /// A query with no distance filter and no metadata predicates.
    pub fn new(top_k: usize, embedding: Vec<f32>) -> Self {
        Self {
            top_k,
            min_distance: 0.0,
            embedding,
            filters: bson::Document::new(),
        }
    }
}
