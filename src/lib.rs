// Copyright (c) 2025 EmberDB Contributors
// Licensed under the EmberDB License. See LICENSE file for details.

//! # EmberDB
//!
//! An embeddable document + vector database written in Rust.
//!
//! EmberDB stores BSON documents that carry a dense `f32` embedding and
//! answers top-K nearest-neighbor queries combined with durable document
//! lookup. A database lives in one directory; collections own a document
//! table and a vector-index sidecar file.
//!
//! ## Components
//!
//! | Component | Purpose |
//! |-----------|---------|
//! | [`store::Store`] | Ordered key-value store over LMDB: point ops, scans, nearest-key probes |
//! | [`store::RangeCursor`] | Batched streaming iteration over `[start, end)` |
//! | [`vector::AnnIndex`] | Per-collection ANN index (`Flat`, `IVF<n>,Flat`) |
//! | [`Database`] | Collection coordinator: catalog, stats, label map, insert/query pipeline |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use emberdb::store::{OpenOptions, Store};
//! use emberdb::{Database, Document, Query, Result};
//!
//! fn main() -> Result<()> {
//!     let store = Arc::new(Store::open(
//!         "ember_home".as_ref(),
//!         &OpenOptions::new().create(true),
//!     )?);
//!
//!     let db = Database::new(store.clone(), "tenants");
//!     db.create_db()?;
//!     db.create_collection("notes")?;
//!
//!     // Insert documents carrying embeddings.
//!     let docs = vec![
//!         Document::new("first note", vec![0.1, 0.7, 0.2], bson::Bson::Null),
//!         Document::new("second note", vec![0.9, 0.1, 0.3], bson::Bson::Null),
//!     ];
//!     db.insert_documents("notes", &docs)?;
//!
//!     // Retrieve the nearest documents by vector similarity.
//!     let hits = db.query_collection("notes", &Query::new(2, vec![0.1, 0.7, 0.2]))?;
//!     for doc in &hits.documents {
//!         println!("{}: {}", doc.id.to_hex(), doc.content);
//!     }
//!
//!     store.close()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Ordered store
//!
//! The store is usable on its own as a durable ordered map with cursor-based
//! range iteration:
//!
//! ```rust,no_run
//! use emberdb::store::{OpenOptions, Store, TableSchema};
//!
//! fn main() -> emberdb::Result<()> {
//!     let store = Store::open("kv_home".as_ref(), &OpenOptions::new().create(true))?;
//!     store.create_table("events", TableSchema::string())?;
//!     store.put_str("events", "2025-01-03", "deploy")?;
//!     store.put_str("events", "2025-02-14", "incident")?;
//!
//!     let mut cursor = store.scan_range_str("events", "2025-01", "2025-02")?;
//!     while cursor.next() {
//!         let (day, what) = cursor.current()?;
//!         println!("{day}: {what}");
//!     }
//!     cursor.close()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Concurrency
//!
//! Point operations may run from any thread; each executes in its own engine
//! transaction. Range cursors are single-owner. Per-collection index access
//! is serialized by the coordinator, so concurrent inserts and queries on the
//! same collection are safe (but insert batches are not atomic; see
//! [`Database::rebuild_label_map`] for the repair path).

pub mod catalog;
pub mod db;
pub mod error;
pub mod store;
pub mod types;
pub mod vector;

pub use db::{Database, QueryResult};
pub use error::{EmberError, Result};
pub use types::{Document, Query};
