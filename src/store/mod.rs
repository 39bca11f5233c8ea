// Copyright (c) 2025 EmberDB Contributors
// Licensed under the EmberDB License. See LICENSE file for details.

//! Ordered key-value store backed by LMDB.
//!
//! This module wraps a per-database LMDB environment and exposes the durable
//! ordered-map surface the rest of the crate is built on:
//!
//! - [`Store`] - connection ownership, table creation, point operations
//! - [`RangeCursor`] / [`StrRangeCursor`] - bounded forward range iteration
//!   (see [`range`])
//! - [`Relation`] - the result of a nearest-key probe
//!
//! Tables are independent named databases inside one environment. Keys within
//! a table are ordered lexicographically by unsigned byte value. Each table
//! carries a [`TableSchema`] describing its key and value domains; schemas are
//! persisted in a reserved `__schema` table so they survive reopen.
//!
//! # Sessions
//!
//! Every operation runs inside its own engine transaction, acquired and
//! released within the call. After a `put` returns, a subsequent `get` on any
//! thread observes the write. Range cursors hold one transaction per batch
//! fetch; see [`range`] for the cursor lifetime rules.
//!
//! # Example
//!
//! ```rust,no_run
//! use emberdb::store::{OpenOptions, Store, TableSchema};
//!
//! fn main() -> emberdb::Result<()> {
//!     let store = Store::open("ember_home".as_ref(), &OpenOptions::new().create(true))?;
//!     store.create_table("fruit", TableSchema::string())?;
//!     store.put_str("fruit", "apple", "red")?;
//!     assert_eq!(store.get_str("fruit", "apple")?.as_deref(), Some("red"));
//!     store.close()?;
//!     Ok(())
//! }
//! ```

pub(crate) mod batch;
pub mod range;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use heed3::types::{Bytes, Str};
use heed3::{Database, Env, EnvFlags, EnvOpenOptions};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{EmberError, Result};
use batch::Framing;
pub use range::{RangeCursor, RangeOptions, StrRangeCursor};

/// Default number of rows returned by [`Store::scan`] when no limit is given.
pub const DEFAULT_SCAN_LIMIT: usize = 4096;

/// Hard upper bound on a single scan, regardless of the requested limit.
pub const MAX_SCAN_LIMIT: usize = 65_536;

/// Reserved table holding persisted [`TableSchema`] entries.
const SCHEMA_TABLE: &str = "__schema";

/// Maximum number of named tables per environment.
const MAX_TABLES: u32 = 256;

/// Maximum concurrent reader slots. Range cursors take one per batch fetch.
const MAX_READERS: u32 = 256;

/// Default engine map size (the cache/address budget) when no
/// `cache_size` option is given: 1 GiB.
const DEFAULT_MAP_SIZE: usize = 1 << 30;

// =============================================================================
// Schemas and options
// =============================================================================

/// Key domain of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyKind {
    /// Valid UTF-8 with no embedded NUL.
    Str,
    /// Arbitrary non-empty byte sequence.
    Bin,
}

/// Value domain of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueKind {
    /// Valid UTF-8. Empty values are permitted.
    Str,
    /// Arbitrary non-empty byte sequence.
    Bin,
}

/// Key and value domains of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Domain of the table's keys.
    pub key_kind: KeyKind,
    /// Domain of the table's values.
    pub value_kind: ValueKind,
}

impl TableSchema {
    /// Schema with binary keys and binary values.
    pub fn binary() -> Self {
        Self {
            key_kind: KeyKind::Bin,
            value_kind: ValueKind::Bin,
        }
    }

    /// Schema with string keys and string values.
    pub fn string() -> Self {
        Self {
            key_kind: KeyKind::Str,
            value_kind: ValueKind::Str,
        }
    }

    fn framing(&self) -> Framing {
        match self.key_kind {
            KeyKind::Bin => Framing::Counted,
            KeyKind::Str => Framing::Plain,
        }
    }
}

/// Options accepted by [`Store::open`].
///
/// Recognized string options (see [`OpenOptions::parse`]):
///
/// | option | effect |
/// |--------|--------|
/// | `create` | create the home directory if absent |
/// | `cache_size=<bytes>` | advisory cache budget, mapped to the engine map size |
/// | `no_sync` | skip fsync on commit (throughput over durability) |
///
/// Unknown options are recorded and passed through to the engine layer, which
/// currently ignores them.
#[derive(Debug, Clone)]
pub struct OpenOptions {
    create: bool,
    cache_size: Option<usize>,
    sync_on_write: bool,
    raw: Vec<String>,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            create: false,
            cache_size: None,
            sync_on_write: true,
            raw: Vec::new(),
        }
    }
}

impl OpenOptions {
    /// Options with all defaults: no create, default cache, sync on write.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the home directory if it does not exist.
    pub fn create(mut self, yes: bool) -> Self {
        self.create = yes;
        self
    }

    /// Advisory cache budget in bytes, mapped to the engine map size.
    pub fn cache_size(mut self, bytes: usize) -> Self {
        self.cache_size = Some(bytes);
        self
    }

    /// When `false`, commits skip fsync. Faster, weaker durability.
    pub fn sync_on_write(mut self, yes: bool) -> Self {
        self.sync_on_write = yes;
        self
    }

    /// Parses a string option set, e.g. `["create", "cache_size=1048576"]`.
    ///
    /// Unknown options are not an error; they are retained and passed through.
    pub fn parse<'a>(options: impl IntoIterator<Item = &'a str>) -> Result<Self> {
        let mut out = Self::default();
        for opt in options {
            match opt {
                "create" => out.create = true,
                "no_sync" => out.sync_on_write = false,
                other => {
                    if let Some(bytes) = other.strip_prefix("cache_size=") {
                        let parsed = bytes.parse::<usize>().map_err(|_| {
                            EmberError::InvalidArgument(format!(
                                "cache_size is not a byte count: {bytes:?}"
                            ))
                        })?;
                        out.cache_size = Some(parsed);
                    } else {
                        out.raw.push(other.to_string());
                    }
                }
            }
        }
        Ok(out)
    }
}

/// Options for [`Store::scan`] and [`Store::scan_bin`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanOptions {
    /// Maximum rows to return. `None` means [`DEFAULT_SCAN_LIMIT`]; any value
    /// is clamped to [`MAX_SCAN_LIMIT`]. An explicit 0 returns nothing.
    pub limit: Option<usize>,
}

impl ScanOptions {
    fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_SCAN_LIMIT).min(MAX_SCAN_LIMIT)
    }
}

/// How the key returned by a nearest-key probe compares to the probe key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    /// The returned key is the greatest key below the probe.
    Below,
    /// The returned key equals the probe.
    Equal,
    /// The returned key is the smallest key above the probe.
    Above,
}

// =============================================================================
// Store
// =============================================================================

#[derive(Clone, Copy)]
pub(crate) struct TableHandle {
    pub(crate) db: Database<Bytes, Bytes>,
    pub(crate) schema: TableSchema,
}

struct Inner {
    env: Env,
    tables: HashMap<String, TableHandle>,
    schema_db: Database<Str, Bytes>,
}

/// A durable ordered map per table, owned by the caller.
///
/// One `Store` owns one database home directory. Point operations may be
/// issued concurrently from multiple threads; each runs in its own engine
/// transaction. [`Store::close`] is idempotent, and operations on a closed
/// store fail with [`EmberError::NotOpen`].
pub struct Store {
    home: PathBuf,
    inner: RwLock<Option<Inner>>,
}

impl Store {
    /// Opens (or, with the `create` option, creates) a database home.
    ///
    /// Acquires exclusive ownership of the directory for this process.
    /// Opening the same home twice in one process fails with
    /// [`EmberError::AlreadyOpen`].
    pub fn open(home: &Path, opts: &OpenOptions) -> Result<Store> {
        if !home.exists() {
            if opts.create {
                fs::create_dir_all(home)?;
            } else {
                return Err(EmberError::NotFound(format!(
                    "database home {} does not exist (missing \"create\" option?)",
                    home.display()
                )));
            }
        }

        let map_size = opts.cache_size.unwrap_or(DEFAULT_MAP_SIZE);
        let mut builder = EnvOpenOptions::new();
        builder
            .map_size(map_size)
            .max_dbs(MAX_TABLES)
            .max_readers(MAX_READERS);
        if !opts.sync_on_write {
            unsafe {
                builder.flags(EnvFlags::NO_SYNC);
            }
        }
        let env = unsafe { builder.open(home)? };

        let mut wtxn = env.write_txn()?;
        let schema_db: Database<Str, Bytes> = env
            .database_options()
            .types::<Str, Bytes>()
            .name(SCHEMA_TABLE)
            .create(&mut wtxn)?;

        // Reload the persisted schema registry and reopen every table it
        // names, so handles are valid before the first operation.
        let mut persisted: Vec<(String, TableSchema)> = Vec::new();
        for item in schema_db.iter(&wtxn)? {
            let (name, raw) = item?;
            let schema: TableSchema = bincode::deserialize(raw)?;
            persisted.push((name.to_string(), schema));
        }
        let mut tables = HashMap::new();
        for (name, schema) in persisted {
            let db = env
                .database_options()
                .types::<Bytes, Bytes>()
                .name(&name)
                .create(&mut wtxn)?;
            tables.insert(name, TableHandle { db, schema });
        }
        wtxn.commit()?;

        Ok(Store {
            home: home.to_path_buf(),
            inner: RwLock::new(Some(Inner {
                env,
                tables,
                schema_db,
            })),
        })
    }

    /// The database home directory this store was opened on.
    pub fn home(&self) -> &Path {
        &self.home
    }

    /// Closes the store, releasing the environment.
    ///
    /// Idempotent. Outstanding range cursors keep their own engine reference
    /// and stay usable until closed; the environment is fully released once
    /// the last of them is gone.
    pub fn close(&self) -> Result<()> {
        let mut guard = self.inner.write();
        *guard = None;
        Ok(())
    }

    /// Creates a table if absent. Re-creating an existing table with the same
    /// schema is a no-op; a different schema is rejected.
    pub fn create_table(&self, uri: &str, schema: TableSchema) -> Result<()> {
        if uri.is_empty() {
            return Err(EmberError::InvalidArgument("table name cannot be empty".into()));
        }
        if uri.starts_with("__") {
            return Err(EmberError::InvalidArgument(format!(
                "table name {uri:?} is reserved"
            )));
        }
        let mut guard = self.inner.write();
        let inner = guard.as_mut().ok_or(EmberError::NotOpen)?;
        if let Some(existing) = inner.tables.get(uri) {
            if existing.schema != schema {
                return Err(EmberError::InvalidArgument(format!(
                    "table {uri:?} already exists with a different schema"
                )));
            }
            return Ok(());
        }
        let mut wtxn = inner.env.write_txn()?;
        let db = inner
            .env
            .database_options()
            .types::<Bytes, Bytes>()
            .name(uri)
            .create(&mut wtxn)?;
        inner
            .schema_db
            .put(&mut wtxn, uri, &bincode::serialize(&schema)?)?;
        wtxn.commit()?;
        inner.tables.insert(uri.to_string(), TableHandle { db, schema });
        Ok(())
    }

    /// Returns the schema a table was created with.
    pub fn table_schema(&self, table: &str) -> Result<TableSchema> {
        Ok(self.handle(table)?.1.schema)
    }

    fn handle(&self, table: &str) -> Result<(Env, TableHandle)> {
        let guard = self.inner.read();
        let inner = guard.as_ref().ok_or(EmberError::NotOpen)?;
        let handle = inner
            .tables
            .get(table)
            .ok_or_else(|| EmberError::NotFound(format!("table {table:?}")))?;
        Ok((inner.env.clone(), *handle))
    }

    // =========================================================================
    // String key/value operations
    // =========================================================================

    /// Inserts or replaces a string key/value pair. Empty values are allowed.
    pub fn put_str(&self, table: &str, key: &str, value: &str) -> Result<()> {
        check_str_key(key)?;
        let (env, handle) = self.handle(table)?;
        require_kind(table, handle.schema.key_kind, KeyKind::Str)?;
        let mut wtxn = env.write_txn()?;
        handle.db.put(&mut wtxn, key.as_bytes(), value.as_bytes())?;
        wtxn.commit()?;
        Ok(())
    }

    /// Looks up a string key. A missing key is `Ok(None)`, never an error.
    pub fn get_str(&self, table: &str, key: &str) -> Result<Option<String>> {
        check_str_key(key)?;
        let (env, handle) = self.handle(table)?;
        let rtxn = env.read_txn()?;
        match handle.db.get(&rtxn, key.as_bytes())? {
            Some(raw) => Ok(Some(decode_utf8(raw)?)),
            None => Ok(None),
        }
    }

    /// Deletes a string key. Deleting a missing key succeeds silently.
    pub fn delete_str(&self, table: &str, key: &str) -> Result<()> {
        check_str_key(key)?;
        let (env, handle) = self.handle(table)?;
        let mut wtxn = env.write_txn()?;
        handle.db.delete(&mut wtxn, key.as_bytes())?;
        wtxn.commit()?;
        Ok(())
    }

    /// Returns whether a string key exists.
    pub fn exists(&self, table: &str, key: &str) -> Result<bool> {
        check_str_key(key)?;
        let (env, handle) = self.handle(table)?;
        let rtxn = env.read_txn()?;
        Ok(handle.db.get(&rtxn, key.as_bytes())?.is_some())
    }

    // =========================================================================
    // Binary key/value operations
    // =========================================================================

    /// Inserts or replaces a binary key/value pair. Empty keys and empty
    /// values are rejected.
    pub fn put_bin(&self, table: &str, key: &[u8], value: &[u8]) -> Result<()> {
        check_bin_key(key)?;
        if value.is_empty() {
            return Err(EmberError::InvalidArgument(
                "binary value cannot be empty".into(),
            ));
        }
        let (env, handle) = self.handle(table)?;
        require_kind(table, handle.schema.key_kind, KeyKind::Bin)?;
        let mut wtxn = env.write_txn()?;
        handle.db.put(&mut wtxn, key, value)?;
        wtxn.commit()?;
        Ok(())
    }

    /// Looks up a binary key. A missing key is `Ok(None)`, never an error.
    pub fn get_bin(&self, table: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        check_bin_key(key)?;
        let (env, handle) = self.handle(table)?;
        let rtxn = env.read_txn()?;
        Ok(handle.db.get(&rtxn, key)?.map(<[u8]>::to_vec))
    }

    /// Deletes a binary key. Deleting a missing key succeeds silently.
    pub fn delete_bin(&self, table: &str, key: &[u8]) -> Result<()> {
        check_bin_key(key)?;
        let (env, handle) = self.handle(table)?;
        let mut wtxn = env.write_txn()?;
        handle.db.delete(&mut wtxn, key)?;
        wtxn.commit()?;
        Ok(())
    }

    /// Returns whether a binary key exists.
    pub fn exists_bin(&self, table: &str, key: &[u8]) -> Result<bool> {
        check_bin_key(key)?;
        let (env, handle) = self.handle(table)?;
        let rtxn = env.read_txn()?;
        Ok(handle.db.get(&rtxn, key)?.is_some())
    }

    // =========================================================================
    // String-keys-into-binary-table conveniences
    // =========================================================================

    /// Writes a binary value under a string key in a binary-keyed table.
    /// Useful for catalog-style tables whose keys are readable names.
    pub fn put_bin_with_str_key(&self, table: &str, key: &str, value: &[u8]) -> Result<()> {
        self.put_bin(table, key.as_bytes(), value)
    }

    /// Reads a binary value under a string key from a binary-keyed table.
    pub fn get_bin_with_str_key(&self, table: &str, key: &str) -> Result<Option<Vec<u8>>> {
        self.get_bin(table, key.as_bytes())
    }

    /// Deletes a string key from a binary-keyed table.
    pub fn delete_bin_with_str_key(&self, table: &str, key: &str) -> Result<()> {
        self.delete_bin(table, key.as_bytes())
    }

    // =========================================================================
    // Scans and probes
    // =========================================================================

    /// Returns up to `opts.limit` string rows in ascending key order.
    pub fn scan(&self, table: &str, opts: &ScanOptions) -> Result<Vec<(String, String)>> {
        let (env, handle) = self.handle(table)?;
        require_kind(table, handle.schema.key_kind, KeyKind::Str)?;
        let limit = opts.effective_limit();
        let mut out = Vec::new();
        if limit == 0 {
            return Ok(out);
        }
        let rtxn = env.read_txn()?;
        for item in handle.db.iter(&rtxn)? {
            let (key, value) = item?;
            out.push((decode_utf8(key)?, decode_utf8(value)?));
            if out.len() >= limit {
                break;
            }
        }
        Ok(out)
    }

    /// Returns up to `opts.limit` binary rows in ascending key order.
    pub fn scan_bin(&self, table: &str, opts: &ScanOptions) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let (env, handle) = self.handle(table)?;
        let limit = opts.effective_limit();
        let mut out = Vec::new();
        if limit == 0 {
            return Ok(out);
        }
        let rtxn = env.read_txn()?;
        for item in handle.db.iter(&rtxn)? {
            let (key, value) = item?;
            out.push((key.to_vec(), value.to_vec()));
            if out.len() >= limit {
                break;
            }
        }
        Ok(out)
    }

    /// Probes for the key nearest to `probe` and reports how the returned key
    /// compares to it. Prefers the next key above when the probe is absent and
    /// keys exist on both sides. Fails with [`EmberError::NotFound`] on an
    /// empty table.
    pub fn search_near(&self, table: &str, probe: &str) -> Result<(String, String, Relation)> {
        check_str_key(probe)?;
        let (key, value, relation) = self.search_near_raw(table, probe.as_bytes())?;
        Ok((decode_utf8(&key)?, decode_utf8(&value)?, relation))
    }

    /// Binary-key variant of [`Store::search_near`].
    pub fn search_near_bin(
        &self,
        table: &str,
        probe: &[u8],
    ) -> Result<(Vec<u8>, Vec<u8>, Relation)> {
        check_bin_key(probe)?;
        self.search_near_raw(table, probe)
    }

    fn search_near_raw(&self, table: &str, probe: &[u8]) -> Result<(Vec<u8>, Vec<u8>, Relation)> {
        let (env, handle) = self.handle(table)?;
        let rtxn = env.read_txn()?;
        if let Some(value) = handle.db.get(&rtxn, probe)? {
            return Ok((probe.to_vec(), value.to_vec(), Relation::Equal));
        }
        if let Some((key, value)) = handle.db.get_greater_than(&rtxn, probe)? {
            return Ok((key.to_vec(), value.to_vec(), Relation::Above));
        }
        if let Some((key, value)) = handle.db.last(&rtxn)? {
            return Ok((key.to_vec(), value.to_vec(), Relation::Below));
        }
        Err(EmberError::NotFound(format!("table {table:?} is empty")))
    }

    // =========================================================================
    // Range cursors
    // =========================================================================

    /// Opens a cursor over `[start, end)` in ascending byte order.
    ///
    /// An empty `start` means "smallest key"; an empty `end` means "no upper
    /// bound". The cursor must be closed by the caller; see [`RangeCursor`].
    pub fn scan_range(&self, table: &str, start: &[u8], end: &[u8]) -> Result<RangeCursor> {
        self.scan_range_with(table, start, end, RangeOptions::default())
    }

    /// [`Store::scan_range`] with explicit batch sizing.
    pub fn scan_range_with(
        &self,
        table: &str,
        start: &[u8],
        end: &[u8],
        opts: RangeOptions,
    ) -> Result<RangeCursor> {
        let (env, handle) = self.handle(table)?;
        RangeCursor::open(env, handle.db, handle.schema.framing(), start, end, opts)
    }

    /// Opens a string-typed cursor over `[start, end)` on a string-keyed
    /// table.
    pub fn scan_range_str(&self, table: &str, start: &str, end: &str) -> Result<StrRangeCursor> {
        let (env, handle) = self.handle(table)?;
        require_kind(table, handle.schema.key_kind, KeyKind::Str)?;
        let inner = RangeCursor::open(
            env,
            handle.db,
            handle.schema.framing(),
            start.as_bytes(),
            end.as_bytes(),
            RangeOptions::default(),
        )?;
        Ok(StrRangeCursor::new(inner))
    }
}

// =============================================================================
// Validation helpers
// =============================================================================

fn check_str_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(EmberError::InvalidArgument("key cannot be empty".into()));
    }
    if key.contains('\0') {
        return Err(EmberError::InvalidArgument(
            "string key cannot contain NUL".into(),
        ));
    }
    Ok(())
}

fn check_bin_key(key: &[u8]) -> Result<()> {
    if key.is_empty() {
        return Err(EmberError::InvalidArgument("key cannot be empty".into()));
    }
    Ok(())
}

fn require_kind(table: &str, actual: KeyKind, wanted: KeyKind) -> Result<()> {
    if actual != wanted {
        return Err(EmberError::InvalidArgument(format!(
            "table {table:?} has {actual:?} keys, operation requires {wanted:?}"
        )));
    }
    Ok(())
}

fn decode_utf8(raw: &[u8]) -> Result<String> {
    String::from_utf8(raw.to_vec())
        .map_err(|_| EmberError::Serialization("stored value is not valid UTF-8".into()))
}
