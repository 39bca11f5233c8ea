// Copyright (c) 2025 EmberDB Contributors
// Licensed under the EmberDB License. See LICENSE file for details.

//! Range cursor engine: scoped streaming iteration over `[start, end)`.
//!
//! A [`RangeCursor`] positions itself at the first key greater than or equal
//! to the start key, advances strictly forward, and stops before the end key.
//! Records are pulled from the engine in batches (see [`super::batch`]) so
//! per-step overhead is amortized; the cursor's memory is bounded by the
//! batch caps regardless of how many keys the range holds.
//!
//! # Lifetime rules
//!
//! - A cursor is single-owner: one thread at a time.
//! - Each batch fetch opens one engine session (a read transaction) and one
//!   engine cursor, both released before the batch is surfaced. Construction
//!   failures release whatever was acquired.
//! - [`RangeCursor::close`] is idempotent and also runs on drop, so every
//!   exit path releases the cursor's resources. After close, `next()` returns
//!   false and `current()` is an error.
//! - Errors during iteration are latched: the cursor becomes invalid, further
//!   `next()` calls return false, and [`RangeCursor::err`] reports the cause.
//!
//! # Example
//!
//! ```rust,no_run
//! use emberdb::store::{OpenOptions, Store, TableSchema};
//!
//! fn main() -> emberdb::Result<()> {
//!     let store = Store::open("ember_home".as_ref(), &OpenOptions::new().create(true))?;
//!     store.create_table("ids", TableSchema::binary())?;
//!     let mut cursor = store.scan_range("ids", b"", b"")?;
//!     while cursor.next() {
//!         let (key, value) = cursor.current()?;
//!         println!("{} bytes -> {} bytes", key.len(), value.len());
//!     }
//!     if let Some(err) = cursor.err() {
//!         eprintln!("scan failed: {err}");
//!     }
//!     cursor.close()?;
//!     Ok(())
//! }
//! ```

use std::ops::Bound;

use heed3::types::Bytes;
use heed3::{Database, Env};

use super::batch::{BatchReader, BatchWriter, Framing};
use crate::error::{EmberError, Result};

/// Batch sizing for a range cursor.
///
/// A fetch stops at whichever cap is reached first. A single record larger
/// than `batch_bytes` still occupies a batch of its own so iteration always
/// makes progress.
#[derive(Debug, Clone, Copy)]
pub struct RangeOptions {
    /// Maximum records per batch. Default 1000.
    pub batch_records: usize,
    /// Maximum payload bytes per batch. Default 2 MiB.
    pub batch_bytes: usize,
}

impl Default for RangeOptions {
    fn default() -> Self {
        Self {
            batch_records: 1000,
            batch_bytes: 2 << 20,
        }
    }
}

/// A forward cursor over `[start, end)` on a table, in ascending byte order.
///
/// Obtained from [`super::Store::scan_range`]. Keys and values returned by
/// [`RangeCursor::current`] are owned copies, independent of engine storage;
/// they stay valid across subsequent `next()` calls and after `close()`.
pub struct RangeCursor {
    env: Env,
    db: Database<Bytes, Bytes>,
    framing: Framing,
    /// Owned copy of the exclusive upper bound. `None` means unbounded.
    end_key: Option<Vec<u8>>,
    opts: RangeOptions,
    batch: BatchReader,
    /// Key the next batch fetch starts from, inclusive: the first in-range
    /// key after positioning, or a record left unconsumed by a full batch.
    /// `None` once the range is exhausted.
    resume: Option<Vec<u8>>,
    current: Option<(Vec<u8>, Vec<u8>)>,
    latched: Option<EmberError>,
    valid: bool,
    closed: bool,
}

impl RangeCursor {
    /// Positions a new cursor at the first key `>= start`.
    ///
    /// An empty range (empty table, nothing at or above `start`, or
    /// `start >= end`) yields a valid cursor whose first `next()` returns
    /// false; it is not an error.
    pub(crate) fn open(
        env: Env,
        db: Database<Bytes, Bytes>,
        framing: Framing,
        start: &[u8],
        end: &[u8],
        opts: RangeOptions,
    ) -> Result<RangeCursor> {
        let mut cursor = RangeCursor {
            env,
            db,
            framing,
            end_key: if end.is_empty() {
                None
            } else {
                Some(end.to_vec())
            },
            opts: RangeOptions {
                batch_records: opts.batch_records.max(1),
                batch_bytes: opts.batch_bytes,
            },
            batch: BatchReader::empty(framing),
            resume: None,
            current: None,
            latched: None,
            valid: false,
            closed: false,
        };

        // Positioning runs in one scoped session; the transaction is released
        // on every path out of this block, including errors.
        let first = {
            let rtxn = cursor.env.read_txn()?;
            if start.is_empty() {
                cursor.db.first(&rtxn)?.map(|(k, _)| k.to_vec())
            } else {
                match cursor.db.get(&rtxn, start)? {
                    // Exact hit: already at the first key >= start.
                    Some(_) => Some(start.to_vec()),
                    // Nearest-key probe landed below the start key; one
                    // forward step yields the first key above it, or nothing.
                    None => cursor.db.get_greater_than(&rtxn, start)?.map(|(k, _)| k.to_vec()),
                }
            }
        };

        match first {
            // Empty table or no key at/after start: cursor is exhausted from
            // the outset.
            None => Ok(cursor),
            Some(key) if cursor.past_end(&key) => Ok(cursor),
            Some(key) => {
                cursor.resume = Some(key);
                Ok(cursor)
            }
        }
    }

    fn past_end(&self, key: &[u8]) -> bool {
        match &self.end_key {
            Some(end) => key >= end.as_slice(),
            None => false,
        }
    }

    /// Pulls the next batch of records into the cursor's frame.
    ///
    /// Holds a single session and a single engine cursor for the duration of
    /// the fetch. When the scan reaches a key `>= end` or the end of the
    /// table, no further fetches are scheduled.
    fn fetch_batch(&mut self) -> Result<()> {
        let resume = match self.resume.take() {
            Some(key) => key,
            None => return Ok(()),
        };
        let mut writer =
            BatchWriter::new(self.framing, self.opts.batch_records, self.opts.batch_bytes);
        let mut next_resume = None;

        {
            let rtxn = self.env.read_txn()?;
            let bounds: (Bound<&[u8]>, Bound<&[u8]>) =
                (Bound::Included(resume.as_slice()), Bound::Unbounded);
            for item in self.db.range(&rtxn, &bounds)? {
                let (key, value) = item?;
                // Strict upper bound: a key at or past end ends the range for
                // good, never reaching the caller.
                if self.past_end(key) {
                    break;
                }
                if writer.is_full() || writer.would_overflow(key.len(), value.len()) {
                    // Leave this record for the next batch.
                    next_resume = Some(key.to_vec());
                    break;
                }
                writer.push(key, value);
            }
        }

        self.resume = next_resume;
        // Ownership of the packed frame transfers to the cursor here.
        self.batch = writer.finish();
        Ok(())
    }

    /// Advances to the next record. Returns true exactly when a new record is
    /// available via [`RangeCursor::current`].
    ///
    /// Returns false once the range is exhausted, after close, or after an
    /// error; all subsequent calls then return false as well.
    pub fn next(&mut self) -> bool {
        if self.closed || self.latched.is_some() {
            self.valid = false;
            return false;
        }
        loop {
            match self.batch.next_record() {
                Ok(Some(record)) => {
                    self.current = Some(record);
                    self.valid = true;
                    return true;
                }
                Ok(None) => {
                    if self.resume.is_none() {
                        self.valid = false;
                        return false;
                    }
                    if let Err(err) = self.fetch_batch() {
                        self.latch(err);
                        return false;
                    }
                }
                Err(err) => {
                    self.latch(err);
                    return false;
                }
            }
        }
    }

    /// The record the last successful [`RangeCursor::next`] stopped on.
    pub fn current(&self) -> Result<(Vec<u8>, Vec<u8>)> {
        if self.closed {
            return Err(EmberError::InvalidArgument("cursor is closed".into()));
        }
        match (self.valid, &self.current) {
            (true, Some(record)) => Ok(record.clone()),
            _ => Err(EmberError::InvalidArgument(
                "cursor is not positioned on a record".into(),
            )),
        }
    }

    /// The latched error, if iteration failed.
    pub fn err(&self) -> Option<&EmberError> {
        self.latched.as_ref()
    }

    /// Takes ownership of the latched error, leaving the cursor invalid.
    pub fn take_err(&mut self) -> Option<EmberError> {
        self.latched.take()
    }

    /// Whether the cursor is positioned on a record.
    pub fn valid(&self) -> bool {
        self.valid
    }

    /// Releases the cursor's buffered frame and bound copy. Idempotent; also
    /// runs on drop.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.valid = false;
        self.current = None;
        self.resume = None;
        self.end_key = None;
        self.batch = BatchReader::empty(self.framing);
        Ok(())
    }

    fn latch(&mut self, err: EmberError) {
        self.latched = Some(err);
        self.valid = false;
        self.current = None;
    }

    /// Latches a synthetic failure, as if the engine had errored on the next
    /// step. Test hook.
    #[doc(hidden)]
    pub fn inject_fault(&mut self, detail: &str) {
        self.latch(EmberError::Storage {
            code: -1,
            detail: detail.to_string(),
        });
    }
}

impl Drop for RangeCursor {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// A [`RangeCursor`] over a string-keyed table, yielding `String` pairs.
pub struct StrRangeCursor {
    inner: RangeCursor,
    current: Option<(String, String)>,
}

impl StrRangeCursor {
    pub(crate) fn new(inner: RangeCursor) -> Self {
        Self {
            inner,
            current: None,
        }
    }

    /// Advances to the next record; see [`RangeCursor::next`].
    pub fn next(&mut self) -> bool {
        if !self.inner.next() {
            self.current = None;
            return false;
        }
        let (key, value) = match self.inner.current() {
            Ok(record) => record,
            Err(err) => {
                self.inner.latch(err);
                self.current = None;
                return false;
            }
        };
        match (String::from_utf8(key), String::from_utf8(value)) {
            (Ok(k), Ok(v)) => {
                self.current = Some((k, v));
                true
            }
            _ => {
                self.inner.latch(EmberError::Serialization(
                    "string-keyed table holds invalid UTF-8".into(),
                ));
                self.current = None;
                false
            }
        }
    }

    /// The record the last successful `next()` stopped on.
    pub fn current(&self) -> Result<(String, String)> {
        match &self.current {
            Some(record) => Ok(record.clone()),
            None => Err(EmberError::InvalidArgument(
                "cursor is not positioned on a record".into(),
            )),
        }
    }

    /// The latched error, if iteration failed.
    pub fn err(&self) -> Option<&EmberError> {
        self.inner.err()
    }

    /// Takes ownership of the latched error, leaving the cursor invalid.
    pub fn take_err(&mut self) -> Option<EmberError> {
        self.inner.take_err()
    }

    /// Whether the cursor is positioned on a record.
    pub fn valid(&self) -> bool {
        self.inner.valid()
    }

    /// Releases the underlying cursor. Idempotent; also runs on drop.
    pub fn close(&mut self) -> Result<()> {
        self.current = None;
        self.inner.close()
    }
}
