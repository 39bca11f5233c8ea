//! Error types for emberdb operations.
//!
//! This module provides:
//! - [`EmberError`] - The main error enum for the crate
//! - [`Result<T>`] - A type alias for `std::result::Result<T, EmberError>`
//!
//! Storage-engine failures keep the engine's original integer code in the
//! message so callers can correlate with LMDB documentation. Point reads
//! that miss a key are *not* errors; they return `Ok(None)`.

/// Result type alias for emberdb operations.
///
/// This is equivalent to `std::result::Result<T, EmberError>`.
pub type Result<T> = std::result::Result<T, EmberError>;

/// Comprehensive error types for emberdb operations.
///
/// # Examples
///
/// ```rust,no_run
/// use emberdb::store::{OpenOptions, Store};
/// use emberdb::{EmberError, Result};
///
/// fn example() -> Result<()> {
///     let store = Store::open("ember_home".as_ref(), &OpenOptions::new().create(true))?;
///
///     // Empty keys are rejected
///     match store.put_str("catalog", "", "value") {
///         Err(EmberError::InvalidArgument(_)) => println!("Empty key rejected"),
///         _ => {}
///     }
///     Ok(())
/// }
/// ```
#[derive(Debug, thiserror::Error)]
pub enum EmberError {
    /// I/O error during file operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A caller-supplied argument was rejected: empty key where disallowed,
    /// empty database or collection name, or a mismatched embedding dimension.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The named entity does not exist: a table, a collection catalog entry,
    /// or a vector-index file on the query path.
    #[error("not found: {0}")]
    NotFound(String),

    /// The database home is already open in this process.
    #[error("already open: {0}")]
    AlreadyOpen(String),

    /// Operation attempted on a closed connection.
    #[error("connection not open")]
    NotOpen,

    /// The storage engine returned a non-zero code. The original integer is
    /// preserved alongside the engine's own description.
    #[error("storage engine error (code {code}): {detail}")]
    Storage {
        /// Raw engine error code.
        code: i32,
        /// Engine-provided description.
        detail: String,
    },

    /// BSON or index-file encode/decode failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Vector index failure. The index's own message is preserved.
    #[error("vector index error: {0}")]
    Vector(String),

    /// A cross-table invariant was found broken: a label-map value with the
    /// wrong hex length, a zero document id, a truncated batch frame, or a
    /// label pointing at a missing document.
    #[error("invariant violated: {0}")]
    InvariantViolated(String),
}

impl From<heed3::Error> for EmberError {
    fn from(err: heed3::Error) -> Self {
        match err {
            heed3::Error::Io(e) => EmberError::Io(e),
            heed3::Error::Mdb(e) => EmberError::Storage {
                code: e.to_err_code(),
                detail: e.to_string(),
            },
            heed3::Error::EnvAlreadyOpened => {
                EmberError::AlreadyOpen("environment is already open in this process".to_string())
            }
            other => EmberError::Storage {
                code: -1,
                detail: other.to_string(),
            },
        }
    }
}

impl From<bson::ser::Error> for EmberError {
    fn from(err: bson::ser::Error) -> Self {
        EmberError::Serialization(err.to_string())
    }
}

impl From<bson::de::Error> for EmberError {
    fn from(err: bson::de::Error) -> Self {
        EmberError::Serialization(err.to_string())
    }
}

impl From<bincode::Error> for EmberError {
    fn from(err: bincode::Error) -> Self {
        EmberError::Serialization(err.to_string())
    }
}
