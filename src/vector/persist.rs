// Copyright (c) 2025 EmberDB Contributors
// Licensed under the EmberDB License. See LICENSE file for details.

//! Sidecar file serialization for [`AnnIndex`].
//!
//! The on-disk layout is:
//!
//! - Magic bytes (`EVIX`)
//! - Format version (`u16` little-endian)
//! - Full index state, bincode-encoded
//!
//! The index file is rewritten whole on every flush; readers validate magic
//! and version before touching the payload.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::error::{EmberError, Result};

use super::AnnIndex;

/// Magic bytes identifying an emberdb vector index file.
const INDEX_MAGIC: &[u8; 4] = b"EVIX";

/// Current version of the index file format.
const INDEX_VERSION: u16 = 1;

/// Serializes an index to a file, replacing any previous content.
pub(crate) fn write_index(index: &AnnIndex, path: &Path) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    writer.write_all(INDEX_MAGIC)?;
    writer.write_all(&INDEX_VERSION.to_le_bytes())?;
    bincode::serialize_into(&mut writer, index)?;
    writer.flush()?;
    Ok(())
}

/// Loads an index previously written with [`AnnIndex::write_to_file`].
///
/// A missing file is [`EmberError::NotFound`]; a file with the wrong magic or
/// version is a vector error rather than a deserialization attempt.
pub fn read_index(path: &Path) -> Result<AnnIndex> {
    let file = File::open(path).map_err(|err| {
        if err.kind() == std::io::ErrorKind::NotFound {
            EmberError::NotFound(format!("vector index file {}", path.display()))
        } else {
            EmberError::Io(err)
        }
    })?;
    let mut reader = BufReader::new(file);

    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if &magic != INDEX_MAGIC {
        return Err(EmberError::Vector(format!(
            "{} is not an emberdb vector index file",
            path.display()
        )));
    }

    let mut version_raw = [0u8; 2];
    reader.read_exact(&mut version_raw)?;
    let version = u16::from_le_bytes(version_raw);
    if version != INDEX_VERSION {
        return Err(EmberError::Vector(format!(
            "unsupported index file version {version} (expected {INDEX_VERSION})"
        )));
    }

    let index: AnnIndex = bincode::deserialize_from(&mut reader)?;
    Ok(index)
}
