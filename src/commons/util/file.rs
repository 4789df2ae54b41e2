//! File system helpers.

use std::{fs, path::Path};

use bytes::Bytes;

use crate::commons::error::IoError;

/// Reads a file into memory.
pub fn read(path: &Path) -> Result<Bytes, IoError> {
    fs::read(path)
        .map(Bytes::from)
        .map_err(|e| IoError::new(format!("could not read file: {}", path.to_string_lossy()), e))
}
