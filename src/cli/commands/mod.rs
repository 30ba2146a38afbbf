//! Command implementations.

pub mod build;
pub mod completions;
pub mod drop;
pub mod embeddings;
pub mod search;
pub mod serve;
pub mod status;
pub mod version;

use crate::config::resolve_db_path;
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

/// Create the tokio runtime a command drives its async work on.
pub(crate) fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new()
        .map_err(|e| Error::Other(format!("Failed to create async runtime: {e}")))
}

/// Resolve the database path, failing if no home directory is known.
pub(crate) fn db_path(explicit: Option<&PathBuf>) -> Result<PathBuf> {
    resolve_db_path(explicit.map(PathBuf::as_path))
        .ok_or_else(|| Error::Config("Could not determine the database path; pass --db".into()))
}

/// Resolve the database path for a read-only command.
///
/// Opening SQLite creates the file, so a missing database is reported as
/// `IndexUnavailable` here instead.
pub(crate) fn existing_db_path(explicit: Option<&PathBuf>, collection: &str) -> Result<PathBuf> {
    let path = db_path(explicit)?;
    if path.exists() {
        Ok(path)
    } else {
        Err(index_unavailable(collection, &path))
    }
}

pub(crate) fn index_unavailable(collection: &str, path: &Path) -> Error {
    Error::IndexUnavailable {
        collection: collection.to_string(),
        path: path.to_path_buf(),
    }
}
