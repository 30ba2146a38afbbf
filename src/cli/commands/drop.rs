//! Drop command implementation.

use crate::cli::commands::existing_db_path;
use crate::error::{Error, Result};
use crate::storage::{SqliteStorage, VectorStore};
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;

#[derive(Serialize)]
struct DropOutput<'a> {
    collection: &'a str,
    dropped: bool,
    removed_entries: usize,
}

/// Execute drop command.
///
/// # Errors
///
/// Returns `InvalidArgument` without `--yes`, or `IndexUnavailable` if the
/// collection does not exist.
pub fn execute(db: Option<&PathBuf>, collection: &str, yes: bool, json: bool) -> Result<()> {
    if !yes {
        return Err(Error::InvalidArgument(format!(
            "Dropping '{collection}' deletes every entry; re-run with --yes to confirm"
        )));
    }

    let path = existing_db_path(db, collection)?;
    let mut storage = SqliteStorage::open(&path)?;

    let removed_entries = storage.count(collection)?;
    if !storage.drop_collection(collection)? {
        return Err(crate::cli::commands::index_unavailable(collection, &path));
    }
    info!(collection, removed_entries, "Collection dropped");

    if json {
        let output = DropOutput {
            collection,
            dropped: true,
            removed_entries,
        };
        println!("{}", serde_json::to_string(&output)?);
    } else {
        println!("Dropped collection '{collection}' ({removed_entries} entries)");
    }
    Ok(())
}
