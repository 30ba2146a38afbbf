//! Vector store for the reference atlas.
//!
//! The store holds named collections of (id, unit vector, metadata)
//! entries and answers k-nearest-neighbour queries under cosine distance.
//!
//! # Submodules
//!
//! - [`schema`] - Database schema definitions
//! - [`sqlite`] - SQLite-backed implementation
//!
//! Any backend satisfying [`VectorStore`] can stand in for SQLite.

pub mod schema;
pub mod sqlite;

use crate::error::{Error, Result};
use crate::model::Metadata;
use serde::Serialize;

pub use sqlite::SqliteStorage;

/// What to do with an existing, non-empty collection when building.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RebuildPolicy {
    /// Drop the collection and start fresh
    Replace,
    /// Keep existing entries; re-indexed ids are overwritten
    Extend,
}

impl std::fmt::Display for RebuildPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Replace => write!(f, "replace"),
            Self::Extend => write!(f, "extend"),
        }
    }
}

impl std::str::FromStr for RebuildPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "replace" | "rebuild" => Ok(Self::Replace),
            "extend" | "append" => Ok(Self::Extend),
            _ => Err(Error::InvalidArgument(format!(
                "Unknown rebuild policy: {s}. Valid options: replace, extend"
            ))),
        }
    }
}

/// Summary of a stored collection.
#[derive(Debug, Clone, Serialize)]
pub struct CollectionInfo {
    pub name: String,
    /// Vector dimension, fixed by the first write
    pub dimensions: Option<usize>,
    pub count: usize,
    pub created_at: i64,
    pub updated_at: i64,
}

/// One nearest-neighbour hit.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryHit {
    pub id: String,
    /// Cosine distance, `1 - cos(query, entry)`
    pub distance: f32,
    pub metadata: Metadata,
}

/// Contract every vector store backend fulfils.
///
/// Upserts are idempotent by id; queries return hits in ascending
/// distance with ties broken by insertion order.
pub trait VectorStore {
    /// Whether a collection with this name exists.
    fn collection_exists(&self, name: &str) -> Result<bool>;

    /// Open a collection, creating it if needed. `Replace` empties it first.
    fn get_or_create(&mut self, name: &str, policy: RebuildPolicy) -> Result<CollectionInfo>;

    /// Insert or overwrite entries. All three slices must have equal length
    /// and every vector the collection's dimension.
    fn upsert(
        &mut self,
        collection: &str,
        ids: &[String],
        vectors: &[Vec<f32>],
        metadata: &[Metadata],
    ) -> Result<()>;

    /// Up to `k` nearest entries to `vector`.
    fn query(&self, collection: &str, vector: &[f32], k: usize) -> Result<Vec<QueryHit>>;

    /// Number of entries in a collection (0 if it does not exist).
    fn count(&self, collection: &str) -> Result<usize>;

    /// Metadata stored for one entry.
    fn get_metadata(&self, collection: &str, id: &str) -> Result<Option<Metadata>>;

    /// Remove a collection and its entries. Returns whether it existed.
    fn drop_collection(&mut self, name: &str) -> Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rebuild_policy_parsing() {
        assert_eq!("Replace".parse::<RebuildPolicy>().unwrap(), RebuildPolicy::Replace);
        assert_eq!(" extend ".parse::<RebuildPolicy>().unwrap(), RebuildPolicy::Extend);
        let err = "merge".parse::<RebuildPolicy>().unwrap_err();
        assert_eq!(err.error_code().as_str(), "INVALID_ARGUMENT");
    }
}
