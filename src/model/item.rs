//! Reference item model.
//!
//! A reference item is one labeled atlas image. Its ID is derived from
//! `(category, filename)` only, so re-indexing the same file under the
//! same category always lands on the same store entry.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Metadata stored next to each vector. Not used for ranking.
pub type Metadata = BTreeMap<String, String>;

/// Provenance tag written when the operator does not supply one.
pub const DEFAULT_PROVENANCE: &str = "Internal Atlas";

/// Diagnosis reported for entries stored without one.
pub const UNKNOWN_DIAGNOSIS: &str = "Unknown";

/// Metadata keys written by the index builder.
pub mod keys {
    pub const DIAGNOSIS: &str = "diagnosis";
    pub const SOURCE: &str = "source";
    pub const IMAGE_PATH: &str = "image_path";
    pub const FILENAME: &str = "filename";
    pub const SHA256: &str = "sha256";
}

/// Derive the stable store ID for an atlas file.
#[must_use]
pub fn reference_id(category: &str, filename: &str) -> String {
    format!("{category}_{filename}")
}

/// One atlas image scheduled for (or already in) the index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReferenceItem {
    /// Stable ID, `{category}_{filename}`
    pub id: String,

    /// Category label (the top-level atlas directory name)
    pub category: String,

    /// File name within the category directory
    pub filename: String,

    /// Location of the source image
    pub source_path: PathBuf,

    /// Provenance tag stored as `source`
    pub provenance: String,
}

impl ReferenceItem {
    /// Create an item for `path`, filed under `category`.
    pub fn new(category: &str, filename: &str, source_path: &Path, provenance: &str) -> Self {
        Self {
            id: reference_id(category, filename),
            category: category.to_string(),
            filename: filename.to_string(),
            source_path: source_path.to_path_buf(),
            provenance: provenance.to_string(),
        }
    }

    /// Metadata map stored alongside the embedding.
    ///
    /// `sha256` is the hex content hash of the source file, when known.
    #[must_use]
    pub fn metadata(&self, sha256: Option<&str>) -> Metadata {
        let mut meta = Metadata::new();
        meta.insert(keys::DIAGNOSIS.to_string(), self.category.clone());
        meta.insert(keys::SOURCE.to_string(), self.provenance.clone());
        meta.insert(
            keys::IMAGE_PATH.to_string(),
            self.source_path.to_string_lossy().into_owned(),
        );
        meta.insert(keys::FILENAME.to_string(), self.filename.clone());
        if let Some(hash) = sha256 {
            meta.insert(keys::SHA256.to_string(), hash.to_string());
        }
        meta
    }
}
