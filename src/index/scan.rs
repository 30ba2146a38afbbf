//! Atlas directory scanning.
//!
//! The atlas root holds one sub-directory per category. Only files with a
//! recognized image extension directly inside a category directory are
//! indexed; everything else is ignored. Order is byte-lexicographic by
//! directory name, then by file name, so an unchanged tree always yields
//! the same item sequence.

use crate::error::{Error, Result};
use crate::model::ReferenceItem;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Image extensions accepted by the scanner (case-insensitive).
pub const SUPPORTED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "tif", "tiff"];

/// Whether a path has a supported image extension.
#[must_use]
pub fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| SUPPORTED_EXTENSIONS.iter().any(|s| s.eq_ignore_ascii_case(ext)))
}

/// Sorted entries of a directory matching `keep`.
fn sorted_entries(dir: &Path, keep: impl Fn(&Path) -> bool) -> Result<Vec<(String, PathBuf)>> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !keep(&path) {
            continue;
        }
        match entry.file_name().into_string() {
            Ok(name) => entries.push((name, path)),
            Err(name) => debug!(name = ?name, "Skipping non UTF-8 entry"),
        }
    }
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(entries)
}

/// Enumerate every indexable image under `root`.
///
/// # Errors
///
/// Returns `Error::AtlasNotFound` if `root` is not a directory, or an I/O
/// error if a directory cannot be listed.
pub fn scan_atlas(root: &Path, provenance: &str) -> Result<Vec<ReferenceItem>> {
    if !root.is_dir() {
        return Err(Error::AtlasNotFound {
            path: root.to_path_buf(),
        });
    }

    let mut items = Vec::new();
    for (category, category_dir) in sorted_entries(root, Path::is_dir)? {
        let files = sorted_entries(&category_dir, |p| p.is_file() && is_supported_image(p))?;
        debug!(category = %category, files = files.len(), "Scanned category");

        for (filename, path) in files {
            items.push(ReferenceItem::new(&category, &filename, &path, provenance));
        }
    }

    Ok(items)
}
