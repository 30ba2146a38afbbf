//! Index builder.
//!
//! Scans an atlas, then embeds and writes it batch by batch:
//!
//! ```text
//! SCAN → EMBED_AND_WRITE(batch 1) → ... → EMBED_AND_WRITE(batch n) → DONE
//!                  │
//!                  └─ batch failed → retry each item alone, skip the ones
//!                     that still fail
//! ```
//!
//! A single corrupt image costs exactly one item, never the run.

use crate::config::DEFAULT_BATCH_SIZE;
use crate::embeddings::Extractor;
use crate::error::{Error, Result};
use crate::index::scan::scan_atlas;
use crate::model::item::keys;
use crate::model::{ReferenceItem, DEFAULT_PROVENANCE};
use crate::probe::{decode_bytes, ProbeStage};
use crate::storage::{RebuildPolicy, VectorStore};
use image::RgbImage;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Build-time settings.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub collection: String,
    pub batch_size: usize,
    /// `None` is only accepted while the collection is empty
    pub policy: Option<RebuildPolicy>,
    /// Stored as `source` metadata on every item
    pub provenance: String,
    /// Skip files whose content hash matches the stored entry
    pub skip_unchanged: bool,
}

impl BuildOptions {
    #[must_use]
    pub fn new(collection: &str) -> Self {
        Self {
            collection: collection.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            policy: None,
            provenance: DEFAULT_PROVENANCE.to_string(),
            skip_unchanged: false,
        }
    }
}

/// An item that could not be indexed, and why.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedItem {
    pub id: String,
    pub path: String,
    pub error_kind: String,
    pub reason: String,
}

impl SkippedItem {
    fn new(item: &ReferenceItem, err: &Error) -> Self {
        Self {
            id: item.id.clone(),
            path: item.source_path.to_string_lossy().into_owned(),
            error_kind: err.error_code().as_str().to_string(),
            reason: err.to_string(),
        }
    }
}

/// Outcome of one build run.
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub run_id: String,
    pub collection: String,
    pub atlas_root: String,
    pub policy: Option<RebuildPolicy>,
    pub scanned: usize,
    pub written: usize,
    pub unchanged: usize,
    pub skipped: Vec<SkippedItem>,
    pub batches: usize,
    pub fallback_batches: usize,
    /// Entry count after the run
    pub index_count: usize,
    pub elapsed_ms: u64,
}

#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    written: usize,
    unchanged: usize,
}

struct Prepared<'i> {
    item: &'i ReferenceItem,
    image: RgbImage,
    sha256: String,
}

/// Read, hash and decode one atlas file.
fn prepare(item: &ReferenceItem) -> Result<Prepared<'_>> {
    let bytes = std::fs::read(&item.source_path).map_err(|e| Error::Decode {
        stage: ProbeStage::Local,
        reason: format!("{}: {e}", item.source_path.display()),
    })?;

    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let sha256 = format!("{:x}", hasher.finalize());

    let image = decode_bytes(&bytes, ProbeStage::Local)?;
    Ok(Prepared { item, image, sha256 })
}

/// Drives a build against any vector store.
pub struct IndexBuilder<'a, S: VectorStore> {
    store: &'a mut S,
    extractor: &'a Extractor,
    options: BuildOptions,
}

impl<'a, S: VectorStore> IndexBuilder<'a, S> {
    pub fn new(store: &'a mut S, extractor: &'a Extractor, options: BuildOptions) -> Self {
        Self {
            store,
            extractor,
            options,
        }
    }

    /// Index every image under `root`.
    ///
    /// # Errors
    ///
    /// Fails before writing anything on a missing atlas root, an invalid
    /// batch size, or a non-empty collection without a rebuild policy.
    /// Per-item failures are reported in [`BuildReport::skipped`] instead.
    pub async fn build(&mut self, root: &Path) -> Result<BuildReport> {
        let started = Instant::now();
        let collection = self.options.collection.clone();
        let batch_size = self.options.batch_size;
        if batch_size == 0 {
            return Err(Error::InvalidArgument("batch size must be at least 1".into()));
        }

        let mut report = BuildReport {
            run_id: uuid::Uuid::new_v4().to_string(),
            collection: collection.clone(),
            atlas_root: root.to_string_lossy().into_owned(),
            policy: self.options.policy,
            scanned: 0,
            written: 0,
            unchanged: 0,
            skipped: Vec::new(),
            batches: 0,
            fallback_batches: 0,
            index_count: 0,
            elapsed_ms: 0,
        };
        info!(run_id = %report.run_id, root = %root.display(), collection = %collection, "Starting build");

        let items = scan_atlas(root, &self.options.provenance)?;
        report.scanned = items.len();

        let existing = if self.store.collection_exists(&collection)? {
            self.store.count(&collection)?
        } else {
            0
        };

        if items.is_empty() {
            warn!(root = %root.display(), "No images found; index left untouched");
            report.index_count = existing;
            report.elapsed_ms = elapsed_ms(started);
            return Ok(report);
        }

        let policy = match (self.options.policy, existing) {
            (Some(policy), _) => policy,
            (None, 0) => RebuildPolicy::Extend,
            (None, count) => {
                return Err(Error::RebuildPolicyRequired { collection, count });
            }
        };
        report.policy = Some(policy);

        // Nothing is written, and nothing is replaced, without a working model
        self.extractor.warm_up().await?;
        self.store.get_or_create(&collection, policy)?;

        let total = items.len().div_ceil(batch_size);
        for (index, batch) in items.chunks(batch_size).enumerate() {
            let batch_no = index + 1;
            report.batches += 1;

            match self.write_items(batch).await {
                Ok(tally) => {
                    report.written += tally.written;
                    report.unchanged += tally.unchanged;
                    info!(batch = batch_no, total, written = tally.written, "Batch written");
                }
                Err(e) => {
                    warn!(batch = batch_no, error = %e, "Batch failed, falling back to per-item processing");
                    report.fallback_batches += 1;

                    for item in batch {
                        match self.write_items(std::slice::from_ref(item)).await {
                            Ok(tally) => {
                                report.written += tally.written;
                                report.unchanged += tally.unchanged;
                            }
                            Err(e) => {
                                warn!(item_id = %item.id, error = %e, "Skipping item");
                                report.skipped.push(SkippedItem::new(item, &e));
                            }
                        }
                    }
                }
            }
        }

        report.index_count = self.store.count(&collection)?;
        report.elapsed_ms = elapsed_ms(started);
        info!(
            run_id = %report.run_id,
            scanned = report.scanned,
            written = report.written,
            unchanged = report.unchanged,
            skipped = report.skipped.len(),
            index_count = report.index_count,
            "Build finished"
        );
        Ok(report)
    }

    /// Prepare, embed and upsert `items` as one unit.
    async fn write_items(&mut self, items: &[ReferenceItem]) -> Result<Tally> {
        let prepared = items.iter().map(prepare).collect::<Result<Vec<_>>>()?;

        let mut tally = Tally::default();
        let mut ids = Vec::with_capacity(prepared.len());
        let mut metadata = Vec::with_capacity(prepared.len());
        let mut images = Vec::with_capacity(prepared.len());
        for p in prepared {
            if self.is_unchanged(&p) {
                debug!(item_id = %p.item.id, "Unchanged, skipping");
                tally.unchanged += 1;
                continue;
            }
            ids.push(p.item.id.clone());
            metadata.push(p.item.metadata(Some(&p.sha256)));
            images.push(p.image);
        }

        if images.is_empty() {
            return Ok(tally);
        }

        let vectors = self.extractor.extract_batch(&images).await?;
        self.store
            .upsert(&self.options.collection, &ids, &vectors, &metadata)
            .map_err(|e| match e {
                Error::StoreWrite { .. } => e,
                other => Error::StoreWrite {
                    id: ids.join(", "),
                    reason: other.to_string(),
                },
            })?;

        tally.written = ids.len();
        Ok(tally)
    }

    fn is_unchanged(&self, prepared: &Prepared<'_>) -> bool {
        if !self.options.skip_unchanged {
            return false;
        }
        match self.store.get_metadata(&self.options.collection, &prepared.item.id) {
            Ok(Some(meta)) => meta.get(keys::SHA256) == Some(&prepared.sha256),
            Ok(None) => false,
            Err(e) => {
                warn!(item_id = %prepared.item.id, error = %e, "Could not read stored entry");
                false
            }
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::extractor::tests::mean_color_extractor;
    use crate::probe::tests::png_bytes;
    use crate::storage::SqliteStorage;
    use image::{DynamicImage, Rgb};
    use std::fs;
    use std::path::PathBuf;

    const COLLECTION: &str = "pathology_cases";

    fn write_png(path: &Path, seed: u8) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let color = Rgb([20 + seed, 200 - seed, 60 + seed / 2]);
        let image = RgbImage::from_pixel(6, 6, color);
        fs::write(path, png_bytes(DynamicImage::ImageRgb8(image))).unwrap();
    }

    /// 25 images in TUM/, the 14th (batch 2) corrupt.
    fn atlas_with_corrupt_item() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("atlas");
        for i in 0..25_u8 {
            let path = root.join("TUM").join(format!("img_{i:02}.png"));
            if i == 13 {
                fs::create_dir_all(path.parent().unwrap()).unwrap();
                fs::write(&path, b"truncated scan").unwrap();
            } else {
                write_png(&path, i);
            }
        }
        fs::write(root.join("TUM").join("labels.csv"), b"ignored").unwrap();
        (dir, root)
    }

    fn small_atlas() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("atlas");
        write_png(&root.join("ADI/a.png"), 1);
        write_png(&root.join("LYM/b.png"), 40);
        write_png(&root.join("TUM/c.png"), 80);
        (dir, root)
    }

    fn options(policy: Option<RebuildPolicy>) -> BuildOptions {
        BuildOptions {
            policy,
            ..BuildOptions::new(COLLECTION)
        }
    }

    #[tokio::test]
    async fn test_corrupt_item_is_isolated_to_its_batch() {
        let (_dir, root) = atlas_with_corrupt_item();
        let mut store = SqliteStorage::open_memory().unwrap();
        let extractor = mean_color_extractor();

        let report = IndexBuilder::new(&mut store, &extractor, options(None))
            .build(&root)
            .await
            .unwrap();

        assert_eq!(report.scanned, 25);
        assert_eq!(report.batches, 3);
        assert_eq!(report.fallback_batches, 1);
        assert_eq!(report.written, 24);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].id, "TUM_img_13.png");
        assert_eq!(report.skipped[0].error_kind, "DECODE_ERROR");
        assert_eq!(report.index_count, 24);
        assert_eq!(report.policy, Some(RebuildPolicy::Extend));

        let meta = store.get_metadata(COLLECTION, "TUM_img_12.png").unwrap().unwrap();
        assert_eq!(meta["diagnosis"], "TUM");
        assert_eq!(meta["source"], DEFAULT_PROVENANCE);
        assert_eq!(meta["filename"], "img_12.png");
        assert_eq!(meta["sha256"].len(), 64);
    }

    #[tokio::test]
    async fn test_rebuild_is_idempotent() {
        let (_dir, root) = small_atlas();
        let mut store = SqliteStorage::open_memory().unwrap();
        let extractor = mean_color_extractor();

        let image = crate::probe::load_image_file(&root.join("TUM/c.png")).unwrap();
        let own_vector = extractor.extract(&image).await.unwrap();

        let mut snapshots = Vec::new();
        for _ in 0..2 {
            IndexBuilder::new(&mut store, &extractor, options(Some(RebuildPolicy::Extend)))
                .build(&root)
                .await
                .unwrap();
            assert_eq!(store.count(COLLECTION).unwrap(), 3);
            let meta = store.get_metadata(COLLECTION, "TUM_c.png").unwrap().unwrap();
            let hits = store.query(COLLECTION, &own_vector, 3).unwrap();
            snapshots.push((meta, hits));
        }

        let (first_meta, first_hits) = &snapshots[0];
        let (second_meta, second_hits) = &snapshots[1];
        assert_eq!(first_meta, second_meta);
        assert_eq!(first_meta["sha256"].len(), 64);
        assert_eq!(first_hits[0].id, "TUM_c.png");
        assert!(first_hits[0].distance.abs() < 1e-5);
        // Same vectors, same ranking
        assert_eq!(first_hits, second_hits);
    }

    #[tokio::test]
    async fn test_policy_required_for_non_empty_collection() {
        let (_dir, root) = small_atlas();
        let mut store = SqliteStorage::open_memory().unwrap();
        let extractor = mean_color_extractor();

        IndexBuilder::new(&mut store, &extractor, options(None))
            .build(&root)
            .await
            .unwrap();

        let err = IndexBuilder::new(&mut store, &extractor, options(None))
            .build(&root)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RebuildPolicyRequired { count: 3, .. }));
        assert_eq!(store.count(COLLECTION).unwrap(), 3);
    }

    #[tokio::test]
    async fn test_replace_drops_removed_files() {
        let (_dir, root) = small_atlas();
        let mut store = SqliteStorage::open_memory().unwrap();
        let extractor = mean_color_extractor();

        IndexBuilder::new(&mut store, &extractor, options(None))
            .build(&root)
            .await
            .unwrap();
        fs::remove_file(root.join("LYM/b.png")).unwrap();

        let extended = IndexBuilder::new(&mut store, &extractor, options(Some(RebuildPolicy::Extend)))
            .build(&root)
            .await
            .unwrap();
        assert_eq!(extended.index_count, 3);

        let replaced = IndexBuilder::new(&mut store, &extractor, options(Some(RebuildPolicy::Replace)))
            .build(&root)
            .await
            .unwrap();
        assert_eq!(replaced.index_count, 2);
        assert!(store.get_metadata(COLLECTION, "LYM_b.png").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unavailable_extractor_keeps_existing_index() {
        let (_dir, root) = small_atlas();
        let mut store = SqliteStorage::open_memory().unwrap();
        IndexBuilder::new(&mut store, &mean_color_extractor(), options(None))
            .build(&root)
            .await
            .unwrap();

        let broken = Extractor::new(|| async {
            Err::<crate::embeddings::BoxedProvider, _>(Error::ExtractorUnavailable("model missing".into()))
        });
        let err = IndexBuilder::new(&mut store, &broken, options(Some(RebuildPolicy::Replace)))
            .build(&root)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::ExtractorUnavailable(_)));
        assert_eq!(store.count(COLLECTION).unwrap(), 3);
    }

    #[tokio::test]
    async fn test_skip_unchanged() {
        let (_dir, root) = small_atlas();
        let mut store = SqliteStorage::open_memory().unwrap();
        let extractor = mean_color_extractor();

        IndexBuilder::new(&mut store, &extractor, options(None))
            .build(&root)
            .await
            .unwrap();
        write_png(&root.join("TUM/c.png"), 99);

        let opts = BuildOptions {
            skip_unchanged: true,
            ..options(Some(RebuildPolicy::Extend))
        };
        let report = IndexBuilder::new(&mut store, &extractor, opts)
            .build(&root)
            .await
            .unwrap();
        assert_eq!(report.unchanged, 2);
        assert_eq!(report.written, 1);
        assert_eq!(report.index_count, 3);
    }

    #[tokio::test]
    async fn test_empty_atlas_leaves_store_untouched() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("TUM")).unwrap();
        let mut store = SqliteStorage::open_memory().unwrap();
        let extractor = mean_color_extractor();

        let report = IndexBuilder::new(&mut store, &extractor, options(Some(RebuildPolicy::Replace)))
            .build(dir.path())
            .await
            .unwrap();
        assert_eq!(report.scanned, 0);
        assert_eq!(report.written, 0);
        assert!(!store.collection_exists(COLLECTION).unwrap());
    }

    #[tokio::test]
    async fn test_missing_root_and_zero_batch() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SqliteStorage::open_memory().unwrap();
        let extractor = mean_color_extractor();

        let err = IndexBuilder::new(&mut store, &extractor, options(None))
            .build(&dir.path().join("missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AtlasNotFound { .. }));

        let opts = BuildOptions {
            batch_size: 0,
            ..options(None)
        };
        let err = IndexBuilder::new(&mut store, &extractor, opts)
            .build(dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }
}
