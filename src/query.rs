//! Query service.
//!
//! Orchestrates one similarity query:
//!
//! 1. Clamp `top_k` into `1..=20`
//! 2. Require the collection to exist (`IndexUnavailable` otherwise)
//! 3. Decode the probe
//! 4. Embed it
//! 5. Require a non-empty index (`EmptyIndex`), cap k at the entry count
//! 6. Rank nearest entries and convert distances to similarity percentages
//!
//! The store handle and extractor are shared by every concurrent caller.

use crate::embeddings::Extractor;
use crate::error::{Error, Result};
use crate::model::item::keys;
use crate::model::{similarity_from_distance, Match, SearchOutcome};
use crate::probe::{load_image_file, preview, ProbeDecoder, ProbeStage};
use crate::storage::VectorStore;
use image::RgbImage;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Smallest number of results a query returns.
pub const MIN_TOP_K: i64 = 1;

/// Largest number of results a query returns.
pub const MAX_TOP_K: i64 = 20;

/// Results returned when the caller does not ask for a number.
pub const DEFAULT_TOP_K: i64 = 5;

/// Clamp a requested result count into the allowed range.
#[must_use]
pub fn clamp_top_k(top_k: i64) -> usize {
    usize::try_from(top_k.clamp(MIN_TOP_K, MAX_TOP_K)).unwrap_or(1)
}

/// Similarity search over one collection.
pub struct QueryService<S: VectorStore> {
    store: Arc<Mutex<S>>,
    extractor: Extractor,
    decoder: ProbeDecoder,
    collection: String,
    /// Where the store lives, for error messages
    location: PathBuf,
}

impl<S: VectorStore> QueryService<S> {
    pub fn new(
        store: Arc<Mutex<S>>,
        extractor: Extractor,
        decoder: ProbeDecoder,
        collection: &str,
        location: &Path,
    ) -> Self {
        Self {
            store,
            extractor,
            decoder,
            collection: collection.to_string(),
            location: location.to_path_buf(),
        }
    }

    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    #[must_use]
    pub fn extractor(&self) -> &Extractor {
        &self.extractor
    }

    fn with_store<R>(&self, f: impl FnOnce(&S) -> Result<R>) -> Result<R> {
        let store = self
            .store
            .lock()
            .map_err(|_| Error::Other("vector store lock poisoned".into()))?;
        f(&store)
    }

    /// Entry count of the collection (0 if it does not exist).
    ///
    /// # Errors
    ///
    /// Returns a database error if the store cannot be read.
    pub fn count(&self) -> Result<usize> {
        self.with_store(|s| s.count(&self.collection))
    }

    fn ensure_index(&self) -> Result<()> {
        if self.with_store(|s| s.collection_exists(&self.collection))? {
            Ok(())
        } else {
            Err(Error::IndexUnavailable {
                collection: self.collection.clone(),
                path: self.location.clone(),
            })
        }
    }

    /// Rank the collection against a raw probe (URL, path or base64).
    ///
    /// # Errors
    ///
    /// `IndexUnavailable`, `Fetch`, `Decode`, `ExtractorUnavailable` or
    /// `EmptyIndex`, in pipeline order.
    pub async fn search(&self, probe: &str, top_k: i64) -> Result<Vec<Match>> {
        let k = clamp_top_k(top_k);
        self.ensure_index()?;
        let image = self.decoder.decode(probe).await?;
        self.rank(&image, k).await
    }

    /// Rank the collection against an image file readable by this process.
    ///
    /// # Errors
    ///
    /// Same as [`QueryService::search`]; a missing file is a local decode error.
    pub async fn search_file(&self, path: &Path, top_k: i64) -> Result<Vec<Match>> {
        let k = clamp_top_k(top_k);
        self.ensure_index()?;
        if !path.is_file() {
            return Err(Error::Decode {
                stage: ProbeStage::Local,
                reason: format!("file not found: {}", path.display()),
            });
        }
        let image = load_image_file(path)?;
        self.rank(&image, k).await
    }

    async fn rank(&self, image: &RgbImage, k: usize) -> Result<Vec<Match>> {
        let vector = self.extractor.extract(image).await?;

        let count = self.count()?;
        if count == 0 {
            return Err(Error::EmptyIndex {
                collection: self.collection.clone(),
            });
        }

        let k = k.min(count);
        let hits = self.with_store(|s| s.query(&self.collection, &vector, k))?;
        debug!(k, hits = hits.len(), "Query ranked");

        Ok(hits
            .into_iter()
            .enumerate()
            .map(|(i, hit)| Match {
                rank: i + 1,
                category: hit.metadata.get(keys::DIAGNOSIS).cloned().unwrap_or_default(),
                similarity: similarity_from_distance(hit.distance),
                distance: hit.distance,
                id: hit.id,
                metadata: hit.metadata,
            })
            .collect())
    }

    /// [`QueryService::search`], folded into the wire envelope.
    pub async fn search_outcome(&self, probe: &str, top_k: i64) -> SearchOutcome {
        let result = self.search(probe, top_k).await;
        if let Err(e) = &result {
            warn!(error = %e, stage = e.stage().unwrap_or("-"), "Query failed");
        }
        fold_outcome(&result, probe)
    }

    /// [`QueryService::search_file`], folded into the wire envelope.
    pub async fn search_file_outcome(&self, path: &Path, top_k: i64) -> SearchOutcome {
        let result = self.search_file(path, top_k).await;
        if let Err(e) = &result {
            warn!(error = %e, path = %path.display(), "File query failed");
        }
        fold_outcome(&result, &path.to_string_lossy())
    }
}

/// Fold a query result into the wire envelope.
///
/// `input_preview` is attached only when the probe itself was at fault.
#[must_use]
pub fn fold_outcome(result: &Result<Vec<Match>>, probe: &str) -> SearchOutcome {
    match result {
        Ok(matches) => SearchOutcome::success(matches),
        Err(e) => {
            let input_preview = matches!(e, Error::Fetch { .. } | Error::Decode { .. }).then(|| preview(probe));
            SearchOutcome::failure(e, input_preview)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::extractor::tests::{mean_color_extractor, solid};
    use crate::embeddings::{BoxedProvider, Extractor};
    use crate::model::Metadata;
    use crate::probe::tests::png_bytes;
    use crate::storage::{RebuildPolicy, SqliteStorage};
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use image::DynamicImage;
    use std::time::Duration;

    const COLLECTION: &str = "pathology_cases";

    fn inline_probe(image: RgbImage) -> String {
        format!(
            "data:image/png;base64,{}",
            STANDARD.encode(png_bytes(DynamicImage::ImageRgb8(image)))
        )
    }

    fn service_over(store: SqliteStorage, extractor: Extractor) -> QueryService<SqliteStorage> {
        QueryService::new(
            Arc::new(Mutex::new(store)),
            extractor,
            ProbeDecoder::new(Duration::from_secs(2)).unwrap(),
            COLLECTION,
            Path::new(":memory:"),
        )
    }

    /// Three categories with clearly separated colors.
    async fn seeded_service() -> QueryService<SqliteStorage> {
        let extractor = mean_color_extractor();
        let mut store = SqliteStorage::open_memory().unwrap();
        store.get_or_create(COLLECTION, RebuildPolicy::Extend).unwrap();

        let entries = [("TUM", solid(220, 20, 20)), ("LYM", solid(20, 220, 20)), ("ADI", solid(20, 20, 220))];
        for (category, image) in entries {
            let vector = extractor.extract(&image).await.unwrap();
            let mut meta = Metadata::new();
            meta.insert(keys::DIAGNOSIS.into(), category.into());
            meta.insert(keys::FILENAME.into(), format!("{category}.png"));
            store
                .upsert(COLLECTION, &[format!("{category}_{category}.png")], &[vector], &[meta])
                .unwrap();
        }
        service_over(store, extractor)
    }

    #[test]
    fn test_clamp_top_k() {
        assert_eq!(clamp_top_k(0), 1);
        assert_eq!(clamp_top_k(-3), 1);
        assert_eq!(clamp_top_k(5), 5);
        assert_eq!(clamp_top_k(20), 20);
        assert_eq!(clamp_top_k(999), 20);
    }

    #[tokio::test]
    async fn test_search_ranks_nearest_first() {
        let service = seeded_service().await;
        let matches = service.search(&inline_probe(solid(200, 30, 25)), 5).await.unwrap();

        assert_eq!(matches.len(), 3);
        assert_eq!(matches[0].rank, 1);
        assert_eq!(matches[0].category, "TUM");
        assert!(matches[0].similarity > 99.0);
        assert!(matches.windows(2).all(|w| w[0].distance <= w[1].distance));
        assert!(matches.windows(2).all(|w| w[0].similarity >= w[1].similarity));
        assert!(matches.iter().all(|m| m.similarity >= 0.0));
    }

    #[tokio::test]
    async fn test_k_is_clamped_and_capped_by_count() {
        let service = seeded_service().await;
        let probe = inline_probe(solid(20, 200, 30));

        assert_eq!(service.search(&probe, 0).await.unwrap().len(), 1);
        assert_eq!(service.search(&probe, 999).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_missing_collection_is_index_unavailable() {
        let service = service_over(SqliteStorage::open_memory().unwrap(), mean_color_extractor());

        // Checked before the probe is decoded
        let err = service.search("not even base64", 5).await.unwrap_err();
        assert!(matches!(err, Error::IndexUnavailable { .. }));
        assert!(err.hint().unwrap().contains("build"));
    }

    #[tokio::test]
    async fn test_replaced_empty_index_is_empty_index_error() {
        let service = seeded_service().await;
        service
            .store
            .lock()
            .unwrap()
            .get_or_create(COLLECTION, RebuildPolicy::Replace)
            .unwrap();

        let outcome = service.search_outcome(&inline_probe(solid(9, 9, 90)), 5).await;
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["query_status"], "error");
        assert_eq!(json["error_kind"], "EMPTY_INDEX");
    }

    #[tokio::test]
    async fn test_decode_failure_reports_stage_and_bounded_preview() {
        let service = seeded_service().await;
        let garbage = "%".repeat(1000);

        let outcome = service.search_outcome(&garbage, 5).await;
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["error_kind"], "DECODE_ERROR");
        assert_eq!(json["stage"], "inline-decode");
        let preview = json["input_preview"].as_str().unwrap();
        assert!(preview.len() < 210);
        assert!(preview.ends_with("..."));
    }

    #[tokio::test]
    async fn test_extractor_failure_is_distinct_from_decode() {
        let broken = Extractor::new(|| async {
            Err::<BoxedProvider, _>(Error::ExtractorUnavailable("no GPU".into()))
        });
        let mut store = SqliteStorage::open_memory().unwrap();
        store.get_or_create(COLLECTION, RebuildPolicy::Extend).unwrap();
        let service = service_over(store, broken);

        let outcome = service.search_outcome(&inline_probe(solid(1, 2, 3)), 5).await;
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["error_kind"], "EXTRACTOR_UNAVAILABLE");
        assert_eq!(json["stage"], "extract");
        assert!(json.get("input_preview").is_none());
    }

    #[tokio::test]
    async fn test_search_file() {
        let service = seeded_service().await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("probe.png");
        std::fs::write(&path, png_bytes(DynamicImage::ImageRgb8(solid(25, 25, 210)))).unwrap();

        let matches = service.search_file(&path, 1).await.unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].category, "ADI");

        let outcome = service.search_file_outcome(&dir.path().join("missing.png"), 1).await;
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["stage"], "local-read");
    }
}
