//! SQLite storage implementation.
//!
//! Vectors live in `reference_items` as little-endian f32 BLOBs and are
//! searched by brute-force cosine distance, which is plenty for atlases
//! in the tens of thousands of images.

use crate::error::{Error, Result};
use crate::model::item::keys;
use crate::model::Metadata;
use crate::storage::schema::apply_schema;
use crate::storage::{CollectionInfo, QueryHit, RebuildPolicy, VectorStore};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// SQLite-based vector store.
#[derive(Debug)]
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Open a database at the given path.
    ///
    /// Creates the database and applies schema if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema fails.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_timeout(path, None)
    }

    /// Open a database with an optional busy timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema fails.
    pub fn open_with_timeout(path: &Path, timeout_ms: Option<u64>) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        // Default 5 second timeout; builds and queries may overlap
        conn.busy_timeout(Duration::from_millis(timeout_ms.unwrap_or(5000)))?;

        apply_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        apply_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Run a write inside an IMMEDIATE transaction; rolls back on error.
    ///
    /// # Errors
    ///
    /// Returns the closure's error, or a database error from begin/commit.
    pub fn mutate<F, R>(&mut self, op: &str, f: F) -> Result<R>
    where
        F: FnOnce(&Transaction) -> Result<R>,
    {
        let tx = self
            .conn
            .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;

        let result = f(&tx)?;
        tx.commit()?;

        debug!(op, "Committed");
        Ok(result)
    }

    /// Summary of one collection.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn collection_info(&self, name: &str) -> Result<Option<CollectionInfo>> {
        let row = self
            .conn
            .query_row(
                "SELECT name, dimensions, created_at, updated_at FROM collections WHERE name = ?1",
                [name],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<i64>>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((name, dimensions, created_at, updated_at)) => {
                let count = self.count(&name)?;
                Ok(Some(CollectionInfo {
                    name,
                    dimensions: dimensions.and_then(|d| usize::try_from(d).ok()),
                    count,
                    created_at,
                    updated_at,
                }))
            }
            None => Ok(None),
        }
    }

    /// All collections, by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_collections(&self) -> Result<Vec<CollectionInfo>> {
        let mut stmt = self.conn.prepare("SELECT name FROM collections ORDER BY name")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut infos = Vec::with_capacity(names.len());
        for name in names {
            if let Some(info) = self.collection_info(&name)? {
                infos.push(info);
            }
        }
        Ok(infos)
    }

    /// Entry counts per category, by category name.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn category_counts(&self, collection: &str) -> Result<Vec<(String, usize)>> {
        let mut stmt = self.conn.prepare(
            "SELECT category, COUNT(*) FROM reference_items
             WHERE collection = ?1
             GROUP BY category
             ORDER BY category",
        )?;
        let rows = stmt.query_map([collection], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut counts = Vec::new();
        for row in rows {
            let (category, count) = row?;
            counts.push((category, usize::try_from(count).unwrap_or(0)));
        }
        Ok(counts)
    }

    fn collection_dimensions(tx: &Transaction, collection: &str) -> Result<Option<Option<i64>>> {
        Ok(tx
            .query_row(
                "SELECT dimensions FROM collections WHERE name = ?1",
                [collection],
                |row| row.get::<_, Option<i64>>(0),
            )
            .optional()?)
    }
}

impl VectorStore for SqliteStorage {
    fn collection_exists(&self, name: &str) -> Result<bool> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM collections WHERE name = ?1)",
            [name],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    fn get_or_create(&mut self, name: &str, policy: RebuildPolicy) -> Result<CollectionInfo> {
        let now = chrono::Utc::now().timestamp_millis();

        self.mutate("get_or_create", |tx| {
            if policy == RebuildPolicy::Replace {
                let removed = tx.execute("DELETE FROM reference_items WHERE collection = ?1", [name])?;
                tx.execute("DELETE FROM collections WHERE name = ?1", [name])?;
                if removed > 0 {
                    info!(collection = name, removed, "Replaced collection");
                }
            }

            tx.execute(
                "INSERT OR IGNORE INTO collections (name, created_at, updated_at) VALUES (?1, ?2, ?2)",
                params![name, now],
            )?;
            Ok(())
        })?;

        self.collection_info(name)?
            .ok_or_else(|| Error::Other(format!("collection '{name}' vanished after creation")))
    }

    fn upsert(
        &mut self,
        collection: &str,
        ids: &[String],
        vectors: &[Vec<f32>],
        metadata: &[Metadata],
    ) -> Result<()> {
        let first_id = ids.first().map_or("<empty batch>", String::as_str);
        let reject = |id: &str, reason: String| Error::StoreWrite {
            id: id.to_string(),
            reason,
        };

        if ids.len() != vectors.len() || ids.len() != metadata.len() {
            return Err(reject(
                first_id,
                format!(
                    "length mismatch: {} ids, {} vectors, {} metadata",
                    ids.len(),
                    vectors.len(),
                    metadata.len()
                ),
            ));
        }
        if ids.is_empty() {
            return Ok(());
        }

        let now = chrono::Utc::now().timestamp_millis();

        self.mutate("upsert", |tx| {
            let stored = Self::collection_dimensions(tx, collection)?
                .ok_or_else(|| reject(first_id, format!("collection '{collection}' does not exist")))?;

            let expected = match stored {
                Some(d) => usize::try_from(d).unwrap_or(0),
                None => vectors[0].len(),
            };
            if expected == 0 {
                return Err(reject(first_id, "empty vector".to_string()));
            }
            for (id, vector) in ids.iter().zip(vectors) {
                if vector.len() != expected {
                    return Err(reject(
                        id,
                        format!("dimension {} does not match collection dimension {expected}", vector.len()),
                    ));
                }
            }

            let dims = i64::try_from(expected).map_err(|e| reject(first_id, e.to_string()))?;
            if stored.is_none() {
                tx.execute(
                    "UPDATE collections SET dimensions = ?1 WHERE name = ?2",
                    params![dims, collection],
                )?;
            }

            let mut stmt = tx.prepare(
                "INSERT INTO reference_items (collection, id, category, embedding, dimensions, metadata, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
                 ON CONFLICT(collection, id) DO UPDATE SET
                   category = excluded.category,
                   embedding = excluded.embedding,
                   dimensions = excluded.dimensions,
                   metadata = excluded.metadata,
                   updated_at = excluded.updated_at",
            )?;

            for ((id, vector), meta) in ids.iter().zip(vectors).zip(metadata) {
                let category = meta.get(keys::DIAGNOSIS).map_or("", String::as_str);
                let meta_json = serde_json::to_string(meta)?;
                stmt.execute(params![
                    collection,
                    id,
                    category,
                    embedding_to_blob(vector),
                    dims,
                    meta_json,
                    now
                ])?;
            }

            tx.execute(
                "UPDATE collections SET updated_at = ?1 WHERE name = ?2",
                params![now, collection],
            )?;
            Ok(())
        })
    }

    fn query(&self, collection: &str, vector: &[f32], k: usize) -> Result<Vec<QueryHit>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut stmt = self.conn.prepare(
            "SELECT id, embedding, metadata FROM reference_items
             WHERE collection = ?1
             ORDER BY seq",
        )?;
        let rows = stmt.query_map([collection], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Vec<u8>>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut hits = Vec::new();
        for row in rows {
            let (id, blob, meta_json) = row?;
            let embedding = blob_to_embedding(&blob);
            if embedding.len() != vector.len() {
                return Err(Error::InvalidArgument(format!(
                    "query dimension {} does not match collection dimension {}",
                    vector.len(),
                    embedding.len()
                )));
            }
            hits.push(QueryHit {
                id,
                distance: 1.0 - cosine_similarity(vector, &embedding),
                metadata: serde_json::from_str(&meta_json)?,
            });
        }

        // Stable sort: equal distances keep insertion order
        hits.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(k);
        Ok(hits)
    }

    fn count(&self, collection: &str) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM reference_items WHERE collection = ?1",
            [collection],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    fn get_metadata(&self, collection: &str, id: &str) -> Result<Option<Metadata>> {
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT metadata FROM reference_items WHERE collection = ?1 AND id = ?2",
                [collection, id],
                |row| row.get(0),
            )
            .optional()?;

        json.map(|j| serde_json::from_str(&j).map_err(Error::from))
            .transpose()
    }

    fn drop_collection(&mut self, name: &str) -> Result<bool> {
        self.mutate("drop_collection", |tx| {
            tx.execute("DELETE FROM reference_items WHERE collection = ?1", [name])?;
            let removed = tx.execute("DELETE FROM collections WHERE name = ?1", [name])?;
            Ok(removed > 0)
        })
    }
}

fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|bytes| f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        .collect()
}

/// Compute cosine similarity between two vectors.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot_product = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;

    for (x, y) in a.iter().zip(b.iter()) {
        dot_product += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let magnitude = (norm_a * norm_b).sqrt();
    if magnitude == 0.0 {
        0.0
    } else {
        dot_product / magnitude
    }
}
