//! Database schema definitions.
//!
//! Timestamps are stored as INTEGER (Unix milliseconds). Embeddings are
//! little-endian f32 BLOBs.

use rusqlite::{Connection, Result};

/// Current schema version for migration tracking.
pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// The complete SQL schema for the atlas database.
pub const SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version TEXT PRIMARY KEY,
    applied_at INTEGER NOT NULL
);

-- Collections: named vector spaces; dimension is fixed by the first write
CREATE TABLE IF NOT EXISTS collections (
    name TEXT PRIMARY KEY,
    dimensions INTEGER,
    distance TEXT NOT NULL DEFAULT 'cosine',
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

-- Reference items: one embedded atlas image per row
-- seq preserves first-insertion order and breaks distance ties
CREATE TABLE IF NOT EXISTS reference_items (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    collection TEXT NOT NULL,
    id TEXT NOT NULL,
    category TEXT NOT NULL DEFAULT '',
    embedding BLOB NOT NULL,
    dimensions INTEGER NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}',
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    UNIQUE (collection, id),
    FOREIGN KEY (collection) REFERENCES collections(name) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_reference_items_collection ON reference_items(collection, seq);
CREATE INDEX IF NOT EXISTS idx_reference_items_category ON reference_items(collection, category);
";

/// Apply pragmas and the schema to a connection.
///
/// # Errors
///
/// Returns an error if a pragma or DDL statement fails.
pub fn apply_schema(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "cache_size", "-64000")?; // 64MB cache
    conn.pragma_update(None, "temp_store", "MEMORY")?;

    conn.execute_batch(SCHEMA_SQL)?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
        rusqlite::params![
            format!("v{CURRENT_SCHEMA_VERSION}"),
            chrono::Utc::now().timestamp_millis()
        ],
    )?;

    Ok(())
}
