//! Status command implementation.

use crate::cli::commands::existing_db_path;
use crate::embeddings::{is_embeddings_enabled, resolve_provider_type};
use crate::error::Result;
use crate::storage::{CollectionInfo, SqliteStorage};
use colored::Colorize;
use serde::Serialize;
use std::path::PathBuf;

/// Output for status command.
#[derive(Serialize)]
struct StatusOutput {
    database: String,
    collection: String,
    exists: bool,
    count: usize,
    dimensions: Option<usize>,
    created_at: Option<i64>,
    updated_at: Option<i64>,
    categories: Vec<CategoryCount>,
    other_collections: Vec<String>,
    embeddings_enabled: bool,
    configured_provider: Option<String>,
}

#[derive(Serialize)]
struct CategoryCount {
    category: String,
    count: usize,
}

/// Execute status command.
///
/// # Errors
///
/// Returns `IndexUnavailable` if the database does not exist yet.
pub fn execute(db: Option<&PathBuf>, collection: &str, json: bool) -> Result<()> {
    let path = existing_db_path(db, collection)?;
    let storage = SqliteStorage::open(&path)?;

    let info = storage.collection_info(collection)?;
    let categories = storage
        .category_counts(collection)?
        .into_iter()
        .map(|(category, count)| CategoryCount { category, count })
        .collect();
    let other_collections = storage
        .list_collections()?
        .into_iter()
        .map(|c| c.name)
        .filter(|name| name != collection)
        .collect();

    let output = StatusOutput {
        database: path.to_string_lossy().into_owned(),
        collection: collection.to_string(),
        exists: info.is_some(),
        count: info.as_ref().map_or(0, |i| i.count),
        dimensions: info.as_ref().and_then(|i| i.dimensions),
        created_at: info.as_ref().map(|i| i.created_at),
        updated_at: info.as_ref().map(|i| i.updated_at),
        categories,
        other_collections,
        embeddings_enabled: is_embeddings_enabled(),
        configured_provider: resolve_provider_type().map(|p| p.to_string()),
    };

    if json {
        println!("{}", serde_json::to_string(&output)?);
    } else {
        print_status(&output, info.as_ref());
    }
    Ok(())
}

fn print_status(output: &StatusOutput, info: Option<&CollectionInfo>) {
    println!("{}", "Atlas Status".bold());
    println!();
    println!("  Database:   {}", output.database);
    println!("  Collection: {}", output.collection.cyan());

    let Some(info) = info else {
        println!();
        println!("  {} Collection does not exist. Run: atlas build <ATLAS_DIR>", "!".yellow());
        return;
    };

    println!("  Entries:    {}", info.count);
    match info.dimensions {
        Some(d) => println!("  Dimensions: {d}"),
        None => println!("  Dimensions: {}", "(unset)".dimmed()),
    }
    if let Some(updated) = chrono::DateTime::from_timestamp_millis(info.updated_at) {
        println!("  Updated:    {}", updated.format("%Y-%m-%d %H:%M:%S UTC"));
    }

    if !output.categories.is_empty() {
        println!();
        println!("{}", "Categories".bold());
        for c in &output.categories {
            println!("  {:<24} {:>6}", c.category, c.count);
        }
    }

    if !output.other_collections.is_empty() {
        println!();
        println!("Other collections: {}", output.other_collections.join(", "));
    }

    println!();
    println!(
        "Embeddings: {}{}",
        if output.embeddings_enabled { "enabled".green() } else { "disabled".red() },
        output
            .configured_provider
            .as_ref()
            .map(|p| format!(" (provider: {p})"))
            .unwrap_or_default()
    );
}
