//! Build command implementation.

use crate::cli::commands::{db_path, runtime};
use crate::config::{resolve_batch_size, resolve_rebuild_policy};
use crate::embeddings::Extractor;
use crate::error::Result;
use crate::index::{BuildOptions, BuildReport, IndexBuilder};
use crate::storage::SqliteStorage;
use colored::Colorize;
use std::path::{Path, PathBuf};

/// Flags of `atlas build`.
#[derive(Debug, Clone)]
pub struct BuildArgs<'a> {
    pub atlas_dir: &'a Path,
    pub replace: bool,
    pub extend: bool,
    pub batch_size: Option<usize>,
    pub source: Option<&'a str>,
    pub skip_unchanged: bool,
}

/// Execute the build command.
///
/// # Errors
///
/// Returns an error if the atlas root is missing, the flags are invalid, or
/// the collection is non-empty and no rebuild policy was given.
pub fn execute(args: &BuildArgs<'_>, db: Option<&PathBuf>, collection: &str, json: bool) -> Result<()> {
    let policy = resolve_rebuild_policy(args.replace, args.extend)?;
    let mut options = BuildOptions::new(collection);
    options.batch_size = resolve_batch_size(args.batch_size)?;
    options.policy = policy;
    options.skip_unchanged = args.skip_unchanged;
    if let Some(source) = args.source.filter(|s| !s.trim().is_empty()) {
        options.provenance = source.to_string();
    }

    let path = db_path(db)?;
    let mut storage = SqliteStorage::open(&path)?;
    let extractor = Extractor::from_settings();

    let report = runtime()?.block_on(async {
        IndexBuilder::new(&mut storage, &extractor, options)
            .build(args.atlas_dir)
            .await
    })?;

    if json {
        println!("{}", serde_json::to_string(&report)?);
    } else {
        print_report(&report, &path);
    }
    Ok(())
}

fn print_report(report: &BuildReport, db: &Path) {
    if report.scanned == 0 {
        println!("{} No images found under {}", "!".yellow(), report.atlas_root);
        println!("  Index left untouched ({} entries).", report.index_count);
        return;
    }

    let policy = report.policy.map_or_else(|| "-".to_string(), |p| p.to_string());
    println!("{}", "Build complete".green().bold());
    println!("  Collection: {} ({policy})", report.collection);
    println!("  Database:   {}", db.display());
    println!("  Scanned:    {}", report.scanned);
    println!("  Written:    {}", report.written);
    if report.unchanged > 0 {
        println!("  Unchanged:  {}", report.unchanged);
    }
    println!("  Skipped:    {}", report.skipped.len());
    println!("  Batches:    {} ({} fell back to per-item)", report.batches, report.fallback_batches);
    println!("  Index size: {}", report.index_count);
    println!("  Took:       {} ms", report.elapsed_ms);

    if !report.skipped.is_empty() {
        println!();
        println!("{}", "Skipped items".yellow().bold());
        for item in &report.skipped {
            println!("  {} {} [{}]", "✗".red(), item.path, item.error_kind);
            println!("    {}", item.reason.dimmed());
        }
    }
}
