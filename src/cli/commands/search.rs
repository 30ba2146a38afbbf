//! Search command implementations (`search` and `search-file`).

use crate::cli::commands::{existing_db_path, runtime};
use crate::config::resolve_fetch_timeout;
use crate::embeddings::Extractor;
use crate::error::Result;
use crate::model::{Match, SearchOutcome};
use crate::probe::ProbeDecoder;
use crate::query::{fold_outcome, QueryService};
use crate::storage::SqliteStorage;
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Open the query service over an existing database.
///
/// # Errors
///
/// Returns `IndexUnavailable` if the database file does not exist.
pub(crate) fn open_service(db: Option<&PathBuf>, collection: &str) -> Result<QueryService<SqliteStorage>> {
    let path = existing_db_path(db, collection)?;
    let storage = SqliteStorage::open(&path)?;
    let decoder = ProbeDecoder::new(resolve_fetch_timeout())?;

    Ok(QueryService::new(
        Arc::new(Mutex::new(storage)),
        Extractor::from_settings(),
        decoder,
        collection,
        &path,
    ))
}

/// Execute `atlas search <PROBE>`.
///
/// # Errors
///
/// Any query failure, with its exact kind (the JSON envelope is printed first).
pub fn execute(probe: &str, top_k: i64, db: Option<&PathBuf>, collection: &str, json: bool) -> Result<()> {
    let service = open_service(db, collection)?;
    let result = runtime()?.block_on(service.search(probe, top_k));
    report(&result, probe, collection, json)?;
    result.map(|_| ())
}

/// Execute `atlas search-file <PATH>`.
///
/// # Errors
///
/// Same as [`execute`].
pub fn execute_file(path: &Path, top_k: i64, db: Option<&PathBuf>, collection: &str, json: bool) -> Result<()> {
    let service = open_service(db, collection)?;
    let result = runtime()?.block_on(service.search_file(path, top_k));
    report(&result, &path.to_string_lossy(), collection, json)?;
    result.map(|_| ())
}

fn report(result: &Result<Vec<Match>>, probe: &str, collection: &str, json: bool) -> Result<()> {
    if json {
        let outcome = fold_outcome(result, probe);
        println!("{}", serde_json::to_string(&outcome)?);
        return Ok(());
    }

    // Errors are printed by main in human mode
    if let Ok(matches) = result {
        print_matches(&SearchOutcome::success(matches), collection);
    }
    Ok(())
}

fn print_matches(outcome: &SearchOutcome, collection: &str) {
    let SearchOutcome::Success { total_results, cases } = outcome else {
        return;
    };

    println!(
        "{} {} in '{collection}'",
        total_results.to_string().bold(),
        if *total_results == 1 { "match" } else { "matches" }
    );
    println!();
    println!("{:>4}  {:<24} {:>10}  {:>8}  {}", "RANK", "DIAGNOSIS", "SIMILARITY", "DISTANCE", "FILE");
    for case in cases {
        println!(
            "{:>4}  {:<24} {:>10}  {:>8}  {}",
            case.rank,
            case.diagnosis.cyan(),
            case.similarity_score.green(),
            case.distance,
            case.filename
        );
    }
    if let Some(first) = cases.first() {
        println!();
        println!("{}", first.note.dimmed());
    }
}
