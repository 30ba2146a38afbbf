//! Serve command implementation.
//!
//! A small JSON-over-HTTP front for the query service:
//!
//! - `POST /search` with `{"probe": "...", "top_k": 5}` (`query_image` is accepted too)
//! - `POST /search/file` with `{"image_path": "...", "top_k": 5}`
//! - `GET /health`
//!
//! A fixed pool of threads pulls requests off one listener. Every thread
//! shares the same query service, so the extractor is loaded once and the
//! store handle is reused.

use crate::cli::commands::db_path;
use crate::config::resolve_fetch_timeout;
use crate::embeddings::Extractor;
use crate::error::{Error, Result};
use crate::model::{Match, SearchOutcome};
use crate::probe::ProbeDecoder;
use crate::query::{fold_outcome, QueryService, DEFAULT_TOP_K};
use crate::storage::{SqliteStorage, VectorStore};
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tiny_http::{Header, Method, Request, Response, Server};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

/// Largest accepted request body (base64 probes included).
pub const MAX_BODY_BYTES: u64 = 32 * 1024 * 1024;

#[derive(Debug, Deserialize)]
struct SearchRequest {
    #[serde(alias = "query_image")]
    probe: String,
    #[serde(default = "default_top_k")]
    top_k: i64,
}

#[derive(Debug, Deserialize)]
struct FileSearchRequest {
    #[serde(alias = "path")]
    image_path: PathBuf,
    #[serde(default = "default_top_k")]
    top_k: i64,
}

const fn default_top_k() -> i64 {
    DEFAULT_TOP_K
}

#[derive(Serialize)]
struct HealthOutput<'a> {
    status: &'a str,
    collection: &'a str,
    count: Option<usize>,
    extractor_ready: bool,
    dimensions: Option<usize>,
}

/// Serve settings.
#[derive(Debug, Clone)]
pub struct ServeArgs<'a> {
    pub addr: &'a str,
    pub workers: usize,
    pub warmup: bool,
}

/// Execute serve command. Blocks until the process is terminated.
///
/// # Errors
///
/// Returns an error if the database cannot be opened or the address cannot
/// be bound.
pub fn execute(args: &ServeArgs<'_>, db: Option<&PathBuf>, collection: &str, json: bool) -> Result<()> {
    if args.workers == 0 {
        return Err(Error::InvalidArgument("--workers must be at least 1".into()));
    }

    let path = db_path(db)?;
    let storage = SqliteStorage::open(&path)?;
    if !storage.collection_exists(collection)? {
        warn!(collection, db = %path.display(), "Collection does not exist yet; queries will fail until it is built");
    }

    let service = Arc::new(QueryService::new(
        Arc::new(Mutex::new(storage)),
        Extractor::from_settings(),
        ProbeDecoder::new(resolve_fetch_timeout())?,
        collection,
        &path,
    ));

    let rt = super::runtime()?;

    if args.warmup {
        // Failure is not fatal: the next query tries again
        if let Err(e) = rt.block_on(service.extractor().warm_up()) {
            warn!(error = %e, "Extractor warm-up failed; will retry on first query");
        }
    }

    let server = Server::http(args.addr)
        .map(Arc::new)
        .map_err(|e| Error::Other(format!("Failed to bind {}: {e}", args.addr)))?;

    if json {
        println!(
            "{}",
            serde_json::json!({ "listening": args.addr, "collection": collection, "workers": args.workers })
        );
    } else {
        println!("Atlas search listening on http://{} (collection '{collection}')", args.addr);
    }
    info!(addr = args.addr, workers = args.workers, "Serving");

    let mut handles = Vec::with_capacity(args.workers);
    for worker in 0..args.workers {
        let server = Arc::clone(&server);
        let service = Arc::clone(&service);
        let handle = rt.handle().clone();
        handles.push(std::thread::spawn(move || {
            for request in server.incoming_requests() {
                serve_one(request, &service, &handle, worker);
            }
        }));
    }

    for handle in handles {
        if handle.join().is_err() {
            warn!("Worker thread panicked");
        }
    }
    Ok(())
}

fn serve_one(mut request: Request, service: &QueryService<SqliteStorage>, handle: &Handle, worker: usize) {
    let method = request.method().clone();
    let url = request.url().to_string();
    debug!(worker, %method, %url, "Request");

    let (status, body) = match read_body(&mut request) {
        Ok(body) => route(service, handle, &method, &url, &body),
        Err(e) => respond_error(&e),
    };

    let mut response = Response::from_string(body).with_status_code(status);
    if let Ok(header) = Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]) {
        response = response.with_header(header);
    }
    if let Err(e) = request.respond(response) {
        warn!(error = %e, "Failed to send response");
    }
}

fn read_body(request: &mut Request) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    request
        .as_reader()
        .take(MAX_BODY_BYTES + 1)
        .read_to_end(&mut body)?;
    if body.len() as u64 > MAX_BODY_BYTES {
        return Err(Error::InvalidArgument(format!(
            "request body exceeds {MAX_BODY_BYTES} bytes"
        )));
    }
    Ok(body)
}

/// Dispatch one request. Returns the status code and JSON body.
fn route(
    service: &QueryService<SqliteStorage>,
    handle: &Handle,
    method: &Method,
    url: &str,
    body: &[u8],
) -> (u16, String) {
    let path = url.split('?').next().unwrap_or_default().trim_end_matches('/');

    match (method, path) {
        (Method::Get, "/health" | "") => health(service),
        (Method::Post, "/search") => match serde_json::from_slice::<SearchRequest>(body) {
            Ok(req) => {
                let result = handle.block_on(service.search(&req.probe, req.top_k));
                respond(&result, &req.probe)
            }
            Err(e) => respond_error(&Error::InvalidArgument(format!("invalid search request: {e}"))),
        },
        (Method::Post, "/search/file") => match serde_json::from_slice::<FileSearchRequest>(body) {
            Ok(req) => {
                let result = handle.block_on(service.search_file(&req.image_path, req.top_k));
                respond(&result, &req.image_path.to_string_lossy())
            }
            Err(e) => respond_error(&Error::InvalidArgument(format!("invalid search request: {e}"))),
        },
        (_, "/search" | "/search/file" | "/health") => (
            405,
            serde_json::json!({ "error": format!("method {method} not allowed on {path}") }).to_string(),
        ),
        _ => (404, serde_json::json!({ "error": format!("no route for {path}") }).to_string()),
    }
}

fn health(service: &QueryService<SqliteStorage>) -> (u16, String) {
    let count = service.count().ok();
    let output = HealthOutput {
        status: if count.is_some() { "ok" } else { "degraded" },
        collection: service.collection(),
        count,
        extractor_ready: service.extractor().is_initialized(),
        dimensions: service.extractor().dimension(),
    };
    let status = if count.is_some() { 200 } else { 503 };
    (status, serde_json::to_string(&output).unwrap_or_default())
}

fn respond(result: &Result<Vec<Match>>, probe: &str) -> (u16, String) {
    if let Err(e) = result {
        warn!(error = %e, stage = e.stage().unwrap_or("-"), "Query failed");
    }
    let status = result.as_ref().map_or_else(status_for, |_| 200);
    (status, outcome_json(&fold_outcome(result, probe)))
}

fn respond_error(e: &Error) -> (u16, String) {
    (status_for(e), outcome_json(&SearchOutcome::failure(e, None)))
}

fn outcome_json(outcome: &SearchOutcome) -> String {
    serde_json::to_string(outcome).unwrap_or_else(|e| {
        serde_json::json!({ "query_status": "error", "error": e.to_string() }).to_string()
    })
}

/// HTTP status for a failed query.
const fn status_for(e: &Error) -> u16 {
    match e {
        Error::Fetch { .. } | Error::Decode { .. } | Error::InvalidArgument(_) => 400,
        Error::IndexUnavailable { .. } | Error::EmptyIndex { .. } | Error::ExtractorUnavailable(_) => 503,
        _ => 500,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::extractor::tests::{mean_color_extractor, solid};
    use crate::model::item::keys;
    use crate::model::Metadata;
    use crate::probe::tests::png_bytes;
    use crate::storage::RebuildPolicy;
    use image::DynamicImage;
    use std::path::Path;
    use std::time::Duration;

    const COLLECTION: &str = "pathology_cases";

    fn service(rt: &tokio::runtime::Runtime, seeded: bool) -> QueryService<SqliteStorage> {
        let extractor = mean_color_extractor();
        let mut store = SqliteStorage::open_memory().unwrap();
        if seeded {
            store.get_or_create(COLLECTION, RebuildPolicy::Extend).unwrap();
            for (category, image) in [("TUM", solid(210, 30, 30)), ("LYM", solid(30, 210, 30))] {
                let vector = rt.block_on(extractor.extract(&image)).unwrap();
                let mut meta = Metadata::new();
                meta.insert(keys::DIAGNOSIS.into(), category.into());
                store.upsert(COLLECTION, &[category.to_string()], &[vector], &[meta]).unwrap();
            }
        }
        QueryService::new(
            Arc::new(Mutex::new(store)),
            extractor,
            ProbeDecoder::new(Duration::from_secs(2)).unwrap(),
            COLLECTION,
            Path::new(":memory:"),
        )
    }

    fn parse(body: &str) -> serde_json::Value {
        serde_json::from_str(body).unwrap()
    }

    #[test]
    fn test_search_file_route() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let service = service(&rt, true);
        let dir = tempfile::tempdir().unwrap();
        let probe = dir.path().join("probe.png");
        std::fs::write(&probe, png_bytes(DynamicImage::ImageRgb8(solid(30, 200, 40)))).unwrap();

        let body = serde_json::json!({ "image_path": probe, "top_k": 1 }).to_string();
        let (status, out) = route(&service, rt.handle(), &Method::Post, "/search/file", body.as_bytes());
        assert_eq!(status, 200);
        let out = parse(&out);
        assert_eq!(out["query_status"], "success");
        assert_eq!(out["total_results"], 1);
        assert_eq!(out["cases"][0]["diagnosis"], "LYM");
    }

    #[test]
    fn test_query_image_alias_and_decode_error_status() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let service = service(&rt, true);

        let body = br#"{"query_image": "%%%not-an-image%%%"}"#;
        let (status, out) = route(&service, rt.handle(), &Method::Post, "/search", body);
        assert_eq!(status, 400);
        let out = parse(&out);
        assert_eq!(out["error_kind"], "DECODE_ERROR");
        assert!(out["input_preview"].is_string());
    }

    #[test]
    fn test_missing_index_is_service_unavailable() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let service = service(&rt, false);

        let (status, out) = route(&service, rt.handle(), &Method::Post, "/search", br#"{"probe": "x"}"#);
        assert_eq!(status, 503);
        assert_eq!(parse(&out)["error_kind"], "INDEX_UNAVAILABLE");
    }

    #[test]
    fn test_bad_body_and_unknown_routes() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let service = service(&rt, true);

        let (status, out) = route(&service, rt.handle(), &Method::Post, "/search", b"{");
        assert_eq!(status, 400);
        assert_eq!(parse(&out)["error_kind"], "INVALID_ARGUMENT");

        assert_eq!(route(&service, rt.handle(), &Method::Get, "/search", b"").0, 405);
        assert_eq!(route(&service, rt.handle(), &Method::Get, "/nope", b"").0, 404);
    }

    #[test]
    fn test_health() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let service = service(&rt, true);

        let (status, out) = route(&service, rt.handle(), &Method::Get, "/health?verbose=1", b"");
        assert_eq!(status, 200);
        let out = parse(&out);
        assert_eq!(out["count"], 2);
        assert_eq!(out["extractor_ready"], true);
    }
}
