//! Error types for Atlas Search.
//!
//! Provides structured error handling with:
//! - Machine-readable error codes (`ErrorCode`)
//! - Category-based exit codes (2=index, 3=not_found, 4=validation, 5=probe, etc.)
//! - Retryability flags for callers that want to retry
//! - The pipeline stage that failed, surfaced in every query error
//! - Context-aware recovery hints
//! - Structured JSON output for piped / non-TTY consumers

use crate::probe::ProbeStage;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Atlas Search operations.
pub type Result<T> = std::result::Result<T, Error>;

// ── Error Code ────────────────────────────────────────────────

/// Machine-readable error codes grouped by category.
///
/// Each code maps to a SCREAMING_SNAKE string and a category-based
/// exit code. Programs match on the string; shell scripts on the exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Index (exit 2)
    IndexUnavailable,
    EmptyIndex,
    DatabaseError,

    // Not Found (exit 3)
    AtlasNotFound,

    // Validation (exit 4)
    InvalidArgument,
    RebuildPolicyRequired,

    // Probe input (exit 5)
    FetchError,
    DecodeError,

    // Store writes (exit 6)
    StoreWriteError,

    // Config (exit 7)
    ConfigError,

    // I/O (exit 8)
    IoError,
    JsonError,

    // Extractor (exit 9)
    ExtractorUnavailable,

    // Internal (exit 1)
    InternalError,
}

impl ErrorCode {
    /// Machine-readable SCREAMING_SNAKE code string.
    #[must_use]
    pub const fn as_str(&self) -> &str {
        match self {
            Self::IndexUnavailable => "INDEX_UNAVAILABLE",
            Self::EmptyIndex => "EMPTY_INDEX",
            Self::DatabaseError => "DATABASE_ERROR",
            Self::AtlasNotFound => "ATLAS_NOT_FOUND",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::RebuildPolicyRequired => "REBUILD_POLICY_REQUIRED",
            Self::FetchError => "FETCH_ERROR",
            Self::DecodeError => "DECODE_ERROR",
            Self::StoreWriteError => "STORE_WRITE_ERROR",
            Self::ConfigError => "CONFIG_ERROR",
            Self::IoError => "IO_ERROR",
            Self::JsonError => "JSON_ERROR",
            Self::ExtractorUnavailable => "EXTRACTOR_UNAVAILABLE",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Category-based exit code (1-9).
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::InternalError => 1,
            Self::IndexUnavailable | Self::EmptyIndex | Self::DatabaseError => 2,
            Self::AtlasNotFound => 3,
            Self::InvalidArgument | Self::RebuildPolicyRequired => 4,
            Self::FetchError | Self::DecodeError => 5,
            Self::StoreWriteError => 6,
            Self::ConfigError => 7,
            Self::IoError | Self::JsonError => 8,
            Self::ExtractorUnavailable => 9,
        }
    }

    /// Whether retrying the same request (or with corrected flags) can succeed.
    ///
    /// True for transient failures (network, model load, busy database) and
    /// for validation errors the caller can fix. False for bad probe bytes,
    /// missing or empty indexes, and internal errors.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::FetchError
                | Self::ExtractorUnavailable
                | Self::DatabaseError
                | Self::InvalidArgument
                | Self::RebuildPolicyRequired
        )
    }
}

// ── Error Enum ────────────────────────────────────────────────

/// Errors that can occur in Atlas Search operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Embedding extractor unavailable: {0}")]
    ExtractorUnavailable(String),

    #[error("Failed to fetch probe from {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("Failed to decode {stage} probe: {reason}")]
    Decode { stage: ProbeStage, reason: String },

    #[error("Index unavailable: collection '{collection}' not found in {}", path.display())]
    IndexUnavailable { collection: String, path: PathBuf },

    #[error("Index is empty: collection '{collection}' has no entries")]
    EmptyIndex { collection: String },

    #[error("Store write failed for {id}: {reason}")]
    StoreWrite { id: String, reason: String },

    #[error("Collection '{collection}' already holds {count} entries and no rebuild policy was given")]
    RebuildPolicyRequired { collection: String, count: usize },

    #[error("Atlas directory not found: {}", path.display())]
    AtlasNotFound { path: PathBuf },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Map this error to its structured `ErrorCode`.
    #[must_use]
    pub const fn error_code(&self) -> ErrorCode {
        match self {
            Self::ExtractorUnavailable(_) => ErrorCode::ExtractorUnavailable,
            Self::Fetch { .. } => ErrorCode::FetchError,
            Self::Decode { .. } => ErrorCode::DecodeError,
            Self::IndexUnavailable { .. } => ErrorCode::IndexUnavailable,
            Self::EmptyIndex { .. } => ErrorCode::EmptyIndex,
            Self::StoreWrite { .. } => ErrorCode::StoreWriteError,
            Self::RebuildPolicyRequired { .. } => ErrorCode::RebuildPolicyRequired,
            Self::AtlasNotFound { .. } => ErrorCode::AtlasNotFound,
            Self::Database(_) => ErrorCode::DatabaseError,
            Self::Io(_) => ErrorCode::IoError,
            Self::Json(_) => ErrorCode::JsonError,
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::Config(_) => ErrorCode::ConfigError,
            Self::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Category-based exit code, delegating to the `ErrorCode`.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        self.error_code().exit_code()
    }

    /// Pipeline stage that produced this error, if it belongs to one.
    #[must_use]
    pub const fn stage(&self) -> Option<&'static str> {
        match self {
            Self::Fetch { .. } => Some("fetch"),
            Self::Decode { stage, .. } => Some(stage.failure_label()),
            Self::ExtractorUnavailable(_) => Some("extract"),
            Self::IndexUnavailable { .. } | Self::EmptyIndex { .. } => Some("index"),
            Self::StoreWrite { .. } => Some("store-write"),
            Self::Database(_) => Some("store"),
            Self::RebuildPolicyRequired { .. } | Self::AtlasNotFound { .. } => Some("build"),
            Self::Io(_)
            | Self::Json(_)
            | Self::InvalidArgument(_)
            | Self::Config(_)
            | Self::Other(_) => None,
        }
    }

    /// Context-aware recovery hint for humans and calling programs.
    ///
    /// Returns `None` if no actionable suggestion exists.
    #[must_use]
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::IndexUnavailable { .. } => Some(
                "Build the index first: atlas build <ATLAS_DIR>".to_string(),
            ),

            Self::EmptyIndex { collection } => Some(format!(
                "Collection '{collection}' exists but holds nothing. \
                 Build the index first: atlas build <ATLAS_DIR> --extend"
            )),

            Self::RebuildPolicyRequired { .. } => Some(
                "Pass --replace to drop and rebuild, or --extend to add to the existing entries \
                 (or set index.rebuild_policy / ATLAS_REBUILD_POLICY)"
                    .to_string(),
            ),

            Self::AtlasNotFound { .. } => Some(
                "The atlas root must contain one sub-directory per category".to_string(),
            ),

            Self::ExtractorUnavailable(_) => Some(
                "Check the embedding provider with `atlas embeddings status`; \
                 the model is loaded again on the next request"
                    .to_string(),
            ),

            Self::Fetch { .. } => Some(
                "Check that the URL is reachable from this host and returns an image".to_string(),
            ),

            Self::Decode { stage, .. } => Some(match stage {
                ProbeStage::Remote => "The URL did not return a supported image (jpg, png, tif, webp, gif, bmp)".to_string(),
                ProbeStage::Local => "The file exists but is not a supported image".to_string(),
                ProbeStage::Inline => {
                    "Send a base64 payload (optionally as data:image/...;base64,...), a file path, or an http(s) URL"
                        .to_string()
                }
            }),

            Self::StoreWrite { .. }
            | Self::Database(_)
            | Self::Io(_)
            | Self::Json(_)
            | Self::InvalidArgument(_)
            | Self::Config(_)
            | Self::Other(_) => None,
        }
    }

    /// Structured JSON representation for machine consumption.
    ///
    /// Includes error code, message, retryability, exit code, and
    /// optional stage and recovery hint.
    #[must_use]
    pub fn to_structured_json(&self) -> serde_json::Value {
        let code = self.error_code();
        let mut obj = serde_json::json!({
            "error": {
                "code": code.as_str(),
                "message": self.to_string(),
                "retryable": code.is_retryable(),
                "exit_code": code.exit_code(),
            }
        });

        if let Some(stage) = self.stage() {
            obj["error"]["stage"] = serde_json::Value::String(stage.to_string());
        }
        if let Some(hint) = self.hint() {
            obj["error"]["hint"] = serde_json::Value::String(hint);
        }

        obj
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_by_category() {
        assert_eq!(Error::EmptyIndex { collection: "c".into() }.exit_code(), 2);
        assert_eq!(
            Error::Fetch { url: "http://x".into(), reason: "timeout".into() }.exit_code(),
            5
        );
        assert_eq!(Error::ExtractorUnavailable("boom".into()).exit_code(), 9);
        assert_eq!(Error::Other("x".into()).exit_code(), 1);
    }

    #[test]
    fn test_decode_stage_labels() {
        let err = Error::Decode { stage: ProbeStage::Local, reason: "bad bytes".into() };
        assert_eq!(err.stage(), Some("local-read"));
        let err = Error::Decode { stage: ProbeStage::Inline, reason: "bad base64".into() };
        assert_eq!(err.stage(), Some("inline-decode"));
        assert_eq!(
            Error::Fetch { url: "u".into(), reason: "r".into() }.stage(),
            Some("fetch")
        );
    }

    #[test]
    fn test_structured_json_includes_hint_and_stage() {
        let err = Error::IndexUnavailable {
            collection: "pathology_cases".into(),
            path: PathBuf::from("/tmp/none.db"),
        };
        let json = err.to_structured_json();
        assert_eq!(json["error"]["code"], "INDEX_UNAVAILABLE");
        assert_eq!(json["error"]["stage"], "index");
        assert!(json["error"]["hint"].as_str().unwrap().contains("atlas build"));
        assert_eq!(json["error"]["retryable"], false);
    }

    #[test]
    fn test_store_write_has_no_hint() {
        let err = Error::StoreWrite { id: "TUM_a.png".into(), reason: "disk full".into() };
        assert!(err.hint().is_none());
        assert_eq!(err.error_code().as_str(), "STORE_WRITE_ERROR");
    }
}
