//! Configuration management.
//!
//! Everything lives under one home directory, `~/.atlas/`:
//! - **Config**: `~/.atlas/config.json` (embedding and index settings)
//! - **Database**: `~/.atlas/data/atlas.db`
//!
//! Resolution priority is always: CLI flag > environment > config file > default.
//! `ATLAS_HOME` relocates the whole directory (handy for tests).

use crate::embeddings::EmbeddingSettings;
use crate::error::{Error, Result};
use crate::storage::RebuildPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Collection name used when nothing else is configured.
pub const DEFAULT_COLLECTION: &str = "pathology_cases";

/// Images embedded per extractor call during a build.
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Remote probe download timeout, in seconds.
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;

/// Index settings stored in `~/.atlas/config.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexSettings {
    pub collection: Option<String>,
    pub batch_size: Option<usize>,
    pub rebuild_policy: Option<String>,
    pub fetch_timeout_secs: Option<u64>,
}

/// Full contents of `~/.atlas/config.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AtlasConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embeddings: Option<EmbeddingSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<IndexSettings>,
}

/// Get the atlas home directory.
///
/// `ATLAS_HOME` if set, otherwise `~/.atlas`.
#[must_use]
pub fn atlas_home() -> Option<PathBuf> {
    if let Ok(home) = std::env::var("ATLAS_HOME") {
        if !home.trim().is_empty() {
            return Some(PathBuf::from(home));
        }
    }
    directories::BaseDirs::new().map(|b| b.home_dir().join(".atlas"))
}

/// Get the config file path.
///
/// # Errors
///
/// Returns `Error::Config` if the home directory cannot be determined.
pub fn config_path() -> Result<PathBuf> {
    atlas_home()
        .map(|dir| dir.join("config.json"))
        .ok_or_else(|| Error::Config("Could not determine home directory".into()))
}

/// Load the full configuration. A missing file yields defaults.
///
/// # Errors
///
/// Returns `Error::Config` if the file exists but cannot be read or parsed.
pub fn load_config() -> Result<AtlasConfig> {
    let path = config_path()?;

    if !path.exists() {
        return Ok(AtlasConfig::default());
    }

    let content = fs::read_to_string(&path)
        .map_err(|e| Error::Config(format!("Failed to read config file: {e}")))?;

    serde_json::from_str(&content)
        .map_err(|e| Error::Config(format!("Failed to parse config file: {e}")))
}

/// Save the full configuration.
///
/// # Errors
///
/// Returns `Error::Config` if the directory or file cannot be written.
pub fn save_config(config: &AtlasConfig) -> Result<()> {
    let path = config_path()?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| Error::Config(format!("Failed to create config directory: {e}")))?;
    }

    let content = serde_json::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Failed to serialize config: {e}")))?;

    fs::write(&path, content).map_err(|e| Error::Config(format!("Failed to write config file: {e}")))
}

fn index_settings() -> IndexSettings {
    match load_config() {
        Ok(config) => config.index.unwrap_or_default(),
        Err(e) => {
            tracing::warn!(error = %e, "Ignoring unreadable config file");
            IndexSettings::default()
        }
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Resolve the database path.
///
/// Priority:
/// 1. If `explicit_path` is provided, use it directly
/// 2. `ATLAS_DB` environment variable
/// 3. `<atlas home>/data/atlas.db`
#[must_use]
pub fn resolve_db_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return Some(path.to_path_buf());
    }

    if let Some(db_path) = env_value("ATLAS_DB") {
        return Some(PathBuf::from(db_path));
    }

    atlas_home().map(|dir| dir.join("data").join("atlas.db"))
}

/// Resolve the collection name.
#[must_use]
pub fn resolve_collection(explicit: Option<&str>) -> String {
    if let Some(name) = explicit.filter(|n| !n.trim().is_empty()) {
        return name.to_string();
    }
    env_value("ATLAS_COLLECTION")
        .or_else(|| index_settings().collection)
        .unwrap_or_else(|| DEFAULT_COLLECTION.to_string())
}

/// Resolve the build batch size.
///
/// # Errors
///
/// Returns `Error::InvalidArgument` for zero or unparsable values.
pub fn resolve_batch_size(explicit: Option<usize>) -> Result<usize> {
    let size = match explicit {
        Some(size) => size,
        None => match env_value("ATLAS_BATCH_SIZE") {
            Some(raw) => raw
                .parse()
                .map_err(|_| Error::InvalidArgument(format!("ATLAS_BATCH_SIZE is not a number: {raw}")))?,
            None => index_settings().batch_size.unwrap_or(DEFAULT_BATCH_SIZE),
        },
    };

    if size == 0 {
        return Err(Error::InvalidArgument("batch size must be at least 1".into()));
    }
    Ok(size)
}

/// Resolve the rebuild policy for a build.
///
/// CLI flags win; otherwise `ATLAS_REBUILD_POLICY`, then `index.rebuild_policy`.
/// `None` means no policy was given anywhere.
///
/// # Errors
///
/// Returns `Error::InvalidArgument` for an unknown policy name.
pub fn resolve_rebuild_policy(replace: bool, extend: bool) -> Result<Option<RebuildPolicy>> {
    match (replace, extend) {
        (true, true) => Err(Error::InvalidArgument(
            "--replace and --extend are mutually exclusive".into(),
        )),
        (true, false) => Ok(Some(RebuildPolicy::Replace)),
        (false, true) => Ok(Some(RebuildPolicy::Extend)),
        (false, false) => env_value("ATLAS_REBUILD_POLICY")
            .or_else(|| index_settings().rebuild_policy)
            .map(|raw| raw.parse())
            .transpose(),
    }
}

/// Resolve the remote probe download timeout.
#[must_use]
pub fn resolve_fetch_timeout() -> Duration {
    let secs = env_value("ATLAS_FETCH_TIMEOUT")
        .and_then(|raw| raw.parse().ok())
        .or_else(|| index_settings().fetch_timeout_secs)
        .filter(|s| *s > 0)
        .unwrap_or(DEFAULT_FETCH_TIMEOUT_SECS);
    Duration::from_secs(secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_db_path_with_explicit() {
        let explicit = PathBuf::from("/custom/path/atlas.db");
        let result = resolve_db_path(Some(&explicit));
        assert_eq!(result, Some(explicit));
    }

    #[test]
    fn test_resolve_db_path_default_name() {
        let result = resolve_db_path(None);
        assert!(result.is_some());
        assert!(result.unwrap().extension().is_some());
    }

    #[test]
    fn test_explicit_values_win() {
        assert_eq!(resolve_collection(Some("lung_atlas")), "lung_atlas");
        assert_eq!(resolve_batch_size(Some(4)).unwrap(), 4);
        assert!(resolve_batch_size(Some(0)).is_err());
    }

    #[test]
    fn test_rebuild_policy_flags() {
        assert_eq!(resolve_rebuild_policy(true, false).unwrap(), Some(RebuildPolicy::Replace));
        assert_eq!(resolve_rebuild_policy(false, true).unwrap(), Some(RebuildPolicy::Extend));
        assert!(resolve_rebuild_policy(true, true).is_err());
    }

    #[test]
    fn test_config_serialization_skips_empty_sections() {
        let config = AtlasConfig {
            embeddings: None,
            index: Some(IndexSettings {
                collection: Some("c".into()),
                ..Default::default()
            }),
        };
        let json = serde_json::to_value(&config).unwrap();
        assert!(json.get("embeddings").is_none());
        assert_eq!(json["index"]["collection"], "c");

        let parsed: AtlasConfig = serde_json::from_str(r#"{"index":{"batch_size":32}}"#).unwrap();
        assert_eq!(parsed.index.unwrap().batch_size, Some(32));
    }
}
