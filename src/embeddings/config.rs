//! Embedding configuration management.
//!
//! Reads and writes the `embeddings` section of `~/.atlas/config.json`.
//! Every value resolves with the same priority: env var > config > default.

use crate::config::{load_config, save_config};
use crate::error::Result;

use super::types::{image_models, EmbeddingProviderType, EmbeddingSettings};

/// Default OpenAI-compatible embedding server (infinity's default port).
pub const DEFAULT_EMBED_ENDPOINT: &str = "http://localhost:7997";

/// Default HuggingFace inference endpoint.
pub const DEFAULT_HF_ENDPOINT: &str = "https://router.huggingface.co/hf-inference";

/// Get embedding settings from config file.
pub fn get_embedding_settings() -> Result<Option<EmbeddingSettings>> {
    Ok(load_config()?.embeddings)
}

/// Save embedding settings (merges with existing config).
pub fn save_embedding_settings(settings: &EmbeddingSettings) -> Result<()> {
    let mut config = load_config()?;

    let existing = config.embeddings.unwrap_or_default();
    config.embeddings = Some(EmbeddingSettings {
        enabled: settings.enabled.or(existing.enabled),
        provider: settings.provider.or(existing.provider),
        EMBED_ENDPOINT: settings.EMBED_ENDPOINT.clone().or(existing.EMBED_ENDPOINT),
        EMBED_MODEL: settings.EMBED_MODEL.clone().or(existing.EMBED_MODEL),
        EMBED_API_KEY: settings.EMBED_API_KEY.clone().or(existing.EMBED_API_KEY),
        HF_TOKEN: settings.HF_TOKEN.clone().or(existing.HF_TOKEN),
        HF_MODEL: settings.HF_MODEL.clone().or(existing.HF_MODEL),
        HF_ENDPOINT: settings.HF_ENDPOINT.clone().or(existing.HF_ENDPOINT),
    });

    save_config(&config)
}

/// Reset embedding settings (removes from config).
pub fn reset_embedding_settings() -> Result<()> {
    let mut config = load_config()?;
    config.embeddings = None;
    save_config(&config)
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn resolve(env_key: &str, from_settings: impl FnOnce(EmbeddingSettings) -> Option<String>) -> Option<String> {
    env_value(env_key).or_else(|| {
        get_embedding_settings()
            .ok()
            .flatten()
            .and_then(from_settings)
    })
}

/// Resolve the OpenAI-compatible embedding endpoint.
pub fn resolve_embed_endpoint() -> String {
    resolve("EMBED_ENDPOINT", |s| s.EMBED_ENDPOINT)
        .unwrap_or_else(|| DEFAULT_EMBED_ENDPOINT.to_string())
}

/// Resolve the model served by the embedding endpoint.
pub fn resolve_embed_model() -> String {
    resolve("EMBED_MODEL", |s| s.EMBED_MODEL)
        .unwrap_or_else(|| image_models::default_config().name)
}

/// Resolve the optional bearer token for the embedding endpoint.
pub fn resolve_embed_api_key() -> Option<String> {
    resolve("EMBED_API_KEY", |s| s.EMBED_API_KEY)
}

/// Resolve HuggingFace token from config or environment.
pub fn resolve_hf_token() -> Option<String> {
    resolve("HF_TOKEN", |s| s.HF_TOKEN)
}

/// Resolve HuggingFace model from config or environment.
pub fn resolve_hf_model() -> String {
    resolve("HF_MODEL", |s| s.HF_MODEL).unwrap_or_else(|| image_models::default_config().name)
}

/// Resolve HuggingFace endpoint from config or environment.
pub fn resolve_hf_endpoint() -> String {
    resolve("HF_ENDPOINT", |s| s.HF_ENDPOINT).unwrap_or_else(|| DEFAULT_HF_ENDPOINT.to_string())
}

/// Resolve the explicitly configured provider, if any.
pub fn resolve_provider_type() -> Option<EmbeddingProviderType> {
    if let Some(value) = env_value("ATLAS_EMBED_PROVIDER") {
        if let Ok(provider) = value.parse() {
            return Some(provider);
        }
        tracing::warn!(value = %value, "Ignoring unknown ATLAS_EMBED_PROVIDER");
    }

    get_embedding_settings().ok().flatten().and_then(|s| s.provider)
}

/// Check if embeddings are enabled.
pub fn is_embeddings_enabled() -> bool {
    if let Ok(enabled) = std::env::var("ATLAS_EMBEDDINGS_ENABLED") {
        return enabled != "false" && enabled != "0";
    }

    if let Ok(Some(settings)) = get_embedding_settings() {
        return settings.enabled.unwrap_or(true);
    }

    true
}
