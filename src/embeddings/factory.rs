//! Embedding provider factory.
//!
//! Handles provider detection and creation.

use crate::error::{Error, Result};

use super::config::{is_embeddings_enabled, resolve_provider_type};
use super::huggingface::HuggingFaceProvider;
use super::http::HttpProvider;
use super::provider::{BoxedProvider, ImageEmbeddingProvider};
use super::types::EmbeddingProviderType;

/// Available provider detection result.
#[derive(Debug, Clone)]
pub struct ProviderDetection {
    /// List of available provider names.
    pub available: Vec<String>,
    /// Recommended provider (first available).
    pub recommended: Option<String>,
}

/// Detect which embedding providers are available.
pub async fn detect_available_providers() -> ProviderDetection {
    let mut available = Vec::new();

    let http = HttpProvider::new();
    if http.is_available().await {
        available.push("http".to_string());
    }

    if let Some(hf) = HuggingFaceProvider::new() {
        if hf.is_available().await {
            available.push("huggingface".to_string());
        }
    }

    let recommended = available.first().cloned();

    ProviderDetection {
        available,
        recommended,
    }
}

/// Create an embedding provider based on configuration.
///
/// Priority:
/// 1. Explicit provider (`ATLAS_EMBED_PROVIDER` or config)
/// 2. Auto-detect available provider (local HTTP server preferred)
///
/// # Errors
///
/// Returns `Error::ExtractorUnavailable` if embeddings are disabled or no
/// provider can be reached.
pub async fn create_embedding_provider() -> Result<BoxedProvider> {
    if !is_embeddings_enabled() {
        return Err(Error::ExtractorUnavailable(
            "embeddings are disabled (ATLAS_EMBEDDINGS_ENABLED / embeddings.enabled)".into(),
        ));
    }

    if let Some(provider_type) = resolve_provider_type() {
        return create_provider_by_type(provider_type).await;
    }

    let http = HttpProvider::new();
    if http.is_available().await {
        return Ok(BoxedProvider::new(http));
    }

    if let Some(hf) = HuggingFaceProvider::new() {
        if hf.is_available().await {
            return Ok(BoxedProvider::new(hf));
        }
    }

    Err(Error::ExtractorUnavailable(
        "no embedding provider available: start an embedding server at EMBED_ENDPOINT or set HF_TOKEN".into(),
    ))
}

/// Create a specific provider by type.
///
/// # Errors
///
/// Returns `Error::ExtractorUnavailable` if the provider is unreachable or
/// missing credentials.
pub async fn create_provider_by_type(provider_type: EmbeddingProviderType) -> Result<BoxedProvider> {
    match provider_type {
        EmbeddingProviderType::Http => {
            let provider = HttpProvider::new();
            if provider.is_available().await {
                Ok(BoxedProvider::new(provider))
            } else {
                let info = provider.info();
                Err(Error::ExtractorUnavailable(format!(
                    "embedding server for model '{}' is not reachable",
                    info.model
                )))
            }
        }
        EmbeddingProviderType::Huggingface => HuggingFaceProvider::new()
            .map(BoxedProvider::new)
            .ok_or_else(|| Error::ExtractorUnavailable("HF_TOKEN is not configured".into())),
    }
}
