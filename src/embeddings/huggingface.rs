//! HuggingFace Inference API image embedding provider.
//!
//! Posts encoded image bytes to the `image-feature-extraction` pipeline.
//! Requires a HuggingFace API token (`HF_TOKEN`).

use crate::error::{Error, Result};
use image::RgbImage;
use serde::Deserialize;

use super::config::{resolve_hf_endpoint, resolve_hf_model, resolve_hf_token};
use super::provider::{encode_png, ImageEmbeddingProvider};
use super::types::{image_models, ProviderInfo};

/// HuggingFace Inference API embedding provider.
pub struct HuggingFaceProvider {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    token: String,
    dimensions: usize,
}

impl HuggingFaceProvider {
    /// Create a new HuggingFace provider with default configuration.
    ///
    /// Returns `None` if no API token is configured.
    #[must_use]
    pub fn new() -> Option<Self> {
        Self::with_config(None, None, None)
    }

    /// Create a new HuggingFace provider with custom configuration.
    ///
    /// Returns `None` if no API token is available.
    #[must_use]
    pub fn with_config(
        endpoint: Option<String>,
        model: Option<String>,
        token: Option<String>,
    ) -> Option<Self> {
        let token = token.or_else(resolve_hf_token)?;
        let endpoint = endpoint.unwrap_or_else(resolve_hf_endpoint);
        let model = model.unwrap_or_else(resolve_hf_model);
        let config = image_models::get_config(&model);

        Some(Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model,
            token,
            dimensions: config.dimensions,
        })
    }

    fn pipeline_url(&self) -> String {
        format!(
            "{}/models/{}/pipeline/image-feature-extraction",
            self.endpoint, self.model
        )
    }
}

/// Feature extraction output; the shape depends on the model head.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HfFeatureResponse {
    /// Pooled embedding
    Direct(Vec<f32>),
    /// Per-token features, first row is the class token
    Tokens(Vec<Vec<f32>>),
    /// Batched per-token features
    Batched(Vec<Vec<Vec<f32>>>),
}

impl HfFeatureResponse {
    fn into_embedding(self) -> Option<Vec<f32>> {
        match self {
            Self::Direct(embedding) => Some(embedding),
            Self::Tokens(tokens) => tokens.into_iter().next(),
            Self::Batched(batch) => batch.into_iter().next().and_then(|t| t.into_iter().next()),
        }
    }
}

impl ImageEmbeddingProvider for HuggingFaceProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "huggingface".to_string(),
            model: self.model.clone(),
            dimensions: self.dimensions,
            reentrant: true,
        }
    }

    async fn is_available(&self) -> bool {
        // Pinging the API would spend rate limit quota
        !self.token.is_empty()
    }

    async fn embed_image(&self, image: &RgbImage) -> Result<Vec<f32>> {
        let body = encode_png(image)?;

        let response = self
            .client
            .post(self.pipeline_url())
            .bearer_auth(&self.token)
            .header("Content-Type", "image/png")
            .header("x-wait-for-model", "true")
            .body(body)
            .send()
            .await
            .map_err(|e| Error::ExtractorUnavailable(format!("HuggingFace request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error = response.text().await.unwrap_or_default();
            return Err(Error::ExtractorUnavailable(format!(
                "HuggingFace API error ({status}): {error}"
            )));
        }

        let data: HfFeatureResponse = response.json().await.map_err(|e| {
            Error::ExtractorUnavailable(format!("Failed to parse HuggingFace response: {e}"))
        })?;

        data.into_embedding()
            .ok_or_else(|| Error::ExtractorUnavailable("No embedding in HuggingFace response".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_huggingface_provider_with_token() {
        let provider = HuggingFaceProvider::with_config(
            Some("https://hf.example/".into()),
            Some("vinid/plip".to_string()),
            Some("test-token".to_string()),
        )
        .unwrap();
        let info = provider.info();
        assert_eq!(info.name, "huggingface");
        assert_eq!(info.dimensions, 512);
        assert_eq!(
            provider.pipeline_url(),
            "https://hf.example/models/vinid/plip/pipeline/image-feature-extraction"
        );
    }

    #[test]
    fn test_response_shapes() {
        let direct: HfFeatureResponse = serde_json::from_str("[0.1, 0.2]").unwrap();
        assert_eq!(direct.into_embedding(), Some(vec![0.1, 0.2]));

        let tokens: HfFeatureResponse = serde_json::from_str("[[0.3, 0.4], [9.0, 9.0]]").unwrap();
        assert_eq!(tokens.into_embedding(), Some(vec![0.3, 0.4]));

        let batched: HfFeatureResponse = serde_json::from_str("[[[0.5, 0.6]]]").unwrap();
        assert_eq!(batched.into_embedding(), Some(vec![0.5, 0.6]));

        let empty: HfFeatureResponse = serde_json::from_str("[]").unwrap();
        assert!(empty.into_embedding().map_or(true, |v| v.is_empty()));
    }
}
