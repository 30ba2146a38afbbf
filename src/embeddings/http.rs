//! OpenAI-compatible image embedding provider.
//!
//! Talks to any server exposing `POST /embeddings` that accepts images as
//! `data:` URIs (infinity, clip-as-service style gateways). The whole
//! batch is sent in one request.

use crate::error::{Error, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::config::{resolve_embed_api_key, resolve_embed_endpoint, resolve_embed_model};
use super::provider::{encode_png, ImageEmbeddingProvider};
use super::types::{image_models, ProviderInfo};

/// Per-request timeout; large batches over slow GPUs take a while.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// OpenAI-compatible `/embeddings` provider.
pub struct HttpProvider {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    dimensions: usize,
}

impl HttpProvider {
    /// Create a new provider with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(None, None, None)
    }

    /// Create a new provider with custom configuration.
    #[must_use]
    pub fn with_config(endpoint: Option<String>, model: Option<String>, api_key: Option<String>) -> Self {
        let endpoint = endpoint.unwrap_or_else(resolve_embed_endpoint);
        let model = model.unwrap_or_else(resolve_embed_model);
        let config = image_models::get_config(&model);

        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model,
            api_key: api_key.or_else(resolve_embed_api_key),
            dimensions: config.dimensions,
        }
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }
}

impl Default for HttpProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: Vec<String>,
    encoding_format: &'static str,
    modality: &'static str,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbedDatum {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

fn data_uri(image: &RgbImage) -> Result<String> {
    Ok(format!("data:image/png;base64,{}", STANDARD.encode(encode_png(image)?)))
}

/// Order response rows by their `index` and check the count.
fn collect_embeddings(mut data: Vec<EmbedDatum>, expected: usize) -> Result<Vec<Vec<f32>>> {
    if data.len() != expected {
        return Err(Error::ExtractorUnavailable(format!(
            "Embedding server returned {} vectors for {expected} images",
            data.len()
        )));
    }
    data.sort_by_key(|d| d.index);
    Ok(data.into_iter().map(|d| d.embedding).collect())
}

impl ImageEmbeddingProvider for HttpProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "http".to_string(),
            model: self.model.clone(),
            dimensions: self.dimensions,
            reentrant: true,
        }
    }

    async fn is_available(&self) -> bool {
        let url = format!("{}/models", self.endpoint);

        self.request(self.client.get(&url))
            .timeout(Duration::from_secs(2))
            .send()
            .await
            .is_ok_and(|r| r.status().is_success())
    }

    async fn embed_image(&self, image: &RgbImage) -> Result<Vec<f32>> {
        let mut vectors = self.embed_images(std::slice::from_ref(image)).await?;
        vectors
            .pop()
            .ok_or_else(|| Error::ExtractorUnavailable("No embedding in response".into()))
    }

    async fn embed_images(&self, images: &[RgbImage]) -> Result<Vec<Vec<f32>>> {
        if images.is_empty() {
            return Ok(Vec::new());
        }

        let input = images.iter().map(data_uri).collect::<Result<Vec<_>>>()?;
        let request = EmbedRequest {
            model: &self.model,
            input,
            encoding_format: "float",
            modality: "image",
        };

        let url = format!("{}/embeddings", self.endpoint);
        let response = self
            .request(self.client.post(&url))
            .timeout(REQUEST_TIMEOUT)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::ExtractorUnavailable(format!("Embedding request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error = response.text().await.unwrap_or_default();
            return Err(Error::ExtractorUnavailable(format!(
                "Embedding server error ({status}): {error}"
            )));
        }

        let data: EmbedResponse = response
            .json()
            .await
            .map_err(|e| Error::ExtractorUnavailable(format!("Failed to parse embedding response: {e}")))?;

        collect_embeddings(data.data, images.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_config_trims_endpoint() {
        let p = HttpProvider::with_config(
            Some("http://gpu-box:7997/".into()),
            Some("openai/clip-vit-large-patch14".into()),
            None,
        );
        assert_eq!(p.endpoint, "http://gpu-box:7997");
        let info = p.info();
        assert_eq!(info.name, "http");
        assert_eq!(info.dimensions, 768);
        assert!(info.reentrant);
    }

    #[test]
    fn test_response_rows_are_reordered_by_index() {
        let body = r#"{"object":"list","data":[
            {"object":"embedding","embedding":[0.0,1.0],"index":1},
            {"object":"embedding","embedding":[1.0,0.0],"index":0}
        ],"model":"vinid/plip"}"#;
        let parsed: EmbedResponse = serde_json::from_str(body).unwrap();
        let vectors = collect_embeddings(parsed.data, 2).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn test_count_mismatch_is_extractor_error() {
        let data = vec![EmbedDatum { embedding: vec![1.0], index: 0 }];
        let err = collect_embeddings(data, 3).unwrap_err();
        assert!(matches!(err, Error::ExtractorUnavailable(_)));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_unavailable() {
        let p = HttpProvider::with_config(Some("http://127.0.0.1:9".into()), None, None);
        assert!(!p.is_available().await);
        let err = p.embed_image(&RgbImage::new(2, 2)).await.unwrap_err();
        assert!(matches!(err, Error::ExtractorUnavailable(_)));
    }
}
