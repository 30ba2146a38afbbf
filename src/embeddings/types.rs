//! Embedding types and configuration.
//!
//! Settings are stored under the `embeddings` key of `~/.atlas/config.json`.

use serde::{Deserialize, Serialize};

/// Embedding provider types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderType {
    /// OpenAI-compatible `/embeddings` server with image support (infinity, clip servers)
    Http,
    Huggingface,
}

impl std::fmt::Display for EmbeddingProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http => write!(f, "http"),
            Self::Huggingface => write!(f, "huggingface"),
        }
    }
}

impl std::str::FromStr for EmbeddingProviderType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "http" | "openai" | "infinity" => Ok(Self::Http),
            "huggingface" | "hf" => Ok(Self::Huggingface),
            _ => Err(format!("Unknown provider: {s}. Valid options: http, huggingface")),
        }
    }
}

/// Embedding settings stored in `~/.atlas/config.json`.
///
/// Field names match the environment variables that override them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[allow(non_snake_case)]
pub struct EmbeddingSettings {
    pub enabled: Option<bool>,
    pub provider: Option<EmbeddingProviderType>,
    pub EMBED_ENDPOINT: Option<String>,
    pub EMBED_MODEL: Option<String>,
    pub EMBED_API_KEY: Option<String>,
    pub HF_TOKEN: Option<String>,
    pub HF_MODEL: Option<String>,
    pub HF_ENDPOINT: Option<String>,
}

/// Provider metadata.
#[derive(Debug, Clone)]
pub struct ProviderInfo {
    pub name: String,
    pub model: String,
    /// Expected output dimension (informational; the extractor learns the real one)
    pub dimensions: usize,
    /// Whether concurrent calls into the provider are safe
    pub reentrant: bool,
}

/// Model configuration with expected dimensions.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub name: String,
    pub dimensions: usize,
}

/// Known image embedding models.
pub mod image_models {
    use super::ModelConfig;

    /// PLIP - CLIP fine-tuned on pathology image/text pairs
    pub fn plip() -> ModelConfig {
        ModelConfig {
            name: "vinid/plip".to_string(),
            dimensions: 512,
        }
    }

    pub fn clip_vit_b32() -> ModelConfig {
        ModelConfig {
            name: "openai/clip-vit-base-patch32".to_string(),
            dimensions: 512,
        }
    }

    pub fn clip_vit_l14() -> ModelConfig {
        ModelConfig {
            name: "openai/clip-vit-large-patch14".to_string(),
            dimensions: 768,
        }
    }

    pub fn default_config() -> ModelConfig {
        plip()
    }

    pub fn get_config(model: &str) -> ModelConfig {
        match model {
            "vinid/plip" | "plip" => plip(),
            "openai/clip-vit-base-patch32" => clip_vit_b32(),
            "openai/clip-vit-large-patch14" => clip_vit_l14(),
            _ => ModelConfig {
                name: model.to_string(),
                dimensions: 512, // CLIP ViT-B default
            },
        }
    }
}
