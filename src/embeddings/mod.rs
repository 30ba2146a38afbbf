//! Image embeddings for visual similarity search.
//!
//! Provides embedding generation using HTTP-based providers:
//! - **HTTP** (local or self-hosted) - any OpenAI-compatible `/embeddings`
//!   server that accepts images (infinity, CLIP gateways)
//! - **HuggingFace** (cloud) - Requires API token
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐
//! │ Index Builder / Query │
//! └──────────┬───────────┘
//!            │
//!            ▼
//! ┌─────────────────┐
//! │    Extractor    │  ← Lazy shared init, L2 normalization
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │    Factory      │  ← Auto-detects available provider
//! └────────┬────────┘
//!          │
//!     ┌────┴────┐
//!     ▼         ▼
//! ┌──────┐ ┌───────────┐
//! │ HTTP │ │HuggingFace│
//! └──────┘ └───────────┘
//! ```
//!
//! # Configuration
//!
//! Settings are loaded from `~/.atlas/config.json`.
//!
//! Environment variables take precedence:
//! - `EMBED_ENDPOINT` - embedding server URL (default: `http://localhost:7997`)
//! - `EMBED_MODEL` - model served there (default: `vinid/plip`)
//! - `EMBED_API_KEY` - optional bearer token for the server
//! - `HF_TOKEN` - HuggingFace API token
//! - `HF_MODEL` - HuggingFace model (default: `vinid/plip`)
//! - `ATLAS_EMBED_PROVIDER` - force `http` or `huggingface`
//! - `ATLAS_EMBEDDINGS_ENABLED` - Enable/disable embeddings (default: `true`)

pub mod config;
pub mod extractor;
pub mod factory;
pub mod http;
pub mod huggingface;
pub mod provider;
pub mod types;

pub use config::{
    get_embedding_settings, is_embeddings_enabled, reset_embedding_settings, resolve_embed_endpoint,
    resolve_embed_model, resolve_hf_endpoint, resolve_hf_model, resolve_hf_token, resolve_provider_type,
    save_embedding_settings,
};
pub use extractor::{l2_normalize, Extractor};
pub use factory::{
    create_embedding_provider, create_provider_by_type, detect_available_providers, ProviderDetection,
};
pub use http::HttpProvider;
pub use huggingface::HuggingFaceProvider;
pub use provider::{BoxedProvider, ImageEmbeddingProvider};
pub use types::{EmbeddingProviderType, EmbeddingSettings, ModelConfig, ProviderInfo};
