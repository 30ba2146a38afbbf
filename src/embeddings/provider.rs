//! Image embedding provider trait.
//!
//! Defines the interface that all embedding providers must implement.
//! Uses async methods for HTTP-based providers.

use crate::error::{Error, Result};
use image::{ImageFormat, RgbImage};
use std::future::Future;
use std::io::Cursor;
use std::pin::Pin;

use super::types::ProviderInfo;

/// Trait for image embedding providers.
///
/// Implemented by the OpenAI-compatible HTTP and HuggingFace providers.
/// Providers return raw vectors; normalization happens in the extractor.
pub trait ImageEmbeddingProvider: Send + Sync {
    /// Get provider metadata.
    fn info(&self) -> ProviderInfo;

    /// Check if the provider is reachable and configured.
    fn is_available(&self) -> impl Future<Output = bool> + Send;

    /// Generate an embedding for a single image.
    fn embed_image(&self, image: &RgbImage) -> impl Future<Output = Result<Vec<f32>>> + Send;

    /// Generate embeddings for multiple images (batch).
    ///
    /// Default implementation calls `embed_image` for each image.
    fn embed_images(&self, images: &[RgbImage]) -> impl Future<Output = Result<Vec<Vec<f32>>>> + Send {
        async move {
            let mut results = Vec::with_capacity(images.len());
            for image in images {
                results.push(self.embed_image(image).await?);
            }
            Ok(results)
        }
    }
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Boxed provider for dynamic dispatch.
///
/// Since the trait has async methods with `impl Future`, we need this wrapper
/// for runtime polymorphism.
pub struct BoxedProvider {
    inner: Box<dyn ImageEmbeddingProviderBoxed + Send + Sync>,
}

/// Object-safe version of `ImageEmbeddingProvider` for boxing.
pub trait ImageEmbeddingProviderBoxed: Send + Sync {
    fn info(&self) -> ProviderInfo;
    fn is_available_boxed(&self) -> BoxFuture<'_, bool>;
    fn embed_image_boxed<'a>(&'a self, image: &'a RgbImage) -> BoxFuture<'a, Result<Vec<f32>>>;
    fn embed_images_boxed<'a>(&'a self, images: &'a [RgbImage]) -> BoxFuture<'a, Result<Vec<Vec<f32>>>>;
}

impl BoxedProvider {
    /// Create a new boxed provider.
    pub fn new<P: ImageEmbeddingProvider + 'static>(provider: P) -> Self {
        Self {
            inner: Box::new(BoxedProviderWrapper(provider)),
        }
    }

    /// Get provider metadata.
    #[must_use]
    pub fn info(&self) -> ProviderInfo {
        self.inner.info()
    }

    /// Check if the provider is available.
    pub async fn is_available(&self) -> bool {
        self.inner.is_available_boxed().await
    }

    /// Generate an embedding for a single image.
    pub async fn embed_image(&self, image: &RgbImage) -> Result<Vec<f32>> {
        self.inner.embed_image_boxed(image).await
    }

    /// Generate embeddings for multiple images (batch).
    pub async fn embed_images(&self, images: &[RgbImage]) -> Result<Vec<Vec<f32>>> {
        self.inner.embed_images_boxed(images).await
    }
}

impl std::fmt::Debug for BoxedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let info = self.info();
        f.debug_struct("BoxedProvider")
            .field("name", &info.name)
            .field("model", &info.model)
            .finish()
    }
}

/// Wrapper to implement `ImageEmbeddingProviderBoxed` for any `ImageEmbeddingProvider`.
struct BoxedProviderWrapper<P: ImageEmbeddingProvider + 'static>(P);

impl<P: ImageEmbeddingProvider + 'static> ImageEmbeddingProviderBoxed for BoxedProviderWrapper<P> {
    fn info(&self) -> ProviderInfo {
        self.0.info()
    }

    fn is_available_boxed(&self) -> BoxFuture<'_, bool> {
        Box::pin(self.0.is_available())
    }

    fn embed_image_boxed<'a>(&'a self, image: &'a RgbImage) -> BoxFuture<'a, Result<Vec<f32>>> {
        Box::pin(self.0.embed_image(image))
    }

    fn embed_images_boxed<'a>(&'a self, images: &'a [RgbImage]) -> BoxFuture<'a, Result<Vec<Vec<f32>>>> {
        Box::pin(self.0.embed_images(images))
    }
}

/// Encode an RGB raster as PNG for transport to a remote model.
///
/// # Errors
///
/// Returns `Error::ExtractorUnavailable` if encoding fails.
pub fn encode_png(image: &RgbImage) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .map_err(|e| Error::ExtractorUnavailable(format!("Failed to encode image: {e}")))?;
    Ok(buf)
}
