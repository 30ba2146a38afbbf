//! Shared embedding extractor.
//!
//! Wraps a provider with a lazy, process-wide lifecycle:
//!
//! - The provider is created on first use. Concurrent first callers wait on
//!   a single initialization and all observe the same outcome.
//! - A failed initialization is reported to every waiter and reset, so the
//!   next call tries again.
//! - Loading runs on its own task; a caller that gives up waiting does not
//!   abandon it.
//! - Output vectors are L2-normalized and must keep one dimension for the
//!   lifetime of the extractor.

use crate::error::{Error, Result};
use image::RgbImage;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, OnceLock};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::factory::create_embedding_provider;
use super::provider::BoxedProvider;

type LoadFuture = Pin<Box<dyn Future<Output = Result<BoxedProvider>> + Send>>;
type Loader = Arc<dyn Fn() -> LoadFuture + Send + Sync>;

/// Published result of one initialization attempt.
type LoadOutcome = Option<std::result::Result<Arc<BoxedProvider>, String>>;

enum LoadState {
    Idle,
    Loading(watch::Receiver<LoadOutcome>),
    Ready(Arc<BoxedProvider>),
}

struct Inner {
    loader: Loader,
    state: Mutex<LoadState>,
    dimension: OnceLock<usize>,
    /// Serializes calls into providers that are not reentrant
    call_gate: tokio::sync::Mutex<()>,
}

/// Cheaply clonable handle to the shared extractor.
#[derive(Clone)]
pub struct Extractor {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Extractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Extractor")
            .field("initialized", &self.is_initialized())
            .field("dimension", &self.dimension())
            .finish()
    }
}

impl Extractor {
    /// Create an extractor whose provider is built by `loader` on first use.
    pub fn new<F, Fut>(loader: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<BoxedProvider>> + Send + 'static,
    {
        let loader: Loader = Arc::new(move || Box::pin(loader()) as LoadFuture);
        Self {
            inner: Arc::new(Inner {
                loader,
                state: Mutex::new(LoadState::Idle),
                dimension: OnceLock::new(),
                call_gate: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Extractor backed by the configured provider (see `create_embedding_provider`).
    #[must_use]
    pub fn from_settings() -> Self {
        Self::new(create_embedding_provider)
    }

    /// Whether the provider has been loaded.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.inner
            .state
            .lock()
            .is_ok_and(|state| matches!(*state, LoadState::Ready(_)))
    }

    /// Output dimension, once the first vector has been produced.
    #[must_use]
    pub fn dimension(&self) -> Option<usize> {
        self.inner.dimension.get().copied()
    }

    /// Load the provider now instead of on the first request.
    ///
    /// # Errors
    ///
    /// Returns `Error::ExtractorUnavailable` if initialization fails.
    pub async fn warm_up(&self) -> Result<()> {
        let provider = self.provider().await?;
        let info = provider.info();
        info!(provider = %info.name, model = %info.model, "Embedding provider ready");
        Ok(())
    }

    /// Embed one image.
    ///
    /// # Errors
    ///
    /// Returns `Error::ExtractorUnavailable` if the provider cannot be loaded,
    /// fails mid-call, or returns a degenerate vector.
    pub async fn extract(&self, image: &RgbImage) -> Result<Vec<f32>> {
        let provider = self.provider().await?;
        let raw = {
            let _gate = self.gate(&provider).await;
            provider.embed_image(image).await?
        };
        self.finish(raw)
    }

    /// Embed a batch of images; vectors are returned in input order.
    ///
    /// # Errors
    ///
    /// Same as [`Extractor::extract`], plus a count mismatch between input
    /// images and returned vectors.
    pub async fn extract_batch(&self, images: &[RgbImage]) -> Result<Vec<Vec<f32>>> {
        if images.is_empty() {
            return Ok(Vec::new());
        }

        let provider = self.provider().await?;
        let raw = {
            let _gate = self.gate(&provider).await;
            provider.embed_images(images).await?
        };

        if raw.len() != images.len() {
            return Err(Error::ExtractorUnavailable(format!(
                "provider returned {} vectors for {} images",
                raw.len(),
                images.len()
            )));
        }

        raw.into_iter().map(|v| self.finish(v)).collect()
    }

    async fn gate(&self, provider: &BoxedProvider) -> Option<tokio::sync::MutexGuard<'_, ()>> {
        if provider.info().reentrant {
            None
        } else {
            Some(self.inner.call_gate.lock().await)
        }
    }

    fn finish(&self, raw: Vec<f32>) -> Result<Vec<f32>> {
        let vector = l2_normalize(raw)?;
        let expected = *self.inner.dimension.get_or_init(|| {
            debug!(dimension = vector.len(), "Embedding dimension fixed");
            vector.len()
        });
        if vector.len() != expected {
            return Err(Error::ExtractorUnavailable(format!(
                "embedding dimension changed from {expected} to {}",
                vector.len()
            )));
        }
        Ok(vector)
    }

    /// Get the loaded provider, starting or joining initialization as needed.
    async fn provider(&self) -> Result<Arc<BoxedProvider>> {
        let mut rx = {
            let mut state = self
                .inner
                .state
                .lock()
                .map_err(|_| Error::ExtractorUnavailable("extractor state lock poisoned".into()))?;

            match &*state {
                LoadState::Ready(provider) => return Ok(Arc::clone(provider)),
                // Sender gone without publishing: the load task died
                LoadState::Loading(rx) if rx.has_changed().is_ok() => rx.clone(),
                LoadState::Loading(_) | LoadState::Idle => {
                    let (tx, rx) = watch::channel(None);
                    *state = LoadState::Loading(rx.clone());
                    tokio::spawn(Arc::clone(&self.inner).load(tx));
                    rx
                }
            }
        };

        let outcome = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| Error::ExtractorUnavailable("initialization was abandoned".into()))?;

        match &*outcome {
            Some(Ok(provider)) => Ok(Arc::clone(provider)),
            Some(Err(reason)) => Err(Error::ExtractorUnavailable(reason.clone())),
            None => Err(Error::ExtractorUnavailable("initialization produced no result".into())),
        }
    }
}

impl Inner {
    async fn load(self: Arc<Self>, tx: watch::Sender<LoadOutcome>) {
        info!("Initializing embedding provider");
        let result = (self.loader)().await;

        let published = match result {
            Ok(provider) => {
                let provider = Arc::new(provider);
                self.set_state(LoadState::Ready(Arc::clone(&provider)));
                Ok(provider)
            }
            Err(e) => {
                warn!(error = %e, "Embedding provider initialization failed");
                self.set_state(LoadState::Idle);
                Err(e.to_string())
            }
        };

        // No receivers left is fine; the state is already updated
        let _ = tx.send(Some(published));
    }

    fn set_state(&self, next: LoadState) {
        match self.state.lock() {
            Ok(mut state) => *state = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }
}

/// Scale a vector to unit length.
///
/// # Errors
///
/// Returns `Error::ExtractorUnavailable` for empty, zero-norm or non-finite vectors.
pub fn l2_normalize(mut vector: Vec<f32>) -> Result<Vec<f32>> {
    if vector.iter().any(|x| !x.is_finite()) {
        return Err(Error::ExtractorUnavailable("embedding contains non-finite values".into()));
    }
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if vector.is_empty() || norm == 0.0 {
        return Err(Error::ExtractorUnavailable("embedding has zero norm".into()));
    }
    for x in &mut vector {
        *x /= norm;
    }
    Ok(vector)
}
