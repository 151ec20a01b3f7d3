//! Text-to-vector embedding seam.
//!
//! Provides the [`EmbeddingProvider`] trait that concrete models implement
//! and the [`Embedder`] wrapper the rest of the crate talks to. The wrapper
//! turns every way of not getting a usable vector (no provider, provider
//! error, wrong length, zero norm) into `None`, which the recall engine treats as keyword-only
//! mode rather than as an error.

use anyhow::Result;
use std::sync::Arc;
use tracing::warn;

use crate::config::EmbeddingConfig;
use crate::vector::normalize;

/// Trait for embedding text into vectors.
///
/// All methods are synchronous. Callers in async contexts should use
/// `tokio::task::spawn_blocking`.
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text string into a vector.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Return the number of dimensions this provider produces.
    fn dimensions(&self) -> usize;
}

/// The crate-facing embedding handle. Cheap to clone.
#[derive(Clone)]
pub struct Embedder {
    provider: Option<Arc<dyn EmbeddingProvider>>,
    dimension: usize,
}

impl Embedder {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, dimension: usize) -> Self {
        if provider.dimensions() != dimension {
            warn!(
                provider = provider.dimensions(),
                configured = dimension,
                "embedding provider dimension differs from configuration"
            );
        }
        Self {
            provider: Some(provider),
            dimension,
        }
    }

    /// An embedder that never produces vectors.
    pub fn disabled(dimension: usize) -> Self {
        Self {
            provider: None,
            dimension,
        }
    }

    /// Wire `provider` in unless embeddings are turned off in `config`.
    pub fn from_config(
        config: &EmbeddingConfig,
        provider: Option<Arc<dyn EmbeddingProvider>>,
    ) -> Self {
        match provider {
            Some(p) if config.enabled => Self::new(p, config.dimension),
            _ => Self::disabled(config.dimension),
        }
    }

    pub fn is_available(&self) -> bool {
        self.provider.is_some()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Embed `text` into a unit-norm vector of the configured dimension, or
    /// `None` if that is not possible right now.
    pub fn embed(&self, text: &str) -> Option<Vec<f32>> {
        let provider = self.provider.as_ref()?;
        match provider.embed(text) {
            Ok(v) if v.len() == self.dimension && v.iter().all(|x| *x == 0.0) => {
                warn!("embedding is all zeros, ignoring");
                None
            }
            Ok(mut v) if v.len() == self.dimension => {
                normalize(&mut v);
                Some(v)
            }
            Ok(v) => {
                warn!(
                    expected = self.dimension,
                    actual = v.len(),
                    "embedding has wrong dimension, ignoring"
                );
                None
            }
            Err(e) => {
                warn!(error = %e, "embedding failed, continuing without vector");
                None
            }
        }
    }
}

impl std::fmt::Debug for Embedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Embedder")
            .field("available", &self.is_available())
            .field("dimension", &self.dimension)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;

    struct Fixed(Vec<f32>);

    impl EmbeddingProvider for Fixed {
        fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(self.0.clone())
        }
        fn dimensions(&self) -> usize {
            self.0.len()
        }
    }

    struct Broken;

    impl EmbeddingProvider for Broken {
        fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            bail!("model not loaded")
        }
        fn dimensions(&self) -> usize {
            4
        }
    }

    #[test]
    fn vectors_are_normalized() {
        let embedder = Embedder::new(Arc::new(Fixed(vec![3.0, 4.0, 0.0, 0.0])), 4);
        let v = embedder.embed("anything").unwrap();
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn failure_is_degraded_not_fatal() {
        let embedder = Embedder::new(Arc::new(Broken), 4);
        assert!(embedder.is_available());
        assert!(embedder.embed("text").is_none());
    }

    #[test]
    fn wrong_dimension_is_dropped() {
        let embedder = Embedder::new(Arc::new(Fixed(vec![1.0, 0.0])), 4);
        assert!(embedder.embed("text").is_none());
    }

    #[test]
    fn zero_vector_is_dropped() {
        let embedder = Embedder::new(Arc::new(Fixed(vec![0.0; 4])), 4);
        assert!(embedder.embed("?!").is_none());
    }

    #[test]
    fn disabled_config_ignores_provider() {
        let config = EmbeddingConfig {
            enabled: false,
            dimension: 4,
        };
        let provider: Arc<dyn EmbeddingProvider> = Arc::new(Fixed(vec![1.0, 0.0, 0.0, 0.0]));
        let embedder = Embedder::from_config(&config, Some(provider));
        assert!(!embedder.is_available());
        assert!(embedder.embed("text").is_none());
    }
}
