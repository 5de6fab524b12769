//! Embedding Provider boundary
//!
//! Uses a trait-based embedding backend (`Embedder`) so production code can use
//! fastembed-rs while tests use deterministic mock embedders.

use thiserror::Error;

/// Error type for embedding operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EmbeddingError {
    /// The provider could not be reached (network, rate limit, model busy)
    #[error("embedding provider unavailable: {0}")]
    Unavailable(String),

    /// Model loading or inference failed
    #[error("embedding model error: {0}")]
    ModelError(String),

    /// The embedding model returned no results
    #[error("embedding returned no results")]
    EmptyResult,

    #[error("embedding has {actual} dimensions, store expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("no embedding provider configured")]
    NotConfigured,
}

impl EmbeddingError {
    /// Worth retrying with backoff
    pub fn is_transient(&self) -> bool {
        matches!(self, EmbeddingError::Unavailable(_) | EmbeddingError::ModelError(_))
    }
}

/// Trait for embedding text into vectors.
///
/// Implementations handle model loading and inference and always return
/// vectors of one fixed dimensionality.
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts, returning one vector per text.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_batch(&[text])?
            .into_iter()
            .next()
            .ok_or(EmbeddingError::EmptyResult)
    }
}

/// Embedder for deployments where every mention arrives pre-embedded
#[derive(Debug, Default, Clone, Copy)]
pub struct NoEmbedder;

impl Embedder for NoEmbedder {
    fn embed_batch(&self, _texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Err(EmbeddingError::NotConfigured)
    }
}

#[cfg(feature = "embeddings")]
mod fastembed_impl {
    use super::{Embedder, EmbeddingError};
    use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
    use std::sync::Mutex;

    /// Production embedder backed by fastembed (ONNX Runtime).
    ///
    /// `TextEmbedding::embed` needs `&mut self`, hence the Mutex.
    pub struct FastEmbedEmbedder {
        model: Mutex<TextEmbedding>,
    }

    impl FastEmbedEmbedder {
        pub fn new(model: EmbeddingModel) -> Result<Self, EmbeddingError> {
            let options = InitOptions::new(model).with_show_download_progress(false);
            let embedding = TextEmbedding::try_new(options)
                .map_err(|e| EmbeddingError::ModelError(e.to_string()))?;
            Ok(Self {
                model: Mutex::new(embedding),
            })
        }

        /// nomic-embed-text-v1.5 (768 dimensions)
        pub fn default_model() -> Result<Self, EmbeddingError> {
            Self::new(EmbeddingModel::NomicEmbedTextV15)
        }
    }

    impl Embedder for FastEmbedEmbedder {
        fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            if texts.is_empty() {
                return Ok(Vec::new());
            }
            let mut model = self
                .model
                .lock()
                .map_err(|_| EmbeddingError::Unavailable("embedding model lock poisoned".to_string()))?;
            let embeddings = model
                .embed(texts.to_vec(), None)
                .map_err(|e| EmbeddingError::ModelError(e.to_string()))?;
            if embeddings.is_empty() {
                return Err(EmbeddingError::EmptyResult);
            }
            Ok(embeddings)
        }
    }
}

#[cfg(feature = "embeddings")]
pub use fastembed_impl::FastEmbedEmbedder;
