//! OpsPilot Infer: query embeddings and the response cache.
//!
//! Provides the `EmbedderBackend` trait for turning text into vectors.
//! `HashingEmbedder` is a dependency-free feature-hashing embedder good
//! enough to recognise paraphrases and rank capability descriptions.
//! With embeddings disabled, `NoopEmbedder` is used and callers fall back
//! to exact or lexical matching.

pub mod cache;
pub mod embedder;

pub use cache::{normalize_query, CachedTurn, ResponseCache};
pub use embedder::{cosine_similarity, EmbedderBackend, EmbeddingResult, HashingEmbedder, NoopEmbedder};

use std::sync::Arc;

/// Embedding width used by [`HashingEmbedder`].
pub const DEFAULT_DIMENSION: usize = 512;

/// Create the embedder for this process.
pub fn create_embedder(enabled: bool) -> Arc<dyn EmbedderBackend> {
    if enabled {
        tracing::info!("Using hashing embedder (dim={})", DEFAULT_DIMENSION);
        Arc::new(HashingEmbedder::new(DEFAULT_DIMENSION))
    } else {
        tracing::info!("Embeddings disabled. Using exact and lexical matching only.");
        Arc::new(NoopEmbedder::new(DEFAULT_DIMENSION))
    }
}
