//! Embedding provider interface.
//!
//! Embedding is an external, typically network-bound collaborator. Batches
//! are all-or-nothing: a provider either returns one vector per input text
//! in input order, or fails the whole batch. Partial results are a contract
//! violation and are treated as a failed batch by the pipeline.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("Embedding provider unavailable: {0}")]
    Unavailable(String),
    #[error("Embedding request failed: {0}")]
    RequestFailed(String),
    #[error("Embedding request timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("Provider returned {got} vectors for {expected} inputs")]
    CountMismatch { expected: usize, got: usize },
    #[error("Provider returned a {got}-dim vector, expected {expected}")]
    DimensionMismatch { expected: usize, got: usize },
}

/// One embedding vector with its provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingVector {
    pub vector: Vec<f32>,
    pub dimension: u32,
    pub provider: String,
    pub model: String,
}

/// Result of embedding one batch of texts, in input order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmbeddingBatch {
    pub vectors: Vec<EmbeddingVector>,
}

/// External embedding provider.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Fixed output dimension for this provider/model.
    fn dimension(&self) -> usize;

    /// Embed a batch of texts, preserving input order. All-or-nothing:
    /// implementations must not return partial batches.
    async fn embed_batch(&self, texts: &[String]) -> Result<EmbeddingBatch, EmbedderError>;

    /// Cheap availability probe, used by status reporting and by the
    /// pipeline's startup check.
    async fn is_available(&self) -> bool {
        true
    }
}

/// Validate a provider response against its inputs.
///
/// Checks the one-vector-per-text contract and the fixed dimension. Shared
/// by the pipeline and the searcher so a misbehaving provider fails loudly
/// in both places.
pub fn validate_batch(
    batch: &EmbeddingBatch,
    input_count: usize,
    dimension: usize,
) -> Result<(), EmbedderError> {
    if batch.vectors.len() != input_count {
        return Err(EmbedderError::CountMismatch {
            expected: input_count,
            got: batch.vectors.len(),
        });
    }
    for v in &batch.vectors {
        if v.vector.len() != dimension || v.dimension as usize != dimension {
            return Err(EmbedderError::DimensionMismatch {
                expected: dimension,
                got: v.vector.len(),
            });
        }
    }
    Ok(())
}
