//! Embedding provider trait and mock implementation.
//!
//! The embedding model is an injected dependency: backends only see
//! `embed(text) -> Vec<f32>` of a fixed dimension.
//!
//! # Providers
//!
//! - `MockEmbeddingProvider`: deterministic hashed bag-of-features vectors
//! - `FastEmbedProvider`: local ONNX models (requires `embed-fastembed`)

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::fuzzy::tokenize;

/// Trait for generating text embeddings.
///
/// Implementations must be `Send + Sync`; wrap thread-unsafe libraries in a
/// mutex and run them on the blocking pool.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding for a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for a batch of texts.
    ///
    /// Default implementation calls `embed` for each text sequentially.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// The embedding dimension.
    fn dimension(&self) -> usize;

    /// The provider name for diagnostics.
    fn name(&self) -> &str;
}

/// Scale `vector` to unit length in place. Zero vectors are left as is.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 && norm.is_finite() {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

/// Check a vector against the expected dimension.
pub fn check_dimension(id: &str, vector: &[f32], expected: usize) -> Result<()> {
    if vector.len() != expected {
        return Err(Error::invalid_document(
            id,
            format!(
                "embedding has dimension {}, index expects {expected}",
                vector.len()
            ),
        ));
    }
    Ok(())
}

/// A deterministic embedding provider for tests and offline use.
///
/// Each lowercase word token and each of its character trigrams is hashed
/// into a bucket; the bucket counts form the vector, which is then
/// unit-normalized. Texts sharing words (or most of a misspelled word) end
/// up close together. Empty text embeds to the zero vector.
#[derive(Debug, Clone)]
pub struct MockEmbeddingProvider {
    dimension: usize,
}

impl MockEmbeddingProvider {
    /// Create a new mock provider with the given dimension.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn bucket(&self, feature: &str) -> usize {
        let hash = blake3::hash(feature.as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&hash.as_bytes()[..8]);
        (u64::from_le_bytes(bytes) % self.dimension as u64) as usize
    }

    fn deterministic_embedding(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.dimension];
        for token in tokenize(text) {
            embedding[self.bucket(&token)] += 1.0;
            let padded: Vec<char> = format!("^{token}$").chars().collect();
            for gram in padded.windows(3) {
                let gram: String = gram.iter().collect();
                embedding[self.bucket(&format!("#{gram}"))] += 0.5;
            }
        }
        l2_normalize(&mut embedding);
        embedding
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.deterministic_embedding(text))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| self.deterministic_embedding(t))
            .collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "mock"
    }
}

// ============================================================================
// Tests
// ============================================================================
