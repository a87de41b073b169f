//! FastEmbed embedding provider.
//!
//! `fastembed::TextEmbedding` needs `&mut` access and is not `Sync`, so the
//! model lives behind `Arc<Mutex<_>>` and every call runs on
//! `tokio::task::spawn_blocking`. Output vectors are unit-normalized.
//!
//! Requires the `embed-fastembed` feature.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::config::EmbeddingConfig;
use crate::embedding::{EmbeddingProvider, l2_normalize};
use crate::error::{Error, Result};

/// Map a model identifier to a fastembed model.
fn resolve_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" | "all-MiniLM-L6-v2" | "AllMiniLML6V2" => {
            Ok(fastembed::EmbeddingModel::AllMiniLML6V2)
        }
        "bge-small-en-v1.5" | "BGESmallENV15" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" | "BGEBaseENV15" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        other => Err(Error::config(format!(
            "Unknown embedding model: '{other}'. Supported: all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5"
        ))),
    }
}

/// Local transformer embeddings via fastembed.
pub struct FastEmbedProvider {
    model: Arc<Mutex<fastembed::TextEmbedding>>,
    dimension: usize,
    model_name: String,
}

impl FastEmbedProvider {
    /// Load the model named in `config`, downloading it on first use.
    ///
    /// Fails when the probed dimension differs from `config.dimension`.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let mut init = fastembed::InitOptions::new(resolve_model(&config.model)?);
        if let Some(path) = &config.cache_path {
            init = init.with_cache_dir(PathBuf::from(path));
        }

        let mut text_embedding = fastembed::TextEmbedding::try_new(init)
            .map_err(|e| Error::embedding(format!("failed to load '{}': {e}", config.model)))?;

        let probe = text_embedding
            .embed(vec!["dimension probe"], None)
            .map_err(|e| Error::embedding(format!("dimension probe failed: {e}")))?;
        let dimension = probe
            .first()
            .map(Vec::len)
            .ok_or_else(|| Error::embedding("empty probe embedding"))?;

        if dimension != config.dimension {
            return Err(Error::config(format!(
                "model '{}' produces {dimension}-d vectors but dimension is set to {}",
                config.model, config.dimension
            )));
        }

        log::info!("Loaded embedding model {} ({dimension}-d)", config.model);
        Ok(Self {
            model: Arc::new(Mutex::new(text_embedding)),
            dimension,
            model_name: config.model.clone(),
        })
    }

    async fn run(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let model = Arc::clone(&self.model);
        let mut vectors = tokio::task::spawn_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|e| Error::embedding(format!("model mutex poisoned: {e}")))?;
            model
                .embed(texts, None)
                .map_err(|e| Error::embedding(e.to_string()))
        })
        .await
        .map_err(|e| Error::embedding(format!("embedding task failed: {e}")))??;

        for v in &mut vectors {
            l2_normalize(v);
        }
        Ok(vectors)
    }
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.run(vec![text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::embedding("no embedding returned"))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.run(texts.iter().map(|t| t.to_string()).collect()).await
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        &self.model_name
    }
}

impl std::fmt::Debug for FastEmbedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedProvider")
            .field("model", &self.model_name)
            .field("dimension", &self.dimension)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_model_known() {
        assert!(resolve_model("all-minilm-l6-v2").is_ok());
        assert!(resolve_model("all-MiniLM-L6-v2").is_ok());
        assert!(resolve_model("bge-small-en-v1.5").is_ok());
    }

    #[test]
    fn test_resolve_model_unknown() {
        let err = resolve_model("word2vec").unwrap_err();
        assert!(err.to_string().contains("Unknown embedding model"));
    }

    #[tokio::test]
    #[ignore = "requires model download (~80MB)"]
    async fn test_fastembed_embed_is_normalized() {
        let provider = FastEmbedProvider::from_config(&EmbeddingConfig::default()).unwrap();
        let embedding = provider.embed("Bevel selected edges").await.unwrap();
        assert_eq!(embedding.len(), 384);
        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-3);
    }
}
