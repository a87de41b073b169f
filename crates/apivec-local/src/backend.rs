//! The local backend: embedded flat index plus name cache.

use apivec_core::config::LocalConfig;
use apivec_core::embedding::{check_dimension, l2_normalize};
use apivec_core::filter::{self, Filters};
use apivec_core::fuzzy::{NameEntry, fuzzy_match};
use apivec_core::scoring::{HybridWeights, ScoreKind, combine_hybrid, normalize_score};
use apivec_core::types::partition_valid;
use apivec_core::{
    BackendHealth, BackendKind, Document, EmbeddingProvider, Error, IndexStats, MatchKind, Result,
    SearchResult, VectorStoreBackend,
};
use async_trait::async_trait;
use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, RwLock};

use crate::persistence::{
    EncodedSnapshot, IndexSnapshot, encode_snapshot, load_snapshot, write_snapshot,
};

/// Backend A: an in-process index persisted write-through to disk.
///
/// Searches take a read lock on the in-memory snapshot. Writes hold a
/// dedicated persist lock for the whole batch so that two batches never
/// interleave their disk writes.
pub struct LocalBackend {
    index_dir: PathBuf,
    dimension: usize,
    fuzzy_floor: f32,
    embedder: Arc<dyn EmbeddingProvider>,
    state: RwLock<IndexSnapshot>,
    persist_lock: Mutex<()>,
    initialized: AtomicBool,
}

impl LocalBackend {
    /// Create a backend storing its artifacts in `index_dir`.
    pub fn new(index_dir: impl Into<PathBuf>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        let dimension = embedder.dimension();
        Self {
            index_dir: index_dir.into(),
            dimension,
            fuzzy_floor: apivec_core::fuzzy::DEFAULT_FUZZY_FLOOR,
            embedder,
            state: RwLock::new(IndexSnapshot::empty(dimension)),
            persist_lock: Mutex::new(()),
            initialized: AtomicBool::new(false),
        }
    }

    /// Create a backend from the `[local]` config section.
    pub fn from_config(config: &LocalConfig, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self::new(&config.index_path, embedder).with_fuzzy_floor(config.fuzzy_floor)
    }

    /// Set the minimum fuzzy score.
    pub fn with_fuzzy_floor(mut self, floor: f32) -> Self {
        self.fuzzy_floor = floor.clamp(0.0, 1.0);
        self
    }

    /// Directory holding the artifacts.
    pub fn index_dir(&self) -> &Path {
        &self.index_dir
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.initialized.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(Error::NotInitialized(BackendKind::Local))
        }
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        let mut vector = self.embedder.embed(query).await?;
        l2_normalize(&mut vector);
        if vector.len() != self.dimension {
            return Err(Error::embedding(format!(
                "query embedding has dimension {}, index expects {}",
                vector.len(),
                self.dimension
            )));
        }
        Ok(vector)
    }

    /// Encode the current snapshot and write it out. Caller holds the
    /// persist lock.
    async fn persist(&self) -> Result<()> {
        let encoded = {
            let state = self.state.read().await;
            encode_snapshot(&state)?
        };
        self.write_encoded(encoded).await
    }

    async fn write_encoded(&self, encoded: EncodedSnapshot) -> Result<()> {
        let dir = self.index_dir.clone();
        tokio::task::spawn_blocking(move || write_snapshot(&dir, &encoded))
            .await
            .map_err(|e| Error::operation(format!("persist task failed: {e}")))?
    }
}

/// Insert or overwrite one document in the snapshot.
fn upsert(state: &mut IndexSnapshot, doc: &Document, vector: &[f32]) -> Result<()> {
    match state.mappings.id_to_position.get(&doc.id) {
        Some(&position) => state.index.set(position, vector)?,
        None => {
            let position = state.index.push(vector)?;
            state.mappings.id_to_position.insert(doc.id.clone(), position);
            state.mappings.position_to_id.push(doc.id.clone());
        }
    }
    state.documents.insert(doc.id.clone(), doc.clone());
    Ok(())
}

fn rebuild_names(state: &mut IndexSnapshot) {
    state.mappings.names = state
        .mappings
        .position_to_id
        .iter()
        .filter_map(|id| state.documents.get(id))
        .map(NameEntry::from_document)
        .collect();
}

#[async_trait]
impl VectorStoreBackend for LocalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn initialize(&self) -> Result<()> {
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }

        let dir = self.index_dir.clone();
        let dimension = self.dimension;
        let loaded = tokio::task::spawn_blocking(move || {
            std::fs::create_dir_all(&dir).map_err(|e| Error::io_with_path(e, &dir))?;
            Ok::<_, Error>(load_snapshot(&dir, dimension))
        })
        .await
        .map_err(|e| Error::initialization(BackendKind::Local, e.to_string()))?
        .map_err(|e| Error::initialization(BackendKind::Local, e.to_string()))?;

        let snapshot = match loaded {
            Ok(Some(snapshot)) => {
                log::info!(
                    "Loaded local index from {} ({} vectors)",
                    self.index_dir.display(),
                    snapshot.index.len()
                );
                snapshot
            }
            Ok(None) => {
                log::info!(
                    "No persisted index at {}, starting empty",
                    self.index_dir.display()
                );
                IndexSnapshot::empty(self.dimension)
            }
            Err(e) => {
                log::warn!(
                    "Persisted index at {} is unusable ({e}), rebuilding from empty",
                    self.index_dir.display()
                );
                IndexSnapshot::empty(self.dimension)
            }
        };

        *self.state.write().await = snapshot;
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    async fn add_documents(&self, docs: &[Document]) -> Result<usize> {
        self.ensure_initialized()?;
        let (valid, rejected) = partition_valid(docs);
        if valid.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = valid.iter().map(|d| d.embedding_text()).collect();
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let vectors = self.embedder.embed_batch(&refs).await?;
        if vectors.len() != valid.len() {
            return Err(Error::embedding(format!(
                "expected {} embeddings, got {}",
                valid.len(),
                vectors.len()
            )));
        }

        // The batch is applied to a copy; searches keep seeing the old
        // snapshot until the new one is on disk.
        let _persist = self.persist_lock.lock().await;
        let mut next = self.state.read().await.clone();
        let mut indexed = 0;
        for (doc, mut vector) in valid.into_iter().zip(vectors) {
            l2_normalize(&mut vector);
            if let Err(e) = check_dimension(&doc.id, &vector, self.dimension) {
                log::warn!("Skipping document: {e}");
                continue;
            }
            upsert(&mut next, doc, &vector)?;
            indexed += 1;
        }
        rebuild_names(&mut next);
        next.mappings.updated_at = Some(chrono::Utc::now().to_rfc3339());

        let encoded = encode_snapshot(&next)?;
        self.write_encoded(encoded).await?;
        *self.state.write().await = next;

        log::debug!(
            "Indexed {indexed} documents locally ({} rejected)",
            rejected.len()
        );
        Ok(indexed)
    }

    async fn search(
        &self,
        query: &str,
        top_k: usize,
        filters: Option<&Filters>,
    ) -> Result<Vec<SearchResult>> {
        self.ensure_initialized()?;
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let vector = self.embed_query(query).await?;

        let state = self.state.read().await;
        let fetch = top_k.saturating_mul(2).min(state.index.len());
        let mut results: Vec<SearchResult> = state
            .index
            .search(&vector, fetch)
            .into_iter()
            .filter_map(|(position, raw)| {
                let id = state.mappings.position_to_id.get(position)?;
                let doc = state.documents.get(id)?;
                filter::matches(filters, doc).then(|| {
                    SearchResult::from_document(
                        doc,
                        normalize_score(raw, ScoreKind::Similarity),
                        MatchKind::Semantic,
                    )
                })
            })
            .collect();
        results.truncate(top_k);
        Ok(results)
    }

    async fn hybrid_search(
        &self,
        query: &str,
        weights: HybridWeights,
        top_k: usize,
        filters: Option<&Filters>,
    ) -> Result<Vec<SearchResult>> {
        self.ensure_initialized()?;
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let semantic = self.search(query, top_k.saturating_mul(2), filters).await?;

        let fuzzy: Vec<SearchResult> = {
            let state = self.state.read().await;
            let candidates: Cow<'_, [NameEntry]> = match filters {
                Some(f) if !f.is_empty() => Cow::Owned(
                    state
                        .mappings
                        .names
                        .iter()
                        .filter(|e| state.documents.get(&e.id).is_some_and(|d| f.matches(d)))
                        .cloned()
                        .collect(),
                ),
                _ => Cow::Borrowed(state.mappings.names.as_slice()),
            };
            fuzzy_match(query, &candidates, top_k.saturating_mul(2), self.fuzzy_floor)
                .into_iter()
                .filter_map(|hit| {
                    state
                        .documents
                        .get(&hit.id)
                        .map(|doc| SearchResult::from_document(doc, hit.score, MatchKind::Fuzzy))
                })
                .collect()
        };

        Ok(combine_hybrid(query, semantic, fuzzy, weights, top_k))
    }

    async fn get_stats(&self) -> Result<IndexStats> {
        let state = self.state.read().await;
        Ok(IndexStats {
            total_vectors: state.index.len(),
            index_size_mb: IndexStats::estimate_size_mb(state.index.len(), self.dimension),
            backend: BackendKind::Local,
            last_updated: state.mappings.updated_at.clone(),
        })
    }

    async fn health_check(&self) -> BackendHealth {
        let initialized = self.initialized.load(Ordering::Acquire);
        let state = self.state.read().await;
        let health = if initialized {
            BackendHealth::healthy(BackendKind::Local)
        } else {
            BackendHealth::unhealthy(BackendKind::Local, "index not loaded")
        };
        health
            .with_total_vectors(state.index.len())
            .with_detail("index_path", serde_json::json!(self.index_dir.display().to_string()))
            .with_detail("index_loaded", serde_json::json!(initialized))
            .with_detail("model_loaded", serde_json::json!(true))
            .with_detail("embedding_model", serde_json::json!(self.embedder.name()))
            .with_detail("dimension", serde_json::json!(self.dimension))
            .with_detail(
                "index_size_mb",
                serde_json::json!(IndexStats::estimate_size_mb(state.index.len(), self.dimension)),
            )
            .with_detail("names_cached", serde_json::json!(state.mappings.names.len()))
    }

    async fn export_documents(&self) -> Result<Vec<Document>> {
        self.ensure_initialized()?;
        let state = self.state.read().await;
        let mut docs: Vec<Document> = state.documents.values().cloned().collect();
        docs.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(docs)
    }

    async fn close(&self) -> Result<()> {
        if !self.initialized.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let _persist = self.persist_lock.lock().await;
        self.persist().await?;
        log::info!("Closed local index at {}", self.index_dir.display());
        Ok(())
    }
}

impl std::fmt::Debug for LocalBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalBackend")
            .field("index_dir", &self.index_dir)
            .field("dimension", &self.dimension)
            .field("embedder", &self.embedder.name())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
