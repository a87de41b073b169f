//! The remote backend: a vector database collection plus a cached name list.

use apivec_core::config::RemoteConfig;
use apivec_core::embedding::{check_dimension, l2_normalize};
use apivec_core::filter::Filters;
use apivec_core::fuzzy::{DEFAULT_FUZZY_FLOOR, NameEntry, fuzzy_match};
use apivec_core::scoring::{HybridWeights, combine_hybrid, normalize_score, sort_results};
use apivec_core::types::partition_valid;
use apivec_core::{
    BackendHealth, BackendKind, Document, EmbeddingProvider, Error, IndexStats, MatchKind, Result,
    SearchResult, VectorStoreBackend,
};
use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::collection::{CollectionPoint, VectorCollection};

/// Default per-call time budget.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default age after which the cached name list is re-read.
pub const DEFAULT_NAME_CACHE_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Default)]
struct NameCache {
    entries: Vec<NameEntry>,
    refreshed: Option<Instant>,
}

impl NameCache {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.refreshed.is_some_and(|at| at.elapsed() < ttl)
    }
}

/// Backend B: documents and vectors held by a vector database.
///
/// Every collection call runs under a timeout. Fuzzy matching runs
/// client-side over a name list scrolled from the collection, re-read after
/// writes and whenever it is older than the cache TTL.
pub struct RemoteBackend {
    collection: Arc<dyn VectorCollection>,
    embedder: Arc<dyn EmbeddingProvider>,
    dimension: usize,
    timeout: Duration,
    connect_attempts: u32,
    name_cache_ttl: Duration,
    fuzzy_floor: f32,
    names: RwLock<NameCache>,
    server_version: RwLock<Option<String>>,
    last_updated: RwLock<Option<String>>,
    initialized: AtomicBool,
}

impl RemoteBackend {
    /// Create a backend over `collection`.
    pub fn new(collection: Arc<dyn VectorCollection>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        let dimension = embedder.dimension();
        Self {
            collection,
            embedder,
            dimension,
            timeout: DEFAULT_TIMEOUT,
            connect_attempts: 3,
            name_cache_ttl: DEFAULT_NAME_CACHE_TTL,
            fuzzy_floor: DEFAULT_FUZZY_FLOOR,
            names: RwLock::new(NameCache::default()),
            server_version: RwLock::new(None),
            last_updated: RwLock::new(None),
            initialized: AtomicBool::new(false),
        }
    }

    /// Create a backend configured from the `[remote]` section.
    pub fn from_config(
        config: &RemoteConfig,
        name_cache_ttl: Duration,
        collection: Arc<dyn VectorCollection>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self::new(collection, embedder)
            .with_timeout(config.timeout())
            .with_connect_attempts(u32::try_from(config.connect_attempts).unwrap_or(u32::MAX))
            .with_name_cache_ttl(name_cache_ttl)
            .with_fuzzy_floor(config.fuzzy_floor)
    }

    /// Set the per-call time budget.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set how many times bring-up is attempted.
    pub fn with_connect_attempts(mut self, attempts: u32) -> Self {
        self.connect_attempts = attempts.max(1);
        self
    }

    /// Set the name cache TTL.
    pub fn with_name_cache_ttl(mut self, ttl: Duration) -> Self {
        self.name_cache_ttl = ttl;
        self
    }

    /// Set the minimum fuzzy score.
    pub fn with_fuzzy_floor(mut self, floor: f32) -> Self {
        self.fuzzy_floor = floor.clamp(0.0, 1.0);
        self
    }

    /// The per-call time budget.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The underlying collection.
    pub fn collection(&self) -> &Arc<dyn VectorCollection> {
        &self.collection
    }

    /// Server version reported at bring-up.
    pub async fn server_version(&self) -> Option<String> {
        self.server_version.read().await.clone()
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.initialized.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(Error::NotInitialized(BackendKind::Remote))
        }
    }

    /// Run one collection call under the time budget.
    async fn call<T>(&self, op: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                log::warn!(
                    "Remote {op} on '{}' exceeded {:?}",
                    self.collection.name(),
                    self.timeout
                );
                Err(Error::timeout(BackendKind::Remote, self.timeout))
            }
        }
    }

    async fn connect(&self) -> Result<String> {
        let version = self.call("ping", self.collection.ping()).await?;
        self.call(
            "ensure_collection",
            self.collection.ensure_collection(self.dimension),
        )
        .await?;
        Ok(version)
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        let mut vector = self.embedder.embed(query).await?;
        l2_normalize(&mut vector);
        if vector.len() != self.dimension {
            return Err(Error::embedding(format!(
                "query embedding has dimension {}, collection expects {}",
                vector.len(),
                self.dimension
            )));
        }
        Ok(vector)
    }

    /// Re-read the name list from the collection.
    pub async fn refresh_names(&self) -> Result<usize> {
        let entries = self.call("scroll", self.collection.scroll_names()).await?;
        let count = entries.len();
        *self.names.write().await = NameCache {
            entries,
            refreshed: Some(Instant::now()),
        };
        log::debug!("Refreshed remote name cache ({count} names)");
        Ok(count)
    }

    async fn cached_names(&self) -> Result<Vec<NameEntry>> {
        {
            let cache = self.names.read().await;
            if cache.is_fresh(self.name_cache_ttl) {
                return Ok(cache.entries.clone());
            }
        }
        self.refresh_names().await?;
        Ok(self.names.read().await.entries.clone())
    }

    async fn fuzzy_results(
        &self,
        query: &str,
        limit: usize,
        filters: Option<&Filters>,
    ) -> Result<Vec<SearchResult>> {
        let names = self.cached_names().await?;
        let filtered = filters.is_some_and(|f| !f.is_empty());
        let scan = if filtered { names.len() } else { limit };
        let hits = fuzzy_match(query, &names, scan, self.fuzzy_floor);
        if hits.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = hits.iter().map(|h| h.id.clone()).collect();
        let docs = self.call("retrieve", self.collection.retrieve(&ids)).await?;
        let mut results: Vec<SearchResult> = hits
            .iter()
            .filter_map(|hit| {
                let doc = docs.iter().find(|d| d.id == hit.id)?;
                apivec_core::filter::matches(filters, doc)
                    .then(|| SearchResult::from_document(doc, hit.score, MatchKind::Fuzzy))
            })
            .collect();
        results.truncate(limit);
        Ok(results)
    }
}

#[async_trait]
impl VectorStoreBackend for RemoteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    async fn initialize(&self) -> Result<()> {
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }

        let backoff = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(200))
            .with_max_delay(Duration::from_secs(2))
            .with_max_times(self.connect_attempts.saturating_sub(1) as usize);

        let version = (|| async { self.connect().await })
            .retry(backoff)
            .when(Error::is_transient)
            .notify(|e, delay| {
                log::warn!("Remote bring-up failed ({e}), retrying in {delay:?}");
            })
            .await
            .map_err(|e| Error::initialization(BackendKind::Remote, e.to_string()))?;

        self.refresh_names()
            .await
            .map_err(|e| Error::initialization(BackendKind::Remote, e.to_string()))?;

        log::info!(
            "Connected to remote collection '{}' ({version})",
            self.collection.name()
        );
        *self.server_version.write().await = Some(version);
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

        let points: Vec<CollectionPoint> = valid
            .into_iter()
            .zip(vectors)
            .filter_map(|(doc, mut vector)| {
                l2_normalize(&mut vector);
                match check_dimension(&doc.id, &vector, self.dimension) {
                    Ok(()) => Some(CollectionPoint {
                        vector,
                        document: doc.clone(),
                    }),
                    Err(e) => {
                        log::warn!("Skipping document: {e}");
                        None
                    }
                }
            })
            .collect();
        let indexed = points.len();
        if indexed == 0 {
            return Ok(0);
        }

        self.call("upsert", self.collection.upsert(points)).await?;
        *self.last_updated.write().await = Some(chrono::Utc::now().to_rfc3339());

        if let Err(e) = self.refresh_names().await {
            log::warn!("Remote name cache refresh failed after upsert: {e}");
            self.names.write().await.refreshed = None;
        }

        log::debug!(
            "Indexed {indexed} documents remotely ({} rejected)",
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
        let hits = self
            .call("query", self.collection.query(&vector, top_k, filters))
            .await?;

        let kind = self.collection.score_kind();
        let mut results: Vec<SearchResult> = hits
            .into_iter()
            .filter(|(doc, _)| apivec_core::filter::matches(filters, doc))
            .map(|(doc, raw)| {
                SearchResult::from_document(&doc, normalize_score(raw, kind), MatchKind::Semantic)
            })
            .collect();
        sort_results(&mut results);
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
        let fetch = top_k.saturating_mul(2);
        let semantic = self.search(query, fetch, filters).await?;
        let fuzzy = self.fuzzy_results(query, fetch, filters).await?;
        Ok(combine_hybrid(query, semantic, fuzzy, weights, top_k))
    }

    async fn get_stats(&self) -> Result<IndexStats> {
        self.ensure_initialized()?;
        let total = self.call("count", self.collection.count()).await?;
        Ok(IndexStats {
            total_vectors: total,
            index_size_mb: IndexStats::estimate_size_mb(total, self.dimension),
            backend: BackendKind::Remote,
            last_updated: self.last_updated.read().await.clone(),
        })
    }

    async fn health_check(&self) -> BackendHealth {
        if !self.initialized.load(Ordering::Acquire) {
            return BackendHealth::unhealthy(BackendKind::Remote, "not initialized")
                .with_detail("url", serde_json::json!(self.collection.url()))
                .with_detail("collection", serde_json::json!(self.collection.name()));
        }

        let probe = async {
            let version = self.call("ping", self.collection.ping()).await?;
            let total = self.call("count", self.collection.count()).await?;
            Ok::<_, Error>((version, total))
        };
        match probe.await {
            Ok((version, total)) => BackendHealth::healthy(BackendKind::Remote)
                .with_total_vectors(total)
                .with_detail("url", serde_json::json!(self.collection.url()))
                .with_detail("collection", serde_json::json!(self.collection.name()))
                .with_detail("server_version", serde_json::json!(version))
                .with_detail(
                    "names_cached",
                    serde_json::json!(self.names.read().await.entries.len()),
                ),
            Err(e) => BackendHealth::unhealthy(BackendKind::Remote, e.to_string())
                .with_detail("url", serde_json::json!(self.collection.url()))
                .with_detail("collection", serde_json::json!(self.collection.name())),
        }
    }

    async fn export_documents(&self) -> Result<Vec<Document>> {
        self.ensure_initialized()?;
        let mut docs = self
            .call("scroll", self.collection.scroll_documents())
            .await?;
        docs.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(docs)
    }

    async fn close(&self) -> Result<()> {
        if self.initialized.swap(false, Ordering::AcqRel) {
            *self.names.write().await = NameCache::default();
            log::info!(
                "Disconnected from remote collection '{}'",
                self.collection.name()
            );
        }
        Ok(())
    }
}

impl std::fmt::Debug for RemoteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteBackend")
            .field("collection", &self.collection.name())
            .field("dimension", &self.dimension)
            .field("timeout", &self.timeout)
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
    use crate::collection::InMemoryCollection;
    use apivec_core::MockEmbeddingProvider;

    fn embedder() -> Arc<dyn EmbeddingProvider> {
        Arc::new(MockEmbeddingProvider::new(64))
    }

    fn catalog() -> Vec<Document> {
        vec![
            Document::new("m1", "mesh.bevel")
                .with_description("Bevel selected edges")
                .with_category("mesh_operators"),
            Document::new("o1", "object.delete")
                .with_description("Delete selected objects")
                .with_category("object_operators"),
            Document::new("r1", "render.render")
                .with_description("Render the active scene")
                .with_category("render_operators"),
        ]
    }

    async fn backend() -> (Arc<InMemoryCollection>, RemoteBackend) {
        let collection = Arc::new(InMemoryCollection::new("api_catalog"));
        let backend = RemoteBackend::new(collection.clone(), embedder());
        backend.initialize().await.unwrap();
        (collection, backend)
    }

    /// A collection whose queries never finish in time.
    struct StalledCollection;

    #[async_trait]
    impl VectorCollection for StalledCollection {
        fn name(&self) -> &str {
            "stalled"
        }
        fn url(&self) -> &str {
            "stalled://"
        }
        async fn ping(&self) -> Result<String> {
            Ok("stalled".into())
        }
        async fn ensure_collection(&self, _dimension: usize) -> Result<()> {
            Ok(())
        }
        async fn upsert(&self, _points: Vec<CollectionPoint>) -> Result<()> {
            Ok(())
        }
        async fn query(
            &self,
            _vector: &[f32],
            _limit: usize,
            _filters: Option<&Filters>,
        ) -> Result<Vec<(Document, f32)>> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Vec::new())
        }
        async fn retrieve(&self, _ids: &[String]) -> Result<Vec<Document>> {
            Ok(Vec::new())
        }
        async fn scroll_documents(&self) -> Result<Vec<Document>> {
            Ok(Vec::new())
        }
        async fn count(&self) -> Result<usize> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_initialize_and_health() {
        let (_, backend) = backend().await;
        let health = backend.health_check().await;
        assert!(health.is_healthy());
        assert_eq!(health.total_vectors, Some(0));
        assert!(health.details.contains_key("server_version"));
        assert_eq!(health.details["url"], serde_json::json!(":memory:"));
        assert!(backend.server_version().await.is_some());
    }

    #[tokio::test]
    async fn test_initialize_fails_when_offline() {
        let collection = Arc::new(InMemoryCollection::new("api_catalog"));
        collection.set_offline(true);
        let backend = RemoteBackend::new(collection.clone(), embedder()).with_connect_attempts(2);
        let err = backend.initialize().await.unwrap_err();
        assert!(matches!(
            err,
            Error::Initialization {
                backend: BackendKind::Remote,
                ..
            }
        ));
        // Both attempts reached the collection.
        assert_eq!(collection.call_count(), 2);
        assert!(!backend.health_check().await.is_healthy());
    }

    #[tokio::test]
    async fn test_add_search_and_upsert() {
        let (collection, backend) = backend().await;
        assert_eq!(backend.add_documents(&catalog()).await.unwrap(), 3);
        assert_eq!(backend.add_documents(&catalog()[..1]).await.unwrap(), 1);
        assert_eq!(collection.count().await.unwrap(), 3);
        assert_eq!(backend.get_stats().await.unwrap().total_vectors, 3);

        let results = backend.search("render scene", 2, None).await.unwrap();
        assert_eq!(results[0].id, "r1");
        assert!(results.iter().all(|r| (0.0..=1.0).contains(&r.score)));
    }

    #[tokio::test]
    async fn test_hybrid_exact_name_and_filters() {
        let (_, backend) = backend().await;
        backend.add_documents(&catalog()).await.unwrap();

        let results = backend
            .hybrid_search("object.delete", HybridWeights::default(), 3, None)
            .await
            .unwrap();
        assert_eq!(results[0].id, "o1");
        assert_eq!(results[0].score, 1.0);

        let filters = Filters::new().with_equals("category", "mesh_operators");
        let results = backend
            .hybrid_search("object.delete", HybridWeights::default(), 3, Some(&filters))
            .await
            .unwrap();
        assert!(results.iter().all(|r| r.category == "mesh_operators"));
    }

    #[tokio::test]
    async fn test_name_cache_refreshed_after_add() {
        let (_, backend) = backend().await;
        backend.add_documents(&catalog()).await.unwrap();
        assert_eq!(backend.names.read().await.entries.len(), 3);
    }

    #[tokio::test]
    async fn test_calls_fail_while_offline() {
        let (collection, backend) = backend().await;
        backend.add_documents(&catalog()).await.unwrap();
        collection.set_offline(true);

        let err = backend.search("bevel", 3, None).await.unwrap_err();
        assert!(err.is_transient());
        assert!(!backend.health_check().await.is_healthy());
    }

    #[tokio::test]
    async fn test_query_timeout() {
        let backend = RemoteBackend::new(Arc::new(StalledCollection), embedder())
            .with_timeout(Duration::from_millis(50));
        backend.initialize().await.unwrap();
        let err = backend.search("anything", 3, None).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Timeout {
                backend: BackendKind::Remote,
                budget,
            } if budget == Duration::from_millis(50)
        ));
    }

    #[tokio::test]
    async fn test_not_initialized() {
        let backend = RemoteBackend::new(Arc::new(InMemoryCollection::new("x")), embedder());
        assert!(matches!(
            backend.search("x", 1, None).await.unwrap_err(),
            Error::NotInitialized(BackendKind::Remote)
        ));
    }

    #[tokio::test]
    async fn test_export_sorted() {
        let (_, backend) = backend().await;
        backend.add_documents(&catalog()).await.unwrap();
        let ids: Vec<String> = backend
            .export_documents()
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(ids, vec!["m1", "o1", "r1"]);
    }
}
