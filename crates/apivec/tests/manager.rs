//! End-to-end behaviour of the hybrid manager over a real local index and an
//! in-memory remote collection.

#![allow(clippy::unwrap_used)]

use apivec::{
    BackendHealth, BackendKind, CostEvent, CostMonitor, CostThresholds, Document, Error,
    FallbackReason, Filters, HybridVectorManager, HybridWeights, InMemoryCollection, IndexStats,
    LocalBackend, ManagerBuilder, MatchKind, MockEmbeddingProvider, OverallHealth, RemoteBackend,
    Result, SearchResult, VectorStoreBackend,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

// ============================================================================
// Harness
// ============================================================================

const DIM: usize = 64;

struct Harness {
    manager: HybridVectorManager,
    local: Arc<LocalBackend>,
    remote: Arc<RemoteBackend>,
    collection: Arc<InMemoryCollection>,
    cost: Arc<CostMonitor>,
    _dir: TempDir,
}

fn thresholds() -> CostThresholds {
    CostThresholds {
        max_monthly_cost: 10.0,
        warning_ratio: 0.5,
        fallback_ratio: 0.8,
        ..CostThresholds::default()
    }
}

async fn harness_with(configure: impl FnOnce(ManagerBuilder) -> ManagerBuilder) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let embedder = Arc::new(MockEmbeddingProvider::new(DIM));
    let local = Arc::new(LocalBackend::new(dir.path().join("index"), embedder.clone()));
    let collection = Arc::new(InMemoryCollection::new("api_catalog"));
    let remote = Arc::new(
        RemoteBackend::new(collection.clone(), embedder).with_connect_attempts(1),
    );
    let cost = Arc::new(CostMonitor::in_memory(thresholds()).unwrap());

    let builder = HybridVectorManager::builder(local.clone(), cost.clone())
        .remote(remote.clone())
        .remote_timeout(Duration::from_secs(5));
    let manager = configure(builder).build();
    manager.initialize().await.unwrap();

    Harness {
        manager,
        local,
        remote,
        collection,
        cost,
        _dir: dir,
    }
}

async fn harness() -> Harness {
    harness_with(|b| b).await
}

fn catalog() -> Vec<Document> {
    vec![
        Document::new("m1", "mesh.bevel")
            .with_description("Bevel selected edges")
            .with_category("mesh_operators")
            .with_module("bpy.ops.mesh"),
        Document::new("m2", "mesh.extrude_region")
            .with_description("Extrude the selected region")
            .with_category("mesh_operators")
            .with_module("bpy.ops.mesh"),
        Document::new("o1", "object.delete")
            .with_description("Delete selected objects")
            .with_category("object_operators")
            .with_module("bpy.ops.object"),
        Document::new("r1", "render.render")
            .with_description("Render the active scene")
            .with_category("render_operators")
            .with_module("bpy.ops.render")
            .with_tag("output"),
    ]
}

async fn total(backend: &dyn VectorStoreBackend) -> usize {
    backend.get_stats().await.unwrap().total_vectors
}

fn assert_ranked(results: &[SearchResult]) {
    for r in results {
        assert!((0.0..=1.0).contains(&r.score), "score {} out of range", r.score);
    }
    for pair in results.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
}

/// A backend whose every call fails with a transient error.
struct FailingBackend {
    kind: BackendKind,
    fail_init: bool,
}

#[async_trait]
impl VectorStoreBackend for FailingBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }
    async fn initialize(&self) -> Result<()> {
        if self.fail_init {
            Err(Error::initialization(self.kind, "refused"))
        } else {
            Ok(())
        }
    }
    async fn add_documents(&self, _docs: &[Document]) -> Result<usize> {
        Err(Error::backend(self.kind, "503 service unavailable"))
    }
    async fn search(
        &self,
        _query: &str,
        _top_k: usize,
        _filters: Option<&Filters>,
    ) -> Result<Vec<SearchResult>> {
        Err(Error::backend(self.kind, "503 service unavailable"))
    }
    async fn hybrid_search(
        &self,
        _query: &str,
        _weights: HybridWeights,
        _top_k: usize,
        _filters: Option<&Filters>,
    ) -> Result<Vec<SearchResult>> {
        Err(Error::backend(self.kind, "503 service unavailable"))
    }
    async fn get_stats(&self) -> Result<IndexStats> {
        Err(Error::backend(self.kind, "503 service unavailable"))
    }
    async fn health_check(&self) -> BackendHealth {
        BackendHealth::unhealthy(self.kind, "503 service unavailable")
    }
    async fn export_documents(&self) -> Result<Vec<Document>> {
        Err(Error::backend(self.kind, "503 service unavailable"))
    }
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// Initialization
// ============================================================================

#[tokio::test]
async fn test_initialize_prefers_remote() {
    let h = harness().await;
    let state = h.manager.backend_state();
    assert_eq!(state.active, BackendKind::Remote);
    assert_eq!(state.fallback_reason, FallbackReason::None);
    assert!(h.manager.is_running());
}

#[tokio::test]
async fn test_initialize_remote_down_selects_local() {
    let dir = tempfile::tempdir().unwrap();
    let embedder = Arc::new(MockEmbeddingProvider::new(DIM));
    let local = Arc::new(LocalBackend::new(dir.path(), embedder.clone()));
    let collection = Arc::new(InMemoryCollection::new("c"));
    collection.set_offline(true);
    let remote = Arc::new(RemoteBackend::new(collection, embedder).with_connect_attempts(1));
    let cost = Arc::new(CostMonitor::in_memory(thresholds()).unwrap());

    let manager = HybridVectorManager::builder(local, cost).remote(remote).build();
    manager.initialize().await.unwrap();
    let state = manager.backend_state();
    assert_eq!(state.active, BackendKind::Local);
    assert_eq!(state.fallback_reason, FallbackReason::RemoteUnavailable);
}

#[tokio::test]
async fn test_initialize_over_budget_selects_local() {
    let dir = tempfile::tempdir().unwrap();
    let embedder = Arc::new(MockEmbeddingProvider::new(DIM));
    let local = Arc::new(LocalBackend::new(dir.path(), embedder.clone()));
    let remote = Arc::new(RemoteBackend::new(
        Arc::new(InMemoryCollection::new("c")),
        embedder,
    ));
    let cost = Arc::new(CostMonitor::in_memory(thresholds()).unwrap());
    cost.track(CostEvent::Search, 30_000, 0);

    let manager = HybridVectorManager::builder(local, cost).remote(remote).build();
    manager.initialize().await.unwrap();
    let state = manager.backend_state();
    assert_eq!(state.active, BackendKind::Local);
    assert_eq!(state.fallback_reason, FallbackReason::CostThreshold);
}

#[tokio::test]
async fn test_initialize_nothing_usable() {
    let cost = Arc::new(CostMonitor::in_memory(thresholds()).unwrap());
    let local = Arc::new(FailingBackend {
        kind: BackendKind::Local,
        fail_init: true,
    });
    let remote = Arc::new(FailingBackend {
        kind: BackendKind::Remote,
        fail_init: true,
    });
    let manager = HybridVectorManager::builder(local, cost).remote(remote).build();
    let err = manager.initialize().await.unwrap_err();
    assert!(matches!(err, Error::Unavailable(_)));
    assert!(!manager.is_running());
}

#[tokio::test]
async fn test_calls_before_initialize_fail() {
    let dir = tempfile::tempdir().unwrap();
    let local = Arc::new(LocalBackend::new(
        dir.path(),
        Arc::new(MockEmbeddingProvider::new(DIM)),
    ));
    let cost = Arc::new(CostMonitor::in_memory(thresholds()).unwrap());
    let manager = HybridVectorManager::builder(local, cost).build();
    assert!(matches!(
        manager.search("x", None, None).await.unwrap_err(),
        Error::Unavailable(_)
    ));
    assert_eq!(manager.health_check().await.status, OverallHealth::Error);
}

// ============================================================================
// Search
// ============================================================================

#[tokio::test]
async fn test_exact_name_ranks_first() {
    let h = harness().await;
    h.manager.add_documents(&catalog()).await.unwrap();

    for doc in catalog() {
        let response = h.manager.hybrid_search(&doc.name, None, Some(3), None).await.unwrap();
        assert_eq!(response.backend, BackendKind::Remote);
        let best = response.best().unwrap();
        assert_eq!(best.id, doc.id, "query {}", doc.name);
        assert_eq!(best.score, 1.0);
        assert_eq!(best.match_kind(), Some(MatchKind::Exact));
    }
}

#[tokio::test]
async fn test_scores_bounded_and_sorted() {
    let h = harness().await;
    h.manager.add_documents(&catalog()).await.unwrap();

    for query in ["selected edges", "render", "delete", "mesh.extrude", "zzz"] {
        let semantic = h.manager.search(query, Some(4), None).await.unwrap();
        assert_ranked(&semantic.results);
        let hybrid = h.manager.hybrid_search(query, None, Some(4), None).await.unwrap();
        assert_ranked(&hybrid.results);
        assert!(hybrid.results.len() <= 4);
    }
}

#[tokio::test]
async fn test_typo_query_finds_document() {
    let h = harness().await;
    let doc = Document::new("m1", "mesh.bevel")
        .with_description("Bevel selected edges")
        .with_category("mesh_operators");
    h.manager.add_documents(&[doc]).await.unwrap();

    let response = h.manager.hybrid_search("bevl edges", None, Some(1), None).await.unwrap();
    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].id, "m1");
    assert!(response.results[0].score >= 0.6);
}

#[tokio::test]
async fn test_filters_apply_through_manager() {
    let h = harness().await;
    h.manager.add_documents(&catalog()).await.unwrap();

    let filters = Filters::new().with_any_of("module", ["bpy.ops.object", "bpy.ops.render"]);
    let response = h
        .manager
        .hybrid_search("selected", None, Some(10), Some(&filters))
        .await
        .unwrap();
    assert!(!response.results.is_empty());
    assert!(
        response
            .results
            .iter()
            .all(|r| r.id == "o1" || r.id == "r1")
    );
}

#[tokio::test]
async fn test_hybrid_weights_per_call() {
    let h = harness().await;
    h.manager.add_documents(&catalog()).await.unwrap();

    let names_only = h
        .manager
        .hybrid_search("render", Some(HybridWeights::new(0.0, 1.0)), Some(4), None)
        .await
        .unwrap();
    let ids: Vec<_> = names_only.results.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["r1"]);
    assert_eq!(names_only.results[0].score, 1.0);

    // "region" shares its leading trigram with "render".
    let meaning_only = h
        .manager
        .hybrid_search("render", Some(HybridWeights::new(1.0, 0.0)), Some(4), None)
        .await
        .unwrap();
    assert!(meaning_only.results.iter().any(|r| r.id == "m2"));
    assert_ranked(&meaning_only.results);
}

#[tokio::test]
async fn test_default_top_k() {
    let h = harness_with(|b| b.default_top_k(2)).await;
    h.manager.add_documents(&catalog()).await.unwrap();
    let response = h.manager.search("selected", None, None).await.unwrap();
    assert_eq!(response.results.len(), 2);
}

// ============================================================================
// Indexing and sync
// ============================================================================

#[tokio::test]
async fn test_readd_keeps_total_and_updates_content() {
    let h = harness().await;
    h.manager.add_documents(&catalog()).await.unwrap();
    let before = total(h.remote.as_ref()).await;

    let updated = Document::new("m1", "mesh.bevel").with_description("Chamfer edges");
    h.manager.add_documents(&[updated]).await.unwrap();

    assert_eq!(total(h.remote.as_ref()).await, before);
    assert_eq!(total(h.local.as_ref()).await, before);
    let docs = h.remote.export_documents().await.unwrap();
    assert_eq!(
        docs.iter().find(|d| d.id == "m1").unwrap().description,
        "Chamfer edges"
    );
}

#[tokio::test]
async fn test_auto_sync_mirrors_to_local() {
    let h = harness().await;
    let before = total(h.local.as_ref()).await;

    let outcome = h.manager.add_documents(&catalog()[..1]).await.unwrap();
    assert_eq!(outcome.backend, BackendKind::Remote);
    assert_eq!(outcome.indexed, 1);
    assert_eq!(outcome.synced, Some(1));
    assert_eq!(total(h.local.as_ref()).await, before + 1);
}

#[tokio::test]
async fn test_auto_sync_disabled() {
    let h = harness_with(|b| b.auto_sync(false)).await;
    let outcome = h.manager.add_documents(&catalog()).await.unwrap();
    assert_eq!(outcome.synced, None);
    assert_eq!(total(h.local.as_ref()).await, 0);
}

#[tokio::test]
async fn test_invalid_documents_counted() {
    let h = harness().await;
    let mut docs = catalog();
    docs.push(Document::new("bad", " "));
    let outcome = h.manager.add_documents(&docs).await.unwrap();
    assert_eq!(outcome.indexed, 4);
    assert_eq!(outcome.rejected, 1);
}

#[tokio::test]
async fn test_reconcile_copies_missing_and_stale() {
    let h = harness_with(|b| b.auto_sync(false)).await;
    h.manager.add_documents(&catalog()).await.unwrap();

    // Local holds an older version of one document.
    h.local
        .add_documents(&[Document::new("m1", "mesh.bevel").with_description("old")])
        .await
        .unwrap();

    let report = h.manager.reconcile().await.unwrap();
    assert_eq!(report.source, BackendKind::Remote);
    assert_eq!(report.target, BackendKind::Local);
    assert_eq!(report.source_documents, 4);
    assert_eq!(report.missing, 3);
    assert_eq!(report.stale, 1);
    assert_eq!(report.copied, 4);

    let again = h.manager.reconcile().await.unwrap();
    assert!(again.in_sync());
    assert_eq!(total(h.local.as_ref()).await, 4);
}

#[tokio::test]
async fn test_add_triggers_reconcile_when_interval_elapsed() {
    let h = harness_with(|b| b.auto_sync(false).sync_interval(Duration::ZERO)).await;
    let outcome = h.manager.add_documents(&catalog()).await.unwrap();
    let report = outcome.reconciled.unwrap();
    assert_eq!(report.copied, 4);
    assert_eq!(total(h.local.as_ref()).await, 4);

    let stats = h.manager.get_comprehensive_stats().await.unwrap();
    assert!(stats.last_reconciled.is_some());
}

// ============================================================================
// Failover
// ============================================================================

#[tokio::test]
async fn test_cost_threshold_switches_to_local() {
    let h = harness().await;
    h.manager.add_documents(&catalog()).await.unwrap();

    // 30k searches in the first hour project to $8.64/month against $10.
    h.cost.track(CostEvent::Search, 30_000, 0);
    let state = h.manager.backend_state();
    assert_eq!(state.active, BackendKind::Local);
    assert_eq!(state.fallback_reason, FallbackReason::CostThreshold);

    let response = h.manager.search("bevel", Some(3), None).await.unwrap();
    assert_eq!(response.backend, BackendKind::Local);
    assert!(!response.fell_back);
    assert_eq!(h.manager.active_backend(), BackendKind::Local);
}

#[tokio::test]
async fn test_no_sync_to_remote_under_cost_threshold() {
    let h = harness().await;
    h.cost.track(CostEvent::Search, 30_000, 0);
    let calls = h.collection.call_count();

    let outcome = h.manager.add_documents(&catalog()).await.unwrap();
    assert_eq!(outcome.backend, BackendKind::Local);
    assert_eq!(outcome.synced, None);
    assert_eq!(h.collection.call_count(), calls);

    let report = h.manager.reconcile().await.unwrap();
    assert!(report.skipped.is_some());
}

#[tokio::test]
async fn test_remote_searches_are_tracked() {
    let h = harness().await;
    h.manager.add_documents(&catalog()).await.unwrap();
    h.manager.search("bevel", Some(1), None).await.unwrap();
    h.manager.hybrid_search("bevel", None, Some(1), None).await.unwrap();

    let metrics = h.cost.metrics();
    assert_eq!(metrics.total_searches, 2);
    assert_eq!(metrics.total_inserts, 4);
    assert!(metrics.storage_bytes > 0);
}

#[tokio::test]
async fn test_failing_remote_falls_back_without_state_change() {
    let dir = tempfile::tempdir().unwrap();
    let embedder = Arc::new(MockEmbeddingProvider::new(DIM));
    let local = Arc::new(LocalBackend::new(dir.path(), embedder));
    local.initialize().await.unwrap();
    local.add_documents(&catalog()).await.unwrap();

    let cost = Arc::new(CostMonitor::in_memory(thresholds()).unwrap());
    let remote = Arc::new(FailingBackend {
        kind: BackendKind::Remote,
        fail_init: false,
    });
    let manager = HybridVectorManager::builder(local, cost.clone())
        .remote(remote)
        .build();
    manager.initialize().await.unwrap();
    assert_eq!(manager.active_backend(), BackendKind::Remote);

    let response = manager.hybrid_search("mesh.bevel", None, Some(2), None).await.unwrap();
    assert_eq!(response.backend, BackendKind::Local);
    assert!(response.fell_back);
    assert!(!response.diagnostics.is_empty());
    assert_eq!(response.results[0].id, "m1");

    let state = manager.backend_state();
    assert_eq!(state.active, BackendKind::Remote);
    assert_eq!(state.fallback_reason, FallbackReason::None);
    assert_eq!(cost.metrics().total_searches, 0);

    let perf = manager.performance();
    assert_eq!(perf.remote.failures, 1);
    assert_eq!(perf.remote.search_count, 0);
    assert_eq!(perf.remote.avg_search_time, 0.0);
    assert_eq!(perf.local.search_count, 1);
}

#[tokio::test]
async fn test_offline_remote_write_lands_on_local() {
    let h = harness().await;
    h.collection.set_offline(true);
    let outcome = h.manager.add_documents(&catalog()).await.unwrap();
    assert_eq!(outcome.backend, BackendKind::Local);
    assert!(outcome.fell_back);
    assert_eq!(outcome.synced, None);
    assert_eq!(total(h.local.as_ref()).await, 4);
    assert_eq!(h.manager.active_backend(), BackendKind::Remote);
}

#[tokio::test]
async fn test_no_backend_answers() {
    let cost = Arc::new(CostMonitor::in_memory(thresholds()).unwrap());
    let local = Arc::new(FailingBackend {
        kind: BackendKind::Local,
        fail_init: true,
    });
    let remote = Arc::new(FailingBackend {
        kind: BackendKind::Remote,
        fail_init: false,
    });
    let manager = HybridVectorManager::builder(local, cost).remote(remote).build();
    manager.initialize().await.unwrap();
    assert_eq!(manager.active_backend(), BackendKind::Remote);

    let err = manager.search("x", Some(1), None).await.unwrap_err();
    assert!(matches!(err, Error::Unavailable(_)));
}

// ============================================================================
// Operator controls
// ============================================================================

#[tokio::test]
async fn test_force_backend_round_trip() {
    let h = harness().await;

    let state = h
        .manager
        .force_backend(BackendKind::Local, "maintenance")
        .await
        .unwrap();
    assert_eq!(state.active, BackendKind::Local);
    assert_eq!(state.fallback_reason, FallbackReason::ManualOverride);

    let state = h
        .manager
        .force_backend(BackendKind::Remote, "maintenance done")
        .await
        .unwrap();
    assert_eq!(state.active, BackendKind::Remote);
    assert_eq!(state.fallback_reason, FallbackReason::None);
}

#[tokio::test]
async fn test_force_remote_requires_healthy_remote() {
    let h = harness().await;
    h.cost.track(CostEvent::Search, 30_000, 0);
    h.collection.set_offline(true);

    let err = h
        .manager
        .force_backend(BackendKind::Remote, "operator")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Unavailable(_)));
    let state = h.manager.backend_state();
    assert_eq!(state.active, BackendKind::Local);
    assert_eq!(state.fallback_reason, FallbackReason::CostThreshold);

    h.collection.set_offline(false);
    h.manager
        .force_backend(BackendKind::Remote, "operator")
        .await
        .unwrap();
    assert_eq!(h.manager.active_backend(), BackendKind::Remote);
}

// ============================================================================
// Health and stats
// ============================================================================

#[tokio::test]
async fn test_health_states() {
    let h = harness().await;
    let health = h.manager.health_check().await;
    assert_eq!(health.status, OverallHealth::Healthy);
    assert!(health.fallback_available);

    h.collection.set_offline(true);
    let health = h.manager.health_check().await;
    assert_eq!(health.status, OverallHealth::Degraded);
    assert_eq!(health.active_backend, BackendKind::Remote);
    assert!(health.fallback_available);

    h.manager.close().await.unwrap();
    let health = h.manager.health_check().await;
    assert_eq!(health.status, OverallHealth::Error);
    assert!(health.error.is_some());
}

#[tokio::test]
async fn test_health_local_down_while_local_active() {
    let h = harness().await;
    h.manager
        .force_backend(BackendKind::Local, "maintenance")
        .await
        .unwrap();
    assert!(!h.manager.health_check().await.fallback_available);

    h.local.close().await.unwrap();
    let health = h.manager.health_check().await;
    assert_eq!(health.status, OverallHealth::Unhealthy);
    assert!(!health.fallback_available);
    assert!(health.remote.unwrap().is_healthy());
    assert!(matches!(
        h.manager.search("bevel", Some(1), None).await.unwrap_err(),
        Error::Unavailable(_)
    ));
}

#[tokio::test]
async fn test_comprehensive_stats() {
    let h = harness().await;
    h.manager.add_documents(&catalog()).await.unwrap();
    h.manager.search("bevel", Some(2), None).await.unwrap();

    let stats = h.manager.get_comprehensive_stats().await.unwrap();
    assert_eq!(stats.active_backend, BackendKind::Remote);
    assert_eq!(stats.fallback_reason, FallbackReason::None);
    assert_eq!(stats.performance.remote.search_count, 1);
    assert_eq!(stats.index.unwrap().total_vectors, 4);
    assert!(stats.local_health.is_healthy());
    assert!(stats.remote_health.unwrap().is_healthy());
    assert_eq!(stats.cost.metrics.total_searches, 1);
}

#[tokio::test]
async fn test_close_is_idempotent_and_stops_requests() {
    let h = harness().await;
    h.manager.close().await.unwrap();
    h.manager.close().await.unwrap();
    assert!(h.manager.search("x", None, None).await.is_err());
    assert!(h.manager.get_comprehensive_stats().await.is_err());
}
