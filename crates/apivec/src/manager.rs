//! The hybrid vector search manager.
//!
//! Owns both backends, the cost monitor and the backend selection state.
//! Every request goes to the active backend; a failing remote call is
//! retried once on the local backend without touching the state. The only
//! things that move the state are bring-up, the cost fallback observer and
//! [`HybridVectorManager::force_backend`].

use apivec_core::scoring::HybridWeights;
use apivec_core::{
    ApivecConfig, BackendKind, Document, EmbeddingProvider, Error, Filters, Result,
    VectorStoreBackend,
};
use apivec_cost::{CostAlert, CostEvent, CostMonitor, CostObserver, CostSummary};
use apivec_local::LocalBackend;
use apivec_remote::{InMemoryCollection, RemoteBackend, VectorCollection};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::health::{ComprehensiveStats, ManagerHealth, OverallHealth};
use crate::metrics::PerformanceMetrics;
use crate::response::{AddOutcome, ReconcileReport, SearchResponse};
use crate::state::{BackendState, FallbackReason, SharedState};

/// Name under which the manager registers with the cost monitor.
pub const FALLBACK_OBSERVER: &str = "hybrid-manager-fallback";

// ============================================================================
// Cost fallback observer
// ============================================================================

/// Moves the manager to the local backend when the cost monitor reports
/// the fallback threshold.
struct CostFallbackObserver {
    state: SharedState,
    local_usable: Arc<AtomicBool>,
}

impl CostObserver for CostFallbackObserver {
    fn name(&self) -> &str {
        FALLBACK_OBSERVER
    }

    fn on_fallback(&self, alert: &CostAlert) -> Result<()> {
        if !self.local_usable.load(Ordering::Acquire) {
            log::error!(
                "Cost at {:.0}% of budget but the local backend is unusable; staying on remote",
                alert.ratio * 100.0
            );
            return Ok(());
        }
        if self.state.fall_back(FallbackReason::CostThreshold) {
            log::warn!(
                "Switched to local backend: estimated ${:.2}/month is {:.0}% of the ${:.2} budget",
                alert.estimated_monthly_cost,
                alert.ratio * 100.0,
                alert.max_monthly_cost
            );
        }
        Ok(())
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Assembles a [`HybridVectorManager`].
pub struct ManagerBuilder {
    local: Arc<dyn VectorStoreBackend>,
    remote: Option<Arc<dyn VectorStoreBackend>>,
    cost: Arc<CostMonitor>,
    weights: HybridWeights,
    default_top_k: usize,
    auto_sync: bool,
    sync_interval: Duration,
    remote_timeout: Duration,
}

impl ManagerBuilder {
    /// Add a remote backend.
    pub fn remote(mut self, remote: Arc<dyn VectorStoreBackend>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Set the hybrid blend weights.
    pub fn weights(mut self, weights: HybridWeights) -> Self {
        self.weights = weights;
        self
    }

    /// Set the result count used when a caller passes `None`.
    pub fn default_top_k(mut self, top_k: usize) -> Self {
        self.default_top_k = top_k.max(1);
        self
    }

    /// Enable or disable mirroring writes to the inactive backend.
    pub fn auto_sync(mut self, enabled: bool) -> Self {
        self.auto_sync = enabled;
        self
    }

    /// Set how often writes trigger a full reconciliation.
    pub fn sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    /// Set the time budget for each remote backend call.
    pub fn remote_timeout(mut self, timeout: Duration) -> Self {
        self.remote_timeout = timeout;
        self
    }

    /// Build the manager. Call [`HybridVectorManager::initialize`] next.
    pub fn build(self) -> HybridVectorManager {
        HybridVectorManager {
            local: self.local,
            remote: self.remote,
            cost: self.cost,
            state: SharedState::new(BackendState::local(FallbackReason::RemoteUnavailable)),
            local_usable: Arc::new(AtomicBool::new(false)),
            remote_usable: AtomicBool::new(false),
            running: AtomicBool::new(false),
            weights: self.weights,
            default_top_k: self.default_top_k,
            auto_sync: self.auto_sync,
            sync_interval: self.sync_interval,
            remote_timeout: self.remote_timeout,
            performance: Mutex::new(PerformanceMetrics::default()),
            reconcile_clock: Mutex::new(ReconcileClock::new()),
            reconcile_lock: tokio::sync::Mutex::new(()),
        }
    }
}

// ============================================================================
// Manager
// ============================================================================

#[derive(Debug)]
struct ReconcileClock {
    anchor: DateTime<Utc>,
    last: Option<DateTime<Utc>>,
}

impl ReconcileClock {
    fn new() -> Self {
        Self {
            anchor: Utc::now(),
            last: None,
        }
    }

    fn is_due(&self, interval: Duration) -> bool {
        (Utc::now() - self.anchor).to_std().unwrap_or_default() >= interval
    }
}

/// A backend call's value plus which backend produced it.
struct Dispatched<T> {
    value: T,
    backend: BackendKind,
    fell_back: bool,
    diagnostics: Vec<String>,
}

/// Search and indexing over a local and a remote backend with cost-governed
/// failover.
pub struct HybridVectorManager {
    local: Arc<dyn VectorStoreBackend>,
    remote: Option<Arc<dyn VectorStoreBackend>>,
    cost: Arc<CostMonitor>,
    state: SharedState,
    local_usable: Arc<AtomicBool>,
    remote_usable: AtomicBool,
    running: AtomicBool,
    weights: HybridWeights,
    default_top_k: usize,
    auto_sync: bool,
    sync_interval: Duration,
    remote_timeout: Duration,
    performance: Mutex<PerformanceMetrics>,
    reconcile_clock: Mutex<ReconcileClock>,
    reconcile_lock: tokio::sync::Mutex<()>,
}

impl HybridVectorManager {
    /// Start assembling a manager around a local backend and a cost monitor.
    pub fn builder(local: Arc<dyn VectorStoreBackend>, cost: Arc<CostMonitor>) -> ManagerBuilder {
        ManagerBuilder {
            local,
            remote: None,
            cost,
            weights: HybridWeights::default(),
            default_top_k: 10,
            auto_sync: true,
            sync_interval: Duration::from_secs(3600),
            remote_timeout: Duration::from_secs(30),
        }
    }

    /// Build a manager from configuration.
    ///
    /// The remote backend is an in-memory collection for the `:memory:` URL,
    /// a Qdrant collection otherwise (feature `remote-qdrant`), and absent
    /// when `remote.enabled` is false or the client cannot be built.
    pub fn from_config(config: &ApivecConfig, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        config.validate()?;
        if embedder.dimension() != config.embedding.dimension {
            return Err(Error::config(format!(
                "embedding provider '{}' has dimension {}, config says {}",
                embedder.name(),
                embedder.dimension(),
                config.embedding.dimension
            )));
        }

        let local = LocalBackend::from_config(&config.local, Arc::clone(&embedder));
        let cost = CostMonitor::from_config(&config.cost)?;

        let mut builder = Self::builder(Arc::new(local), Arc::new(cost))
            .weights(HybridWeights::new(
                config.search.semantic_weight,
                config.search.fuzzy_weight,
            ))
            .default_top_k(config.search.default_top_k)
            .auto_sync(config.sync.auto_sync)
            .sync_interval(config.sync.interval())
            .remote_timeout(config.remote.timeout());

        if let Some(collection) = remote_collection(config) {
            let remote = RemoteBackend::from_config(
                &config.remote,
                config.name_cache_ttl(),
                collection,
                embedder,
            );
            builder = builder.remote(Arc::new(remote));
        }
        Ok(builder.build())
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Bring up both backends and choose the active one.
    ///
    /// A local failure leaves the manager degraded; a remote failure or a
    /// cost estimate at or over the fallback ratio selects the local
    /// backend. Fails only when neither backend comes up.
    pub async fn initialize(&self) -> Result<()> {
        if self.running.load(Ordering::Acquire) {
            return Ok(());
        }

        match self.local.initialize().await {
            Ok(()) => self.local_usable.store(true, Ordering::Release),
            Err(e) => {
                log::error!("Local backend failed to initialize: {e}");
                self.local_usable.store(false, Ordering::Release);
            }
        }

        if let Some(remote) = &self.remote {
            match self.bounded(remote.initialize()).await {
                Ok(()) => self.remote_usable.store(true, Ordering::Release),
                Err(e) => {
                    log::warn!("Remote backend unavailable: {e}");
                    self.remote_usable.store(false, Ordering::Release);
                }
            }
        }

        let local_ok = self.local_usable.load(Ordering::Acquire);
        let remote_ok = self.remote_usable.load(Ordering::Acquire);
        let over_budget = self.cost.is_over_fallback();

        let (active, reason) = match (remote_ok, local_ok, over_budget) {
            (true, _, false) => (BackendKind::Remote, FallbackReason::None),
            (true, true, true) => (BackendKind::Local, FallbackReason::CostThreshold),
            (true, false, true) => {
                log::warn!("Cost is over the fallback threshold but only the remote backend is up");
                (BackendKind::Remote, FallbackReason::None)
            }
            (false, true, _) => (BackendKind::Local, FallbackReason::RemoteUnavailable),
            (false, false, _) => {
                return Err(Error::unavailable(
                    "neither the local nor the remote backend could be initialized",
                ));
            }
        };
        self.state.set(active, reason);

        self.cost.unregister(FALLBACK_OBSERVER);
        self.cost.register(Arc::new(CostFallbackObserver {
            state: self.state.clone(),
            local_usable: Arc::clone(&self.local_usable),
        }));

        *self
            .reconcile_clock
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = ReconcileClock::new();
        self.running.store(true, Ordering::Release);
        log::info!(
            "Hybrid vector manager ready: active={active}, reason={reason}, local={}, remote={}",
            if local_ok { "up" } else { "down" },
            if remote_ok { "up" } else { "down" }
        );
        Ok(())
    }

    /// Close both backends. The manager reports `Error` health afterwards.
    pub async fn close(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        self.cost.unregister(FALLBACK_OBSERVER);

        let local = self.local.close().await;
        if let Err(e) = &local {
            log::warn!("Error closing local backend: {e}");
        }
        let remote = match &self.remote {
            Some(remote) => remote.close().await,
            None => Ok(()),
        };
        if let Err(e) = &remote {
            log::warn!("Error closing remote backend: {e}");
        }
        log::info!("Hybrid vector manager closed");
        local.and(remote)
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    /// Current backend selection.
    pub fn backend_state(&self) -> BackendState {
        self.state.snapshot()
    }

    /// The backend serving requests.
    pub fn active_backend(&self) -> BackendKind {
        self.state.active()
    }

    /// The cost monitor.
    pub fn cost_monitor(&self) -> &Arc<CostMonitor> {
        &self.cost
    }

    /// Search latency per backend.
    pub fn performance(&self) -> PerformanceMetrics {
        *self.performance.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cost report.
    pub fn cost_summary(&self) -> CostSummary {
        self.cost.get_cost_summary()
    }

    /// Whether `initialize` succeeded and `close` has not been called.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    // ------------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------------

    fn ensure_running(&self) -> Result<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(Error::unavailable("hybrid vector manager is not running"))
        }
    }

    fn backend(&self, kind: BackendKind) -> Option<Arc<dyn VectorStoreBackend>> {
        match kind {
            BackendKind::Local => Some(Arc::clone(&self.local)),
            BackendKind::Remote => self.remote.clone(),
        }
    }

    fn usable(&self, kind: BackendKind) -> bool {
        match kind {
            BackendKind::Local => self.local_usable.load(Ordering::Acquire),
            BackendKind::Remote => {
                self.remote.is_some() && self.remote_usable.load(Ordering::Acquire)
            }
        }
    }

    /// Bound a remote call by the remote time budget.
    async fn bounded<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.remote_timeout, fut)
            .await
            .unwrap_or(Err(Error::timeout(BackendKind::Remote, self.remote_timeout)))
    }

    async fn call_backend<T, F, Fut>(&self, kind: BackendKind, f: &F) -> Result<T>
    where
        F: Fn(Arc<dyn VectorStoreBackend>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let backend = self
            .backend(kind)
            .ok_or_else(|| Error::unavailable(format!("no {kind} backend configured")))?;
        match kind {
            BackendKind::Remote => self.bounded(f(backend)).await,
            BackendKind::Local => f(backend).await,
        }
    }

    fn record_timing(&self, kind: BackendKind, started: Instant, ok: bool) {
        self.performance
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(kind, started.elapsed(), ok);
    }

    /// Run `f` on the active backend, retrying once on the local backend
    /// when the remote call fails. The state lock is only held while the
    /// snapshot is taken.
    async fn dispatch<T, F, Fut>(&self, op: &str, timed: bool, f: F) -> Result<Dispatched<T>>
    where
        F: Fn(Arc<dyn VectorStoreBackend>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.ensure_running()?;
        let active = self.state.active();
        let mut diagnostics = Vec::new();

        if active == BackendKind::Remote {
            let started = Instant::now();
            let result = self.call_backend(BackendKind::Remote, &f).await;
            if timed {
                self.record_timing(BackendKind::Remote, started, result.is_ok());
            }
            match result {
                Ok(value) => {
                    return Ok(Dispatched {
                        value,
                        backend: BackendKind::Remote,
                        fell_back: false,
                        diagnostics,
                    });
                }
                Err(e) => {
                    log::warn!("Remote {op} failed, retrying on local backend: {e}");
                    diagnostics.push(format!("remote {op} failed: {e}"));
                }
            }
        }

        if !self.usable(BackendKind::Local) {
            diagnostics.push("local backend is unusable".to_string());
            return Err(Error::unavailable(format!(
                "{op}: no backend answered ({})",
                diagnostics.join("; ")
            )));
        }

        let started = Instant::now();
        let result = self.call_backend(BackendKind::Local, &f).await;
        if timed {
            self.record_timing(BackendKind::Local, started, result.is_ok());
        }
        match result {
            Ok(value) => Ok(Dispatched {
                value,
                backend: BackendKind::Local,
                fell_back: active == BackendKind::Remote,
                diagnostics,
            }),
            Err(e) => {
                log::error!("Local {op} failed: {e}");
                diagnostics.push(format!("local {op} failed: {e}"));
                Err(Error::unavailable(format!(
                    "{op}: no backend answered ({})",
                    diagnostics.join("; ")
                )))
            }
        }
    }

    // ------------------------------------------------------------------------
    // Search
    // ------------------------------------------------------------------------

    /// Semantic search on the active backend.
    pub async fn search(
        &self,
        query: &str,
        top_k: Option<usize>,
        filters: Option<&Filters>,
    ) -> Result<SearchResponse> {
        let top_k = top_k.unwrap_or(self.default_top_k);
        let out = self
            .dispatch("search", true, move |b| async move {
                b.search(query, top_k, filters).await
            })
            .await?;
        self.track_remote_search(out.backend).await;
        Ok(SearchResponse {
            results: out.value,
            backend: out.backend,
            fell_back: out.fell_back,
            diagnostics: out.diagnostics,
        })
    }

    /// Semantic plus fuzzy name search on the active backend.
    ///
    /// `weights` overrides the configured blend for this call.
    pub async fn hybrid_search(
        &self,
        query: &str,
        weights: Option<HybridWeights>,
        top_k: Option<usize>,
        filters: Option<&Filters>,
    ) -> Result<SearchResponse> {
        let top_k = top_k.unwrap_or(self.default_top_k);
        let weights = weights.unwrap_or(self.weights);
        let out = self
            .dispatch("hybrid_search", true, move |b| async move {
                b.hybrid_search(query, weights, top_k, filters).await
            })
            .await?;
        self.track_remote_search(out.backend).await;
        Ok(SearchResponse {
            results: out.value,
            backend: out.backend,
            fell_back: out.fell_back,
            diagnostics: out.diagnostics,
        })
    }

    async fn track_remote_search(&self, backend: BackendKind) {
        if backend == BackendKind::Remote {
            self.cost.track_async(CostEvent::Search, 1, 0).await;
        }
    }

    // ------------------------------------------------------------------------
    // Indexing and sync
    // ------------------------------------------------------------------------

    /// Index documents on the active backend, mirror them to the other
    /// backend when auto-sync is on, and reconcile when the sync interval
    /// has elapsed.
    pub async fn add_documents(&self, docs: &[Document]) -> Result<AddOutcome> {
        let rejected = docs.iter().filter(|d| d.validate().is_err()).count();
        let out = self
            .dispatch("add_documents", false, move |b| async move {
                b.add_documents(docs).await
            })
            .await?;
        let mut diagnostics = out.diagnostics;

        if out.backend == BackendKind::Remote {
            self.track_remote_insert(out.value).await;
        }

        let synced = if self.auto_sync && !out.fell_back && out.value > 0 {
            match self.sync_batch(out.backend.other(), docs).await {
                Ok(n) => n,
                Err(e) => {
                    log::warn!("Sync to {} backend failed: {e}", out.backend.other());
                    diagnostics.push(format!("sync to {} failed: {e}", out.backend.other()));
                    None
                }
            }
        } else {
            None
        };

        let due = self
            .reconcile_clock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_due(self.sync_interval);
        let reconciled = if due && !out.fell_back {
            match self.reconcile().await {
                Ok(report) => Some(report),
                Err(e) => {
                    log::warn!("Reconciliation failed: {e}");
                    diagnostics.push(format!("reconciliation failed: {e}"));
                    None
                }
            }
        } else {
            None
        };

        Ok(AddOutcome {
            indexed: out.value,
            rejected,
            backend: out.backend,
            fell_back: out.fell_back,
            synced,
            reconciled,
            diagnostics,
        })
    }

    async fn track_remote_insert(&self, count: usize) {
        self.cost.track_async(CostEvent::Insert, count as u64, 0).await;
        let Some(remote) = &self.remote else {
            return;
        };
        match self.bounded(remote.get_stats()).await {
            Ok(stats) => {
                let bytes = (stats.index_size_mb * 1024.0 * 1024.0) as u64;
                self.cost.track_async(CostEvent::Storage, 0, bytes).await;
            }
            Err(e) => log::debug!("Could not read remote stats for storage tracking: {e}"),
        }
    }

    /// Why writes toward `target` must not happen right now, if anything.
    fn sync_blocker(&self, target: BackendKind) -> Option<String> {
        if !self.usable(target) {
            return Some(format!("{target} backend is unusable"));
        }
        let state = self.state.snapshot();
        if target == BackendKind::Remote && state.fallback_reason == FallbackReason::CostThreshold {
            return Some("remote writes are paused by the cost threshold".to_string());
        }
        None
    }

    /// Write a batch to `target`. `Ok(None)` when sync was skipped.
    async fn sync_batch(&self, target: BackendKind, docs: &[Document]) -> Result<Option<usize>> {
        if let Some(reason) = self.sync_blocker(target) {
            log::debug!("Skipping sync to {target}: {reason}");
            return Ok(None);
        }
        let written = self
            .call_backend(target, &move |b: Arc<dyn VectorStoreBackend>| async move {
                b.add_documents(docs).await
            })
            .await?;
        if target == BackendKind::Remote {
            self.track_remote_insert(written).await;
        }
        log::debug!("Synced {written} documents to {target} backend");
        Ok(Some(written))
    }

    /// Copy every document the inactive backend is missing, or holds a
    /// different version of, from the active backend.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        self.ensure_running()?;
        let _guard = self.reconcile_lock.lock().await;
        let source = self.state.active();
        let target = source.other();

        let report = match self.sync_blocker(target) {
            Some(reason) => ReconcileReport::skipped(source, reason),
            None => self.reconcile_into(source, target).await?,
        };

        let mut clock = self
            .reconcile_clock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        clock.anchor = Utc::now();
        if report.skipped.is_none() {
            clock.last = Some(clock.anchor);
        }
        Ok(report)
    }

    async fn reconcile_into(&self, source: BackendKind, target: BackendKind) -> Result<ReconcileReport> {
        let export = |b: Arc<dyn VectorStoreBackend>| async move { b.export_documents().await };
        let source_docs = self.call_backend(source, &export).await?;
        let target_docs = self.call_backend(target, &export).await?;

        let target_hashes: HashMap<String, String> = target_docs
            .iter()
            .map(|d| (d.id.clone(), d.content_hash()))
            .collect();

        let mut missing = 0;
        let mut stale = 0;
        let mut to_copy = Vec::new();
        for doc in source_docs.iter() {
            match target_hashes.get(&doc.id) {
                None => missing += 1,
                Some(hash) if *hash != doc.content_hash() => stale += 1,
                Some(_) => continue,
            }
            to_copy.push(doc.clone());
        }

        let copied = if to_copy.is_empty() {
            0
        } else {
            let batch = to_copy.as_slice();
            let written = self
                .call_backend(target, &move |b: Arc<dyn VectorStoreBackend>| async move {
                    b.add_documents(batch).await
                })
                .await?;
            if target == BackendKind::Remote {
                self.track_remote_insert(written).await;
            }
            written
        };

        log::info!(
            "Reconciled {source} -> {target}: {missing} missing, {stale} stale, {copied} copied"
        );
        Ok(ReconcileReport {
            source,
            target,
            source_documents: source_docs.len(),
            missing,
            stale,
            copied,
            skipped: None,
        })
    }

    // ------------------------------------------------------------------------
    // Operator controls
    // ------------------------------------------------------------------------

    /// Switch backends by hand.
    ///
    /// Switching to the remote backend requires it to be healthy and clears
    /// any fallback reason, including a cost threshold. Switching to the
    /// local backend records a manual override.
    pub async fn force_backend(&self, kind: BackendKind, reason: &str) -> Result<BackendState> {
        self.ensure_running()?;
        match kind {
            BackendKind::Remote => {
                let remote = self
                    .remote
                    .as_ref()
                    .ok_or_else(|| Error::unavailable("no remote backend configured"))?;
                if !self.remote_usable.load(Ordering::Acquire) {
                    self.bounded(remote.initialize()).await?;
                    self.remote_usable.store(true, Ordering::Release);
                }
                let health = self
                    .bounded(async { Ok(remote.health_check().await) })
                    .await?;
                if !health.is_healthy() {
                    return Err(Error::unavailable(format!(
                        "remote backend is not healthy: {}",
                        health.error.unwrap_or_default()
                    )));
                }
                self.state.set(BackendKind::Remote, FallbackReason::None);
            }
            BackendKind::Local => {
                if !self.usable(BackendKind::Local) {
                    return Err(Error::unavailable("local backend is unusable"));
                }
                self.state
                    .set(BackendKind::Local, FallbackReason::ManualOverride);
            }
        }
        log::info!("Backend forced to {kind}: {reason}");
        Ok(self.state.snapshot())
    }

    // ------------------------------------------------------------------------
    // Health and stats
    // ------------------------------------------------------------------------

    async fn remote_health(&self) -> Option<apivec_core::BackendHealth> {
        let remote = self.remote.as_ref()?;
        let probe = self.bounded(async { Ok(remote.health_check().await) }).await;
        Some(probe.unwrap_or_else(|e| {
            apivec_core::BackendHealth::unhealthy(BackendKind::Remote, e.to_string())
        }))
    }

    /// Aggregate health of both backends.
    pub async fn health_check(&self) -> ManagerHealth {
        let state = self.state.snapshot();
        if !self.is_running() {
            return ManagerHealth {
                status: OverallHealth::Error,
                active_backend: state.active,
                fallback_reason: state.fallback_reason,
                fallback_available: false,
                local: None,
                remote: None,
                error: Some("hybrid vector manager is not running".to_string()),
            };
        }

        let local = self.local.health_check().await;
        let remote = self.remote_health().await;
        let local_ok = local.is_healthy();
        let remote_ok = remote.as_ref().is_some_and(|h| h.is_healthy());
        let (active_ok, other_ok) = match state.active {
            BackendKind::Local => (local_ok, remote_ok),
            BackendKind::Remote => (remote_ok, local_ok),
        };
        // Dispatch only ever retries on the local backend.
        let fallback_available = state.active == BackendKind::Remote
            && local_ok
            && self.usable(BackendKind::Local);

        ManagerHealth {
            status: OverallHealth::assess(state.active, active_ok, other_ok),
            active_backend: state.active,
            fallback_reason: state.fallback_reason,
            fallback_available,
            local: Some(local),
            remote,
            error: None,
        }
    }

    /// Backend state, performance, cost, index and health in one report.
    pub async fn get_comprehensive_stats(&self) -> Result<ComprehensiveStats> {
        self.ensure_running()?;
        let state = self.state.snapshot();
        let index = match self
            .call_backend(state.active, &|b: Arc<dyn VectorStoreBackend>| async move {
                b.get_stats().await
            })
            .await
        {
            Ok(stats) => Some(stats),
            Err(e) => {
                log::warn!("Could not read {} index stats: {e}", state.active);
                None
            }
        };
        let last_reconciled = self
            .reconcile_clock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last
            .map(|t| t.to_rfc3339());

        Ok(ComprehensiveStats {
            active_backend: state.active,
            fallback_reason: state.fallback_reason,
            performance: self.performance(),
            cost: self.cost.get_cost_summary(),
            index,
            local_health: self.local.health_check().await,
            remote_health: self.remote_health().await,
            last_reconciled,
        })
    }
}

impl std::fmt::Debug for HybridVectorManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridVectorManager")
            .field("state", &self.state.snapshot())
            .field("has_remote", &self.remote.is_some())
            .field("running", &self.is_running())
            .finish()
    }
}

/// Pick the collection for the configured remote URL.
fn remote_collection(config: &ApivecConfig) -> Option<Arc<dyn VectorCollection>> {
    if !config.remote.enabled {
        return None;
    }
    if config.remote.is_in_memory() {
        return Some(Arc::new(InMemoryCollection::new(&config.remote.collection)));
    }
    qdrant_collection(config)
}

#[cfg(feature = "remote-qdrant")]
fn qdrant_collection(config: &ApivecConfig) -> Option<Arc<dyn VectorCollection>> {
    match apivec_remote::QdrantCollection::from_config(&config.remote) {
        Ok(collection) => Some(Arc::new(collection)),
        Err(e) => {
            log::warn!("Could not build Qdrant client for {}: {e}", config.remote.url);
            None
        }
    }
}

#[cfg(not(feature = "remote-qdrant"))]
fn qdrant_collection(config: &ApivecConfig) -> Option<Arc<dyn VectorCollection>> {
    log::warn!(
        "Remote URL {} needs the `remote-qdrant` feature; running without a remote backend",
        config.remote.url
    );
    None
}
