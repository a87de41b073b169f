//! The capability contract shared by the local and remote backends.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::Result;
use crate::filter::Filters;
use crate::scoring::HybridWeights;
use crate::types::{BackendKind, Document, IndexStats, SearchResult};

/// Health of a single backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Serving requests.
    Healthy,
    /// Not able to serve requests.
    Unhealthy,
}

/// A backend's health report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendHealth {
    /// Overall status.
    pub status: HealthStatus,

    /// Which backend reported.
    pub backend: BackendKind,

    /// Stored vector count, when it could be read.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_vectors: Option<usize>,

    /// Backend-specific details (paths, URLs, cache sizes).
    #[serde(default)]
    pub details: BTreeMap<String, serde_json::Value>,

    /// Failure description when unhealthy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BackendHealth {
    /// A healthy report.
    pub fn healthy(backend: BackendKind) -> Self {
        Self {
            status: HealthStatus::Healthy,
            backend,
            total_vectors: None,
            details: BTreeMap::new(),
            error: None,
        }
    }

    /// An unhealthy report with a reason.
    pub fn unhealthy(backend: BackendKind, error: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            backend,
            total_vectors: None,
            details: BTreeMap::new(),
            error: Some(error.into()),
        }
    }

    /// Record the vector count.
    pub fn with_total_vectors(mut self, total: usize) -> Self {
        self.total_vectors = Some(total);
        self
    }

    /// Add a detail entry.
    pub fn with_detail(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }

    /// Whether the backend can serve requests.
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// A searchable vector store.
///
/// Implementations own their embedding step: callers pass documents and
/// query text, never vectors. Every returned score is normalized to
/// `[0, 1]` and results are sorted best-first.
#[async_trait]
pub trait VectorStoreBackend: Send + Sync {
    /// Which backend this is.
    fn kind(&self) -> BackendKind;

    /// Bring the backend up (load or create the index, connect).
    async fn initialize(&self) -> Result<()>;

    /// Insert or replace documents by id. Returns how many were indexed;
    /// invalid documents are skipped and logged.
    async fn add_documents(&self, docs: &[Document]) -> Result<usize>;

    /// Pure semantic ranking.
    async fn search(
        &self,
        query: &str,
        top_k: usize,
        filters: Option<&Filters>,
    ) -> Result<Vec<SearchResult>>;

    /// Semantic and fuzzy name ranking blended by `weights`.
    async fn hybrid_search(
        &self,
        query: &str,
        weights: HybridWeights,
        top_k: usize,
        filters: Option<&Filters>,
    ) -> Result<Vec<SearchResult>>;

    /// Index size statistics.
    async fn get_stats(&self) -> Result<IndexStats>;

    /// Liveness and detail report. Never fails; problems are reported as
    /// [`HealthStatus::Unhealthy`].
    async fn health_check(&self) -> BackendHealth;

    /// Every stored document, for reconciliation between backends.
    async fn export_documents(&self) -> Result<Vec<Document>>;

    /// Flush and release resources.
    async fn close(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_builders() {
        let health = BackendHealth::healthy(BackendKind::Local)
            .with_total_vectors(3)
            .with_detail("index_loaded", serde_json::json!(true));
        assert!(health.is_healthy());
        assert_eq!(health.total_vectors, Some(3));
        assert_eq!(health.details["index_loaded"], true);

        let down = BackendHealth::unhealthy(BackendKind::Remote, "connection refused");
        assert!(!down.is_healthy());
        assert_eq!(down.error.as_deref(), Some("connection refused"));
    }

    #[test]
    fn test_trait_object_safety() {
        fn _assert_object_safe(_: &dyn VectorStoreBackend) {}
    }
}
