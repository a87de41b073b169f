//! apivec: hybrid semantic + fuzzy search over an API catalog.
//!
//! A [`HybridVectorManager`] fronts two interchangeable backends and a cost
//! monitor. Requests go to the active backend; remote failures are retried
//! on the local backend; the cost monitor switches the manager to the local
//! backend when the projected monthly spend crosses its fallback threshold.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      HybridVectorManager                    │
//! │  BackendState (active, fallback_reason) behind one RwLock   │
//! │  dispatch → active backend, retry once on local             │
//! │  auto-sync, periodic reconcile, performance metrics         │
//! ├──────────────────────────────┬──────────────────────────────┤
//! │ LocalBackend (apivec-local)  │ RemoteBackend (apivec-remote)│
//! │ flat index + disk artifacts  │ VectorCollection + timeouts  │
//! ├──────────────────────────────┴──────────────────────────────┤
//! │  CostMonitor (apivec-cost): counters, monthly estimate,     │
//! │  thresholds, observers → fallback to local                  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  apivec-core: Document, SearchResult, Filters, scoring,     │
//! │  EmbeddingProvider, VectorStoreBackend, config, Error       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use apivec::{ApivecConfig, Document, HybridVectorManager, MockEmbeddingProvider};
//! use std::sync::Arc;
//!
//! let config = ApivecConfig::load(None)?;
//! let embedder = Arc::new(MockEmbeddingProvider::new(config.embedding.dimension));
//! let manager = HybridVectorManager::from_config(&config, embedder)?;
//! manager.initialize().await?;
//!
//! manager.add_documents(&[Document::new("m1", "mesh.bevel")
//!     .with_description("Bevel selected edges")]).await?;
//!
//! let response = manager.hybrid_search("bevl edges", None, Some(1), None).await?;
//! println!("{} via {}", response.results[0].api_name, response.backend);
//! ```
//!
//! # Features
//!
//! - `remote-qdrant`: Qdrant as the remote backend
//! - `embed-fastembed`: local embedding generation via fastembed

pub mod health;
pub mod manager;
pub mod metrics;
pub mod response;
pub mod state;

pub use health::{ComprehensiveStats, ManagerHealth, OverallHealth};
pub use manager::{HybridVectorManager, ManagerBuilder};
pub use metrics::{BackendTiming, PerformanceMetrics};
pub use response::{AddOutcome, ReconcileReport, SearchResponse};
pub use state::{BackendState, FallbackReason, SharedState};

pub use apivec_core::{
    ApivecConfig, BackendHealth, BackendKind, Document, EmbeddingProvider, Error, FilterValue,
    Filters, HealthStatus, HybridWeights, IndexStats, MatchKind, MockEmbeddingProvider, Parameter,
    Result, SearchResult, VectorStoreBackend,
};
pub use apivec_cost::{CostEvent, CostLevel, CostMonitor, CostObserver, CostSummary, CostThresholds};
pub use apivec_local::LocalBackend;
pub use apivec_remote::{InMemoryCollection, RemoteBackend, VectorCollection};

#[cfg(feature = "embed-fastembed")]
pub use apivec_core::FastEmbedProvider;

#[cfg(feature = "remote-qdrant")]
pub use apivec_remote::QdrantCollection;
