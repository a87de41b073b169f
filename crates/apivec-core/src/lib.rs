//! apivec core: shared types, traits, errors, scoring and configuration.
//!
//! This crate has no internal apivec dependencies. Both backends and the
//! manager build on it.
//!
//! # Modules
//!
//! - [`error`]: Error taxonomy and Result alias
//! - [`types`]: Documents, search results, index stats
//! - [`filter`]: Closed-world field filters
//! - [`fuzzy`]: Token-set name matching
//! - [`scoring`]: Score normalization and hybrid blending
//! - [`embedding`]: The injected embedding function
//! - [`backend`]: The `VectorStoreBackend` contract
//! - [`config`]: Configuration loading via `confyg`
//!
//! # Features
//!
//! - `embed-fastembed`: local embedding generation via fastembed

pub mod backend;
pub mod config;
pub mod embedding;
pub mod error;
pub mod filter;
pub mod fuzzy;
pub mod scoring;
pub mod types;

#[cfg(feature = "embed-fastembed")]
pub mod fastembed;

pub use backend::{BackendHealth, HealthStatus, VectorStoreBackend};
pub use config::ApivecConfig;
pub use embedding::{EmbeddingProvider, MockEmbeddingProvider};
pub use error::{Error, Result};
pub use filter::{FilterValue, Filters};
pub use fuzzy::NameEntry;
pub use scoring::{HybridWeights, ScoreKind};
pub use types::{BackendKind, Document, IndexStats, MatchKind, Parameter, SearchResult};

#[cfg(feature = "embed-fastembed")]
pub use fastembed::FastEmbedProvider;
