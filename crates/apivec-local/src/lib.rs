//! Local (embedded) backend for apivec.
//!
//! An exhaustive inner-product index over unit-length vectors, kept in
//! memory and written through to disk after every batch.
//!
//! # Modules
//!
//! - [`index`]: The flat vector index and its rkyv encoding
//! - [`persistence`]: The three on-disk artifacts and their consistency checks
//! - [`backend`]: [`LocalBackend`], the `VectorStoreBackend` implementation
//!
//! # Example
//!
//! ```rust,ignore
//! use apivec_core::{Document, MockEmbeddingProvider, VectorStoreBackend};
//! use apivec_local::LocalBackend;
//! use std::sync::Arc;
//!
//! let backend = LocalBackend::new("local_index", Arc::new(MockEmbeddingProvider::new(384)));
//! backend.initialize().await?;
//! backend.add_documents(&[Document::new("m1", "mesh.bevel")]).await?;
//! let hits = backend.search("bevel", 5, None).await?;
//! ```

pub mod backend;
pub mod index;
pub mod persistence;

pub use backend::LocalBackend;
pub use index::FlatIndex;
