//! Remote backend for apivec.
//!
//! [`RemoteBackend`] implements `VectorStoreBackend` on top of a
//! [`VectorCollection`], the handful of calls made against a vector
//! database. Two collections ship:
//!
//! - [`InMemoryCollection`]: always available; serves the `:memory:` URL
//! - `QdrantCollection`: a Qdrant server (feature: `remote-qdrant`)
//!
//! # Features
//!
//! - `remote-qdrant`: Enable the Qdrant collection

pub mod backend;
pub mod collection;

#[cfg(feature = "remote-qdrant")]
pub mod qdrant;

pub use backend::RemoteBackend;
pub use collection::{CollectionPoint, InMemoryCollection, VectorCollection};

#[cfg(feature = "remote-qdrant")]
pub use qdrant::QdrantCollection;
