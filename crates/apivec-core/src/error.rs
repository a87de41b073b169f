//! Error types for apivec operations.
//!
//! This module provides the common `Error` type and `Result<T>` alias used
//! across all apivec crates. Uses `thiserror` for derive macros.
//!
//! The variants fall into a small taxonomy the manager relies on:
//!
//! - **Initialization**: a backend cannot come up. Fatal for that backend only.
//! - **Transient** (`Backend`, `Timeout`): network or service trouble. The
//!   manager retries the call once against the local backend.
//! - **Data** (`InvalidDocument`): a malformed document, rejected on its own.
//! - **Unavailable**: no backend could answer. The only hard failure callers see.

use crate::types::BackendKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur in apivec operations.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// I/O error tied to a specific file.
    #[error("I/O error at {path}: {source}")]
    IoWithPath {
        /// The file involved.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A backend failed to come up.
    #[error("{backend} backend failed to initialize: {message}")]
    Initialization {
        /// Which backend.
        backend: BackendKind,
        /// What went wrong.
        message: String,
    },

    /// A backend call failed (network, remote 5xx, client error).
    #[error("{backend} backend error: {message}")]
    Backend {
        /// Which backend.
        backend: BackendKind,
        /// What went wrong.
        message: String,
    },

    /// A backend call exceeded its time budget.
    #[error("{backend} backend timed out after {budget:?}")]
    Timeout {
        /// Which backend.
        backend: BackendKind,
        /// The budget that was exceeded.
        budget: Duration,
    },

    /// A document failed validation and was rejected.
    #[error("Invalid document '{id}': {reason}")]
    InvalidDocument {
        /// Document id (may be empty when the id itself is missing).
        id: String,
        /// Why the document was rejected.
        reason: String,
    },

    /// Embedding generation failed.
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// A backend was used before `initialize` succeeded.
    #[error("{0} backend is not initialized")]
    NotInitialized(BackendKind),

    /// No backend is able to serve the request.
    #[error("No backend available: {0}")]
    Unavailable(String),

    /// Generic operation failure.
    #[error("Operation failed: {0}")]
    Operation(String),
}

impl Error {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an I/O error that remembers the file path.
    pub fn io_with_path(source: std::io::Error, path: impl AsRef<Path>) -> Self {
        Self::IoWithPath {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Create an initialization error for a backend.
    pub fn initialization(backend: BackendKind, msg: impl Into<String>) -> Self {
        Self::Initialization {
            backend,
            message: msg.into(),
        }
    }

    /// Create a backend call error.
    pub fn backend(backend: BackendKind, msg: impl Into<String>) -> Self {
        Self::Backend {
            backend,
            message: msg.into(),
        }
    }

    /// Create a timeout error for a call that exceeded `budget`.
    pub fn timeout(backend: BackendKind, budget: Duration) -> Self {
        Self::Timeout { backend, budget }
    }

    /// Create an invalid document error.
    pub fn invalid_document(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidDocument {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Create an embedding error.
    pub fn embedding(msg: impl Into<String>) -> Self {
        Self::Embedding(msg.into())
    }

    /// Create an unavailable error.
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Create a generic operation error.
    pub fn operation(msg: impl Into<String>) -> Self {
        Self::Operation(msg.into())
    }

    /// Whether retrying the same call later might succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Backend { .. } | Self::Timeout { .. } | Self::Io(_))
    }

    /// Whether this is a per-document data error.
    pub fn is_data_error(&self) -> bool {
        matches!(self, Self::InvalidDocument { .. })
    }
}

/// Result type alias using apivec's Error type.
pub type Result<T> = std::result::Result<T, Error>;

// ============================================================================
// Tests
// ============================================================================
