//! What the manager hands back to callers.

use apivec_core::{BackendKind, SearchResult};
use serde::{Deserialize, Serialize};

/// Ranked matches plus where they came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    /// Matches, best first, scores in `[0, 1]`.
    pub results: Vec<SearchResult>,
    /// The backend that answered.
    pub backend: BackendKind,
    /// Whether the active backend failed and the other one answered.
    pub fell_back: bool,
    /// Failures encountered along the way.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<String>,
}

impl SearchResponse {
    /// The top match.
    pub fn best(&self) -> Option<&SearchResult> {
        self.results.first()
    }
}

/// Result of [`HybridVectorManager::add_documents`](crate::HybridVectorManager::add_documents).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddOutcome {
    /// Documents written to the answering backend.
    pub indexed: usize,
    /// Documents rejected as invalid.
    pub rejected: usize,
    /// The backend that took the write.
    pub backend: BackendKind,
    /// Whether the active backend failed and the other one took the write.
    pub fell_back: bool,
    /// Documents mirrored to the other backend, when sync ran and succeeded.
    pub synced: Option<usize>,
    /// Full reconciliation run triggered by this call, if any.
    pub reconciled: Option<ReconcileReport>,
    /// Failures encountered along the way.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<String>,
}

/// Result of a full reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// Backend read from.
    pub source: BackendKind,
    /// Backend written to.
    pub target: BackendKind,
    /// Documents on the source.
    pub source_documents: usize,
    /// Documents absent from the target.
    pub missing: usize,
    /// Documents present on the target with different content.
    pub stale: usize,
    /// Documents written to the target.
    pub copied: usize,
    /// Set when reconciliation did not run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skipped: Option<String>,
}

impl ReconcileReport {
    pub(crate) fn skipped(source: BackendKind, reason: impl Into<String>) -> Self {
        Self {
            source,
            target: source.other(),
            source_documents: 0,
            missing: 0,
            stale: 0,
            copied: 0,
            skipped: Some(reason.into()),
        }
    }

    /// Whether the two backends already agreed.
    pub fn in_sync(&self) -> bool {
        self.skipped.is_none() && self.missing == 0 && self.stale == 0
    }
}
