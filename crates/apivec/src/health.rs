//! Aggregate health and statistics reports.

use apivec_core::{BackendHealth, BackendKind, IndexStats};
use apivec_cost::CostSummary;
use serde::{Deserialize, Serialize};

use crate::metrics::PerformanceMetrics;
use crate::state::FallbackReason;

/// Overall manager health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallHealth {
    /// The active backend is healthy.
    Healthy,
    /// The active backend is down but the other one can serve.
    Degraded,
    /// Neither backend can serve.
    Unhealthy,
    /// The manager itself is not running.
    Error,
}

impl OverallHealth {
    /// Combine the active backend's health with the other one's.
    ///
    /// Requests only fall back from remote to local, so a down local
    /// backend is `Unhealthy` whatever the remote reports.
    pub fn assess(active: BackendKind, active_healthy: bool, other_healthy: bool) -> Self {
        match (active, active_healthy, other_healthy) {
            (_, true, _) => Self::Healthy,
            (BackendKind::Remote, false, true) => Self::Degraded,
            _ => Self::Unhealthy,
        }
    }
}

/// Result of [`HybridVectorManager::health_check`](crate::HybridVectorManager::health_check).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerHealth {
    /// Overall status.
    pub status: OverallHealth,
    /// Backend serving requests.
    pub active_backend: BackendKind,
    /// Why the active backend was chosen.
    pub fallback_reason: FallbackReason,
    /// Whether a failing request would be retried on a healthy backend.
    pub fallback_available: bool,
    /// Local backend report.
    pub local: Option<BackendHealth>,
    /// Remote backend report, absent when no remote is configured.
    pub remote: Option<BackendHealth>,
    /// Set when `status` is `Error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Everything an operator dashboard would show.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComprehensiveStats {
    /// Backend serving requests.
    pub active_backend: BackendKind,
    /// Why.
    pub fallback_reason: FallbackReason,
    /// Search latency per backend.
    pub performance: PerformanceMetrics,
    /// Cost report.
    pub cost: CostSummary,
    /// Active backend index statistics, when it answered.
    pub index: Option<IndexStats>,
    /// Local backend health.
    pub local_health: BackendHealth,
    /// Remote backend health, absent when no remote is configured.
    pub remote_health: Option<BackendHealth>,
    /// Last full reconciliation, RFC 3339.
    pub last_reconciled: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assess() {
        use BackendKind::{Local, Remote};
        assert_eq!(OverallHealth::assess(Remote, true, false), OverallHealth::Healthy);
        assert_eq!(OverallHealth::assess(Local, true, false), OverallHealth::Healthy);
        assert_eq!(OverallHealth::assess(Remote, false, true), OverallHealth::Degraded);
        assert_eq!(OverallHealth::assess(Remote, false, false), OverallHealth::Unhealthy);
    }

    #[test]
    fn test_assess_local_down_has_no_fallback() {
        assert_eq!(
            OverallHealth::assess(BackendKind::Local, false, true),
            OverallHealth::Unhealthy
        );
    }
}
