//! Usage counters, thresholds and the monthly cost estimate.

use apivec_core::config::CostConfig;
use apivec_core::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Seconds in the 30-day billing month used for extrapolation.
pub const SECONDS_IN_MONTH: f64 = 30.0 * 24.0 * 3600.0;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

// ============================================================================
// Events and counters
// ============================================================================

/// A metered operation against the remote backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CostEvent {
    /// Similarity queries.
    Search,
    /// Newly inserted vectors.
    Insert,
    /// Replaced vectors.
    Update,
    /// Current stored size (a gauge, not a counter).
    Storage,
}

/// Persisted usage counters.
///
/// Counters only grow; they are zeroed by an explicit reset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostMetrics {
    /// Searches since the window started.
    pub total_searches: u64,

    /// Inserted vectors since the window started.
    pub total_inserts: u64,

    /// Updated vectors since the window started.
    pub total_updates: u64,

    /// Last reported storage size.
    pub storage_bytes: u64,

    /// Projected cost of a full month at the observed rate.
    pub estimated_monthly_cost: f64,

    /// Time of the last tracked event.
    pub last_updated: DateTime<Utc>,

    /// Start of the observation window.
    #[serde(default = "Utc::now")]
    pub window_started: DateTime<Utc>,
}

impl CostMetrics {
    /// Empty counters with the window starting at `now`.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            total_searches: 0,
            total_inserts: 0,
            total_updates: 0,
            storage_bytes: 0,
            estimated_monthly_cost: 0.0,
            last_updated: now,
            window_started: now,
        }
    }

    /// Apply one event.
    pub fn record(&mut self, event: CostEvent, count: u64, size_bytes: u64) {
        match event {
            CostEvent::Search => self.total_searches = self.total_searches.saturating_add(count),
            CostEvent::Insert => self.total_inserts = self.total_inserts.saturating_add(count),
            CostEvent::Update => self.total_updates = self.total_updates.saturating_add(count),
            CostEvent::Storage => self.storage_bytes = size_bytes,
        }
    }

    /// Stored size in GB.
    pub fn storage_gb(&self) -> f64 {
        self.storage_bytes as f64 / BYTES_PER_GB
    }

    /// Seconds between the window start and `now`.
    pub fn elapsed_secs(&self, now: DateTime<Utc>) -> f64 {
        ((now - self.window_started).num_milliseconds() as f64 / 1000.0).max(0.0)
    }
}

// ============================================================================
// Thresholds
// ============================================================================

/// Budget, alert ratios and unit prices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostThresholds {
    /// Monthly budget.
    pub max_monthly_cost: f64,
    /// Warning observers fire at or above this budget ratio.
    pub warning_ratio: f64,
    /// Fallback observers fire at or above this budget ratio.
    pub fallback_ratio: f64,
    /// Price per 1000 searches.
    pub search_cost_per_1k: f64,
    /// Price per 1000 inserts.
    pub insert_cost_per_1k: f64,
    /// Price per 1000 updates.
    pub update_cost_per_1k: f64,
    /// Price per GB-month of storage.
    pub storage_cost_per_gb_month: f64,
    /// Extrapolation never uses a window shorter than this.
    pub min_window_secs: u64,
}

impl Default for CostThresholds {
    fn default() -> Self {
        Self::from(&CostConfig::default())
    }
}

impl From<&CostConfig> for CostThresholds {
    fn from(config: &CostConfig) -> Self {
        Self {
            max_monthly_cost: config.max_monthly_cost,
            warning_ratio: config.warning_ratio,
            fallback_ratio: config.fallback_ratio,
            search_cost_per_1k: config.search_cost_per_1k,
            insert_cost_per_1k: config.insert_cost_per_1k,
            update_cost_per_1k: config.update_cost_per_1k,
            storage_cost_per_gb_month: config.storage_cost_per_gb_month,
            min_window_secs: config.min_window_secs,
        }
    }
}

impl CostThresholds {
    /// Check `0 < warning < fallback <= 1` and a positive budget.
    pub fn validate(&self) -> Result<()> {
        let as_config = CostConfig {
            max_monthly_cost: self.max_monthly_cost,
            warning_ratio: self.warning_ratio,
            fallback_ratio: self.fallback_ratio,
            search_cost_per_1k: self.search_cost_per_1k,
            insert_cost_per_1k: self.insert_cost_per_1k,
            update_cost_per_1k: self.update_cost_per_1k,
            storage_cost_per_gb_month: self.storage_cost_per_gb_month,
            min_window_secs: self.min_window_secs,
            metrics_file: String::new(),
        };
        as_config
            .validate()
            .map_err(|e| Error::config(format!("invalid cost thresholds: {e}")))
    }

    /// Budget ratio for a cost.
    pub fn ratio(&self, cost: f64) -> f64 {
        cost / self.max_monthly_cost
    }

    /// Status label for a budget ratio.
    pub fn level(&self, ratio: f64) -> CostLevel {
        if ratio >= self.fallback_ratio {
            CostLevel::Critical
        } else if ratio >= self.warning_ratio {
            CostLevel::Warning
        } else if ratio >= MODERATE_RATIO {
            CostLevel::Moderate
        } else {
            CostLevel::Healthy
        }
    }
}

/// Ratio at which usage stops being reported as healthy.
pub const MODERATE_RATIO: f64 = 0.5;

/// Coarse budget status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CostLevel {
    /// Below half the budget.
    Healthy,
    /// At least half the budget.
    Moderate,
    /// At or above the warning ratio.
    Warning,
    /// At or above the fallback ratio.
    Critical,
}

impl CostLevel {
    /// Canned operator advice.
    pub fn recommendations(self) -> Vec<String> {
        let advice: &[&str] = match self {
            Self::Critical => &[
                "Switch to the local backend immediately",
                "Review query patterns for optimization",
                "Consider increasing cost thresholds if budget allows",
            ],
            Self::Warning => &[
                "Monitor usage closely",
                "Optimize query frequency",
                "Consider caching frequent queries",
                "Review storage requirements",
            ],
            Self::Moderate => &[
                "Usage is moderate - continue monitoring",
                "Consider query optimization for better performance",
            ],
            Self::Healthy => &["Usage is healthy - no action needed"],
        };
        advice.iter().map(|s| s.to_string()).collect()
    }
}

// ============================================================================
// Estimation
// ============================================================================

/// Projected monthly cost by component.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    /// Searches.
    pub search: f64,
    /// Inserts.
    pub insert: f64,
    /// Updates.
    pub update: f64,
    /// Storage.
    pub storage: f64,
    /// Sum of all components.
    pub total: f64,
}

impl CostBreakdown {
    fn from_parts(search: f64, insert: f64, update: f64, storage: f64) -> Self {
        Self {
            search,
            insert,
            update,
            storage,
            total: search + insert + update + storage,
        }
    }
}

/// Extrapolate the counters observed since the window start to a month.
///
/// The window is never taken to be shorter than `min_window_secs`, so a
/// burst right after startup does not explode the projection.
pub fn estimate(metrics: &CostMetrics, thresholds: &CostThresholds, now: DateTime<Utc>) -> CostBreakdown {
    let window = metrics
        .elapsed_secs(now)
        .max(thresholds.min_window_secs.max(1) as f64);
    let factor = SECONDS_IN_MONTH / window;
    let monthly = |count: u64, per_1k: f64| count as f64 * factor / 1000.0 * per_1k;

    CostBreakdown::from_parts(
        monthly(metrics.total_searches, thresholds.search_cost_per_1k),
        monthly(metrics.total_inserts, thresholds.insert_cost_per_1k),
        monthly(metrics.total_updates, thresholds.update_cost_per_1k),
        metrics.storage_gb() * thresholds.storage_cost_per_gb_month,
    )
}

/// Project a month of steady daily usage.
pub fn project_daily(
    thresholds: &CostThresholds,
    searches_per_day: u64,
    inserts_per_day: u64,
    storage_gb: f64,
) -> CostBreakdown {
    let monthly = |per_day: u64, per_1k: f64| per_day as f64 * 30.0 / 1000.0 * per_1k;
    CostBreakdown::from_parts(
        monthly(searches_per_day, thresholds.search_cost_per_1k),
        monthly(inserts_per_day, thresholds.insert_cost_per_1k),
        0.0,
        storage_gb.max(0.0) * thresholds.storage_cost_per_gb_month,
    )
}

// ============================================================================
// Tests
// ============================================================================
