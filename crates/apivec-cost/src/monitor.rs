//! The cost monitor and its observer bus.
//!
//! Every tracked event updates the counters and re-estimates the monthly
//! cost under one lock, then rewrites the metrics file. Each snapshot
//! carries a sequence number and the writer skips anything older than what
//! is already on disk, so the file never goes back in time. Async callers
//! use [`CostMonitor::track_async`], which writes on the blocking pool.
//! Observers are notified after the metrics lock is released, so an
//! observer may call back into the monitor.

use apivec_core::config::CostConfig;
use apivec_core::{Error, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use crate::metrics::{
    CostBreakdown, CostEvent, CostLevel, CostMetrics, CostThresholds, estimate, project_daily,
};

// ============================================================================
// Observers
// ============================================================================

/// Snapshot handed to observers when a threshold is crossed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostAlert {
    /// `Warning` or `Critical`.
    pub level: CostLevel,
    /// Estimated cost over budget.
    pub ratio: f64,
    /// Estimated monthly cost.
    pub estimated_monthly_cost: f64,
    /// Configured budget.
    pub max_monthly_cost: f64,
    /// The event that triggered the evaluation.
    pub event: CostEvent,
}

/// Subscriber to cost threshold crossings.
///
/// Both hooks default to doing nothing, so an observer implements only the
/// signal it cares about. Errors and panics are caught and logged by the
/// monitor.
pub trait CostObserver: Send + Sync {
    /// Name shown by [`CostMonitor::observers`].
    fn name(&self) -> &str;

    /// Called when `warning_ratio <= ratio < fallback_ratio`.
    fn on_warning(&self, _alert: &CostAlert) -> Result<()> {
        Ok(())
    }

    /// Called when `ratio >= fallback_ratio`.
    fn on_fallback(&self, _alert: &CostAlert) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// Reports
// ============================================================================

/// Operator-facing cost report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostSummary {
    /// Current counters.
    pub metrics: CostMetrics,
    /// Configured thresholds.
    pub thresholds: CostThresholds,
    /// Estimated cost over budget.
    pub ratio: f64,
    /// Status label.
    pub status: CostLevel,
    /// Estimate by component.
    pub breakdown: CostBreakdown,
    /// Canned advice for the status.
    pub recommendations: Vec<String>,
}

/// Result of a what-if projection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostProjection {
    /// Projected cost by component.
    pub breakdown: CostBreakdown,
    /// Projected cost over budget.
    pub ratio: f64,
    /// Status the projection would produce.
    pub status: CostLevel,
    /// Whether the projection would switch the manager to the local backend.
    pub would_trigger_fallback: bool,
}

// ============================================================================
// CostMonitor
// ============================================================================

/// Tracks metered usage of the remote backend and raises threshold alerts.
pub struct CostMonitor {
    thresholds: CostThresholds,
    metrics_path: Option<PathBuf>,
    metrics: Mutex<CostMetrics>,
    sequence: AtomicU64,
    written: Arc<Mutex<u64>>,
    observers: RwLock<Vec<Arc<dyn CostObserver>>>,
}

/// One metrics snapshot waiting to be written.
struct PersistJob {
    path: PathBuf,
    written: Arc<Mutex<u64>>,
    sequence: u64,
    metrics: CostMetrics,
}

impl PersistJob {
    /// Write the snapshot unless a newer one is already on disk.
    fn run(&self) -> Result<()> {
        let mut written = self.written.lock().unwrap_or_else(PoisonError::into_inner);
        if *written >= self.sequence {
            return Ok(());
        }
        write_metrics(&self.path, &self.metrics)?;
        *written = self.sequence;
        Ok(())
    }
}

impl CostMonitor {
    /// Create a monitor persisting to `metrics_path`, resuming any counters
    /// already stored there.
    pub fn new(thresholds: CostThresholds, metrics_path: impl Into<PathBuf>) -> Result<Self> {
        thresholds.validate()?;
        let path = metrics_path.into();
        let metrics = load_metrics(&path);
        Ok(Self {
            thresholds,
            metrics_path: Some(path),
            metrics: Mutex::new(metrics),
            sequence: AtomicU64::new(0),
            written: Arc::new(Mutex::new(0)),
            observers: RwLock::new(Vec::new()),
        })
    }

    /// Create a monitor that keeps its counters in memory only.
    pub fn in_memory(thresholds: CostThresholds) -> Result<Self> {
        thresholds.validate()?;
        Ok(Self {
            thresholds,
            metrics_path: None,
            metrics: Mutex::new(CostMetrics::new(Utc::now())),
            sequence: AtomicU64::new(0),
            written: Arc::new(Mutex::new(0)),
            observers: RwLock::new(Vec::new()),
        })
    }

    /// Create a monitor from the `[cost]` config section.
    pub fn from_config(config: &CostConfig) -> Result<Self> {
        Self::new(CostThresholds::from(config), &config.metrics_file)
    }

    /// The configured thresholds.
    pub fn thresholds(&self) -> &CostThresholds {
        &self.thresholds
    }

    /// Where metrics are persisted, if anywhere.
    pub fn metrics_path(&self) -> Option<&Path> {
        self.metrics_path.as_deref()
    }

    // ------------------------------------------------------------------------
    // Observer bus
    // ------------------------------------------------------------------------

    /// Subscribe an observer.
    pub fn register(&self, observer: Arc<dyn CostObserver>) {
        log::debug!("Registered cost observer '{}'", observer.name());
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    /// Remove every observer with this name. Returns whether any was removed.
    pub fn unregister(&self, name: &str) -> bool {
        let mut observers = self.observers.write().unwrap_or_else(PoisonError::into_inner);
        let before = observers.len();
        observers.retain(|o| o.name() != name);
        before != observers.len()
    }

    /// Names of the registered observers, in registration order.
    pub fn observers(&self) -> Vec<String> {
        self.observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|o| o.name().to_string())
            .collect()
    }

    // ------------------------------------------------------------------------
    // Tracking
    // ------------------------------------------------------------------------

    /// Record `count` operations of `event` (or the current storage size
    /// for [`CostEvent::Storage`]) and evaluate thresholds.
    ///
    /// Returns the status after the update. Persistence failures are
    /// logged, never returned. Writes the metrics file on the calling
    /// thread; async code should use [`CostMonitor::track_async`].
    pub fn track(&self, event: CostEvent, count: u64, size_bytes: u64) -> CostLevel {
        let (estimated, job) = self.apply(event, count, size_bytes);
        if let Some(job) = job
            && let Err(e) = job.run()
        {
            log::warn!("Failed to persist cost metrics: {e}");
        }
        self.evaluate(event, estimated)
    }

    /// [`CostMonitor::track`] with the metrics file written on the blocking
    /// pool.
    pub async fn track_async(&self, event: CostEvent, count: u64, size_bytes: u64) -> CostLevel {
        let (estimated, job) = self.apply(event, count, size_bytes);
        if let Some(job) = job {
            match tokio::task::spawn_blocking(move || job.run()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::warn!("Failed to persist cost metrics: {e}"),
                Err(e) => log::warn!("Cost metrics persist task failed: {e}"),
            }
        }
        self.evaluate(event, estimated)
    }

    /// Update the counters and the estimate. Returns the new estimate and
    /// the snapshot to persist.
    fn apply(&self, event: CostEvent, count: u64, size_bytes: u64) -> (f64, Option<PersistJob>) {
        let mut metrics = self.lock_metrics();
        let now = Utc::now();
        metrics.record(event, count, size_bytes);
        metrics.estimated_monthly_cost = estimate(&metrics, &self.thresholds, now).total;
        metrics.last_updated = now;
        let job = self.persist_job(&metrics);
        (metrics.estimated_monthly_cost, job)
    }

    fn evaluate(&self, event: CostEvent, estimated: f64) -> CostLevel {
        let ratio = self.thresholds.ratio(estimated);
        let level = self.thresholds.level(ratio);
        if level >= CostLevel::Warning {
            self.notify(&CostAlert {
                level,
                ratio,
                estimated_monthly_cost: estimated,
                max_monthly_cost: self.thresholds.max_monthly_cost,
                event,
            });
        }
        level
    }

    fn notify(&self, alert: &CostAlert) {
        if alert.level == CostLevel::Critical {
            log::warn!(
                "Cost fallback threshold reached: ${:.2} of ${:.2} ({:.0}%)",
                alert.estimated_monthly_cost,
                alert.max_monthly_cost,
                alert.ratio * 100.0
            );
        } else {
            log::warn!(
                "Cost warning threshold reached: ${:.2} of ${:.2} ({:.0}%)",
                alert.estimated_monthly_cost,
                alert.max_monthly_cost,
                alert.ratio * 100.0
            );
        }

        let observers = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for observer in observers {
            let outcome = catch_unwind(AssertUnwindSafe(|| match alert.level {
                CostLevel::Critical => observer.on_fallback(alert),
                _ => observer.on_warning(alert),
            }));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::error!("Cost observer '{}' failed: {e}", observer.name()),
                Err(_) => log::error!("Cost observer '{}' panicked", observer.name()),
            }
        }
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Snapshot of the counters.
    pub fn metrics(&self) -> CostMetrics {
        self.lock_metrics().clone()
    }

    /// Estimated monthly cost over budget, as of the last tracked event.
    pub fn cost_ratio(&self) -> f64 {
        self.thresholds
            .ratio(self.lock_metrics().estimated_monthly_cost)
    }

    /// Status label as of the last tracked event.
    pub fn current_level(&self) -> CostLevel {
        self.thresholds.level(self.cost_ratio())
    }

    /// Whether the estimate is at or above the fallback ratio.
    pub fn is_over_fallback(&self) -> bool {
        self.cost_ratio() >= self.thresholds.fallback_ratio
    }

    /// Counters, thresholds, ratio, status and recommendations.
    pub fn get_cost_summary(&self) -> CostSummary {
        let metrics = self.metrics();
        let breakdown = estimate(&metrics, &self.thresholds, metrics.last_updated);
        let ratio = self.thresholds.ratio(metrics.estimated_monthly_cost);
        let status = self.thresholds.level(ratio);
        CostSummary {
            metrics,
            thresholds: self.thresholds.clone(),
            ratio,
            status,
            breakdown,
            recommendations: status.recommendations(),
        }
    }

    /// Project a month of steady usage without touching the counters.
    pub fn simulate_monthly_cost(
        &self,
        searches_per_day: u64,
        inserts_per_day: u64,
        storage_gb: f64,
    ) -> CostProjection {
        let breakdown = project_daily(
            &self.thresholds,
            searches_per_day,
            inserts_per_day,
            storage_gb,
        );
        let ratio = self.thresholds.ratio(breakdown.total);
        let status = self.thresholds.level(ratio);
        CostProjection {
            breakdown,
            ratio,
            status,
            would_trigger_fallback: status == CostLevel::Critical,
        }
    }

    // ------------------------------------------------------------------------
    // Operator actions
    // ------------------------------------------------------------------------

    /// Zero every counter and restart the observation window.
    ///
    /// `operator` is recorded in the log.
    pub fn reset(&self, operator: &str) -> Result<()> {
        let job = {
            let mut metrics = self.lock_metrics();
            let previous = metrics.clone();
            *metrics = CostMetrics::new(Utc::now());
            log::warn!(
                "Cost metrics reset by '{operator}' (was {} searches, {} inserts, {} updates, ${:.2}/month)",
                previous.total_searches,
                previous.total_inserts,
                previous.total_updates,
                previous.estimated_monthly_cost
            );
            self.persist_job(&metrics)
        };
        job.map_or(Ok(()), |job| job.run())
    }

    // ------------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------------

    fn lock_metrics(&self) -> MutexGuard<'_, CostMetrics> {
        self.metrics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot `metrics` for writing. Caller holds the metrics lock, which
    /// orders the sequence numbers the same way as the updates.
    fn persist_job(&self, metrics: &CostMetrics) -> Option<PersistJob> {
        let path = self.metrics_path.clone()?;
        Some(PersistJob {
            path,
            written: Arc::clone(&self.written),
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed) + 1,
            metrics: metrics.clone(),
        })
    }
}

fn write_metrics(path: &Path, metrics: &CostMetrics) -> Result<()> {
    let json = serde_json::to_string_pretty(metrics)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).map_err(|e| Error::io_with_path(e, &tmp))?;
    std::fs::rename(&tmp, path).map_err(|e| Error::io_with_path(e, path))?;
    Ok(())
}

impl std::fmt::Debug for CostMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CostMonitor")
            .field("thresholds", &self.thresholds)
            .field("metrics_path", &self.metrics_path)
            .field("observers", &self.observers())
            .finish()
    }
}

/// Load persisted metrics, starting fresh when absent or unreadable.
fn load_metrics(path: &Path) -> CostMetrics {
    let json = match std::fs::read_to_string(path) {
        Ok(json) => json,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            log::info!("No cost metrics at {}, starting fresh", path.display());
            return CostMetrics::new(Utc::now());
        }
        Err(e) => {
            log::warn!("Cannot read cost metrics at {}: {e}", path.display());
            return CostMetrics::new(Utc::now());
        }
    };
    match serde_json::from_str(&json) {
        Ok(metrics) => metrics,
        Err(e) => {
            log::warn!("Corrupt cost metrics at {}: {e}; starting fresh", path.display());
            CostMetrics::new(Utc::now())
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
