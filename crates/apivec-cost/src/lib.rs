//! Cost governance for the metered remote backend.
//!
//! [`CostMonitor`] counts searches, inserts, updates and stored bytes,
//! extrapolates them to a 30-day month, and notifies registered
//! [`CostObserver`]s when the estimate crosses the warning or fallback
//! share of the monthly budget. Counters are persisted to a JSON file after
//! every event and only an explicit [`CostMonitor::reset`] zeroes them.

pub mod metrics;
pub mod monitor;

pub use metrics::{CostBreakdown, CostEvent, CostLevel, CostMetrics, CostThresholds};
pub use monitor::{CostAlert, CostMonitor, CostObserver, CostProjection, CostSummary};
