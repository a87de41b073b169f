//! Per-backend search latency.

use apivec_core::BackendKind;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Running search statistics for one backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendTiming {
    /// Mean latency of successful searches in seconds.
    pub avg_search_time: f64,
    /// Successful searches.
    pub search_count: u64,
    /// Searches that returned an error. Not part of the mean.
    pub failures: u64,
}

impl BackendTiming {
    /// Fold a successful search into the running mean, or count a failure.
    pub fn record(&mut self, elapsed: Duration, ok: bool) {
        if !ok {
            self.failures += 1;
            return;
        }
        let n = self.search_count as f64;
        self.avg_search_time = (self.avg_search_time * n + elapsed.as_secs_f64()) / (n + 1.0);
        self.search_count += 1;
    }
}

/// Search statistics for both backends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    /// The local backend.
    pub local: BackendTiming,
    /// The remote backend.
    pub remote: BackendTiming,
}

impl PerformanceMetrics {
    /// Record one search against `backend`.
    pub fn record(&mut self, backend: BackendKind, elapsed: Duration, ok: bool) {
        self.get_mut(backend).record(elapsed, ok);
    }

    /// Statistics for `backend`.
    pub fn get(&self, backend: BackendKind) -> &BackendTiming {
        match backend {
            BackendKind::Local => &self.local,
            BackendKind::Remote => &self.remote,
        }
    }

    fn get_mut(&mut self, backend: BackendKind) -> &mut BackendTiming {
        match backend {
            BackendKind::Local => &mut self.local,
            BackendKind::Remote => &mut self.remote,
        }
    }
}
