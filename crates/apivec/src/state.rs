//! Backend selection state.
//!
//! Which backend serves requests, and why, lives in one [`BackendState`]
//! behind one lock. Dispatch takes a snapshot under the read lock and makes
//! the backend call after releasing it; transitions take the write lock.

use apivec_core::BackendKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// Why the manager is not on its preferred backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FallbackReason {
    /// The cost monitor crossed the fallback threshold.
    CostThreshold,
    /// The remote backend could not be brought up.
    RemoteUnavailable,
    /// An operator forced the local backend.
    ManualOverride,
    /// Running on the preferred backend.
    None,
}

impl FallbackReason {
    /// The serialized name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CostThreshold => "COST_THRESHOLD",
            Self::RemoteUnavailable => "REMOTE_UNAVAILABLE",
            Self::ManualOverride => "MANUAL_OVERRIDE",
            Self::None => "NONE",
        }
    }
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The active backend and the reason for it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackendState {
    /// Backend serving requests.
    pub active: BackendKind,
    /// Why, when not on the remote backend.
    pub fallback_reason: FallbackReason,
    /// When `active` last changed.
    pub since: DateTime<Utc>,
}

impl BackendState {
    /// Initial state before bring-up.
    pub fn local(reason: FallbackReason) -> Self {
        Self {
            active: BackendKind::Local,
            fallback_reason: reason,
            since: Utc::now(),
        }
    }
}

/// Shared, lock-guarded [`BackendState`].
///
/// Cloning shares the same state; the cost fallback observer holds a clone.
#[derive(Debug, Clone)]
pub struct SharedState {
    inner: Arc<RwLock<BackendState>>,
}

impl SharedState {
    /// Wrap an initial state.
    pub fn new(state: BackendState) -> Self {
        Self {
            inner: Arc::new(RwLock::new(state)),
        }
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> BackendState {
        *self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// The backend serving requests.
    pub fn active(&self) -> BackendKind {
        self.snapshot().active
    }

    /// Set `active` and `reason`. Returns the previous state.
    pub fn set(&self, active: BackendKind, reason: FallbackReason) -> BackendState {
        let mut state = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let previous = *state;
        if previous.active != active {
            state.since = Utc::now();
        }
        state.active = active;
        state.fallback_reason = reason;
        previous
    }

    /// Switch from REMOTE to LOCAL for `reason`; no-op when already LOCAL.
    ///
    /// Returns `true` when a switch happened. The check and the switch
    /// happen under one write lock, so concurrent callers switch once.
    pub fn fall_back(&self, reason: FallbackReason) -> bool {
        let mut state = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if state.active != BackendKind::Remote {
            return false;
        }
        state.active = BackendKind::Local;
        state.fallback_reason = reason;
        state.since = Utc::now();
        true
    }
}
