//! In-memory revision budget per change artifact.
//!
//! The counter lives only in process memory and is independent of the
//! persisted steps. A restarted process starts from zero unless the
//! orchestrator seeds it from the progress record (see
//! [`IterationController::seed_if_unobserved`]).

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::event::WorkUnitKey;

#[derive(Debug, Default)]
struct Counters {
    counts: HashMap<WorkUnitKey, u32>,
    notified: HashSet<WorkUnitKey>,
}

/// Result of a budget check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "budget", rename_all = "snake_case")]
pub enum Budget {
    Available { used: u32, max: u32 },
    Exhausted { used: u32, max: u32 },
}

impl Budget {
    #[must_use]
    pub fn is_exhausted(self) -> bool {
        matches!(self, Budget::Exhausted { .. })
    }
}

/// Revision counters for every change artifact seen by this process.
#[derive(Debug, Clone)]
pub struct IterationController {
    max_iterations: u32,
    inner: Arc<Mutex<Counters>>,
}

impl IterationController {
    #[must_use]
    pub fn new(max_iterations: u32) -> Self {
        Self {
            max_iterations,
            inner: Arc::new(Mutex::new(Counters::default())),
        }
    }

    #[must_use]
    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    fn lock(&self) -> MutexGuard<'_, Counters> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Revisions recorded for `key`; zero when never seen.
    #[must_use]
    pub fn current_count(&self, key: &WorkUnitKey) -> u32 {
        self.lock().counts.get(key).copied().unwrap_or(0)
    }

    /// Count one more revision and return the new value.
    pub fn increment(&self, key: &WorkUnitKey) -> u32 {
        let mut inner = self.lock();
        let count = inner.counts.entry(key.clone()).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    /// Forget everything about `key`.
    pub fn reset(&self, key: &WorkUnitKey) {
        let mut inner = self.lock();
        inner.counts.remove(key);
        inner.notified.remove(key);
    }

    /// Set the counter to `value` unless this process already tracks `key`.
    ///
    /// Returns the count in effect afterwards.
    pub fn seed_if_unobserved(&self, key: &WorkUnitKey, value: u32) -> u32 {
        *self.lock().counts.entry(key.clone()).or_insert(value)
    }

    #[must_use]
    pub fn check(&self, key: &WorkUnitKey) -> Budget {
        let used = self.current_count(key);
        let max = self.max_iterations;
        if used >= max {
            Budget::Exhausted { used, max }
        } else {
            Budget::Available { used, max }
        }
    }

    /// Record that the limit notice was posted for `key`.
    ///
    /// Returns `true` only the first time, so callers post at most one
    /// notice per artifact per process.
    pub fn mark_notified(&self, key: &WorkUnitKey) -> bool {
        self.lock().notified.insert(key.clone())
    }
}

/// Comment posted when a change artifact runs out of revisions.
#[must_use]
pub fn limit_notice(max_iterations: u32) -> String {
    format!(
        "## ⚠️ Iteration limit reached\n\n\
         Patcher has reached the maximum number of iterations ({max_iterations}) for this pull request.\n\n\
         **What this means:**\n\
         - Automatic fixes will no longer be applied to this PR\n\
         - Manual intervention is needed to continue\n\n\
         **Possible next steps:**\n\
         1. Review the feedback and apply the remaining fixes by hand\n\
         2. Close this PR and open a new issue with a more detailed description\n\
         3. Contact the project maintainers\n\n\
         *The limit is configured with `maxIterations` ({max_iterations}).*\n"
    )
}
