//! Process-local dedup guard for request starts.
//!
//! GitHub often delivers `opened` and `labeled` for the same issue within
//! milliseconds. Only the first delivery acquires the key; the others are
//! skipped while it is held. The guard is not durable and is not shared
//! between processes.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use crate::event::WorkUnitKey;

/// Set of work units currently being started.
#[derive(Debug, Clone, Default)]
pub struct DedupGuard {
    held: Arc<Mutex<HashSet<WorkUnitKey>>>,
}

impl DedupGuard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `key` as in flight. Returns `false` if it already was.
    pub fn try_acquire(&self, key: &WorkUnitKey) -> bool {
        let acquired = self
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone());
        debug!(%key, acquired, "Dedup acquire");
        acquired
    }

    /// Clear `key`, whether or not it was held.
    pub fn release(&self, key: &WorkUnitKey) {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    #[must_use]
    pub fn is_held(&self, key: &WorkUnitKey) -> bool {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key)
    }

    /// Acquire `key` and get a permit that releases it on drop.
    #[must_use]
    pub fn acquire(&self, key: WorkUnitKey) -> Option<DedupPermit> {
        self.try_acquire(&key).then(|| DedupPermit {
            guard: self.clone(),
            key,
        })
    }
}

/// Holds a key in a [`DedupGuard`] until dropped.
#[derive(Debug)]
pub struct DedupPermit {
    guard: DedupGuard,
    key: WorkUnitKey,
}

impl DedupPermit {
    #[must_use]
    pub fn key(&self) -> &WorkUnitKey {
        &self.key
    }
}

impl Drop for DedupPermit {
    fn drop(&mut self) {
        self.guard.release(&self.key);
    }
}
