//! Per-key locks used by the breakdown guard.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::debug;

/// Lazily created per-key mutexes with idle pruning.
///
/// A lock is idle when the registry holds the only reference to it: nobody
/// holds the guard and nobody is queued on it. Only idle locks are pruned, so
/// two callers for the same key always contend on the same mutex.
#[derive(Debug)]
pub(crate) struct LockRegistry {
    locks: DashMap<String, Arc<Mutex<()>>>,
    max_idle: usize,
}

impl LockRegistry {
    pub(crate) fn new(max_idle: usize) -> Self {
        Self {
            locks: DashMap::new(),
            max_idle,
        }
    }

    /// Returns the lock for `key`, creating it on first use.
    pub(crate) fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        if self.locks.len() >= self.max_idle {
            self.prune();
        }
        // The clone is taken under the shard lock, so `prune` never sees a
        // reference count that is about to grow.
        self.locks
            .entry(key.to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drops every lock nobody references.
    pub(crate) fn prune(&self) {
        let before = self.locks.len();
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        debug!(before, after = self.locks.len(), "pruned idle breakdown locks");
    }

    pub(crate) fn len(&self) -> usize {
        self.locks.len()
    }
}
