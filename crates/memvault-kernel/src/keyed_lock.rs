//! Per-`memory_id` mutual exclusion.
//!
//! Operations on independent ids run concurrently; operations on the same id
//! are serialized through a keyed async mutex. No global lock: each id gets
//! its own `tokio::sync::Mutex`, held in a `DashMap` and evicted
//! opportunistically once nothing references it.

use dashmap::DashMap;
use memvault_types::MemoryId;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Keyed async lock map.
#[derive(Default)]
pub struct KeyedLocks {
    locks: DashMap<MemoryId, Arc<Mutex<()>>>,
}

impl KeyedLocks {
    /// Create an empty lock map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for an id, waiting if another holder is active.
    ///
    /// The returned guard is owned, so it can cross an `await` or move into
    /// a spawned task (detached propagation keeps the id serialized even
    /// after the caller stops waiting).
    pub async fn acquire(&self, memory_id: MemoryId) -> OwnedMutexGuard<()> {
        self.evict_idle();
        let lock = self
            .locks
            .entry(memory_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Drop map entries nobody holds or waits on.
    ///
    /// Safe because the predicate runs under the shard lock: an entry with
    /// strong count 1 has no guard and no cloned handle outside the map.
    fn evict_idle(&self) {
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    /// Number of ids currently tracked (held, waited on, or not yet evicted).
    pub fn tracked(&self) -> usize {
        self.locks.len()
    }
}
