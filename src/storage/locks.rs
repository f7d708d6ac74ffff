//! Per-key async mutual exclusion.
//!
//! Each key gets its own `tokio::sync::Mutex`, created on first use and
//! dropped once nobody holds or waits on it. Operations on different keys
//! never contend beyond the short synchronous map lookup.

use parking_lot::Mutex;
use std::{
    collections::HashMap,
    hash::Hash,
    sync::{Arc, Weak},
};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Map size above which dead entries are swept on the next acquire.
const SWEEP_THRESHOLD: usize = 1024;

pub struct KeyLocks<K> {
    slots: Mutex<HashMap<K, Weak<AsyncMutex<()>>>>,
}

impl<K> Default for KeyLocks<K> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone> KeyLocks<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`. Access lasts as long as the guard.
    pub async fn acquire(&self, key: &K) -> OwnedMutexGuard<()> {
        let lock = {
            let mut slots = self.slots.lock();
            if slots.len() > SWEEP_THRESHOLD {
                slots.retain(|_, slot| slot.strong_count() > 0);
            }
            match slots.get(key).and_then(Weak::upgrade) {
                Some(lock) => lock,
                None => {
                    let lock = Arc::new(AsyncMutex::new(()));
                    slots.insert(key.clone(), Arc::downgrade(&lock));
                    lock
                }
            }
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    fn live_slots(&self) -> usize {
        self.slots
            .lock()
            .values()
            .filter(|slot| slot.strong_count() > 0)
            .count()
    }
}
