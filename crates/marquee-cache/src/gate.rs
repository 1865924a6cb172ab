// Per-key async gate that serializes mutations touching the same keys.
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;

use crate::QueryKey;

type KeyLocks = HashMap<QueryKey, Arc<tokio::sync::Mutex<()>>>;

#[derive(Debug, Default)]
pub(crate) struct KeyGate {
    locks: Arc<Mutex<KeyLocks>>,
}

impl KeyGate {
    /// Wait until no other permit covers any of `keys`.
    ///
    /// Keys are locked in sorted order so two mutations with overlapping key
    /// sets cannot deadlock each other.
    pub(crate) async fn acquire(&self, keys: &[QueryKey]) -> GatePermit {
        let mut ordered = keys.to_vec();
        ordered.sort();
        ordered.dedup();
        // Built first so a cancelled acquire still prunes the locks it created.
        let mut permit = GatePermit {
            keys: ordered.clone(),
            guards: Vec::with_capacity(ordered.len()),
            locks: Arc::clone(&self.locks),
        };
        for key in &ordered {
            let lock = Arc::clone(self.locks.lock().entry(key.clone()).or_default());
            permit.guards.push(lock.lock_owned().await);
        }
        permit
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.locks.lock().len()
    }
}

pub(crate) struct GatePermit {
    keys: Vec<QueryKey>,
    guards: Vec<OwnedMutexGuard<()>>,
    locks: Arc<Mutex<KeyLocks>>,
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.guards.clear();
        let mut locks = self.locks.lock();
        for key in &self.keys {
            // Only the map still references an idle lock; waiters hold their own clone.
            if locks
                .get(key)
                .is_some_and(|lock| Arc::strong_count(lock) == 1)
            {
                locks.remove(key);
            }
        }
    }
}
