// Read access for UI consumers: per-key subscriptions and prefix event streams.
use tokio::sync::{broadcast, watch};
use tracing::warn;

use crate::{CacheEntry, QueryKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheEventKind {
    Updated,
    Loading,
    Failed,
    Invalidated,
    RolledBack,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEvent {
    pub key: QueryKey,
    pub kind: CacheEventKind,
}

/// Live view of one key. Every change to the entry produces a new snapshot.
pub struct Subscription<V> {
    key: QueryKey,
    receiver: watch::Receiver<CacheEntry<V>>,
}

impl<V: Clone> Subscription<V> {
    pub(crate) fn new(key: QueryKey, receiver: watch::Receiver<CacheEntry<V>>) -> Self {
        Self { key, receiver }
    }

    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn current(&self) -> CacheEntry<V> {
        self.receiver.borrow().clone()
    }

    /// Wait for the next change. `None` once the cache has been dropped.
    pub async fn changed(&mut self) -> Option<CacheEntry<V>> {
        self.receiver.changed().await.ok()?;
        Some(self.receiver.borrow_and_update().clone())
    }
}

/// Change events for every key under a filter prefix.
pub struct PrefixWatch {
    filter: QueryKey,
    receiver: broadcast::Receiver<CacheEvent>,
}

impl PrefixWatch {
    pub(crate) fn new(filter: QueryKey, receiver: broadcast::Receiver<CacheEvent>) -> Self {
        Self { filter, receiver }
    }

    pub fn filter(&self) -> &QueryKey {
        &self.filter
    }

    pub async fn recv(&mut self) -> Option<CacheEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if event.key.matches(&self.filter) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(filter = %self.filter, skipped, "prefix watch lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next already-queued matching event, without waiting.
    pub fn try_recv(&mut self) -> Option<CacheEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if event.key.matches(&self.filter) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(filter = %self.filter, skipped, "prefix watch lagged");
                }
                Err(_) => return None,
            }
        }
    }
}
