use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::debug;

use crate::gate::KeyGate;
use crate::{
    CacheConfig, CacheEntry, CacheEvent, CacheEventKind, MutationId, MutationListener,
    MutationReport, PrefixWatch, QueryKey, QueryStatus, Subscription,
};

/// Everything guarded by the cache lock.
///
/// Every operation on this struct is synchronous; nothing here awaits, so a
/// snapshot or rollback is a single critical section.
pub(crate) struct CacheState<V> {
    pub(crate) entries: HashMap<QueryKey, CacheEntry<V>>,
    // One watch channel per subscribed key; pruned once the last receiver is gone.
    watchers: HashMap<QueryKey, watch::Sender<CacheEntry<V>>>,
    // Declared keys of every mutation that has snapshotted but not settled.
    pub(crate) in_flight: HashMap<MutationId, Vec<QueryKey>>,
    events: broadcast::Sender<CacheEvent>,
    #[cfg(test)]
    pub(crate) snapshot_fault_at: Option<usize>,
}

impl<V: Clone> CacheState<V> {
    fn new(events: broadcast::Sender<CacheEvent>) -> Self {
        Self {
            entries: HashMap::new(),
            watchers: HashMap::new(),
            in_flight: HashMap::new(),
            events,
            #[cfg(test)]
            snapshot_fault_at: None,
        }
    }

    pub(crate) fn notify(&mut self, key: &QueryKey, kind: CacheEventKind) {
        let closed = match self.watchers.get(key) {
            Some(sender) => {
                let snapshot = self
                    .entries
                    .get(key)
                    .cloned()
                    .unwrap_or_else(|| CacheEntry::idle(key.clone()));
                sender.send_replace(snapshot);
                sender.receiver_count() == 0
            }
            None => false,
        };
        if closed {
            self.watchers.remove(key);
        }
        // Having no prefix watchers is the normal case.
        let _ = self.events.send(CacheEvent {
            key: key.clone(),
            kind,
        });
    }

    pub(crate) fn write(&mut self, key: QueryKey, data: V) {
        self.entries
            .entry(key.clone())
            .or_insert_with(|| CacheEntry::idle(key.clone()))
            .write(data);
        self.notify(&key, CacheEventKind::Updated);
    }

    pub(crate) fn mark_stale(&mut self, key: &QueryKey) -> bool {
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.stale = true;
                self.notify(key, CacheEventKind::Invalidated);
                true
            }
            None => false,
        }
    }

    /// Put a snapshotted entry back. The version still moves forward so a
    /// fetch started before the rollback cannot land on top of it.
    pub(crate) fn restore(&mut self, mut entry: CacheEntry<V>) {
        let key = entry.key.clone();
        let current = self.entries.get(&key).map_or(0, |live| live.version);
        entry.version = current.max(entry.version) + 1;
        // The fetch that was loading at snapshot time can no longer land here.
        if entry.status == QueryStatus::Loading {
            entry.status = if entry.data.is_some() {
                QueryStatus::Success
            } else {
                QueryStatus::Idle
            };
            entry.stale = true;
        }
        self.entries.insert(key.clone(), entry);
        self.notify(&key, CacheEventKind::RolledBack);
    }

    pub(crate) fn discard(&mut self, key: &QueryKey, kind: CacheEventKind) -> Option<CacheEntry<V>> {
        let removed = self.entries.remove(key);
        if removed.is_some() {
            self.notify(key, kind);
        }
        removed
    }

    pub(crate) fn is_held(&self, key: &QueryKey) -> bool {
        self.in_flight.values().any(|keys| keys.contains(key))
    }

    pub(crate) fn version_of(&self, key: &QueryKey) -> Option<u64> {
        self.entries.get(key).map(|entry| entry.version)
    }

    pub(crate) fn begin_fetch(&mut self, key: &QueryKey) -> u64 {
        let entry = self
            .entries
            .entry(key.clone())
            .or_insert_with(|| CacheEntry::idle(key.clone()));
        entry.status = QueryStatus::Loading;
        let version = entry.version;
        self.notify(key, CacheEventKind::Loading);
        version
    }

    pub(crate) fn fail_fetch(&mut self, key: &QueryKey, started: u64, message: String) {
        if self.version_of(key) != Some(started) {
            return;
        }
        if let Some(entry) = self.entries.get_mut(key) {
            entry.status = QueryStatus::Error;
            entry.error = Some(message);
            self.notify(key, CacheEventKind::Failed);
        }
    }

    /// A fetch finished after the entry was written or claimed by a mutation.
    /// Keep what is cached, leave it stale so the next read asks again.
    pub(crate) fn settle_overtaken_fetch(&mut self, key: &QueryKey) -> Option<V> {
        let entry = self.entries.get_mut(key)?;
        if entry.status == QueryStatus::Loading {
            entry.status = if entry.data.is_some() {
                QueryStatus::Success
            } else {
                QueryStatus::Idle
            };
        }
        entry.stale = true;
        let data = entry.data.clone();
        self.notify(key, CacheEventKind::Invalidated);
        data
    }

    #[cfg(test)]
    pub(crate) fn snapshot_fault(&self, step: usize) {
        if self.snapshot_fault_at == Some(step) {
            panic!("injected fault at snapshot step {step}");
        }
    }

    #[cfg(not(test))]
    #[inline]
    pub(crate) fn snapshot_fault(&self, _step: usize) {}
}

/// In-memory store of query results with optimistic mutations.
///
/// One instance is created per session and shared by `Arc` between every
/// consumer. Reads and writes are synchronous and never suspend; the only
/// async operations are [`EntityCache::fetch`] and mutations run through
/// [`EntityCache::mutation`], which await the remote call.
///
/// Updater closures run while the cache lock is held and must not call back
/// into the cache.
///
/// ```
/// use marquee_cache::{EntityCache, QueryKey, QueryStatus};
///
/// let cache: EntityCache<Vec<&str>> = EntityCache::new();
/// let ops = QueryKey::new(["ops"]);
/// cache.set(ops.clone(), vec!["alice"]);
/// let entry = cache.get(&ops).expect("entry");
/// assert_eq!(entry.data(), Some(&vec!["alice"]));
/// assert_eq!(entry.status(), QueryStatus::Success);
/// ```
pub struct EntityCache<V: Clone> {
    pub(crate) state: Arc<Mutex<CacheState<V>>>,
    events: broadcast::Sender<CacheEvent>,
    pub(crate) gate: KeyGate,
    pub(crate) config: CacheConfig,
    listener: Option<Arc<dyn MutationListener>>,
}

impl<V: Clone + Send + Sync + 'static> EntityCache<V> {
    // Use Default to centralize initialization.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: CacheConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            state: Arc::new(Mutex::new(CacheState::new(events.clone()))),
            events,
            gate: KeyGate::default(),
            config,
            listener: None,
        }
    }

    /// Receive a report for every settled mutation.
    pub fn with_listener(mut self, listener: Arc<dyn MutationListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Snapshot of the entry for `key`, if one exists. No side effects.
    pub fn get(&self, key: &QueryKey) -> Option<CacheEntry<V>> {
        self.state.lock().entries.get(key).cloned()
    }

    pub fn data(&self, key: &QueryKey) -> Option<V> {
        self.state
            .lock()
            .entries
            .get(key)
            .and_then(|entry| entry.data.clone())
    }

    /// Replace the data under `key` and mark it successful and fresh.
    pub fn set(&self, key: QueryKey, data: V) {
        debug!(key = %key, "cache set");
        self.state.lock().write(key, data);
    }

    /// Write `updater(current)` under `key` in one critical section.
    pub fn update<F>(&self, key: QueryKey, updater: F)
    where
        F: FnOnce(Option<&V>) -> V,
    {
        let mut state = self.state.lock();
        let next = updater(state.entries.get(&key).and_then(|entry| entry.data.as_ref()));
        state.write(key, next);
    }

    /// Mark every entry under `filter` stale. Matching nothing is not an error.
    ///
    /// Data stays readable; the next `fetch` of each key goes to the remote.
    pub fn invalidate(&self, filter: &QueryKey) -> usize {
        let mut state = self.state.lock();
        let matched: Vec<QueryKey> = state
            .entries
            .keys()
            .filter(|key| key.matches(filter))
            .cloned()
            .collect();
        for key in &matched {
            state.mark_stale(key);
        }
        drop(state);
        t_counter!("marquee_cache_invalidations_total").increment(matched.len() as u64);
        debug!(filter = %filter, matched = matched.len(), "invalidated cache entries");
        matched.len()
    }

    pub fn remove(&self, key: &QueryKey) -> Option<CacheEntry<V>> {
        self.state.lock().discard(key, CacheEventKind::Removed)
    }

    /// Drop every entry, e.g. on logout. Subscribers see their key go idle.
    pub fn clear(&self) -> usize {
        let mut state = self.state.lock();
        let keys: Vec<QueryKey> = state.entries.keys().cloned().collect();
        for key in &keys {
            state.discard(key, CacheEventKind::Removed);
        }
        debug!(removed = keys.len(), "cache cleared");
        keys.len()
    }

    /// Keys currently cached under `filter`, in key order.
    pub fn keys_matching(&self, filter: &QueryKey) -> Vec<QueryKey> {
        let mut keys: Vec<QueryKey> = self
            .state
            .lock()
            .entries
            .keys()
            .filter(|key| key.matches(filter))
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// Number of mutations that have snapshotted and not yet settled.
    pub fn in_flight(&self) -> usize {
        self.state.lock().in_flight.len()
    }

    /// Follow one key. Creates an idle entry when the key is unknown.
    pub fn subscribe(&self, key: QueryKey) -> Subscription<V> {
        let mut state = self.state.lock();
        let snapshot = state
            .entries
            .entry(key.clone())
            .or_insert_with(|| CacheEntry::idle(key.clone()))
            .clone();
        let receiver = match state.watchers.get(&key) {
            Some(sender) => sender.subscribe(),
            None => {
                let (sender, receiver) = watch::channel(snapshot);
                state.watchers.insert(key.clone(), sender);
                receiver
            }
        };
        Subscription::new(key, receiver)
    }

    /// Stream of change events for every key under `filter`.
    pub fn watch_prefix(&self, filter: QueryKey) -> PrefixWatch {
        PrefixWatch::new(filter, self.events.subscribe())
    }

    pub(crate) fn report(&self, report: &MutationReport) {
        if let Some(listener) = &self.listener {
            listener.on_settled(report);
        }
    }
}

impl<V: Clone + Send + Sync + 'static> Default for EntityCache<V> {
    fn default() -> Self {
        Self::with_config(CacheConfig::default())
    }
}

impl<V: Clone> fmt::Debug for EntityCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("EntityCache")
            .field("entries", &state.entries.len())
            .field("in_flight", &state.in_flight.len())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::KeySegment;

    fn page_key(resource: &str, page: i64) -> QueryKey {
        QueryKey::new([resource]).push(KeySegment::map([("page", KeySegment::Int(page))]))
    }

    #[test]
    fn get_is_idempotent_and_side_effect_free() {
        let cache: EntityCache<Vec<u32>> = EntityCache::new();
        let key = QueryKey::new(["users"]);
        assert!(cache.get(&key).is_none());
        assert!(cache.is_empty());
        cache.set(key.clone(), vec![1, 2]);
        let first = cache.get(&key).expect("entry");
        let second = cache.get(&key).expect("entry");
        assert_eq!(first, second);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn one_entry_per_key() {
        let cache: EntityCache<u32> = EntityCache::new();
        let key = QueryKey::new(["users"]).push(KeySegment::map([
            ("page", KeySegment::Int(1)),
            ("search", "x".into()),
        ]));
        let same = QueryKey::new(["users"]).push(KeySegment::map([
            ("search", "x".into()),
            ("page", KeySegment::Int(1)),
        ]));
        cache.set(key.clone(), 1);
        cache.set(same, 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.data(&key), Some(2));
    }

    #[test]
    fn update_sees_current_value() {
        let cache: EntityCache<u32> = EntityCache::new();
        let key = QueryKey::new(["count"]);
        cache.update(key.clone(), |current| current.copied().unwrap_or(0) + 1);
        cache.update(key.clone(), |current| current.copied().unwrap_or(0) + 1);
        assert_eq!(cache.data(&key), Some(2));
    }

    #[test]
    fn invalidate_marks_prefix_matches_only() {
        let cache: EntityCache<u32> = EntityCache::new();
        let first = page_key("newspapers", 1);
        let second = QueryKey::new(["newspapers"]).push(KeySegment::map([
            ("page", KeySegment::Int(2)),
            ("searchQuery", "x".into()),
        ]));
        let users = QueryKey::new(["users"]);
        cache.set(first.clone(), 1);
        cache.set(second.clone(), 2);
        cache.set(users.clone(), 3);

        assert_eq!(cache.invalidate(&QueryKey::new(["newspapers"])), 2);
        assert!(cache.get(&first).expect("first").is_stale());
        assert!(cache.get(&second).expect("second").is_stale());
        assert!(!cache.get(&users).expect("users").is_stale());
        // Invalidation keeps data readable.
        assert_eq!(cache.data(&first), Some(1));
    }

    #[test]
    fn invalidate_without_matches_is_silent() {
        let cache: EntityCache<u32> = EntityCache::new();
        cache.set(QueryKey::new(["users"]), 1);
        assert_eq!(cache.invalidate(&QueryKey::new(["events"])), 0);
    }

    #[test]
    fn set_clears_staleness() {
        let cache: EntityCache<u32> = EntityCache::new();
        let key = QueryKey::new(["users"]);
        cache.set(key.clone(), 1);
        cache.invalidate(&key);
        cache.set(key.clone(), 2);
        let entry = cache.get(&key).expect("entry");
        assert!(!entry.is_stale());
        assert_eq!(entry.version(), 2);
    }

    #[test]
    fn keys_matching_is_sorted_and_filtered() {
        let cache: EntityCache<u32> = EntityCache::new();
        cache.set(page_key("users", 2), 2);
        cache.set(page_key("users", 1), 1);
        cache.set(QueryKey::new(["ops"]), 0);
        assert_eq!(
            cache.keys_matching(&QueryKey::new(["users"])),
            vec![page_key("users", 1), page_key("users", 2)]
        );
        assert_eq!(cache.keys_matching(&QueryKey::root()).len(), 3);
    }

    #[test]
    fn clear_and_remove_drop_entries() {
        let cache: EntityCache<u32> = EntityCache::new();
        let key = QueryKey::new(["users"]);
        cache.set(key.clone(), 1);
        cache.set(QueryKey::new(["ops"]), 2);
        assert_eq!(cache.remove(&key).and_then(|entry| entry.into_data()), Some(1));
        assert!(cache.remove(&key).is_none());
        assert_eq!(cache.clear(), 1);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn subscribers_observe_writes() {
        let cache: EntityCache<u32> = EntityCache::new();
        let key = QueryKey::new(["users"]);
        let mut subscription = cache.subscribe(key.clone());
        assert_eq!(subscription.current().status(), QueryStatus::Idle);
        // Subscribing creates the entry.
        assert!(cache.get(&key).is_some());

        cache.set(key.clone(), 7);
        let entry = subscription.changed().await.expect("changed");
        assert_eq!(entry.data(), Some(&7));
        assert_eq!(entry.status(), QueryStatus::Success);

        cache.invalidate(&QueryKey::new(["users"]));
        let entry = subscription.changed().await.expect("changed");
        assert!(entry.is_stale());
    }

    #[tokio::test]
    async fn second_subscriber_shares_channel() {
        let cache: EntityCache<u32> = EntityCache::new();
        let key = QueryKey::new(["users"]);
        cache.set(key.clone(), 1);
        let first = cache.subscribe(key.clone());
        let mut second = cache.subscribe(key.clone());
        assert_eq!(second.current().data(), Some(&1));
        drop(first);
        cache.set(key, 2);
        assert_eq!(second.changed().await.and_then(|e| e.into_data()), Some(2));
    }

    #[tokio::test]
    async fn prefix_watch_filters_events() {
        let cache: EntityCache<u32> = EntityCache::new();
        let mut watch = cache.watch_prefix(QueryKey::new(["newspapers"]));
        cache.set(QueryKey::new(["users"]), 1);
        cache.set(page_key("newspapers", 1), 2);
        let event = watch.recv().await.expect("event");
        assert_eq!(event.key, page_key("newspapers", 1));
        assert_eq!(event.kind, CacheEventKind::Updated);
        assert!(watch.try_recv().is_none());
    }
}
