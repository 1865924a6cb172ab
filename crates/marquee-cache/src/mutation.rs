//! Optimistic mutation protocol.
//!
//! # Purpose
//! Applies a local change before the remote call resolves and reverts it
//! precisely if the call fails.
//!
//! # Protocol
//! 1. `begin_mutation` snapshots every key the caller declares, in one
//!    critical section. Nothing is registered unless the whole snapshot is
//!    taken.
//! 2. `apply_optimistic` / `apply_optimistic_batch` write the optimistic
//!    values. Writing an undeclared key is a [`CacheIntegrityError`].
//! 3. The remote call runs; this is the only suspension point.
//! 4. `commit_mutation` keeps the written values and invalidates related keys,
//!    or `rollback_mutation` restores the snapshot of every applied key.
//!
//! Settling consumes the [`MutationContext`], so settling twice does not
//! compile. A context dropped without settling deregisters itself and marks
//! its applied keys stale.
//!
//! [`MutationBuilder::run`] drives all four steps and, under
//! [`MutationOrdering::Serialized`], first waits for earlier mutations on the
//! same keys to settle.
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::CacheState;
use crate::{
    CacheEntry, CacheIntegrityError, EntityCache, MutationError, MutationOrdering, QueryKey,
};

/// Computes the optimistic value of one key from its current data.
pub type Updater<V> = Box<dyn FnOnce(Option<&V>) -> V + Send>;

// `None` leaves the key as it is.
type Patch<V> = Box<dyn FnOnce(Option<&V>) -> Option<V> + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MutationId(Uuid);

impl MutationId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for MutationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle for one in-flight mutation: the pre-mutation snapshot of every
/// declared key plus the keys written optimistically so far.
pub struct MutationContext<V: Clone> {
    id: MutationId,
    owner: Weak<Mutex<CacheState<V>>>,
    previous: HashMap<QueryKey, Option<CacheEntry<V>>>,
    applied: Vec<QueryKey>,
    settled: bool,
}

impl<V: Clone> MutationContext<V> {
    pub fn id(&self) -> MutationId {
        self.id
    }

    pub fn is_declared(&self, key: &QueryKey) -> bool {
        self.previous.contains_key(key)
    }

    pub fn applied_keys(&self) -> &[QueryKey] {
        &self.applied
    }

    /// Data of `key` when the mutation began. `None` for undeclared keys;
    /// `Some(None)` when the key held no data.
    pub fn previous_data(&self, key: &QueryKey) -> Option<Option<&V>> {
        self.previous
            .get(key)
            .map(|entry| entry.as_ref().and_then(|entry| entry.data()))
    }

    fn check_declared(&self, key: &QueryKey) -> Result<(), CacheIntegrityError> {
        if self.is_declared(key) {
            Ok(())
        } else {
            Err(CacheIntegrityError::UndeclaredKey {
                mutation: self.id,
                key: key.clone(),
            })
        }
    }

    fn record_applied(&mut self, key: &QueryKey) {
        if !self.applied.contains(key) {
            self.applied.push(key.clone());
        }
    }
}

impl<V: Clone> fmt::Debug for MutationContext<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationContext")
            .field("id", &self.id)
            .field("declared", &self.previous.len())
            .field("applied", &self.applied)
            .finish()
    }
}

impl<V: Clone> Drop for MutationContext<V> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let Some(owner) = self.owner.upgrade() else {
            return;
        };
        let mut state = owner.lock();
        state.in_flight.remove(&self.id);
        for key in &self.applied {
            state.mark_stale(key);
        }
        warn!(
            mutation = %self.id,
            applied = self.applied.len(),
            "mutation dropped before settling; applied keys marked stale"
        );
    }
}

impl<V: Clone + Send + Sync + 'static> EntityCache<V> {
    /// Snapshot every key in `keys` and register the mutation as in flight.
    pub fn begin_mutation(
        &self,
        keys: &[QueryKey],
    ) -> Result<MutationContext<V>, CacheIntegrityError> {
        if keys.is_empty() {
            return Err(CacheIntegrityError::EmptyDeclaration);
        }
        let mut seen = HashSet::with_capacity(keys.len());
        for key in keys {
            if !seen.insert(key) {
                return Err(CacheIntegrityError::DuplicateKey(key.clone()));
            }
        }

        let id = MutationId::new();
        let mut state = self.state.lock();
        // Built off to the side and registered only once complete.
        let mut previous = HashMap::with_capacity(keys.len());
        for (step, key) in keys.iter().enumerate() {
            state.snapshot_fault(step);
            previous.insert(key.clone(), state.entries.get(key).cloned());
        }
        state.in_flight.insert(id, keys.to_vec());
        let in_flight = state.in_flight.len();
        drop(state);

        t_gauge!("marquee_cache_mutations_in_flight").set(in_flight as f64);
        debug!(mutation = %id, keys = keys.len(), "mutation snapshot taken");
        Ok(MutationContext {
            id,
            owner: Arc::downgrade(&self.state),
            previous,
            applied: Vec::new(),
            settled: false,
        })
    }

    /// Write `updater(current)` under a declared key.
    pub fn apply_optimistic<F>(
        &self,
        ctx: &mut MutationContext<V>,
        key: &QueryKey,
        updater: F,
    ) -> Result<(), CacheIntegrityError>
    where
        F: FnOnce(Option<&V>) -> V,
    {
        self.check_owner(ctx)?;
        ctx.check_declared(key)?;
        let mut state = self.state.lock();
        let next = updater(state.entries.get(key).and_then(|entry| entry.data()));
        state.write(key.clone(), next);
        drop(state);
        ctx.record_applied(key);
        Ok(())
    }

    /// Apply several updates as one step: every key is checked and every value
    /// computed before the first write. Later updates to the same key see the
    /// earlier result.
    pub fn apply_optimistic_batch(
        &self,
        ctx: &mut MutationContext<V>,
        updates: Vec<(QueryKey, Updater<V>)>,
    ) -> Result<(), CacheIntegrityError> {
        let patches = updates
            .into_iter()
            .map(|(key, updater)| {
                let patch: Patch<V> = Box::new(move |current: Option<&V>| Some(updater(current)));
                (key, patch)
            })
            .collect();
        self.apply_patches(ctx, patches)
    }

    fn apply_patches(
        &self,
        ctx: &mut MutationContext<V>,
        patches: Vec<(QueryKey, Patch<V>)>,
    ) -> Result<(), CacheIntegrityError> {
        self.check_owner(ctx)?;
        for (key, _) in &patches {
            ctx.check_declared(key)?;
        }
        let mut state = self.state.lock();
        let mut staged: Vec<(QueryKey, V)> = Vec::with_capacity(patches.len());
        for (key, patch) in patches {
            let current = staged
                .iter()
                .rev()
                .find(|(staged_key, _)| *staged_key == key)
                .map(|(_, value)| value)
                .or_else(|| state.entries.get(&key).and_then(|entry| entry.data()));
            if let Some(next) = patch(current) {
                staged.push((key, next));
            }
        }
        for (key, value) in staged {
            ctx.record_applied(&key);
            state.write(key, value);
        }
        Ok(())
    }

    /// Keep the optimistic values and invalidate every key under `invalidate`.
    pub fn commit_mutation(
        &self,
        mut ctx: MutationContext<V>,
        invalidate: &[QueryKey],
    ) -> Result<(), CacheIntegrityError> {
        self.check_owner(&ctx)?;
        let mut state = self.state.lock();
        state.in_flight.remove(&ctx.id);
        ctx.settled = true;
        let in_flight = state.in_flight.len();
        drop(state);

        for filter in invalidate {
            self.invalidate(filter);
        }
        t_gauge!("marquee_cache_mutations_in_flight").set(in_flight as f64);
        debug!(mutation = %ctx.id, applied = ctx.applied.len(), "mutation committed");
        Ok(())
    }

    /// Restore the snapshot of every applied key. Keys that had no entry
    /// before the mutation are removed again.
    pub fn rollback_mutation(
        &self,
        mut ctx: MutationContext<V>,
    ) -> Result<(), CacheIntegrityError> {
        self.check_owner(&ctx)?;
        let mut state = self.state.lock();
        for key in &ctx.applied {
            match ctx.previous.get(key).cloned().flatten() {
                Some(previous) => state.restore(previous),
                None => {
                    state.discard(key, crate::CacheEventKind::RolledBack);
                }
            }
        }
        state.in_flight.remove(&ctx.id);
        ctx.settled = true;
        let in_flight = state.in_flight.len();
        drop(state);

        t_gauge!("marquee_cache_mutations_in_flight").set(in_flight as f64);
        debug!(mutation = %ctx.id, restored = ctx.applied.len(), "mutation rolled back");
        Ok(())
    }

    /// Start describing a mutation. `label` is what the user is told when it
    /// settles, e.g. "Approve ticket T1".
    pub fn mutation(&self, label: impl Into<String>) -> MutationBuilder<'_, V> {
        MutationBuilder {
            cache: self,
            label: label.into(),
            keys: Vec::new(),
            updates: Vec::new(),
            invalidate: Vec::new(),
        }
    }

    fn check_owner(&self, ctx: &MutationContext<V>) -> Result<(), CacheIntegrityError> {
        if std::ptr::eq(ctx.owner.as_ptr(), Arc::as_ptr(&self.state)) {
            Ok(())
        } else {
            Err(CacheIntegrityError::ForeignContext { mutation: ctx.id })
        }
    }
}

/// Result of a mutation whose remote call finished. Remote failures are
/// values here, not errors: the cache has already been rolled back.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome<R> {
    Committed(R),
    RolledBack(MutationError),
}

impl<R> MutationOutcome<R> {
    pub fn is_committed(&self) -> bool {
        matches!(self, MutationOutcome::Committed(_))
    }

    pub fn error(&self) -> Option<&MutationError> {
        match self {
            MutationOutcome::Committed(_) => None,
            MutationOutcome::RolledBack(error) => Some(error),
        }
    }

    pub fn into_result(self) -> Result<R, MutationError> {
        match self {
            MutationOutcome::Committed(value) => Ok(value),
            MutationOutcome::RolledBack(error) => Err(error),
        }
    }

    pub fn map<U, F: FnOnce(R) -> U>(self, f: F) -> MutationOutcome<U> {
        match self {
            MutationOutcome::Committed(value) => MutationOutcome::Committed(f(value)),
            MutationOutcome::RolledBack(error) => MutationOutcome::RolledBack(error),
        }
    }
}

/// What a [`MutationListener`] hears about each settled mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationReport {
    pub id: MutationId,
    pub label: String,
    pub keys: Vec<QueryKey>,
    pub error: Option<MutationError>,
}

impl MutationReport {
    pub fn committed(&self) -> bool {
        self.error.is_none()
    }
}

/// Hook for user-facing feedback (toasts, log lines) on every settled mutation.
pub trait MutationListener: Send + Sync {
    fn on_settled(&self, report: &MutationReport);
}

/// Declarative form of the protocol: declare keys, describe optimistic
/// writes, then [`run`](MutationBuilder::run) with the remote call.
///
/// ```
/// use marquee_cache::{EntityCache, MutationError, QueryKey};
///
/// # tokio::runtime::Runtime::new().expect("rt").block_on(async {
/// let cache: EntityCache<Vec<String>> = EntityCache::new();
/// let ops = QueryKey::new(["ops"]);
/// cache.set(ops.clone(), vec!["alice".to_string()]);
///
/// let outcome = cache
///     .mutation("Delete operator alice")
///     .optimistic(ops.clone(), |current| {
///         let mut next = current.cloned().unwrap_or_default();
///         next.retain(|name| name != "alice");
///         next
///     })
///     .run(|| async { Err::<(), _>(MutationError::network("connection reset")) })
///     .await
///     .expect("protocol");
///
/// assert!(!outcome.is_committed());
/// assert_eq!(cache.data(&ops), Some(vec!["alice".to_string()]));
/// # });
/// ```
pub struct MutationBuilder<'a, V: Clone> {
    cache: &'a EntityCache<V>,
    label: String,
    keys: Vec<QueryKey>,
    updates: Vec<(QueryKey, Patch<V>)>,
    invalidate: Vec<QueryKey>,
}

impl<'a, V: Clone + Send + Sync + 'static> MutationBuilder<'a, V> {
    /// Declare a key for the snapshot without writing to it.
    pub fn touch(mut self, key: QueryKey) -> Self {
        if !self.keys.contains(&key) {
            self.keys.push(key);
        }
        self
    }

    pub fn touch_all<I>(self, keys: I) -> Self
    where
        I: IntoIterator<Item = QueryKey>,
    {
        keys.into_iter().fold(self, |builder, key| builder.touch(key))
    }

    /// Declare `key` and write `updater(current)` to it before the remote call.
    pub fn optimistic<F>(mut self, key: QueryKey, updater: F) -> Self
    where
        F: FnOnce(Option<&V>) -> V + Send + 'static,
    {
        self = self.touch(key.clone());
        let patch: Patch<V> = Box::new(move |current: Option<&V>| Some(updater(current)));
        self.updates.push((key, patch));
        self
    }

    /// Declare `key` and rewrite its data with `updater` before the remote
    /// call. A key that holds no data by the time the mutation starts is left
    /// empty rather than filled with a made-up value.
    pub fn patch<F>(mut self, key: QueryKey, updater: F) -> Self
    where
        F: FnOnce(&V) -> V + Send + 'static,
    {
        self = self.touch(key.clone());
        let patch: Patch<V> = Box::new(move |current: Option<&V>| current.map(updater));
        self.updates.push((key, patch));
        self
    }

    /// Mark every key under `filter` stale once the remote call succeeds.
    pub fn invalidate_on_success(mut self, filter: QueryKey) -> Self {
        self.invalidate.push(filter);
        self
    }

    pub async fn run<R, F, Fut>(self, remote: F) -> Result<MutationOutcome<R>, CacheIntegrityError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<R, MutationError>>,
    {
        self.run_confirmed(remote, |_| Ok(Vec::new())).await
    }

    /// Like [`run`](Self::run), with `confirm` turning the remote response into
    /// server-confirmed writes. `confirm` may reject the response with
    /// [`MutationError::Conflict`], which rolls the mutation back.
    pub async fn run_confirmed<R, F, Fut, C>(
        self,
        remote: F,
        confirm: C,
    ) -> Result<MutationOutcome<R>, CacheIntegrityError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<R, MutationError>>,
        C: FnOnce(&R) -> Result<Vec<(QueryKey, V)>, MutationError>,
    {
        let MutationBuilder {
            cache,
            label,
            keys,
            updates,
            invalidate,
        } = self;

        let permit = match cache.config.mutation_ordering {
            MutationOrdering::Serialized if !keys.is_empty() => {
                Some(cache.gate.acquire(&keys).await)
            }
            _ => None,
        };

        // A mutation without declared keys is pessimistic: nothing to snapshot.
        let mut ctx = if keys.is_empty() {
            None
        } else {
            Some(cache.begin_mutation(&keys)?)
        };
        if let Some(ctx) = ctx.as_mut() {
            cache.apply_patches(ctx, updates)?;
        }
        let id = ctx.as_ref().map_or_else(MutationId::new, |ctx| ctx.id());

        let result = match remote().await {
            Ok(value) => confirm(&value).map(|writes| (value, writes)),
            Err(error) => Err(error),
        };

        let outcome = match result {
            Ok((value, writes)) => {
                for (key, data) in writes {
                    cache.set(key, data);
                }
                match ctx {
                    Some(ctx) => cache.commit_mutation(ctx, &invalidate)?,
                    None => {
                        for filter in &invalidate {
                            cache.invalidate(filter);
                        }
                    }
                }
                t_counter!("marquee_cache_mutations_total", "outcome" => "committed").increment(1);
                info!(mutation = %id, label = %label, "mutation committed");
                MutationOutcome::Committed(value)
            }
            Err(error) => {
                if let Some(ctx) = ctx {
                    cache.rollback_mutation(ctx)?;
                }
                t_counter!("marquee_cache_mutations_total", "outcome" => "rolled_back").increment(1);
                warn!(mutation = %id, label = %label, error = %error, "mutation rolled back");
                MutationOutcome::RolledBack(error)
            }
        };
        drop(permit);

        cache.report(&MutationReport {
            id,
            label,
            keys,
            error: outcome.error().cloned(),
        });
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CacheConfig, QueryStatus};
    use std::panic::{AssertUnwindSafe, catch_unwind};
    use tokio::sync::oneshot;

    fn ops() -> QueryKey {
        QueryKey::new(["ops"])
    }

    fn operator(id: &str) -> QueryKey {
        QueryKey::new(["ops", id])
    }

    fn updater(f: impl FnOnce(Option<&u32>) -> u32 + Send + 'static) -> Updater<u32> {
        Box::new(f)
    }

    #[derive(Default)]
    struct Recorder {
        reports: Mutex<Vec<MutationReport>>,
    }

    impl MutationListener for Recorder {
        fn on_settled(&self, report: &MutationReport) {
            self.reports.lock().push(report.clone());
        }
    }

    #[test]
    fn rollback_restores_exact_snapshot() {
        let cache: EntityCache<Vec<&str>> = EntityCache::new();
        cache.set(ops(), vec!["alice", "bob"]);
        cache.invalidate(&ops());
        let before = cache.get(&ops()).expect("entry");

        let mut ctx = cache
            .begin_mutation(&[ops(), operator("1"), operator("2")])
            .expect("begin");
        cache
            .apply_optimistic(&mut ctx, &ops(), |current| {
                let mut next = current.cloned().unwrap_or_default();
                next.retain(|name| *name != "alice");
                next
            })
            .expect("apply");
        cache
            .apply_optimistic(&mut ctx, &operator("1"), |_| vec!["carol"])
            .expect("apply");
        assert_eq!(ctx.applied_keys(), &[ops(), operator("1")]);
        assert_eq!(ctx.previous_data(&operator("1")), Some(None));
        assert_eq!(ctx.previous_data(&QueryKey::new(["users"])), None);

        // Written outside the mutation; not applied, so rollback leaves it.
        cache.set(operator("2"), vec!["dave"]);

        cache.rollback_mutation(ctx).expect("rollback");
        let after = cache.get(&ops()).expect("entry");
        assert_eq!(after.data(), before.data());
        assert_eq!(after.status(), before.status());
        assert_eq!(after.is_stale(), before.is_stale());
        assert!(after.version() > before.version());
        assert!(cache.get(&operator("1")).is_none());
        assert_eq!(cache.data(&operator("2")), Some(vec!["dave"]));
        assert_eq!(cache.in_flight(), 0);
    }

    #[test]
    fn optimistic_value_is_visible_before_settling() {
        let cache: EntityCache<u32> = EntityCache::new();
        let key = QueryKey::new(["users", "U1"]);
        cache.set(key.clone(), 100);
        let mut ctx = cache.begin_mutation(&[key.clone()]).expect("begin");
        assert_eq!(cache.in_flight(), 1);
        cache
            .apply_optimistic(&mut ctx, &key, |current| current.copied().unwrap_or(0) + 50)
            .expect("apply");
        assert_eq!(cache.data(&key), Some(150));
        assert_eq!(cache.get(&key).expect("entry").status(), QueryStatus::Success);
        cache
            .commit_mutation(ctx, &[QueryKey::new(["transactions"])])
            .expect("commit");
        assert_eq!(cache.data(&key), Some(150));
        assert_eq!(cache.in_flight(), 0);
    }

    #[test]
    fn fault_during_snapshot_registers_nothing() {
        let cache: EntityCache<u32> = EntityCache::new();
        let first = QueryKey::new(["tickets", "T1"]);
        let second = QueryKey::new(["tickets", "T2"]);
        cache.set(first.clone(), 1);
        cache.set(second.clone(), 2);
        cache.state.lock().snapshot_fault_at = Some(1);

        let keys = [first.clone(), second.clone()];
        let result = catch_unwind(AssertUnwindSafe(|| cache.begin_mutation(&keys)));
        assert!(result.is_err());
        assert_eq!(cache.in_flight(), 0);
        assert_eq!(cache.data(&first), Some(1));
        assert_eq!(cache.data(&second), Some(2));

        // The lock is not poisoned and a clean attempt takes both keys.
        cache.state.lock().snapshot_fault_at = None;
        let ctx = cache.begin_mutation(&keys).expect("begin");
        assert!(ctx.is_declared(&first) && ctx.is_declared(&second));
        cache.rollback_mutation(ctx).expect("rollback");
    }

    #[test]
    fn protocol_misuse_is_an_integrity_error() {
        let cache: EntityCache<u32> = EntityCache::new();
        let key = QueryKey::new(["events", "E1"]);

        assert_eq!(
            cache.begin_mutation(&[]).expect_err("empty"),
            CacheIntegrityError::EmptyDeclaration
        );
        assert_eq!(
            cache
                .begin_mutation(&[key.clone(), key.clone()])
                .expect_err("duplicate"),
            CacheIntegrityError::DuplicateKey(key.clone())
        );
        assert_eq!(cache.in_flight(), 0);

        let mut ctx = cache.begin_mutation(&[key.clone()]).expect("begin");
        let stray = QueryKey::new(["events", "E2"]);
        let err = cache
            .apply_optimistic(&mut ctx, &stray, |_| 1)
            .expect_err("undeclared");
        assert!(matches!(err, CacheIntegrityError::UndeclaredKey { key, .. } if key == stray));
        assert!(cache.get(&stray).is_none());

        let other: EntityCache<u32> = EntityCache::new();
        let err = other.commit_mutation(ctx, &[]).expect_err("foreign");
        assert!(matches!(err, CacheIntegrityError::ForeignContext { .. }));
        // The rejected context was dropped unsettled and deregistered itself.
        assert_eq!(cache.in_flight(), 0);
    }

    #[test]
    fn batch_is_validated_before_any_write() {
        let cache: EntityCache<u32> = EntityCache::new();
        let first = QueryKey::new(["users", "U1"]);
        let second = QueryKey::new(["users", "U2"]);
        cache.set(first.clone(), 1);
        let mut ctx = cache.begin_mutation(&[first.clone()]).expect("begin");

        let err = cache
            .apply_optimistic_batch(
                &mut ctx,
                vec![
                    (first.clone(), updater(|_| 10)),
                    (second.clone(), updater(|_| 20)),
                ],
            )
            .expect_err("undeclared");
        assert!(matches!(err, CacheIntegrityError::UndeclaredKey { .. }));
        assert_eq!(cache.data(&first), Some(1));
        assert!(ctx.applied_keys().is_empty());

        cache
            .apply_optimistic_batch(
                &mut ctx,
                vec![
                    (first.clone(), updater(|current| current.copied().unwrap_or(0) + 1)),
                    (first.clone(), updater(|current| current.copied().unwrap_or(0) * 10)),
                ],
            )
            .expect("batch");
        assert_eq!(cache.data(&first), Some(20));
        assert_eq!(ctx.applied_keys(), &[first.clone()]);
        cache.rollback_mutation(ctx).expect("rollback");
        assert_eq!(cache.data(&first), Some(1));
    }

    #[tokio::test]
    async fn patch_leaves_emptied_keys_empty() {
        let cache: Arc<EntityCache<u32>> = Arc::new(EntityCache::new());
        let list = QueryKey::new(["events", "E1", "tickets"]);
        let single = QueryKey::new(["tickets", "T1"]);
        cache.set(list.clone(), 1);
        cache.set(single.clone(), 1);

        // An earlier mutation holds the list while the session is cleared.
        let (release, pending) = oneshot::channel::<()>();
        let first = tokio::spawn({
            let cache = Arc::clone(&cache);
            let list = list.clone();
            async move {
                cache
                    .mutation("first")
                    .optimistic(list, |current| current.copied().unwrap_or(0) + 1)
                    .run(|| async move {
                        pending.await.map_err(|_| MutationError::network("dropped"))
                    })
                    .await
                    .expect("protocol")
            }
        });
        while cache.in_flight() != 1 {
            tokio::task::yield_now().await;
        }
        let second = cache
            .mutation("second")
            .patch(list.clone(), |count| count + 10)
            .patch(single.clone(), |count| count + 10)
            .run(|| async { Ok::<_, MutationError>(()) });
        let clear = async {
            cache.clear();
            release.send(()).expect("release");
        };
        let (outcome, ()) = tokio::join!(second, clear);

        assert!(outcome.expect("protocol").is_committed());
        assert!(first.await.expect("task").is_committed());
        assert!(cache.get(&list).is_none());
        assert!(cache.get(&single).is_none());
    }

    #[test]
    fn dropped_context_marks_applied_keys_stale() {
        let cache: EntityCache<u32> = EntityCache::new();
        let key = QueryKey::new(["events", "E1", "tickets"]);
        cache.set(key.clone(), 3);
        {
            let mut ctx = cache.begin_mutation(&[key.clone()]).expect("begin");
            cache.apply_optimistic(&mut ctx, &key, |_| 4).expect("apply");
        }
        assert_eq!(cache.in_flight(), 0);
        let entry = cache.get(&key).expect("entry");
        assert_eq!(entry.data(), Some(&4));
        assert!(entry.is_stale());
    }

    #[tokio::test]
    async fn builder_commits_with_server_reconciliation() {
        let recorder = Arc::new(Recorder::default());
        let cache: EntityCache<i64> =
            EntityCache::new().with_listener(Arc::clone(&recorder) as Arc<dyn MutationListener>);
        let balance = QueryKey::new(["users", "U1"]);
        let history = QueryKey::new(["transactions", "U1"]);
        cache.set(balance.clone(), 100);
        cache.set(history.clone(), 0);

        let outcome = cache
            .mutation("Top up U1")
            .optimistic(balance.clone(), |current| current.copied().unwrap_or(0) + 50)
            .invalidate_on_success(QueryKey::new(["transactions"]))
            .run_confirmed(
                || async { Ok::<i64, MutationError>(151) },
                |server| Ok(vec![(balance.clone(), *server)]),
            )
            .await
            .expect("protocol");

        assert_eq!(outcome, MutationOutcome::Committed(151));
        assert_eq!(cache.data(&balance), Some(151));
        assert!(cache.get(&history).expect("history").is_stale());
        let reports = recorder.reports.lock();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].committed());
        assert_eq!(reports[0].label, "Top up U1");
        assert_eq!(reports[0].keys, vec![balance.clone()]);
    }

    #[tokio::test]
    async fn conflicting_confirmation_rolls_back() {
        let cache: EntityCache<i64> = EntityCache::new();
        let balance = QueryKey::new(["users", "U1"]);
        cache.set(balance.clone(), 100);

        let outcome = cache
            .mutation("Top up U1")
            .optimistic(balance.clone(), |current| current.copied().unwrap_or(0) + 50)
            .run_confirmed(
                || async { Ok::<i64, MutationError>(-1) },
                |_| Err(MutationError::conflict("response has no user id")),
            )
            .await
            .expect("protocol");

        assert_eq!(
            outcome.error(),
            Some(&MutationError::conflict("response has no user id"))
        );
        assert_eq!(cache.data(&balance), Some(100));
    }

    #[tokio::test]
    async fn pessimistic_mutation_only_invalidates() {
        let recorder = Arc::new(Recorder::default());
        let cache: EntityCache<u32> =
            EntityCache::new().with_listener(Arc::clone(&recorder) as Arc<dyn MutationListener>);
        let notifications = QueryKey::new(["notifications"]);
        cache.set(notifications.clone(), 1);

        let outcome = cache
            .mutation("Send notification")
            .invalidate_on_success(notifications.clone())
            .run(|| async { Ok::<_, MutationError>("N1") })
            .await
            .expect("protocol");
        assert_eq!(outcome.into_result(), Ok("N1"));
        assert!(cache.get(&notifications).expect("entry").is_stale());
        assert_eq!(cache.in_flight(), 0);
        assert!(recorder.reports.lock()[0].keys.is_empty());
    }

    #[tokio::test]
    async fn serialized_mutation_waits_for_the_key() {
        let cache = Arc::new(EntityCache::<&'static str>::with_config(CacheConfig::default()));
        let ticket = QueryKey::new(["tickets", "T1"]);
        cache.set(ticket.clone(), "PENDING");

        let (first_tx, first_rx) = oneshot::channel::<Result<(), MutationError>>();
        let first = {
            let cache = Arc::clone(&cache);
            let ticket = ticket.clone();
            tokio::spawn(async move {
                cache
                    .mutation("Approve T1")
                    .optimistic(ticket, |_| "APPROVED")
                    .run(|| async move { first_rx.await.unwrap_or_else(|_| Err(MutationError::network("dropped"))) })
                    .await
            })
        };
        while cache.in_flight() == 0 {
            tokio::task::yield_now().await;
        }

        let second = {
            let cache = Arc::clone(&cache);
            let ticket = ticket.clone();
            tokio::spawn(async move {
                cache
                    .mutation("Decline T1")
                    .optimistic(ticket, |_| "DECLINED")
                    .run(|| async { Ok::<_, MutationError>(()) })
                    .await
            })
        };
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        // The second mutation has not snapshotted the optimistic value.
        assert_eq!(cache.in_flight(), 1);
        assert_eq!(cache.data(&ticket), Some("APPROVED"));

        first_tx
            .send(Err(MutationError::network("503")))
            .expect("send");
        let first = first.await.expect("join").expect("protocol");
        assert!(!first.is_committed());
        let second = second.await.expect("join").expect("protocol");
        assert!(second.is_committed());
        assert_eq!(cache.data(&ticket), Some("DECLINED"));
    }
}
