//! Cache entries and their query status.
use std::fmt;
use std::time::{Duration, Instant};

use crate::QueryKey;

/// Fetch state of one entry: `Idle -> Loading -> {Success, Error}`.
///
/// `Success -> Loading` on refetch, `Success -> Success` on an optimistic
/// overwrite and `Error -> Loading` on retry. No state is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryStatus {
    Idle,
    Loading,
    Success,
    Error,
}

impl QueryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryStatus::Idle => "idle",
            QueryStatus::Loading => "loading",
            QueryStatus::Success => "success",
            QueryStatus::Error => "error",
        }
    }
}

impl fmt::Display for QueryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only snapshot of one cached result set.
///
/// The cache owns the live entry; `get` and subscriptions hand out clones.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<V> {
    pub(crate) key: QueryKey,
    pub(crate) data: Option<V>,
    pub(crate) status: QueryStatus,
    pub(crate) last_updated: Option<Instant>,
    pub(crate) stale: bool,
    pub(crate) error: Option<String>,
    // Bumped on every data write; lets an in-flight fetch detect it was overtaken.
    pub(crate) version: u64,
}

impl<V> CacheEntry<V> {
    pub(crate) fn idle(key: QueryKey) -> Self {
        Self {
            key,
            data: None,
            status: QueryStatus::Idle,
            last_updated: None,
            stale: false,
            error: None,
            version: 0,
        }
    }

    pub(crate) fn write(&mut self, data: V) {
        self.data = Some(data);
        self.status = QueryStatus::Success;
        self.last_updated = Some(Instant::now());
        self.stale = false;
        self.error = None;
        self.version += 1;
    }

    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn data(&self) -> Option<&V> {
        self.data.as_ref()
    }

    pub fn into_data(self) -> Option<V> {
        self.data
    }

    pub fn status(&self) -> QueryStatus {
        self.status
    }

    pub fn last_updated(&self) -> Option<Instant> {
        self.last_updated
    }

    /// Marked by `invalidate`; the next read through `fetch` goes to the remote.
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Whether `fetch` may serve this entry without calling the remote.
    pub fn is_fresh(&self, stale_time: Duration) -> bool {
        if self.stale || self.status != QueryStatus::Success || self.data.is_none() {
            return false;
        }
        self.last_updated
            .is_some_and(|updated| updated.elapsed() < stale_time)
    }
}
