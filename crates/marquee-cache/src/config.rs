// Cache tuning knobs. Loading them from env/YAML lives in the client crate.
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_STALE_TIME: Duration = Duration::from_secs(30);
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// How mutations that declare the same key interleave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MutationOrdering {
    /// A mutation waits until every earlier mutation on any of its keys has
    /// settled before taking its snapshot.
    #[default]
    Serialized,
    /// Mutations overlap freely. A rollback may then restore another
    /// mutation's optimistic value instead of server state.
    Concurrent,
}

impl FromStr for MutationOrdering {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_ascii_lowercase().as_str() {
            "serialized" | "serial" => Ok(MutationOrdering::Serialized),
            "concurrent" => Ok(MutationOrdering::Concurrent),
            other => Err(format!("unknown mutation ordering: {other}")),
        }
    }
}

impl fmt::Display for MutationOrdering {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MutationOrdering::Serialized => f.write_str("serialized"),
            MutationOrdering::Concurrent => f.write_str("concurrent"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// How long a successful entry is served by `fetch` without a refetch.
    pub stale_time: Duration,
    pub mutation_ordering: MutationOrdering,
    /// Buffer size of the change-event channel behind `watch_prefix`.
    pub event_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            stale_time: DEFAULT_STALE_TIME,
            mutation_ordering: MutationOrdering::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}
