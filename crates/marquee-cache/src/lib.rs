//! Keyed entity cache with an optimistic mutation protocol.
//!
//! # Purpose
//! Single source of truth for data fetched from the console's REST API. UI
//! consumers subscribe to [`QueryKey`]s; mutations write their expected result
//! into the cache before the remote call resolves and are rolled back exactly
//! when it fails.
//!
//! # Design notes
//! - All state sits behind one `parking_lot::Mutex`. Reads, writes, snapshots
//!   and rollbacks are synchronous critical sections; only remote calls await.
//! - Mutations touching the same key run one at a time unless
//!   [`MutationOrdering::Concurrent`] is configured.
//! - Remote failures come back as [`MutationOutcome::RolledBack`]; protocol
//!   misuse comes back as [`CacheIntegrityError`].
//! - With the `telemetry` feature, mutation, fetch and invalidation counters
//!   are recorded through `metrics`.
#[macro_use]
mod macros;

mod cache;
mod config;
mod entry;
mod error;
mod fetch;
mod gate;
mod key;
mod mutation;
mod subscription;

pub use cache::EntityCache;
pub use config::{CacheConfig, DEFAULT_EVENT_CAPACITY, DEFAULT_STALE_TIME, MutationOrdering};
pub use entry::{CacheEntry, QueryStatus};
pub use error::{CacheIntegrityError, MutationError};
pub use key::{KeyError, KeySegment, QueryKey};
pub use mutation::{
    MutationBuilder, MutationContext, MutationId, MutationListener, MutationOutcome,
    MutationReport, Updater,
};
pub use subscription::{CacheEvent, CacheEventKind, PrefixWatch, Subscription};
