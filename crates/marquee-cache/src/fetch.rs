// Read-through fetching with stale-time and mutation awareness.
use std::fmt::Display;
use std::future::Future;
use tracing::{debug, warn};

use crate::{EntityCache, QueryKey};

impl<V: Clone + Send + Sync + 'static> EntityCache<V> {
    /// Serve `key` from the cache when fresh, otherwise run `fetcher` and
    /// store its result.
    ///
    /// A result that arrives after the entry was written, or while a mutation
    /// holds the key, is not stored: the optimistic value wins and the entry
    /// stays stale so the next read asks again. A failed fetch keeps any
    /// previous data and records the error on the entry.
    pub async fn fetch<F, Fut, E>(&self, key: &QueryKey, fetcher: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
        E: Display,
    {
        let started = {
            let mut state = self.state.lock();
            if let Some(entry) = state.entries.get(key)
                && entry.is_fresh(self.config.stale_time)
                && let Some(data) = entry.data()
            {
                t_counter!("marquee_cache_fetches_total", "outcome" => "hit").increment(1);
                return Ok(data.clone());
            }
            state.begin_fetch(key)
        };
        debug!(key = %key, "fetching");

        match fetcher().await {
            Ok(data) => {
                let mut state = self.state.lock();
                if state.is_held(key) || state.version_of(key) != Some(started) {
                    let cached = state.settle_overtaken_fetch(key);
                    drop(state);
                    t_counter!("marquee_cache_fetches_total", "outcome" => "overtaken")
                        .increment(1);
                    debug!(key = %key, "fetch overtaken by a newer write");
                    return Ok(cached.unwrap_or(data));
                }
                state.write(key.clone(), data.clone());
                drop(state);
                t_counter!("marquee_cache_fetches_total", "outcome" => "success").increment(1);
                Ok(data)
            }
            Err(error) => {
                self.state
                    .lock()
                    .fail_fetch(key, started, error.to_string());
                t_counter!("marquee_cache_fetches_total", "outcome" => "error").increment(1);
                warn!(key = %key, error = %error, "fetch failed");
                Err(error)
            }
        }
    }

    /// Mark exactly `key` stale and fetch it again.
    pub async fn refetch<F, Fut, E>(&self, key: &QueryKey, fetcher: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
        E: Display,
    {
        self.state.lock().mark_stale(key);
        self.fetch(key, fetcher).await
    }
}
