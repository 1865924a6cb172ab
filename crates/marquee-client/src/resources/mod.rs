//! Typed console operations on top of the entity cache.
//!
//! # Purpose
//! [`Console`] owns the session's [`EntityCache`] and the remote. Reads go
//! through the cache with stale-time semantics; writes go through the
//! optimistic mutation protocol so every cached view of the edited entity
//! changes at once and reverts at once.
//!
//! # Cached values
//! The cache stores the `data` part of each response as JSON. List views hold
//! `{items, total}` pages and single views hold one entity; typed decoding
//! happens on the way out.
use marquee_cache::{EntityCache, KeySegment, MutationError, QueryKey};
use marquee_common::{Entity, EventRevenue, ListParams, Page, TicketRequest, Transaction};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;

use crate::error::ClientResult;
use crate::notify::{Notifier, NotifyingListener};
use crate::remote::{RemoteRequest, RemoteSource, decode, unwrap_data};
use crate::{ClientConfig, keys};

mod collection;
mod notifications;
mod tickets;
mod wallet;

pub use collection::Collection;
pub use notifications::NewNotification;

pub struct Console {
    cache: Arc<EntityCache<Value>>,
    remote: Arc<dyn RemoteSource>,
    page_size: u32,
}

impl Console {
    pub fn new(
        config: &ClientConfig,
        remote: Arc<dyn RemoteSource>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let cache = EntityCache::with_config(config.cache_config())
            .with_listener(Arc::new(NotifyingListener::new(notifier)));
        Self {
            cache: Arc::new(cache),
            remote,
            page_size: config.page_size,
        }
    }

    pub fn cache(&self) -> &Arc<EntityCache<Value>> {
        &self.cache
    }

    pub fn remote(&self) -> &Arc<dyn RemoteSource> {
        &self.remote
    }

    /// Paging parameters for `page` with the configured page size.
    pub fn params(&self, page: u32) -> ListParams {
        ListParams::new(page, self.page_size)
    }

    pub fn collection<T: Entity>(&self) -> Collection<'_, T> {
        Collection::new(self)
    }

    /// Read-through fetch of `key`: cached data while fresh, else `request`.
    pub async fn fetch_json(&self, key: &QueryKey, request: RemoteRequest) -> ClientResult<Value> {
        let remote = Arc::clone(&self.remote);
        let data = self
            .cache
            .fetch(key, || async move { remote.call(request).await.and_then(unwrap_data) })
            .await?;
        Ok(data)
    }

    pub async fn list<T: Entity>(&self, params: &ListParams) -> ClientResult<Page<T>> {
        let request = RemoteRequest::get(T::RESOURCE).with_query(params.to_query());
        self.fetch_typed(&keys::page::<T>(params), request).await
    }

    pub async fn get<T: Entity>(&self, id: &str) -> ClientResult<T> {
        let request = RemoteRequest::get(format!("{}/{id}", T::RESOURCE));
        self.fetch_typed(&keys::entity::<T>(id), request).await
    }

    pub async fn event_tickets(&self, event_id: &str) -> ClientResult<Page<TicketRequest>> {
        let request = RemoteRequest::get(format!("events/{event_id}/tickets"));
        self.fetch_typed(&keys::event_tickets(event_id), request).await
    }

    pub async fn event_revenue(&self, event_id: &str) -> ClientResult<EventRevenue> {
        let request = RemoteRequest::get(format!("events/{event_id}/revenue"));
        self.fetch_typed(&keys::event_revenue(event_id), request).await
    }

    pub async fn transactions(&self, user_id: &str) -> ClientResult<Page<Transaction>> {
        let request = RemoteRequest::get(format!("users/{user_id}/transactions"));
        self.fetch_typed(&keys::transactions(user_id), request).await
    }

    async fn fetch_typed<T: DeserializeOwned>(
        &self,
        key: &QueryKey,
        request: RemoteRequest,
    ) -> ClientResult<T> {
        let data = self.fetch_json(key, request).await?;
        Ok(decode(data)?)
    }

    /// Cached list pages of `T` that hold data. These are the views a
    /// mutation on `T` rewrites.
    pub(crate) fn cached_pages<T: Entity>(&self) -> Vec<QueryKey> {
        self.cached(
            self.cache
                .keys_matching(&keys::collection::<T>())
                .into_iter()
                .filter(|key| {
                    key.len() == 2 && matches!(key.segments().get(1), Some(KeySegment::Map(_)))
                }),
        )
    }

    /// `key` alone when it holds data, else nothing.
    pub(crate) fn cached_key(&self, key: QueryKey) -> Vec<QueryKey> {
        self.cached(std::iter::once(key))
    }

    fn cached(&self, keys: impl Iterator<Item = QueryKey>) -> Vec<QueryKey> {
        keys.filter(|key| {
            self.cache
                .get(key)
                .is_some_and(|entry| entry.data().is_some())
        })
        .collect()
    }
}

/// Rewrite a cached `{items, total}` page of `T`. A value that does not decode
/// as such a page is left as it is.
pub(crate) fn rewrite_page<T: Entity>(current: &Value, f: impl FnOnce(&mut Page<T>)) -> Value {
    let Ok(mut page) = serde_json::from_value::<Page<T>>(current.clone()) else {
        return current.clone();
    };
    f(&mut page);
    serde_json::to_value(&page).unwrap_or_else(|_| current.clone())
}

/// Rewrite a cached single entity, leaving undecodable values as they are.
pub(crate) fn rewrite_entity<T: Entity>(current: &Value, f: impl FnOnce(&mut T)) -> Value {
    let Ok(mut entity) = serde_json::from_value::<T>(current.clone()) else {
        return current.clone();
    };
    f(&mut entity);
    serde_json::to_value(&entity).unwrap_or_else(|_| current.clone())
}

/// Run `request` and decode the entity in its `data` field. An undecodable
/// body is a conflict; a failed call is a network error.
pub(crate) async fn call_entity<T: Entity>(
    remote: Arc<dyn RemoteSource>,
    request: RemoteRequest,
) -> Result<T, MutationError> {
    Ok(remote
        .call(request)
        .await
        .and_then(unwrap_data)
        .and_then(decode::<T>)?)
}

/// The server must answer with the entity that was addressed.
pub(crate) fn expect_id<T: Entity>(entity: &T, id: &str) -> Result<(), MutationError> {
    if entity.id() == id {
        Ok(())
    } else {
        Err(MutationError::conflict(format!(
            "expected {}/{id}, server returned {}",
            T::RESOURCE,
            entity.id()
        )))
    }
}
