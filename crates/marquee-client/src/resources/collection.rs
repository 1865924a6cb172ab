// Create, update and delete for any REST collection.
use marquee_cache::{MutationError, MutationOutcome};
use marquee_common::{Entity, ListParams, Page};
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::Arc;

use super::{Console, call_entity, expect_id, rewrite_page};
use crate::error::ClientResult;
use crate::keys;
use crate::remote::RemoteRequest;

/// Operations on the collection of `T` (newspapers, ops, super users, ...).
pub struct Collection<'a, T> {
    console: &'a Console,
    _entity: PhantomData<fn() -> T>,
}

impl<'a, T: Entity> Collection<'a, T> {
    pub(crate) fn new(console: &'a Console) -> Self {
        Self {
            console,
            _entity: PhantomData,
        }
    }

    pub async fn list(&self, params: &ListParams) -> ClientResult<Page<T>> {
        self.console.list::<T>(params).await
    }

    pub async fn get(&self, id: &str) -> ClientResult<T> {
        self.console.get::<T>(id).await
    }

    /// Pessimistic create: nothing is written until the server answers, then
    /// every view of the collection is invalidated.
    pub async fn create<B: Serialize>(&self, body: &B) -> ClientResult<MutationOutcome<T>> {
        let body = serde_json::to_value(body)?;
        let remote = Arc::clone(self.console.remote());
        let outcome = self
            .console
            .cache()
            .mutation(format!("Create {}", T::RESOURCE))
            .invalidate_on_success(keys::collection::<T>())
            .run(|| call_entity::<T>(remote, RemoteRequest::post(T::RESOURCE, body)))
            .await?;
        Ok(outcome)
    }

    /// Optimistically replace `entity` in every cached page and its own view,
    /// then store what the server returns.
    pub async fn update(&self, entity: T) -> ClientResult<MutationOutcome<T>> {
        let id = entity.id().to_string();
        let body = serde_json::to_value(&entity)?;
        let pages = self.console.cached_pages::<T>();
        let single = keys::entity::<T>(&id);
        let cache = self.console.cache();

        let mut builder = cache.mutation(format!("Update {} {id}", T::RESOURCE));
        for page in &pages {
            let replacement = entity.clone();
            builder = builder.patch(page.clone(), move |current| {
                rewrite_page::<T>(current, |page| {
                    page.replace(replacement);
                })
            });
        }
        let optimistic = body.clone();
        builder = builder.optimistic(single.clone(), move |_| optimistic);

        let remote = Arc::clone(self.console.remote());
        let path = format!("{}/{id}", T::RESOURCE);
        let outcome = builder
            .invalidate_on_success(keys::collection::<T>())
            .run_confirmed(
                || call_entity::<T>(remote, RemoteRequest::put(path, body)),
                |server: &T| {
                    expect_id(server, &id)?;
                    let confirmed = serde_json::to_value(server)
                        .map_err(|err| MutationError::conflict(err.to_string()))?;
                    let mut writes: Vec<_> = pages
                        .iter()
                        .filter_map(|page| {
                            let current = cache.data(page)?;
                            let rewritten = rewrite_page::<T>(&current, |items| {
                                items.replace(server.clone());
                            });
                            Some((page.clone(), rewritten))
                        })
                        .collect();
                    writes.push((single.clone(), confirmed));
                    Ok(writes)
                },
            )
            .await?;
        Ok(outcome)
    }

    /// Optimistically drop `id` from every cached page, keeping totals in
    /// step. Its own view is removed once the server confirms.
    pub async fn delete(&self, id: &str) -> ClientResult<MutationOutcome<()>> {
        let cache = self.console.cache();
        let mut builder = cache.mutation(format!("Delete {} {id}", T::RESOURCE));
        for page in self.console.cached_pages::<T>() {
            let id = id.to_string();
            builder = builder.patch(page, move |current| {
                rewrite_page::<T>(current, |page| {
                    page.remove(&id);
                })
            });
        }

        let remote = Arc::clone(self.console.remote());
        let path = format!("{}/{id}", T::RESOURCE);
        let outcome = builder
            .invalidate_on_success(keys::collection::<T>())
            .run(|| async move {
                remote
                    .call(RemoteRequest::delete(path))
                    .await
                    .map(|_| ())
                    .map_err(MutationError::from)
            })
            .await?;
        if outcome.is_committed() {
            cache.remove(&keys::entity::<T>(id));
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::TracingNotifier;
    use crate::remote::{InMemoryRemote, Method, RemoteError};
    use crate::ClientConfig;
    use marquee_common::Newspaper;
    use serde_json::json;

    fn newspaper(id: &str, title: &str) -> Newspaper {
        Newspaper {
            id: id.to_string(),
            title: title.to_string(),
            body: "body".to_string(),
            image_url: None,
            published_at: None,
        }
    }

    async fn seeded() -> (InMemoryRemote, Console) {
        let remote = InMemoryRemote::new();
        for idx in 1..=3 {
            remote
                .insert(&newspaper(&idx.to_string(), &format!("Issue {idx}")))
                .await
                .expect("insert");
        }
        let config = ClientConfig {
            page_size: 2,
            ..ClientConfig::default()
        };
        let console = Console::new(&config, Arc::new(remote.clone()), Arc::new(TracingNotifier));
        (remote, console)
    }

    #[tokio::test]
    async fn update_rewrites_every_cached_view() {
        let (remote, console) = seeded().await;
        let newspapers = console.collection::<Newspaper>();
        newspapers.list(&console.params(1)).await.expect("page 1");
        newspapers.list(&console.params(2)).await.expect("page 2");
        newspapers.get("1").await.expect("single");

        let release = remote.hold_next();
        let update = newspapers.update(newspaper("1", "Gala night"));
        let check = async {
            tokio::task::yield_now().await;
            let page = console
                .cache()
                .data(&keys::page::<Newspaper>(&console.params(1)))
                .expect("page");
            assert_eq!(page["items"][0]["title"], json!("Gala night"));
            let single = console
                .cache()
                .data(&keys::entity::<Newspaper>("1"))
                .expect("single");
            assert_eq!(single["title"], json!("Gala night"));
            // The second page does not hold the item and is unchanged.
            let other = console
                .cache()
                .data(&keys::page::<Newspaper>(&console.params(2)))
                .expect("page");
            assert_eq!(other["items"][0]["title"], json!("Issue 3"));
            release.send(()).expect("release");
        };
        let (outcome, ()) = tokio::join!(update, check);
        let outcome = outcome.expect("protocol");
        assert_eq!(outcome.into_result().expect("committed").title, "Gala night");
        assert!(
            console
                .cache()
                .get(&keys::page::<Newspaper>(&console.params(1)))
                .expect("page")
                .is_stale()
        );
    }

    #[tokio::test]
    async fn failed_update_restores_views() {
        let (remote, console) = seeded().await;
        let newspapers = console.collection::<Newspaper>();
        let before = newspapers.list(&console.params(1)).await.expect("page");
        remote.fail_next(Some(Method::Put), "newspapers/1", RemoteError::status(500, "boom"));

        let outcome = newspapers
            .update(newspaper("1", "Gala night"))
            .await
            .expect("protocol");
        assert!(!outcome.is_committed());
        assert_eq!(newspapers.list(&console.params(1)).await.expect("page"), before);
        // The single view did not exist before and is gone again.
        assert!(console.cache().get(&keys::entity::<Newspaper>("1")).is_none());
    }

    #[tokio::test]
    async fn delete_decrements_total_and_drops_single_view() {
        let (remote, console) = seeded().await;
        let newspapers = console.collection::<Newspaper>();
        newspapers.list(&console.params(1)).await.expect("page");
        newspapers.get("2").await.expect("single");

        let outcome = newspapers.delete("2").await.expect("protocol");
        assert!(outcome.is_committed());
        let page = console
            .cache()
            .data(&keys::page::<Newspaper>(&console.params(1)))
            .expect("page");
        assert_eq!(page["total"], json!(2));
        assert_eq!(page["items"].as_array().map(Vec::len), Some(1));
        assert!(console.cache().get(&keys::entity::<Newspaper>("2")).is_none());
        assert_eq!(remote.all::<Newspaper>().await.len(), 2);
    }

    #[tokio::test]
    async fn create_invalidates_collection() {
        let (remote, console) = seeded().await;
        let newspapers = console.collection::<Newspaper>();
        newspapers.list(&console.params(1)).await.expect("page");

        let outcome = newspapers
            .create(&json!({"title": "Line-up", "body": "Announced"}))
            .await
            .expect("protocol");
        let created = outcome.into_result().expect("committed");
        assert_eq!(created.title, "Line-up");
        assert!(
            console
                .cache()
                .get(&keys::page::<Newspaper>(&console.params(1)))
                .expect("page")
                .is_stale()
        );
        let page = newspapers.list(&console.params(1)).await.expect("refetch");
        assert_eq!(page.total, 4);
        assert_eq!(remote.all::<Newspaper>().await.len(), 4);
    }

    #[tokio::test]
    async fn undecodable_response_is_a_conflict() {
        let (remote, console) = seeded().await;
        let newspapers = console.collection::<Newspaper>();
        let before = newspapers.list(&console.params(1)).await.expect("page");

        remote.fail_next(None, "newspapers/1", RemoteError::Decode("missing id".into()));
        let outcome = newspapers
            .update(newspaper("1", "Renamed"))
            .await
            .expect("protocol");
        assert_eq!(outcome.error(), Some(&MutationError::conflict("missing id")));
        assert_eq!(newspapers.list(&console.params(1)).await.expect("page"), before);
    }
}
