use marquee_cache::{MutationError, MutationOutcome, QueryKey};
use marquee_common::{Page, User, WalletTopUp};
use std::sync::Arc;

use super::{Console, call_entity, expect_id, rewrite_entity, rewrite_page};
use crate::error::ClientResult;
use crate::keys;
use crate::remote::RemoteRequest;

impl Console {
    /// Add `amount` to a user's wallet.
    ///
    /// The amount is validated before anything is written. A non-positive
    /// amount, or one that would overflow a cached balance, never reaches the
    /// cache or the server. The new balance shows in every cached users page
    /// and the user's own view until the server answers with the
    /// authoritative balance.
    pub async fn top_up_wallet(&self, user_id: &str, amount: i64) -> ClientResult<MutationOutcome<User>> {
        let top_up = WalletTopUp::new(amount)?;
        let body = serde_json::to_value(&top_up)?;
        let pages = self.cached_pages::<User>();
        let single = keys::entity::<User>(user_id);
        let cache = self.cache();
        for user in self.cached_copies(user_id, &pages, &single) {
            user.credited(amount)?;
        }

        let mut builder = cache.mutation(format!("Top up wallet of {user_id}"));
        for page in &pages {
            let id = user_id.to_string();
            builder = builder.patch(page.clone(), move |current| {
                rewrite_page::<User>(current, |page| {
                    page.update(&id, |user| credit(user, amount));
                })
            });
        }
        for key in self.cached_key(single.clone()) {
            builder = builder.patch(key, move |current| {
                rewrite_entity::<User>(current, |user| credit(user, amount))
            });
        }

        let remote = Arc::clone(self.remote());
        let request = RemoteRequest::post(format!("users/{user_id}/wallet/top-up"), body);
        let outcome = builder
            .invalidate_on_success(keys::transactions(user_id))
            .run_confirmed(
                || call_entity::<User>(remote, request),
                |server: &User| {
                    expect_id(server, user_id)?;
                    let mut writes: Vec<_> = pages
                        .iter()
                        .filter_map(|page| {
                            let current = cache.data(page)?;
                            let rewritten = rewrite_page::<User>(&current, |items| {
                                items.replace(server.clone());
                            });
                            Some((page.clone(), rewritten))
                        })
                        .collect();
                    if cache.data(&single).is_some() {
                        let confirmed = serde_json::to_value(server)
                            .map_err(|err| MutationError::conflict(err.to_string()))?;
                        writes.push((single.clone(), confirmed));
                    }
                    Ok(writes)
                },
            )
            .await?;
        Ok(outcome)
    }

    /// Every cached copy of the user, from its own view and from list pages.
    fn cached_copies(&self, user_id: &str, pages: &[QueryKey], single: &QueryKey) -> Vec<User> {
        let cache = self.cache();
        let mut copies: Vec<User> = pages
            .iter()
            .filter_map(|page| cache.data(page))
            .filter_map(|data| serde_json::from_value::<Page<User>>(data).ok())
            .flat_map(|page| page.items)
            .filter(|user| user.id == user_id)
            .collect();
        copies.extend(
            cache
                .data(single)
                .and_then(|data| serde_json::from_value::<User>(data).ok()),
        );
        copies
    }
}

// Balances were checked up front; one that moved since is left alone.
fn credit(user: &mut User, amount: i64) {
    if let Ok(balance) = user.credited(amount) {
        user.wallet_balance = balance;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::TracingNotifier;
    use crate::remote::{InMemoryRemote, Method, RemoteError};
    use crate::{ClientConfig, ClientError};
    use marquee_common::TransactionKind;

    fn user(id: &str, balance: i64) -> User {
        User {
            id: id.to_string(),
            name: format!("User {id}"),
            email: format!("{id}@example.com"),
            phone: None,
            wallet_balance: balance,
        }
    }

    async fn seeded() -> (InMemoryRemote, Console) {
        let remote = InMemoryRemote::new();
        remote.insert(&user("U1", 100)).await.expect("insert");
        remote.insert(&user("U2", 0)).await.expect("insert");
        let console = Console::new(
            &ClientConfig::default(),
            Arc::new(remote.clone()),
            Arc::new(TracingNotifier),
        );
        (remote, console)
    }

    #[tokio::test]
    async fn balance_moves_optimistically_then_settles() {
        let (remote, console) = seeded().await;
        console.list::<User>(&console.params(1)).await.expect("users");
        console.get::<User>("U1").await.expect("user");
        console.transactions("U1").await.expect("history");

        let release = remote.hold_next();
        let top_up = console.top_up_wallet("U1", 50);
        let check = async {
            tokio::task::yield_now().await;
            let page = console
                .cache()
                .data(&keys::page::<User>(&console.params(1)))
                .expect("page");
            assert_eq!(page["items"][0]["walletBalance"], 150);
            let single = console.cache().data(&keys::entity::<User>("U1")).expect("user");
            assert_eq!(single["walletBalance"], 150);
            release.send(()).expect("release");
        };
        let (outcome, ()) = tokio::join!(top_up, check);
        let saved = outcome.expect("protocol").into_result().expect("committed");
        assert_eq!(saved.wallet_balance, 150);
        assert_eq!(console.get::<User>("U1").await.expect("user").wallet_balance, 150);

        let history = console.transactions("U1").await.expect("history");
        assert_eq!(history.total, 1);
        assert_eq!(history.items[0].kind, TransactionKind::TopUp);
        assert_eq!(history.items[0].amount, 50);
    }

    #[tokio::test]
    async fn invalid_amount_is_rejected_before_any_write() {
        let (remote, console) = seeded().await;
        let before = console.list::<User>(&console.params(1)).await.expect("users");
        let version = console
            .cache()
            .get(&keys::page::<User>(&console.params(1)))
            .expect("page")
            .version();

        let err = console.top_up_wallet("U1", 0).await.expect_err("invalid");
        assert_eq!(err, ClientError::Invalid(marquee_common::Error::InvalidAmount(0)));
        assert_eq!(console.list::<User>(&console.params(1)).await.expect("users"), before);
        let entry = console
            .cache()
            .get(&keys::page::<User>(&console.params(1)))
            .expect("page");
        assert_eq!(entry.version(), version);
        assert_eq!(remote.requests().len(), 1);
    }

    #[tokio::test]
    async fn top_up_that_would_overflow_is_rejected() {
        let (remote, console) = seeded().await;
        console.get::<User>("U1").await.expect("user");

        let err = console
            .top_up_wallet("U1", i64::MAX)
            .await
            .expect_err("overflow");
        assert_eq!(
            err,
            ClientError::Invalid(marquee_common::Error::InvalidAmount(i64::MAX))
        );
        assert_eq!(console.get::<User>("U1").await.expect("user").wallet_balance, 100);
        assert_eq!(remote.requests().len(), 1);
        assert_eq!(console.cache().in_flight(), 0);
    }

    #[tokio::test]
    async fn uncached_overflow_is_refused_by_the_server() {
        let (remote, console) = seeded().await;
        let outcome = console.top_up_wallet("U1", i64::MAX).await.expect("protocol");
        assert!(matches!(outcome.error(), Some(MutationError::Network(_))));
        assert_eq!(remote.all::<User>().await[0].wallet_balance, 100);
    }

    #[tokio::test]
    async fn failed_top_up_restores_balance() {
        let (remote, console) = seeded().await;
        console.get::<User>("U2").await.expect("user");
        remote.fail_next(Some(Method::Post), "users/U2/wallet", RemoteError::Timeout);

        let outcome = console.top_up_wallet("U2", 25).await.expect("protocol");
        assert_eq!(outcome.error(), Some(&MutationError::from(RemoteError::Timeout)));
        assert_eq!(console.get::<User>("U2").await.expect("user").wallet_balance, 0);
        assert_eq!(remote.all::<User>().await[1].wallet_balance, 0);
    }
}
