//! Query keys for every cached view of the console.
//!
//! The first segment is always the entity's REST resource, so invalidating
//! `[resource]` reaches every page and single-entity view of it.
use marquee_cache::{KeySegment, QueryKey};
use marquee_common::{Entity, ListParams, TicketRequest, Transaction};

/// Every cached view of `T`. Use as an invalidation filter.
pub fn collection<T: Entity>() -> QueryKey {
    QueryKey::new([T::RESOURCE])
}

/// `[resource, {page, pageSize, search}]`
pub fn page<T: Entity>(params: &ListParams) -> QueryKey {
    collection::<T>().push(KeySegment::map([
        ("page", KeySegment::from(params.page)),
        ("pageSize", KeySegment::from(params.page_size)),
        ("search", KeySegment::from(params.search.clone())),
    ]))
}

/// `[resource, id]`
pub fn entity<T: Entity>(id: &str) -> QueryKey {
    collection::<T>().push(id)
}

/// Ticket requests of one event: `["events", id, "tickets"]`.
pub fn event_tickets(event_id: &str) -> QueryKey {
    QueryKey::new(["events", event_id]).push(TicketRequest::RESOURCE)
}

/// Aggregate revenue of one event: `["events", id, "revenue"]`.
pub fn event_revenue(event_id: &str) -> QueryKey {
    QueryKey::new(["events", event_id, "revenue"])
}

/// Wallet history of one user: `["transactions", userId]`.
pub fn transactions(user_id: &str) -> QueryKey {
    collection::<Transaction>().push(user_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use marquee_common::{Event, Newspaper, User};

    #[test]
    fn page_keys_fall_under_their_collection() {
        let key = page::<Newspaper>(&ListParams::new(2, 10).with_search("gala"));
        assert!(key.matches(&collection::<Newspaper>()));
        assert!(!key.matches(&collection::<User>()));
        assert_eq!(
            key.to_string(),
            r#"["newspapers",{"page":2,"pageSize":10,"search":"gala"}]"#
        );
    }

    #[test]
    fn blank_search_is_null() {
        let key = page::<User>(&ListParams::default());
        assert_eq!(
            key.to_string(),
            r#"["users",{"page":1,"pageSize":10,"search":null}]"#
        );
    }

    #[test]
    fn event_views_share_the_event_prefix() {
        let filter = entity::<Event>("E1");
        assert!(event_tickets("E1").matches(&filter));
        assert!(event_revenue("E1").matches(&filter));
        assert!(!event_revenue("E2").matches(&filter));
        assert_eq!(transactions("U1"), QueryKey::new(["transactions", "U1"]));
    }
}
