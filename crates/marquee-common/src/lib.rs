// Shared domain types for the marquee admin console.
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

// Implements `Entity` for a model with a `String` id field.
macro_rules! entity {
    ($name:ident, $resource:literal) => {
        impl $crate::Entity for $name {
            const RESOURCE: &'static str = $resource;

            fn id(&self) -> &str {
                &self.id
            }
        }
    };
}

pub(crate) use entity;

pub mod model;

pub use model::{
    Event, EventRevenue, Newspaper, NotificationGroup, Operator, OperatorRole, PushNotification,
    SuperUser, TicketRequest, TicketStatus, TicketType, Transaction, TransactionKind, User,
    WalletTopUp,
};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("invalid ticket status: {0}")]
    InvalidStatus(String),
    #[error("invalid operator role: {0}")]
    InvalidRole(String),
    #[error("invalid amount: {0}")]
    InvalidAmount(i64),
}

/// A domain object the console lists, edits and deletes through the REST API.
///
/// `RESOURCE` is both the REST collection path segment and the first segment
/// of every query key that caches this entity.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const RESOURCE: &'static str;

    fn id(&self) -> &str;
}

/// One page of a collection plus the total count across all pages.
///
/// This is the `{ items, total }` shape the API nests under `data` for list
/// endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: u64) -> Self {
        Self { items, total }
    }

    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            total: 0,
        }
    }
}

impl<T: Entity> Page<T> {
    pub fn contains(&self, id: &str) -> bool {
        self.items.iter().any(|item| item.id() == id)
    }

    /// Drop the item with `id`, keeping `total` in step. Returns whether it was present.
    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.items.len();
        self.items.retain(|item| item.id() != id);
        let removed = self.items.len() != before;
        if removed {
            self.total = self.total.saturating_sub(1);
        }
        removed
    }

    /// Swap in `entity` where an item with the same id sits. Pages that do not
    /// hold it are left alone.
    pub fn replace(&mut self, entity: T) -> bool {
        match self.items.iter_mut().find(|item| item.id() == entity.id()) {
            Some(slot) => {
                *slot = entity;
                true
            }
            None => false,
        }
    }

    pub fn update<F>(&mut self, id: &str, f: F) -> bool
    where
        F: FnOnce(&mut T),
    {
        match self.items.iter_mut().find(|item| item.id() == id) {
            Some(item) => {
                f(item);
                true
            }
            None => false,
        }
    }
}

/// Paging and search parameters for list endpoints. Pages are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    pub page: u32,
    pub page_size: u32,
    pub search: Option<String>,
}

impl ListParams {
    pub fn new(page: u32, page_size: u32) -> Self {
        Self {
            page: page.max(1),
            page_size: page_size.max(1),
            search: None,
        }
    }

    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        let search = search.into();
        // An empty search box means "no filter", not "match the empty string".
        self.search = (!search.trim().is_empty()).then_some(search);
        self
    }

    pub fn to_query(&self) -> Vec<(String, String)> {
        let mut query = vec![
            ("page".to_string(), self.page.to_string()),
            ("pageSize".to_string(), self.page_size.to_string()),
        ];
        if let Some(search) = &self.search {
            query.push(("search".to_string(), search.clone()));
        }
        query
    }
}

impl Default for ListParams {
    fn default() -> Self {
        Self::new(1, 10)
    }
}
