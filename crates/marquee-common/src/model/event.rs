//! Events and their aggregate revenue view.
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub venue: String,
    pub starts_at: String,
    pub capacity: u32,
    #[serde(default)]
    pub published: bool,
}

crate::entity!(Event, "events");

/// Server-computed totals for one event. Never edited locally; only refetched.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EventRevenue {
    pub event_id: String,
    pub approved_tickets: u64,
    pub total: i64,
}
