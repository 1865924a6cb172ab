//! Newspaper announcements and push notifications.
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Newspaper {
    pub id: String,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub published_at: Option<String>,
}

crate::entity!(Newspaper, "newspapers");

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NotificationGroup {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub member_count: u32,
}

crate::entity!(NotificationGroup, "notification-groups");

/// A push notification sent to every member of a group.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PushNotification {
    pub id: String,
    pub group_id: String,
    pub title: String,
    pub body: String,
}

crate::entity!(PushNotification, "notifications");
