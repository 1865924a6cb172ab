use marquee_cache::MutationOutcome;
use marquee_common::{Entity, PushNotification};
use serde::Serialize;
use std::sync::Arc;

use super::{Console, call_entity};
use crate::error::ClientResult;
use crate::keys;
use crate::remote::RemoteRequest;

/// Body of a push notification sent to a group.
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NewNotification {
    pub group_id: String,
    pub title: String,
    pub body: String,
}

impl Console {
    /// Send a push notification. There is nothing to show before the server
    /// accepts it, so this is pessimistic.
    pub async fn send_notification(
        &self,
        group_id: &str,
        title: &str,
        body: &str,
    ) -> ClientResult<MutationOutcome<PushNotification>> {
        let payload = serde_json::to_value(NewNotification {
            group_id: group_id.to_string(),
            title: title.to_string(),
            body: body.to_string(),
        })?;
        let remote = Arc::clone(self.remote());
        let outcome = self
            .cache()
            .mutation(format!("Send notification to {group_id}"))
            .invalidate_on_success(keys::collection::<PushNotification>())
            .run(|| {
                call_entity::<PushNotification>(
                    remote,
                    RemoteRequest::post(PushNotification::RESOURCE, payload),
                )
            })
            .await?;
        Ok(outcome)
    }
}
