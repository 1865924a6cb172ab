use marquee_cache::{MutationError, MutationOutcome};
use marquee_common::{TicketRequest, TicketStatus};
use serde_json::json;
use std::sync::Arc;

use super::{Console, call_entity, expect_id, rewrite_entity, rewrite_page};
use crate::error::ClientResult;
use crate::keys;
use crate::remote::RemoteRequest;

impl Console {
    /// Approve or decline a ticket request.
    ///
    /// The new status shows immediately in the event's ticket list and the
    /// ticket's own view. On success the event's revenue is invalidated, since
    /// only the server can recompute it.
    pub async fn set_ticket_status(
        &self,
        event_id: &str,
        ticket_id: &str,
        status: TicketStatus,
    ) -> ClientResult<MutationOutcome<TicketRequest>> {
        let list = keys::event_tickets(event_id);
        let single = keys::entity::<TicketRequest>(ticket_id);
        let cache = self.cache();

        let mut builder = cache.mutation(format!("Set ticket {ticket_id} to {status}"));
        for key in self.cached_key(list.clone()) {
            let id = ticket_id.to_string();
            builder = builder.patch(key, move |current| {
                rewrite_page::<TicketRequest>(current, |page| {
                    page.update(&id, |ticket| ticket.status = status);
                })
            });
        }
        for key in self.cached_key(single.clone()) {
            builder = builder.patch(key, move |current| {
                rewrite_entity::<TicketRequest>(current, |ticket| ticket.status = status)
            });
        }

        let remote = Arc::clone(self.remote());
        let request = RemoteRequest::put(
            format!("tickets/{ticket_id}/status"),
            json!({ "status": status }),
        );
        let outcome = builder
            .invalidate_on_success(keys::event_revenue(event_id))
            .run_confirmed(
                || call_entity::<TicketRequest>(remote, request),
                |server: &TicketRequest| {
                    expect_id(server, ticket_id)?;
                    if server.status != status {
                        return Err(MutationError::conflict(format!(
                            "ticket {ticket_id} is {} after setting {status}",
                            server.status
                        )));
                    }
                    let mut writes = Vec::new();
                    if let Some(current) = cache.data(&list) {
                        let page = rewrite_page::<TicketRequest>(&current, |page| {
                            page.replace(server.clone());
                        });
                        writes.push((list.clone(), page));
                    }
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
}
