//! In-memory implementation of the console API.
//!
//! # Purpose
//! Serves the routes listed in [`crate::remote`] from `HashMap`s guarded by
//! `tokio::sync::RwLock`. It backs the console's `--offline` mode and the
//! crate's tests.
//!
//! # Behavior
//! - **Not durable**: all state is lost when the value is dropped.
//! - Collections keep insertion order; list endpoints page over it and filter
//!   by a case-insensitive substring match on every string field.
//! - `PUT` merges the body's top-level fields into the stored object.
//! - Wallet top-ups update the user and append a `TOP_UP` transaction.
//!
//! # Fault injection
//! [`InMemoryRemote::fail_next`] queues an error for the next matching call and
//! [`InMemoryRemote::hold_next`] parks the next call until released, so tests
//! can observe optimistic state while a request is in flight.
use async_trait::async_trait;
use marquee_common::{
    Entity, Page, TicketRequest, TicketStatus, TicketType, Transaction, TransactionKind, User,
    WalletTopUp,
};
use parking_lot::Mutex;
use serde_json::{Map, Value, json};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{RwLock, oneshot};
use tracing::debug;
use uuid::Uuid;

use super::{Method, RemoteError, RemoteRequest, RemoteSource};

#[derive(Debug)]
struct Fault {
    method: Option<Method>,
    path_prefix: String,
    error: RemoteError,
}

impl Fault {
    fn matches(&self, request: &RemoteRequest) -> bool {
        self.method.is_none_or(|method| method == request.method)
            && normalize(&request.path).starts_with(&self.path_prefix)
    }
}

#[derive(Clone, Default)]
pub struct InMemoryRemote {
    collections: Arc<RwLock<HashMap<String, Vec<Value>>>>,
    faults: Arc<Mutex<VecDeque<Fault>>>,
    held: Arc<Mutex<VecDeque<oneshot::Receiver<()>>>>,
    log: Arc<Mutex<Vec<RemoteRequest>>>,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `item` under its resource, replacing any item with the same id.
    pub async fn insert<T: Entity>(&self, item: &T) -> Result<(), RemoteError> {
        let value = serde_json::to_value(item).map_err(|err| RemoteError::Decode(err.to_string()))?;
        let mut collections = self.collections.write().await;
        let items = collections.entry(T::RESOURCE.to_string()).or_default();
        match items.iter_mut().find(|stored| id_of(stored) == Some(item.id())) {
            Some(slot) => *slot = value,
            None => items.push(value),
        }
        Ok(())
    }

    pub async fn all<T: Entity>(&self) -> Vec<T> {
        self.collections
            .read()
            .await
            .get(T::RESOURCE)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| serde_json::from_value(item.clone()).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Fail the next call whose method matches (any method when `None`) and
    /// whose path starts with `path_prefix`.
    pub fn fail_next(&self, method: Option<Method>, path_prefix: &str, error: RemoteError) {
        self.faults.lock().push_back(Fault {
            method,
            path_prefix: normalize(path_prefix).to_string(),
            error,
        });
    }

    /// Park the next call until the returned sender fires or is dropped.
    pub fn hold_next(&self) -> oneshot::Sender<()> {
        let (release, parked) = oneshot::channel();
        self.held.lock().push_back(parked);
        release
    }

    /// Every call received so far, in arrival order.
    pub fn requests(&self) -> Vec<RemoteRequest> {
        self.log.lock().clone()
    }

    fn take_fault(&self, request: &RemoteRequest) -> Option<RemoteError> {
        let mut faults = self.faults.lock();
        let idx = faults.iter().position(|fault| fault.matches(request))?;
        faults.remove(idx).map(|fault| fault.error)
    }

    async fn route(&self, request: &RemoteRequest) -> Result<Value, RemoteError> {
        let path = normalize(&request.path);
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        match (request.method, segments.as_slice()) {
            (Method::Get, ["events", event_id, "tickets"]) => {
                let filter = |item: &Value| field(item, "eventId") == Some(*event_id);
                self.list(TicketRequest::RESOURCE, request, filter).await
            }
            (Method::Get, ["events", event_id, "revenue"]) => self.revenue(event_id).await,
            (Method::Put, ["tickets", ticket_id, "status"]) => {
                self.set_ticket_status(ticket_id, request.body.as_ref()).await
            }
            (Method::Post, ["users", user_id, "wallet", "top-up"]) => {
                self.top_up(user_id, request.body.as_ref()).await
            }
            (Method::Get, ["users", user_id, "transactions"]) => {
                let filter = |item: &Value| field(item, "userId") == Some(*user_id);
                self.list(Transaction::RESOURCE, request, filter).await
            }
            (Method::Get, [resource]) => self.list(resource, request, |_| true).await,
            (Method::Post, [resource]) => self.create(resource, request.body.as_ref()).await,
            (Method::Get, [resource, id]) => self.find(resource, id).await.map(envelope),
            (Method::Put, [resource, id]) => self.merge(resource, id, request.body.as_ref()).await,
            (Method::Delete, [resource, id]) => self.delete(resource, id).await,
            _ => Err(RemoteError::status(404, format!("no route for {request}"))),
        }
    }

    async fn list<F>(&self, resource: &str, request: &RemoteRequest, filter: F) -> Result<Value, RemoteError>
    where
        F: Fn(&Value) -> bool,
    {
        let param = |name: &str| {
            request
                .query
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.as_str())
        };
        let search = param("search").map(str::to_lowercase);
        let collections = self.collections.read().await;
        let matching: Vec<&Value> = collections
            .get(resource)
            .into_iter()
            .flatten()
            .filter(|item| filter(*item))
            .filter(|item| search.as_deref().is_none_or(|needle| mentions(item, needle)))
            .collect();
        let total = matching.len();

        let items: Vec<Value> = match param("pageSize").and_then(|v| v.parse::<usize>().ok()) {
            Some(size) if size > 0 => {
                let page = param("page")
                    .and_then(|v| v.parse::<usize>().ok())
                    .unwrap_or(1)
                    .max(1);
                matching
                    .into_iter()
                    .skip((page - 1) * size)
                    .take(size)
                    .cloned()
                    .collect()
            }
            _ => matching.into_iter().cloned().collect(),
        };
        Ok(envelope(json!(Page::new(items, total as u64))))
    }

    async fn find(&self, resource: &str, id: &str) -> Result<Value, RemoteError> {
        self.collections
            .read()
            .await
            .get(resource)
            .and_then(|items| items.iter().find(|item| id_of(item) == Some(id)))
            .cloned()
            .ok_or_else(|| not_found(resource, id))
    }

    async fn create(&self, resource: &str, body: Option<&Value>) -> Result<Value, RemoteError> {
        let mut item = object_body(body)?;
        if !item.get("id").is_some_and(Value::is_string) {
            item.insert("id".to_string(), Value::String(Uuid::new_v4().to_string()));
        }
        let item = Value::Object(item);
        let mut collections = self.collections.write().await;
        let items = collections.entry(resource.to_string()).or_default();
        if items.iter().any(|stored| id_of(stored) == id_of(&item)) {
            return Err(RemoteError::status(409, format!("{resource} already exists")));
        }
        items.push(item.clone());
        Ok(envelope(item))
    }

    async fn merge(&self, resource: &str, id: &str, body: Option<&Value>) -> Result<Value, RemoteError> {
        let patch = object_body(body)?;
        self.modify(resource, id, |stored| {
            for (name, value) in patch {
                // The id in the path is authoritative.
                if name != "id" {
                    stored.insert(name, value);
                }
            }
            Ok(())
        })
        .await
        .map(envelope)
    }

    async fn delete(&self, resource: &str, id: &str) -> Result<Value, RemoteError> {
        let mut collections = self.collections.write().await;
        let items = collections
            .get_mut(resource)
            .ok_or_else(|| not_found(resource, id))?;
        let idx = items
            .iter()
            .position(|item| id_of(item) == Some(id))
            .ok_or_else(|| not_found(resource, id))?;
        Ok(envelope(items.remove(idx)))
    }

    async fn set_ticket_status(&self, id: &str, body: Option<&Value>) -> Result<Value, RemoteError> {
        let status = body
            .and_then(|body| body.get("status"))
            .and_then(Value::as_str)
            .ok_or_else(|| RemoteError::status(400, "status is required"))?
            .parse::<TicketStatus>()
            .map_err(|err| RemoteError::status(400, err.to_string()))?;
        self.modify(TicketRequest::RESOURCE, id, |ticket| {
            ticket.insert("status".to_string(), json!(status));
            Ok(())
        })
        .await
        .map(envelope)
    }

    async fn top_up(&self, user_id: &str, body: Option<&Value>) -> Result<Value, RemoteError> {
        let amount = body
            .and_then(|body| body.get("amount"))
            .and_then(Value::as_i64)
            .ok_or_else(|| RemoteError::status(400, "amount is required"))?;
        let top_up = WalletTopUp::new(amount).map_err(|err| RemoteError::status(400, err.to_string()))?;
        let user = self
            .modify(User::RESOURCE, user_id, |user| {
                let balance = user.get("walletBalance").and_then(Value::as_i64).unwrap_or(0);
                let balance = balance
                    .checked_add(top_up.amount)
                    .ok_or_else(|| RemoteError::status(400, "wallet balance would overflow"))?;
                user.insert("walletBalance".to_string(), json!(balance));
                Ok(())
            })
            .await?;
        let transaction = json!({
            "id": Uuid::new_v4().to_string(),
            "userId": user_id,
            "amount": top_up.amount,
            "kind": TransactionKind::TopUp,
            "createdAt": "1970-01-01T00:00:00Z",
        });
        self.collections
            .write()
            .await
            .entry(Transaction::RESOURCE.to_string())
            .or_default()
            .push(transaction);
        Ok(envelope(user))
    }

    async fn revenue(&self, event_id: &str) -> Result<Value, RemoteError> {
        let collections = self.collections.read().await;
        let price_of = |type_id: &str| {
            collections
                .get(TicketType::RESOURCE)
                .into_iter()
                .flatten()
                .find(|item| id_of(item) == Some(type_id))
                .and_then(|item| item.get("price")?.as_i64())
                .unwrap_or(0)
        };
        let (approved_tickets, total) = collections
            .get(TicketRequest::RESOURCE)
            .into_iter()
            .flatten()
            .filter(|ticket| field(ticket, "eventId") == Some(event_id))
            .filter(|ticket| field(ticket, "status") == Some(TicketStatus::Approved.as_str()))
            .fold((0u64, 0i64), |(count, total), ticket| {
                let quantity = ticket.get("quantity").and_then(Value::as_u64).unwrap_or(0);
                let price = field(ticket, "ticketTypeId").map_or(0, price_of);
                (count + quantity, total + price * quantity as i64)
            });
        Ok(envelope(json!({
            "eventId": event_id,
            "approvedTickets": approved_tickets,
            "total": total,
        })))
    }

    async fn modify<F>(&self, resource: &str, id: &str, f: F) -> Result<Value, RemoteError>
    where
        F: FnOnce(&mut Map<String, Value>) -> Result<(), RemoteError>,
    {
        let mut collections = self.collections.write().await;
        let item = collections
            .get_mut(resource)
            .and_then(|items| items.iter_mut().find(|item| id_of(item) == Some(id)))
            .ok_or_else(|| not_found(resource, id))?;
        let fields = item
            .as_object_mut()
            .ok_or_else(|| RemoteError::status(500, format!("{resource}/{id} is not an object")))?;
        f(fields)?;
        Ok(item.clone())
    }
}

#[async_trait]
impl RemoteSource for InMemoryRemote {
    async fn call(&self, request: RemoteRequest) -> Result<Value, RemoteError> {
        self.log.lock().push(request.clone());
        let parked = self.held.lock().pop_front();
        if let Some(parked) = parked {
            let _ = parked.await;
        }
        if let Some(error) = self.take_fault(&request) {
            debug!(request = %request, error = %error, "injected fault");
            return Err(error);
        }
        self.route(&request).await
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

fn normalize(path: &str) -> &str {
    path.trim_matches('/')
}

fn envelope(data: Value) -> Value {
    json!({ "data": data })
}

fn id_of(item: &Value) -> Option<&str> {
    field(item, "id")
}

fn field<'a>(item: &'a Value, name: &str) -> Option<&'a str> {
    item.get(name)?.as_str()
}

fn mentions(item: &Value, needle: &str) -> bool {
    item.as_object().is_some_and(|fields| {
        fields
            .values()
            .filter_map(Value::as_str)
            .any(|value| value.to_lowercase().contains(needle))
    })
}

fn object_body(body: Option<&Value>) -> Result<Map<String, Value>, RemoteError> {
    match body {
        Some(Value::Object(fields)) => Ok(fields.clone()),
        _ => Err(RemoteError::status(400, "expected a JSON object body")),
    }
}

fn not_found(resource: &str, id: &str) -> RemoteError {
    RemoteError::status(404, format!("{resource}/{id} not found"))
}
