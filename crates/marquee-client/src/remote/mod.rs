//! Access to the console's REST API.
//!
//! # Purpose
//! [`RemoteSource`] is the single seam between the cache and the backend: one
//! request in, one JSON body out. [`HttpRemote`] talks to the real API;
//! [`InMemoryRemote`] serves the same routes from process memory for local
//! use and tests.
//!
//! # Wire shape
//! Every response wraps its payload as `{ "data": T }`. List endpoints nest a
//! page inside it: `{ "data": { "items": [T], "total": n } }`.
//!
//! # Routes
//! | Method | Path | Payload |
//! |--------|------|---------|
//! | GET | `/{resource}?page&pageSize&search` | page |
//! | GET / PUT / DELETE | `/{resource}/{id}` | entity |
//! | POST | `/{resource}` | created entity |
//! | GET | `/events/{id}/tickets` | page of ticket requests |
//! | GET | `/events/{id}/revenue` | revenue totals |
//! | PUT | `/tickets/{id}/status` | updated ticket request |
//! | POST | `/users/{id}/wallet/top-up` | updated user |
//! | GET | `/users/{id}/transactions` | page of transactions |
use async_trait::async_trait;
use marquee_cache::MutationError;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;

mod demo;
mod http;
mod memory;

pub use demo::seed_demo;
pub use http::HttpRemote;
pub use memory::InMemoryRemote;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRequest {
    pub method: Method,
    /// Path below the API base url, e.g. `events/E1/tickets`.
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl RemoteRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Post, path).with_body(body)
    }

    pub fn put(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Put, path).with_body(body)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    pub fn with_query(mut self, query: Vec<(String, String)>) -> Self {
        self.query = query;
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

impl fmt::Display for RemoteRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} /{}", self.method, self.path.trim_start_matches('/'))
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("request timed out")]
    Timeout,
    #[error("status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("unexpected response body: {0}")]
    Decode(String),
}

impl RemoteError {
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        RemoteError::Status {
            status,
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::Status { status: 404, .. })
    }
}

// A body the client cannot make sense of is a conflict; everything else is a
// failed call.
impl From<RemoteError> for MutationError {
    fn from(error: RemoteError) -> Self {
        match error {
            RemoteError::Decode(message) => MutationError::Conflict(message),
            other => MutationError::Network(other.to_string()),
        }
    }
}

#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Issue one call and return the full response body.
    async fn call(&self, request: RemoteRequest) -> Result<Value, RemoteError>;

    fn backend_name(&self) -> &'static str;
}

/// Take `data` out of a `{ "data": ... }` response body.
pub fn unwrap_data(body: Value) -> Result<Value, RemoteError> {
    match body {
        Value::Object(mut fields) => fields
            .remove("data")
            .ok_or_else(|| RemoteError::Decode("response has no data field".to_string())),
        other => Err(RemoteError::Decode(format!(
            "expected an object envelope, got {}",
            kind_of(&other)
        ))),
    }
}

pub fn decode<T: DeserializeOwned>(data: Value) -> Result<T, RemoteError> {
    serde_json::from_value(data).map_err(|err| RemoteError::Decode(err.to_string()))
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
