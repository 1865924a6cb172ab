//! Error types for the cache and its mutation protocol.
//!
//! Two families with different propagation rules:
//! - [`MutationError`] describes a remote failure. It is caught at the
//!   mutation boundary, triggers a rollback and comes back to the caller inside
//!   a [`crate::MutationOutcome`].
//! - [`CacheIntegrityError`] means the calling code broke the protocol
//!   (touched an undeclared key, settled a context on the wrong cache). It is
//!   returned as `Err` and must not be swallowed.
//!
//! Settling a mutation consumes its context, so committing or rolling back
//! twice is rejected at compile time rather than here.
use crate::{MutationId, QueryKey};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MutationError {
    /// Transport failure, timeout or non-2xx response. Safe to retry.
    #[error("network error: {0}")]
    Network(String),
    /// The remote accepted the call but answered with an unexpected shape.
    #[error("conflicting response: {0}")]
    Conflict(String),
}

impl MutationError {
    pub fn network(message: impl Into<String>) -> Self {
        MutationError::Network(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        MutationError::Conflict(message.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, MutationError::Network(_))
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheIntegrityError {
    #[error("mutation declared no keys")]
    EmptyDeclaration,
    #[error("key {0} declared more than once")]
    DuplicateKey(QueryKey),
    #[error("mutation {mutation} wrote undeclared key {key}")]
    UndeclaredKey { mutation: MutationId, key: QueryKey },
    #[error("mutation {mutation} belongs to a different cache")]
    ForeignContext { mutation: MutationId },
}
