use marquee_cache::CacheIntegrityError;

use crate::RemoteError;

pub type ClientResult<T> = Result<T, ClientError>;

/// Failures of console operations that are not a rolled-back mutation.
///
/// A rejected remote call during a mutation is reported through
/// [`marquee_cache::MutationOutcome`]; this type covers reads, invalid input
/// caught before any cache write, and protocol violations.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ClientError {
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Invalid(#[from] marquee_common::Error),
    #[error("cache integrity violated: {0}")]
    Integrity(#[from] CacheIntegrityError),
    #[error("encode request: {0}")]
    Encode(String),
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Encode(err.to_string())
    }
}
