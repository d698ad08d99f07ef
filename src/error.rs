//! Typed errors for the local store, the sync transport and the remote service.
//!
//! These are converted into [`AppResponse`](crate::app_response::AppResponse)
//! at the FFI and HTTP boundaries.

use thiserror::Error;

/// Failure of the LMDB-backed persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("LMDB error: {0}")]
    Lmdb(#[from] lmdb::Error),

    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unknown table '{0}'")]
    UnknownTable(&'static str),

    #[error("invalid store config: {0}")]
    InvalidConfig(String),

    #[error("lock poisoned: {0}")]
    Poisoned(String),
}

/// Failure of one remote call, as seen by the sync reconciler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// The short code is unknown to the remote service. Terminal.
    #[error("remote session not found: {0}")]
    NotFound(String),

    /// Network failure, timeout or non-2xx status. Retryable.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The remote side answered with a body we could not read.
    #[error("unexpected response: {0}")]
    Protocol(String),
}

impl RemoteError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, RemoteError::NotFound(_))
    }
}

/// Failure of a sync attempt.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failure of a remote session service operation.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("session not found: {0}")]
    NotFound(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("could not allocate a free short code after {0} attempts")]
    ShortCodeExhausted(u32),

    #[error(transparent)]
    Storage(#[from] StoreError),
}
