use std::fmt::{Display, Formatter};

use lmdb::Error as LmdbError;
use serde::{Deserialize, Serialize};
use serde_json::Error as SerdeError;

use crate::error::{RemoteError, ServiceError, StoreError, SyncError};

#[derive(Debug, Serialize, Deserialize)]
pub enum AppResponse {
    DatabaseError(String),
    SerializationError(String),
    NotFound(String),
    ValidationError(String),
    BadRequest(String),
    Unauthorized(String),
    TransportError(String),
    Ok(String),
}

impl Display for AppResponse {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            AppResponse::DatabaseError(msg) => write!(f, "Database error: {}", msg),
            AppResponse::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            AppResponse::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppResponse::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppResponse::BadRequest(msg) => write!(f, "Bad Request: {}", msg),
            AppResponse::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            AppResponse::TransportError(msg) => write!(f, "Transport error: {}", msg),
            AppResponse::Ok(msg) => write!(f, "Ok: {}", msg),
        }
    }
}

impl From<LmdbError> for AppResponse {
    fn from(err: LmdbError) -> Self {
        match err {
            LmdbError::NotFound => AppResponse::NotFound("Key not found".to_string()),
            LmdbError::Corrupted => AppResponse::DatabaseError("Database is corrupted".to_string()),
            LmdbError::MapFull => AppResponse::DatabaseError("Database map is full".to_string()),
            _ => AppResponse::DatabaseError(format!("Database error: {:?}", err)),
        }
    }
}

impl From<SerdeError> for AppResponse {
    fn from(err: SerdeError) -> Self {
        AppResponse::SerializationError(format!("JSON serialization error: {}", err))
    }
}

impl From<StoreError> for AppResponse {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Lmdb(e) => AppResponse::from(e),
            StoreError::Serialization(e) => AppResponse::from(e),
            StoreError::InvalidConfig(msg) => AppResponse::ValidationError(msg),
            other => AppResponse::DatabaseError(other.to_string()),
        }
    }
}

impl From<RemoteError> for AppResponse {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::NotFound(code) => {
                AppResponse::NotFound(format!("Remote session '{}' not found", code))
            }
            other => AppResponse::TransportError(other.to_string()),
        }
    }
}

impl From<SyncError> for AppResponse {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::Remote(e) => AppResponse::from(e),
            SyncError::Store(e) => AppResponse::from(e),
        }
    }
}

impl From<ServiceError> for AppResponse {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::NotFound(code) => {
                AppResponse::NotFound(format!("Session '{}' not found", code))
            }
            ServiceError::Validation(msg) => AppResponse::ValidationError(msg),
            ServiceError::Storage(e) => AppResponse::from(e),
            other => AppResponse::DatabaseError(other.to_string()),
        }
    }
}

impl AppResponse {
    pub fn success(msg: impl Into<String>) -> Self {
        AppResponse::Ok(msg.into())
    }

    /// HTTP status matching this response, used by the request router.
    pub fn status(&self) -> u16 {
        match self {
            AppResponse::Ok(_) => 200,
            AppResponse::NotFound(_) => 404,
            AppResponse::Unauthorized(_) => 401,
            AppResponse::ValidationError(_)
            | AppResponse::BadRequest(_)
            | AppResponse::SerializationError(_) => 400,
            AppResponse::TransportError(_) => 502,
            AppResponse::DatabaseError(_) => 500,
        }
    }
}
