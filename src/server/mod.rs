//! The remote session service: the backend the sync reconciler talks to.

pub mod repository;
pub mod routes;
pub mod service;

pub use repository::{LmdbRepository, MemoryRepository, SessionRepository, StoredSession};
pub use routes::{dispatch, ApiReply, ApiRequest};
pub use service::{ExportColumn, ExportTable, RemoteSessionService};

use crate::error::{RemoteError, ServiceError};
use crate::scan_model::ScanItem;
use crate::sync::RemoteSessions;
use crate::wire::{AddScansResponse, CreateSessionRequest, CreateSessionResponse};

fn to_remote(err: ServiceError) -> RemoteError {
    match err {
        ServiceError::NotFound(code) => RemoteError::NotFound(code),
        ServiceError::Validation(msg) => RemoteError::Protocol(msg),
        other => RemoteError::Transport(other.to_string()),
    }
}

/// Lets the reconciler drive the service in-process, without HTTP.
impl<R: SessionRepository> RemoteSessions for RemoteSessionService<R> {
    fn create_session(
        &self,
        request: &CreateSessionRequest,
    ) -> Result<CreateSessionResponse, RemoteError> {
        RemoteSessionService::create_session(self, request).map_err(to_remote)
    }

    fn add_scans(
        &self,
        short_code: &str,
        scans: &[ScanItem],
    ) -> Result<AddScansResponse, RemoteError> {
        RemoteSessionService::add_scans(self, short_code, scans).map_err(to_remote)
    }

    fn delete_scans(&self, short_code: &str, codes: &[String]) -> Result<(), RemoteError> {
        RemoteSessionService::delete_scans(self, short_code, codes)
            .map(|_| ())
            .map_err(to_remote)
    }
}
