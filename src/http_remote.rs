//! [`RemoteSessions`] over the session HTTP API, using a blocking `ureq` agent.

use std::time::Duration;

use log::debug;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::SyncConfig;
use crate::error::RemoteError;
use crate::scan_model::ScanItem;
use crate::sync::RemoteSessions;
use crate::wire::{
    AddScansRequest, AddScansResponse, CreateSessionRequest, CreateSessionResponse,
    DeleteScansRequest,
};

pub struct HttpRemote {
    agent: ureq::Agent,
    base_url: String,
}

impl HttpRemote {
    pub fn new(config: &SyncConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .user_agent(concat!("scan-session-core/", env!("CARGO_PKG_VERSION")))
            .build();
        Self {
            agent,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn send<B: Serialize, T: DeserializeOwned>(
        &self,
        method: &str,
        path: &str,
        body: &B,
        short_code: Option<&str>,
    ) -> Result<T, RemoteError> {
        let url = self.url(path);
        debug!("{method} {url}");

        let response = self
            .agent
            .request(method, &url)
            .send_json(body)
            .map_err(|e| map_error(e, short_code))?;

        response
            .into_json::<T>()
            .map_err(|e| RemoteError::Protocol(format!("{method} {url}: {e}")))
    }
}

fn map_error(err: ureq::Error, short_code: Option<&str>) -> RemoteError {
    match (err, short_code) {
        (ureq::Error::Status(404, _), Some(code)) => RemoteError::NotFound(code.to_string()),
        (ureq::Error::Status(status, response), _) => {
            let body = response.into_string().unwrap_or_default();
            RemoteError::Transport(format!("HTTP {status}: {body}"))
        }
        (ureq::Error::Transport(transport), _) => RemoteError::Transport(transport.to_string()),
    }
}

impl RemoteSessions for HttpRemote {
    fn create_session(
        &self,
        request: &CreateSessionRequest,
    ) -> Result<CreateSessionResponse, RemoteError> {
        self.send("POST", "sessions", request, None)
    }

    fn add_scans(
        &self,
        short_code: &str,
        scans: &[ScanItem],
    ) -> Result<AddScansResponse, RemoteError> {
        let body = AddScansRequest { scans: scans.to_vec() };
        self.send("POST", &format!("sessions/{short_code}/scans"), &body, Some(short_code))
    }

    fn delete_scans(&self, short_code: &str, codes: &[String]) -> Result<(), RemoteError> {
        let body = DeleteScansRequest { codes: codes.to_vec() };
        let path = format!("sessions/{short_code}/scans");
        let _: serde_json::Value = self.send("DELETE", &path, &body, Some(short_code))?;
        Ok(())
    }
}
