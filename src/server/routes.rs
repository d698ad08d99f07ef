//! Transport-agnostic request routing for the session HTTP API.
//!
//! An HTTP front end parses the request line and JSON body into an
//! [`ApiRequest`], calls [`dispatch`] and writes the [`ApiReply`] back.
//! Paths may carry an `/api` prefix. Errors are `{"error": message}` bodies
//! with the status taken from [`AppResponse::status`].

use log::warn;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::app_response::AppResponse;
use crate::server::repository::SessionRepository;
use crate::server::service::RemoteSessionService;
use crate::wire::{AddScansRequest, CreateSessionRequest, DeleteScansRequest, VerifyAccessRequest};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiRequest {
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn new(method: &str, path: &str) -> Self {
        // The query may arrive attached to the path.
        let (path, query) = match path.split_once('?') {
            Some((path, query)) => (path, Some(query.to_string())),
            None => (path, None),
        };
        Self {
            method: method.to_ascii_uppercase(),
            path: path.to_string(),
            query,
            body: None,
        }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    fn query_param(&self, name: &str) -> Option<String> {
        self.query.as_deref()?.split('&').find_map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (key == name).then(|| value.replace("%2C", ",").replace("%2c", ",").replace('+', " "))
        })
    }

    fn json<T: DeserializeOwned>(&self) -> Result<T, AppResponse> {
        let body = self
            .body
            .clone()
            .ok_or_else(|| AppResponse::BadRequest("Missing JSON body".to_string()))?;
        serde_json::from_value(body).map_err(AppResponse::from)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiReply {
    pub status: u16,
    pub body: Value,
}

impl ApiReply {
    fn ok<T: Serialize>(status: u16, body: &T) -> Self {
        match serde_json::to_value(body) {
            Ok(body) => Self { status, body },
            Err(e) => Self::error(AppResponse::from(e)),
        }
    }

    fn error(response: AppResponse) -> Self {
        Self {
            status: response.status(),
            body: json!({ "error": response.to_string() }),
        }
    }
}

pub fn dispatch<R: SessionRepository>(
    service: &RemoteSessionService<R>,
    request: &ApiRequest,
) -> ApiReply {
    match route(service, request) {
        Ok(reply) => reply,
        Err(response) => {
            if response.status() >= 500 {
                warn!("{} {} failed: {}", request.method, request.path, response);
            }
            ApiReply::error(response)
        }
    }
}

fn route<R: SessionRepository>(
    service: &RemoteSessionService<R>,
    request: &ApiRequest,
) -> Result<ApiReply, AppResponse> {
    let path = request.path.trim_matches('/');
    let path = path.strip_prefix("api/").unwrap_or(path);
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let method = request.method.as_str();

    match (segments.as_slice(), method) {
        (["sessions"], "POST") => {
            let body: CreateSessionRequest = request.json()?;
            Ok(ApiReply::ok(201, &service.create_session(&body)?))
        }
        (["sessions", code, "scans"], "POST") => {
            let body: AddScansRequest = request.json()?;
            Ok(ApiReply::ok(200, &service.add_scans(code, &body.scans)?))
        }
        (["sessions", code, "scans"], "DELETE") => {
            let body: DeleteScansRequest = request.json()?;
            let deleted = service.delete_scans(code, &body.codes)?;
            Ok(ApiReply::ok(200, &json!({ "ok": true, "deleted": deleted })))
        }
        (["sessions", code], "GET") => Ok(ApiReply::ok(200, &service.get_session(code)?)),
        (["sessions", code, "export"], "GET") => {
            let fields: Vec<String> = request
                .query_param("fields")
                .map(|f| f.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_default();
            Ok(ApiReply::ok(200, &service.export_rows(code, &fields)?))
        }
        ([viewer, code, "verify"], "POST") if *viewer == "viewer" || *viewer == "i" => {
            let body: VerifyAccessRequest = request.json()?;
            match service.verify_access(code, &body.access_code)? {
                Some(payload) => Ok(ApiReply::ok(200, &payload)),
                None => Err(AppResponse::Unauthorized("Invalid access code".to_string())),
            }
        }
        (["sessions"] | ["sessions", _] | ["sessions", _, "scans" | "export"], _) => Ok(ApiReply {
            status: 405,
            body: json!({ "error": format!("Method {method} not allowed") }),
        }),
        ([viewer, _, "verify"], _) if *viewer == "viewer" || *viewer == "i" => Ok(ApiReply {
            status: 405,
            body: json!({ "error": format!("Method {method} not allowed") }),
        }),
        _ => Err(AppResponse::NotFound(format!("No route for {}", request.path))),
    }
}
