//! Request and response bodies of the session HTTP API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::scan_model::{ScanItem, SessionFlags};

/// `POST /sessions`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub scans: Vec<ScanItem>,
    #[serde(flatten)]
    pub flags: SessionFlags,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
    pub short_code: String,
    pub access_code: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub total_scans: usize,
    #[serde(flatten)]
    pub flags: SessionFlags,
}

/// `POST /sessions/{shortCode}/scans`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddScansRequest {
    pub scans: Vec<ScanItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddScansResponse {
    pub short_code: String,
    pub total_scans: usize,
}

/// `DELETE /sessions/{shortCode}/scans`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteScansRequest {
    #[serde(alias = "eans")]
    pub codes: Vec<String>,
}

/// `POST /viewer/{shortCode}/verify`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyAccessRequest {
    pub access_code: String,
}

/// One persisted scan row as returned by the read paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRow {
    pub id: u64,
    #[serde(flatten)]
    pub item: ScanItem,
    pub scanned_at: DateTime<Utc>,
}

/// `GET /sessions/{shortCode}`: the session with its rows in insertion order.
/// The access code is never part of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub short_code: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub flags: SessionFlags,
    pub scans: Vec<ScanRow>,
}

/// Body returned by a successful viewer verification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewerPayload {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub created_at: DateTime<Utc>,
    pub scans: Vec<ScanRow>,
}

impl From<SessionView> for ViewerPayload {
    fn from(view: SessionView) -> Self {
        Self {
            name: view.name,
            kind: view.kind,
            created_at: view.created_at,
            scans: view.scans,
        }
    }
}
