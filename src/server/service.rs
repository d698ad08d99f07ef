//! Server-side session operations: create, merge deltas, delete, read, verify
//! and export.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::config::ServiceConfig;
use crate::error::ServiceError;
use crate::scan_model::{ScanItem, ScanDetails};
use crate::server::repository::{SessionRepository, StoredSession};
use crate::session_store::Clock;
use crate::wire::{
    AddScansResponse, CreateSessionRequest, CreateSessionResponse, SessionView, ViewerPayload,
};

/// A column of the export table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExportColumn {
    Code,
    Quantity,
    InternalCode,
    ProductName,
    Price,
}

impl ExportColumn {
    pub const ALL: [ExportColumn; 5] = [
        ExportColumn::Code,
        ExportColumn::Quantity,
        ExportColumn::InternalCode,
        ExportColumn::ProductName,
        ExportColumn::Price,
    ];

    pub fn parse(name: &str) -> Option<Self> {
        match name.trim() {
            "code" | "ean" => Some(ExportColumn::Code),
            "quantity" => Some(ExportColumn::Quantity),
            "internalCode" => Some(ExportColumn::InternalCode),
            "productName" => Some(ExportColumn::ProductName),
            "price" => Some(ExportColumn::Price),
            _ => None,
        }
    }

    /// Resolves a field selection. Unknown names are skipped, repeats
    /// collapse, and an empty result selects every column.
    pub fn select<S: AsRef<str>>(fields: &[S]) -> Vec<Self> {
        let mut columns = Vec::new();
        for column in fields.iter().filter_map(|f| Self::parse(f.as_ref())) {
            if !columns.contains(&column) {
                columns.push(column);
            }
        }
        if columns.is_empty() {
            columns = Self::ALL.to_vec();
        }
        columns
    }

    fn value(self, item: &ScanItem) -> Value {
        match self {
            ExportColumn::Code => Value::from(item.code.clone()),
            ExportColumn::Quantity => Value::from(item.quantity),
            ExportColumn::InternalCode => {
                item.internal_code.clone().map_or(Value::Null, Value::from)
            }
            ExportColumn::ProductName => item.product_name.clone().map_or(Value::Null, Value::from),
            ExportColumn::Price => item.price.map_or(Value::Null, Value::from),
        }
    }
}

/// Export rows projected onto the selected columns, in insertion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportTable {
    pub columns: Vec<ExportColumn>,
    pub rows: Vec<Vec<Value>>,
}

pub struct RemoteSessionService<R> {
    repo: R,
    config: ServiceConfig,
    clock: Clock,
}

impl<R: SessionRepository> RemoteSessionService<R> {
    pub fn new(repo: R, config: ServiceConfig) -> Self {
        Self::with_clock(repo, config, Arc::new(Utc::now))
    }

    pub fn with_clock(repo: R, config: ServiceConfig, clock: Clock) -> Self {
        Self { repo, config, clock }
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    pub fn create_session(
        &self,
        request: &CreateSessionRequest,
    ) -> Result<CreateSessionResponse, ServiceError> {
        let name = request.name.trim();
        if name.is_empty() {
            return Err(ServiceError::Validation("session name must not be empty".to_string()));
        }
        let scans = validated(&request.scans)?;

        let now = self.now();
        let mut session = StoredSession {
            short_code: String::new(),
            access_code: generate_access_code(),
            name: name.to_string(),
            kind: request.kind.clone().filter(|k| !k.trim().is_empty()),
            flags: request.flags,
            created_at: now,
            next_row_id: 0,
            scans: Vec::new(),
        };
        session.merge(&scans, now);

        let attempts = self.config.short_code_attempts.max(1);
        for _ in 0..attempts {
            session.short_code = generate_short_code();
            if self.repo.insert(session.clone())? {
                info!(
                    "Created remote session {} with {} rows",
                    session.short_code,
                    session.scans.len()
                );
                return Ok(CreateSessionResponse {
                    short_code: session.short_code,
                    access_code: session.access_code,
                    name: session.name,
                    kind: session.kind,
                    total_scans: session.scans.len(),
                    flags: session.flags,
                });
            }
            debug!("Short code {} already taken; drawing another", session.short_code);
        }
        Err(ServiceError::ShortCodeExhausted(attempts))
    }

    /// Merges a delta into an existing session.
    pub fn add_scans(
        &self,
        short_code: &str,
        scans: &[ScanItem],
    ) -> Result<AddScansResponse, ServiceError> {
        let scans = validated(scans)?;
        let now = self.now();
        let mut total_scans = 0;

        let found = self.repo.modify(short_code, &mut |session| {
            let inserted = session.merge(&scans, now);
            total_scans = session.scans.len();
            debug!("Merged {} codes into {short_code} ({inserted} new rows)", scans.len());
        })?;
        if !found {
            return Err(ServiceError::NotFound(short_code.to_string()));
        }

        Ok(AddScansResponse {
            short_code: short_code.to_string(),
            total_scans,
        })
    }

    /// Removes rows by code. Codes without a row are ignored; returns how many
    /// rows were removed.
    pub fn delete_scans(&self, short_code: &str, codes: &[String]) -> Result<usize, ServiceError> {
        let mut removed = 0;
        let found = self.repo.modify(short_code, &mut |session| {
            removed = session.remove(codes);
        })?;
        if !found {
            return Err(ServiceError::NotFound(short_code.to_string()));
        }
        debug!("Deleted {removed} rows from {short_code}");
        Ok(removed)
    }

    pub fn get_session(&self, short_code: &str) -> Result<SessionView, ServiceError> {
        Ok(self.load(short_code)?.view())
    }

    /// `None` when the access code does not match.
    pub fn verify_access(
        &self,
        short_code: &str,
        access_code: &str,
    ) -> Result<Option<ViewerPayload>, ServiceError> {
        let session = self.load(short_code)?;
        if session.access_code != access_code.trim() {
            return Ok(None);
        }
        Ok(Some(session.view().into()))
    }

    pub fn export_rows<S: AsRef<str>>(
        &self,
        short_code: &str,
        fields: &[S],
    ) -> Result<ExportTable, ServiceError> {
        let session = self.load(short_code)?;
        let columns = ExportColumn::select(fields);
        let rows = session
            .rows()
            .iter()
            .map(|row| columns.iter().map(|c| c.value(&row.item)).collect())
            .collect();
        Ok(ExportTable { columns, rows })
    }

    fn load(&self, short_code: &str) -> Result<StoredSession, ServiceError> {
        self.repo
            .load(short_code)?
            .ok_or_else(|| ServiceError::NotFound(short_code.to_string()))
    }
}

/// Trims codes and descriptive fields; a blank code rejects the whole batch.
fn validated(scans: &[ScanItem]) -> Result<Vec<ScanItem>, ServiceError> {
    scans
        .iter()
        .map(|item| {
            let code = item.code.trim();
            if code.is_empty() {
                return Err(ServiceError::Validation("scan code must not be empty".to_string()));
            }
            let details: ScanDetails = item.details().normalized();
            Ok(ScanItem {
                code: code.to_string(),
                quantity: item.quantity,
                internal_code: details.internal_code,
                product_name: details.product_name,
                price: details.price,
            })
        })
        .collect()
}

/// Six lowercase hex characters.
fn generate_short_code() -> String {
    let bytes = Uuid::new_v4().into_bytes();
    format!("{:02x}{:02x}{:02x}", bytes[0], bytes[1], bytes[2])
}

/// Four digits, 1000..=9999.
fn generate_access_code() -> String {
    let bytes = Uuid::new_v4().into_bytes();
    let n = u16::from_be_bytes([bytes[10], bytes[11]]) % 9000 + 1000;
    n.to_string()
}
