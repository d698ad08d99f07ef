//! Data model for scanning sessions.
//!
//! The client keeps one list of [`TrackedScan`]s per session. Each entry carries
//! an explicit [`SyncTag`] and the quantity the remote service is known to hold,
//! and the `pendingScans` / `allScans` / `pendingDeletes` lists are derived views
//! over that single list. All JSON shapes use camelCase field names so they line
//! up with the HTTP payloads and the FFI responses.

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregator::{self, Tally};

/// One counted barcode.
///
/// `code` is unique within a list. Descriptive fields are free-form and are
/// never summed, only overwritten when a new value is present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanItem {
    #[serde(alias = "ean")]
    pub code: String,
    pub quantity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
}

impl ScanItem {
    pub fn new(code: impl Into<String>, quantity: u32) -> Self {
        Self {
            code: code.into(),
            quantity,
            internal_code: None,
            product_name: None,
            price: None,
        }
    }

    pub fn with_details(mut self, details: &ScanDetails) -> Self {
        self.overlay(details);
        self
    }

    pub fn details(&self) -> ScanDetails {
        ScanDetails {
            internal_code: self.internal_code.clone(),
            product_name: self.product_name.clone(),
            price: self.price,
        }
    }

    pub fn has_details(&self) -> bool {
        !self.details().is_empty()
    }

    /// Overwrites descriptive fields with the values present in `details`.
    pub fn overlay(&mut self, details: &ScanDetails) {
        if let Some(internal_code) = &details.internal_code {
            self.internal_code = Some(internal_code.clone());
        }
        if let Some(product_name) = &details.product_name {
            self.product_name = Some(product_name.clone());
        }
        if let Some(price) = details.price {
            self.price = Some(price);
        }
    }
}

impl Tally for ScanItem {
    fn code(&self) -> &str {
        &self.code
    }

    fn absorb(&mut self, quantity: u32, details: &ScanDetails) {
        self.quantity = self.quantity.saturating_add(quantity);
        self.overlay(details);
    }
}

/// Optional per-item descriptive fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
}

impl ScanDetails {
    pub fn is_empty(&self) -> bool {
        self.internal_code.is_none() && self.product_name.is_none() && self.price.is_none()
    }

    /// Trims text fields and treats blank text as absent.
    pub fn normalized(self) -> Self {
        fn clean(value: Option<String>) -> Option<String> {
            value
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        }

        Self {
            internal_code: clean(self.internal_code),
            product_name: clean(self.product_name),
            price: self.price.filter(|p| p.is_finite()),
        }
    }
}

/// Edit applied through `update_details`: an optional new quantity plus
/// descriptive fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailsUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<u32>,
    #[serde(flatten)]
    pub details: ScanDetails,
}

/// Which optional per-item fields the UI asks for after each scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionFlags {
    #[serde(default)]
    pub ask_internal_code: bool,
    #[serde(default)]
    pub ask_product_name: bool,
    #[serde(default)]
    pub ask_price: bool,
}

impl SessionFlags {
    pub fn any(&self) -> bool {
        self.ask_internal_code || self.ask_product_name || self.ask_price
    }
}

/// Identity and configuration of a scanning session.
///
/// `short_code` and `access_code` are assigned together by
/// [`assign_remote`](SessionMeta::assign_remote); a session with no short code
/// has never been synced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMeta {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub short_code: Option<String>,
    pub access_code: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub flags: SessionFlags,
}

impl SessionMeta {
    pub fn new(
        name: impl Into<String>,
        kind: impl Into<String>,
        flags: SessionFlags,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
            name: name.into(),
            kind: kind.into(),
            short_code: None,
            access_code: None,
            created_at: now,
            flags,
        }
    }

    pub fn is_synced(&self) -> bool {
        self.short_code.is_some()
    }

    pub fn assign_remote(&mut self, short_code: impl Into<String>, access_code: impl Into<String>) {
        self.short_code = Some(short_code.into());
        self.access_code = Some(access_code.into());
    }

    pub fn is_expired(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> bool {
        now.signed_duration_since(self.created_at) > ttl
    }

    pub fn apply(&mut self, patch: &SessionMetaPatch) {
        if let Some(name) = &patch.name {
            self.name = name.clone();
        }
        if let Some(kind) = &patch.kind {
            self.kind = kind.clone();
        }
        match (&patch.short_code, &patch.access_code) {
            (Some(short_code), Some(access_code)) => self.assign_remote(short_code, access_code),
            (None, None) => {}
            _ => warn!(
                "Ignoring partial remote identifiers for session {}: both codes are required",
                self.id
            ),
        }
        if let Some(ask) = patch.ask_internal_code {
            self.flags.ask_internal_code = ask;
        }
        if let Some(ask) = patch.ask_product_name {
            self.flags.ask_product_name = ask;
        }
        if let Some(ask) = patch.ask_price {
            self.flags.ask_price = ask;
        }
    }
}

/// Partial update merged into the active [`SessionMeta`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetaPatch {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub short_code: Option<String>,
    pub access_code: Option<String>,
    pub ask_internal_code: Option<bool>,
    pub ask_product_name: Option<bool>,
    pub ask_price: Option<bool>,
}

impl SessionMetaPatch {
    pub fn flags(flags: SessionFlags) -> Self {
        Self {
            ask_internal_code: Some(flags.ask_internal_code),
            ask_product_name: Some(flags.ask_product_name),
            ask_price: Some(flags.ask_price),
            ..Self::default()
        }
    }
}

/// Sync status of one tracked item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncTag {
    /// Local values equal what the remote service holds.
    Synced,
    /// Not on the remote service yet.
    PendingCreate,
    /// On the remote service, with local edits not yet sent.
    PendingUpdate,
    /// Removed locally, still on the remote service. Hidden from `all_scans`.
    PendingDelete,
}

impl SyncTag {
    pub fn is_pending(self) -> bool {
        !matches!(self, SyncTag::Synced)
    }
}

/// A [`ScanItem`] plus its sync bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedScan {
    #[serde(flatten)]
    pub item: ScanItem,
    pub sync: SyncTag,
    /// Quantity the remote service holds for this code; 0 when it has no row.
    #[serde(default)]
    pub remote_quantity: u32,
    /// Scanned again after a local removal. The remote row still carries the
    /// old descriptive fields, so it has to be replaced rather than topped up.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub replace_remote: bool,
}

impl TrackedScan {
    pub fn fresh(item: ScanItem) -> Self {
        Self {
            item,
            sync: SyncTag::PendingCreate,
            remote_quantity: 0,
            replace_remote: false,
        }
    }

    pub fn is_live(&self) -> bool {
        self.sync != SyncTag::PendingDelete
    }

    pub fn on_remote(&self) -> bool {
        self.remote_quantity > 0
    }

    /// Marks a local edit: anything the remote side already holds becomes
    /// pending again.
    fn touch(&mut self) {
        self.sync = if self.on_remote() {
            SyncTag::PendingUpdate
        } else {
            SyncTag::PendingCreate
        };
    }
}

impl Tally for TrackedScan {
    fn code(&self) -> &str {
        &self.item.code
    }

    fn absorb(&mut self, quantity: u32, details: &ScanDetails) {
        self.item.absorb(quantity, details);
        self.touch();
    }
}

/// Live working state of the active session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub session: Option<SessionMeta>,
    #[serde(default)]
    pub items: Vec<TrackedScan>,
}

impl SessionState {
    pub fn new(session: SessionMeta) -> Self {
        Self {
            session: Some(session),
            items: Vec::new(),
        }
    }

    /// Items not yet acknowledged by the remote service, with their current
    /// local values.
    pub fn pending_scans(&self) -> Vec<ScanItem> {
        self.items
            .iter()
            .filter(|t| matches!(t.sync, SyncTag::PendingCreate | SyncTag::PendingUpdate))
            .map(|t| t.item.clone())
            .collect()
    }

    /// Every item visible locally.
    pub fn all_scans(&self) -> Vec<ScanItem> {
        self.items
            .iter()
            .filter(|t| t.is_live())
            .map(|t| t.item.clone())
            .collect()
    }

    /// Codes removed locally that still have to be deleted remotely.
    pub fn pending_deletes(&self) -> Vec<String> {
        self.items
            .iter()
            .filter(|t| !t.is_live())
            .map(|t| t.item.code.clone())
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.items.iter().filter(|t| t.sync.is_pending()).count()
    }

    pub fn has_pending(&self) -> bool {
        self.items.iter().any(|t| t.sync.is_pending())
    }

    pub fn find(&self, code: &str) -> Option<&TrackedScan> {
        self.items.iter().find(|t| t.item.code == code)
    }

    fn live_mut(&mut self, code: &str) -> Option<&mut TrackedScan> {
        self.items.iter_mut().find(|t| t.item.code == code && t.is_live())
    }

    /// Counts one scan of `code`. Returns `true` when the code was not visible
    /// before.
    pub fn add_scan(&mut self, code: &str) -> bool {
        let tombstone = self.items.iter_mut().find(|t| t.item.code == code && !t.is_live());
        if let Some(tombstone) = tombstone {
            // Re-scanned after a local removal: starts over at 1 while the
            // remote row is still pending deletion.
            tombstone.item = ScanItem::new(code, 1);
            tombstone.sync = SyncTag::PendingUpdate;
            tombstone.replace_remote = true;
            debug!("Revived removed code {code}");
            return true;
        }
        aggregator::merge(&mut self.items, code, TrackedScan::fresh)
    }

    /// Removes `code` from the visible list. Codes the remote side holds are
    /// kept as pending deletions; anything else is dropped outright.
    pub fn remove_scan(&mut self, code: &str) {
        let Some(index) = self.items.iter().position(|t| t.item.code == code && t.is_live()) else {
            return;
        };
        let synced = self.session.as_ref().is_some_and(SessionMeta::is_synced);
        if synced && self.items[index].on_remote() {
            self.items[index].sync = SyncTag::PendingDelete;
        } else {
            self.items.remove(index);
        }
    }

    /// Sets an absolute quantity. Zero is rejected; use `remove_scan`.
    pub fn update_quantity(&mut self, code: &str, quantity: u32) -> bool {
        if quantity == 0 {
            warn!("Ignoring zero quantity for {code}");
            return false;
        }
        match self.live_mut(code) {
            Some(tracked) => {
                tracked.item.quantity = quantity;
                tracked.touch();
                true
            }
            None => false,
        }
    }

    pub fn update_details(&mut self, code: &str, update: &DetailsUpdate) -> bool {
        if update.quantity == Some(0) {
            warn!("Ignoring zero quantity for {code}");
            return false;
        }
        let details = update.details.clone().normalized();
        match self.live_mut(code) {
            Some(tracked) => {
                if let Some(quantity) = update.quantity {
                    tracked.item.quantity = quantity;
                }
                tracked.item.overlay(&details);
                tracked.touch();
                true
            }
            None => false,
        }
    }

    /// Marks everything as acknowledged by the remote service.
    pub fn clear_pending(&mut self) {
        self.items.retain(TrackedScan::is_live);
        for tracked in &mut self.items {
            tracked.sync = SyncTag::Synced;
            tracked.remote_quantity = tracked.item.quantity;
            tracked.replace_remote = false;
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session: self.session.clone(),
            pending_scans: self.pending_scans(),
            all_scans: self.all_scans(),
            pending_deletes: self.pending_deletes(),
        }
    }
}

/// The three list views of a session, as shown to the UI.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session: Option<SessionMeta>,
    pub pending_scans: Vec<ScanItem>,
    pub all_scans: Vec<ScanItem>,
    pub pending_deletes: Vec<String>,
}

/// A resumable session kept in the history log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub session: SessionMeta,
    #[serde(default)]
    pub items: Vec<TrackedScan>,
    /// When the entry first entered the history; fixes its position.
    pub listed_at: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn to_state(&self) -> SessionState {
        SessionState {
            session: Some(self.session.clone()),
            items: self.items.clone(),
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.to_state().snapshot()
    }
}
