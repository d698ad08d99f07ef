//! # Scan Session Core
//!
//! Offline-first barcode scanning sessions for mobile hosts, exposed over FFI.
//! Scans are counted into an LMDB-backed local session that survives restarts,
//! and are pushed to a small session service whenever the host asks for a sync.
//!
//! ## Features
//!
//! - **Offline-first store**: the active session and a bounded history live in LMDB;
//!   every edit is a single write transaction
//! - **Deferred sync**: pending creates, updates and deletes are tracked per code and
//!   only cleared once the remote service acknowledged them
//! - **Server-side merge**: the same aggregation rules back the remote session service,
//!   with an in-memory and an LMDB repository
//! - **FFI-friendly**: every call returns a JSON [`AppResponse`] string
//!
//! ## Quick Start
//!
//! ```no_run
//! use scan_session_core::{add_scan, create_store, free_response, get_state, start_session};
//! use std::ffi::CString;
//!
//! let config = r#"{"store":{"path":"scans"},"sync":{"baseUrl":"http://localhost:3001/api"}}"#;
//! let config = CString::new(config).unwrap();
//! let client = create_store(config.as_ptr());
//!
//! let session = CString::new(r#"{"name":"Warehouse A","type":"stock"}"#).unwrap();
//! free_response(start_session(client, session.as_ptr()));
//!
//! let code = CString::new("0123456789012").unwrap();
//! free_response(add_scan(client, code.as_ptr()));
//! let state = get_state(client);
//! ```
//!
//! ## FFI Functions
//!
//! - [`create_store`] / [`close_store`] - Handle lifecycle
//! - [`start_session`], [`resume_session`], [`get_state`] - Session lifecycle
//! - [`add_scan`], [`scan_decoded`], [`remove_scan`] - Scan input
//! - [`update_quantity`], [`update_details`] - Item edits
//! - [`set_session_meta`], [`clear_pending`], [`clear_active`] - Session bookkeeping
//! - [`list_history`], [`delete_history_entry`] - History
//! - [`sync_session`], [`sync_status`] - Reconciliation
//! - [`free_response`] - Releases any string returned by the functions above

pub mod aggregator;
pub mod app_response;
pub mod client;
pub mod config;
pub mod error;
pub mod http_remote;
pub mod local_db;
pub mod scan_feed;
pub mod scan_model;
pub mod server;
pub mod session_store;
pub mod sync;
pub mod wire;

use std::ffi::{CStr, CString};
use std::os::raw::c_char;

use log::{info, warn};
use serde::Serialize;

use crate::app_response::AppResponse;
use crate::client::{ScanClient, StartSession};
use crate::config::ClientConfig;
use crate::scan_model::{DetailsUpdate, HistoryEntry, SessionMetaPatch};
use crate::sync::SyncOutcome;

pub use crate::error::{RemoteError, ServiceError, StoreError, SyncError};
pub use crate::scan_model::{ScanItem, SessionMeta, SessionSnapshot, SessionState, SyncTag};
pub use crate::session_store::SessionStore;
pub use crate::sync::{SyncReconciler, SyncStatus};

/// Opens the local store and returns an opaque client handle.
///
/// `config_json` is a [`ClientConfig`] document; `{}` opens `scan_sessions.lmdb`
/// in the working directory without sync.
///
/// # Returns
///
/// A pointer owned by the caller, to be released with [`close_store`], or null
/// when the config is missing, unreadable, or the store cannot be opened.
///
/// # Examples
///
/// ```no_run
/// use std::ffi::CString;
/// use scan_session_core::create_store;
///
/// let config = CString::new(r#"{"store":{"path":"scans.lmdb","expiryHours":24}}"#).unwrap();
/// let client = create_store(config.as_ptr());
/// assert!(!client.is_null());
/// ```
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn create_store(config_json: *const c_char) -> *mut ScanClient {
    if config_json.is_null() {
        warn!("Null config pointer passed to create_store");
        return std::ptr::null_mut();
    }

    let config_str = match unsafe { CStr::from_ptr(config_json).to_str() } {
        Ok(s) => s,
        Err(e) => {
            warn!("Invalid UTF-8 in config parameter: {e}");
            return std::ptr::null_mut();
        }
    };

    let config: ClientConfig = match serde_json::from_str(config_str) {
        Ok(config) => config,
        Err(e) => {
            warn!("❌ Invalid store config: {e}");
            return std::ptr::null_mut();
        }
    };

    match ScanClient::open(config) {
        Ok(client) => {
            info!("✅ Scan store initialized successfully");
            Box::into_raw(Box::new(client))
        }
        Err(e) => {
            warn!("❌ Failed to initialize scan store: {e}");
            std::ptr::null_mut()
        }
    }
}

/// Starts a new session and makes it the active one.
///
/// # JSON Format
///
/// ```json
/// { "name": "Warehouse A", "type": "stock", "askProductName": true }
/// ```
///
/// Returns the new session's metadata. A blank name is a `ValidationError`.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn start_session(client: *mut ScanClient, json_ptr: *const c_char) -> *const c_char {
    let client = match client_ref(client, "start_session") {
        Ok(client) => client,
        Err(err) => return err,
    };
    let request: StartSession = match parse_json(json_ptr, "session JSON") {
        Ok(request) => request,
        Err(err) => return err,
    };

    if request.name.trim().is_empty() {
        let error = AppResponse::ValidationError("Session name must not be empty".to_string());
        return response_to_c_string(&error);
    }

    match client.store().start(&request.name, &request.kind, request.flags) {
        Ok(meta) => json_response(&meta),
        Err(e) => response_to_c_string(&AppResponse::from(e)),
    }
}

/// Makes a history entry the active session again, with its sync status as stored.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn resume_session(client: *mut ScanClient, id: *const c_char) -> *const c_char {
    let client = match client_ref(client, "resume_session") {
        Ok(client) => client,
        Err(err) => return err,
    };
    let id = match c_ptr_to_string(id, "id") {
        Ok(id) => id,
        Err(err) => return err,
    };

    match client.store().resume_by_id(&id) {
        Ok(true) => snapshot_response(client),
        Ok(false) => {
            let error = AppResponse::NotFound(format!("No session in history with id: {id}"));
            response_to_c_string(&error)
        }
        Err(e) => response_to_c_string(&AppResponse::from(e)),
    }
}

/// Returns the active session as a [`SessionSnapshot`]:
///
/// ```json
/// { "session": {...} | null, "pendingScans": [...], "allScans": [...], "pendingDeletes": [...] }
/// ```
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn get_state(client: *mut ScanClient) -> *const c_char {
    match client_ref(client, "get_state") {
        Ok(client) => snapshot_response(client),
        Err(err) => err,
    }
}

/// Counts one scan of a manually entered code. Never debounced.
///
/// Returns `{code, isNew, needsDetails}`; `BadRequest` when there is no active
/// session or the code is blank.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn add_scan(client: *mut ScanClient, code: *const c_char) -> *const c_char {
    let client = match client_ref(client, "add_scan") {
        Ok(client) => client,
        Err(err) => return err,
    };
    let code = match c_ptr_to_string(code, "code") {
        Ok(code) => code,
        Err(err) => return err,
    };

    match client.feed().submit_manual(client.store(), &code) {
        Ok(Some(feedback)) => json_response(&feedback),
        Ok(None) => {
            let error = AppResponse::BadRequest("No active session or blank code".to_string());
            response_to_c_string(&error)
        }
        Err(e) => response_to_c_string(&AppResponse::from(e)),
    }
}

/// Camera detection callback. Repeats of the same code inside the debounce
/// window return `Ok` with a `null` payload.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn scan_decoded(client: *mut ScanClient, text: *const c_char) -> *const c_char {
    let client = match client_ref(client, "scan_decoded") {
        Ok(client) => client,
        Err(err) => return err,
    };
    let text = match c_ptr_to_string(text, "text") {
        Ok(text) => text,
        Err(err) => return err,
    };

    match client.feed().on_decoded(client.store(), &text) {
        Ok(feedback) => json_response(&feedback),
        Err(e) => response_to_c_string(&AppResponse::from(e)),
    }
}

#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn remove_scan(client: *mut ScanClient, code: *const c_char) -> *const c_char {
    let client = match client_ref(client, "remove_scan") {
        Ok(client) => client,
        Err(err) => return err,
    };
    let code = match c_ptr_to_string(code, "code") {
        Ok(code) => code,
        Err(err) => return err,
    };

    match client.store().remove_scan(code.trim()) {
        Ok(()) => snapshot_response(client),
        Err(e) => response_to_c_string(&AppResponse::from(e)),
    }
}

/// Sets the absolute quantity of a visible code. Zero is a `ValidationError`;
/// use [`remove_scan`] instead.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn update_quantity(
    client: *mut ScanClient,
    code: *const c_char,
    quantity: u32,
) -> *const c_char {
    let client = match client_ref(client, "update_quantity") {
        Ok(client) => client,
        Err(err) => return err,
    };
    let code = match c_ptr_to_string(code, "code") {
        Ok(code) => code,
        Err(err) => return err,
    };

    if quantity == 0 {
        let error = AppResponse::ValidationError("Quantity must be at least 1".to_string());
        return response_to_c_string(&error);
    }

    match client.store().update_quantity(code.trim(), quantity) {
        Ok(true) => snapshot_response(client),
        Ok(false) => {
            let error = AppResponse::NotFound(format!("No scanned item with code: {code}"));
            response_to_c_string(&error)
        }
        Err(e) => response_to_c_string(&AppResponse::from(e)),
    }
}

/// Overlays descriptive fields (and optionally the quantity) on a visible code.
///
/// # JSON Format
///
/// ```json
/// { "quantity": 3, "internalCode": "INT-9", "productName": "Milk", "price": 2.5 }
/// ```
///
/// Absent fields keep their value; blank strings are stored as absent.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn update_details(
    client: *mut ScanClient,
    code: *const c_char,
    json_ptr: *const c_char,
) -> *const c_char {
    let client = match client_ref(client, "update_details") {
        Ok(client) => client,
        Err(err) => return err,
    };
    let code = match c_ptr_to_string(code, "code") {
        Ok(code) => code,
        Err(err) => return err,
    };
    let update: DetailsUpdate = match parse_json(json_ptr, "details JSON") {
        Ok(update) => update,
        Err(err) => return err,
    };

    if update.quantity == Some(0) {
        let error = AppResponse::ValidationError("Quantity must be at least 1".to_string());
        return response_to_c_string(&error);
    }

    match client.store().update_details(code.trim(), &update) {
        Ok(true) => snapshot_response(client),
        Ok(false) => {
            let error = AppResponse::NotFound(format!("No scanned item with code: {code}"));
            response_to_c_string(&error)
        }
        Err(e) => response_to_c_string(&AppResponse::from(e)),
    }
}

/// Merges a partial [`SessionMetaPatch`] into the active session.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn set_session_meta(
    client: *mut ScanClient,
    json_ptr: *const c_char,
) -> *const c_char {
    let client = match client_ref(client, "set_session_meta") {
        Ok(client) => client,
        Err(err) => return err,
    };
    let patch: SessionMetaPatch = match parse_json(json_ptr, "meta JSON") {
        Ok(patch) => patch,
        Err(err) => return err,
    };

    match client.store().set_session_meta(&patch) {
        Ok(()) => snapshot_response(client),
        Err(e) => response_to_c_string(&AppResponse::from(e)),
    }
}

/// Marks every pending item of the active session as acknowledged.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn clear_pending(client: *mut ScanClient) -> *const c_char {
    let client = match client_ref(client, "clear_pending") {
        Ok(client) => client,
        Err(err) => return err,
    };

    match client.store().clear_pending() {
        Ok(()) => snapshot_response(client),
        Err(e) => response_to_c_string(&AppResponse::from(e)),
    }
}

/// Closes the active session. It stays resumable from the history.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn clear_active(client: *mut ScanClient) -> *const c_char {
    let client = match client_ref(client, "clear_active") {
        Ok(client) => client,
        Err(err) => return err,
    };

    match client.store().clear_active() {
        Ok(_) => response_to_c_string(&AppResponse::success("Active session cleared")),
        Err(e) => response_to_c_string(&AppResponse::from(e)),
    }
}

/// Lists the resumable sessions, most recent first, in the same shape as
/// [`get_state`]. Expired entries are pruned.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn list_history(client: *mut ScanClient) -> *const c_char {
    let client = match client_ref(client, "list_history") {
        Ok(client) => client,
        Err(err) => return err,
    };

    match client.store().list_history() {
        Ok(entries) => {
            let snapshots: Vec<SessionSnapshot> =
                entries.iter().map(HistoryEntry::snapshot).collect();
            json_response(&snapshots)
        }
        Err(e) => response_to_c_string(&AppResponse::from(e)),
    }
}

#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn delete_history_entry(
    client: *mut ScanClient,
    id: *const c_char,
) -> *const c_char {
    let client = match client_ref(client, "delete_history_entry") {
        Ok(client) => client,
        Err(err) => return err,
    };
    let id = match c_ptr_to_string(id, "id") {
        Ok(id) => id,
        Err(err) => return err,
    };

    match client.store().delete_history_entry(&id) {
        Ok(true) => {
            response_to_c_string(&AppResponse::success(format!("History entry {id} deleted")))
        }
        Ok(false) => {
            let error = AppResponse::NotFound(format!("No history entry with id: {id}"));
            response_to_c_string(&error)
        }
        Err(e) => response_to_c_string(&AppResponse::from(e)),
    }
}

/// Pushes the active session's pending changes to the remote service.
///
/// Blocks for the duration of the HTTP exchange; call it off the UI thread.
///
/// # Returns
///
/// - `Ok` with a sync report (`shortCode`, `accessCode`, counts) on success
/// - `Ok` with a message when nothing was pending or a sync is already running
/// - `TransportError` / `NotFound` when the remote side failed; local state is
///   left untouched and the call can simply be repeated
/// - `BadRequest` when the handle was created without a `sync` section
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn sync_session(client: *mut ScanClient) -> *const c_char {
    let client = match client_ref(client, "sync_session") {
        Ok(client) => client,
        Err(err) => return err,
    };
    let Some(reconciler) = client.reconciler() else {
        return response_to_c_string(&AppResponse::BadRequest("Sync is not configured".to_string()));
    };

    match reconciler.sync() {
        SyncOutcome::Completed(report) => json_response(&report),
        SyncOutcome::NothingToSync => {
            response_to_c_string(&AppResponse::success("Nothing to sync"))
        }
        SyncOutcome::AlreadySyncing => {
            response_to_c_string(&AppResponse::success("Sync already in progress"))
        }
        SyncOutcome::Failed(e) => response_to_c_string(&AppResponse::from(e)),
    }
}

/// Current reconciler state: `{"state":"idle"}`, `{"state":"syncing"}` or
/// `{"state":"error","message":...}`.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn sync_status(client: *mut ScanClient) -> *const c_char {
    let client = match client_ref(client, "sync_status") {
        Ok(client) => client,
        Err(err) => return err,
    };

    match client.reconciler() {
        Some(reconciler) => json_response(&reconciler.status()),
        None => {
            let error = AppResponse::BadRequest("Sync is not configured".to_string());
            response_to_c_string(&error)
        }
    }
}

/// Releases a string returned by any function of this library. Null is ignored.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn free_response(response: *const c_char) {
    if response.is_null() {
        return;
    }
    unsafe {
        drop(CString::from_raw(response as *mut c_char));
    }
}

/// Flushes the store and releases the handle. The pointer must not be used
/// afterwards.
///
/// # Notes
///
/// In LMDB the environment is closed when it is dropped, which happens here.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn close_store(client: *mut ScanClient) -> *const c_char {
    if client.is_null() {
        let error =
            AppResponse::BadRequest("Null client pointer passed to close_store".to_string());
        return response_to_c_string(&error);
    }

    let client = unsafe { Box::from_raw(client) };
    let flushed = client.store().flush();
    drop(client);

    match flushed {
        Ok(()) => response_to_c_string(&AppResponse::success("Store closed successfully")),
        Err(e) => response_to_c_string(&AppResponse::from(e)),
    }
}

fn client_ref<'a>(
    client: *mut ScanClient,
    function: &str,
) -> Result<&'a ScanClient, *const c_char> {
    match unsafe { client.as_ref() } {
        Some(client) => Ok(client),
        None => {
            let error =
                AppResponse::BadRequest(format!("Null client pointer passed to {function}"));
            Err(response_to_c_string(&error))
        }
    }
}

fn snapshot_response(client: &ScanClient) -> *const c_char {
    match client.store().get_state() {
        Ok(state) => json_response(&state.snapshot()),
        Err(e) => response_to_c_string(&AppResponse::from(e)),
    }
}

/// Wraps `value` as the JSON payload of an `Ok` response.
fn json_response<T: Serialize>(value: &T) -> *const c_char {
    match serde_json::to_string(value) {
        Ok(json) => response_to_c_string(&AppResponse::Ok(json)),
        Err(e) => {
            let error = AppResponse::SerializationError(format!("Failed to serialize result: {e}"));
            response_to_c_string(&error)
        }
    }
}

fn parse_json<T: serde::de::DeserializeOwned>(
    ptr: *const c_char,
    field_name: &str,
) -> Result<T, *const c_char> {
    let json = c_ptr_to_string(ptr, field_name)?;
    serde_json::from_str(&json).map_err(|e| {
        let error = AppResponse::SerializationError(format!("Invalid {field_name}: {e}"));
        response_to_c_string(&error)
    })
}

/// Converts an [`AppResponse`] to a C string owned by the caller.
///
/// Returns null if serialization or C string creation fails.
fn response_to_c_string(response: &AppResponse) -> *const c_char {
    let json = match serde_json::to_string(response) {
        Ok(j) => j,
        Err(e) => {
            warn!("Error serializing response: {e}");
            return std::ptr::null();
        }
    };

    match CString::new(json) {
        Ok(c_str) => c_str.into_raw(),
        Err(e) => {
            warn!("Error creating CString: {e}");
            std::ptr::null()
        }
    }
}

/// Copies a C string into a `String`, turning null pointers and invalid UTF-8
/// into a `BadRequest` response.
fn c_ptr_to_string(ptr: *const c_char, field_name: &str) -> Result<String, *const c_char> {
    if ptr.is_null() {
        let error = AppResponse::BadRequest(format!("Null {field_name} pointer"));
        return Err(response_to_c_string(&error));
    }

    match unsafe { CStr::from_ptr(ptr).to_str() } {
        Ok(s) => Ok(s.to_string()),
        Err(e) => {
            let error = AppResponse::BadRequest(format!("Invalid UTF-8 in {field_name}: {e}"));
            Err(response_to_c_string(&error))
        }
    }
}
