//! Deferred reconciliation of the local session with the remote service.
//!
//! A sync attempt reads the current [`SessionState`], turns its pending items
//! into a [`SyncPlan`] and runs the remote protocol:
//!
//! 1. never-synced session: one create request carrying every pending item;
//! 2. synced session: a delete request for removed codes, then an add request
//!    for the pending deltas.
//!
//! Only after the whole protocol succeeds is the plan settled back into the
//! store, item by item, against the state as it is *then*. Edits made while the
//! request was in flight therefore stay pending for the next attempt. A failed
//! attempt leaves the store untouched, so a retry rebuilds the plan from the
//! current state and resends whatever is still pending.

use std::sync::{Arc, Mutex, MutexGuard};

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{RemoteError, StoreError, SyncError};
use crate::scan_model::{ScanItem, SessionState, SyncTag, TrackedScan};
use crate::session_store::SessionStore;
use crate::wire::{AddScansResponse, CreateSessionRequest, CreateSessionResponse};

/// Remote side of the protocol. Implemented over HTTP by
/// [`HttpRemote`](crate::http_remote::HttpRemote) and in-process by the
/// remote session service.
pub trait RemoteSessions {
    fn create_session(
        &self,
        request: &CreateSessionRequest,
    ) -> Result<CreateSessionResponse, RemoteError>;

    fn add_scans(
        &self,
        short_code: &str,
        scans: &[ScanItem],
    ) -> Result<AddScansResponse, RemoteError>;

    /// Deleting codes the remote side does not hold must succeed.
    fn delete_scans(&self, short_code: &str, codes: &[String]) -> Result<(), RemoteError>;
}

impl<R: RemoteSessions + ?Sized> RemoteSessions for Arc<R> {
    fn create_session(
        &self,
        request: &CreateSessionRequest,
    ) -> Result<CreateSessionResponse, RemoteError> {
        (**self).create_session(request)
    }

    fn add_scans(
        &self,
        short_code: &str,
        scans: &[ScanItem],
    ) -> Result<AddScansResponse, RemoteError> {
        (**self).add_scans(short_code, scans)
    }

    fn delete_scans(&self, short_code: &str, codes: &[String]) -> Result<(), RemoteError> {
        (**self).delete_scans(short_code, codes)
    }
}

/// What the remote side is expected to hold for one code once the plan succeeds.
#[derive(Debug, Clone, PartialEq)]
enum Settlement {
    Deleted,
    Holds { remote_quantity: u32, sent: ScanItem },
}

/// The requests one sync attempt sends, and how to settle them afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncPlan {
    pub session_id: String,
    /// `None` until the session has been created remotely.
    pub short_code: Option<String>,
    pub create: Option<CreateSessionRequest>,
    pub deletes: Vec<String>,
    pub adds: Vec<ScanItem>,
    settlements: Vec<(String, Settlement)>,
}

impl SyncPlan {
    /// Builds the plan for `state`, or `None` when there is nothing to send.
    ///
    /// Wire quantities are deltas against what the remote side holds. A
    /// quantity lowered below the remote count cannot be expressed as an
    /// increment, so that code is deleted and re-added with its full quantity.
    /// The same goes for a code scanned again after a local removal, whose
    /// remote row must lose its old details.
    pub fn from_state(state: &SessionState) -> Option<Self> {
        let session = state.session.as_ref()?;
        if !state.has_pending() {
            return None;
        }

        let mut deletes = Vec::new();
        let mut adds = Vec::new();
        let mut settlements = Vec::new();
        let synced = session.is_synced();

        for tracked in &state.items {
            let code = tracked.item.code.clone();
            match tracked.sync {
                SyncTag::Synced => {}
                SyncTag::PendingDelete => {
                    if synced {
                        deletes.push(code.clone());
                        settlements.push((code, Settlement::Deleted));
                    }
                }
                SyncTag::PendingCreate => {
                    adds.push(tracked.item.clone());
                    settlements.push((code, holds(tracked)));
                }
                SyncTag::PendingUpdate
                    if !synced
                        || tracked.replace_remote
                        || tracked.item.quantity < tracked.remote_quantity =>
                {
                    if synced {
                        deletes.push(code.clone());
                    }
                    adds.push(tracked.item.clone());
                    settlements.push((code, holds(tracked)));
                }
                SyncTag::PendingUpdate => {
                    let delta = tracked.item.quantity - tracked.remote_quantity;
                    if delta > 0 || tracked.item.has_details() {
                        adds.push(ScanItem {
                            quantity: delta,
                            ..tracked.item.clone()
                        });
                    }
                    settlements.push((code, holds(tracked)));
                }
            }
        }

        let create = (!synced).then(|| CreateSessionRequest {
            name: session.name.clone(),
            kind: Some(session.kind.clone()),
            scans: adds.clone(),
            flags: session.flags,
        });

        Some(Self {
            session_id: session.id.clone(),
            short_code: session.short_code.clone(),
            create,
            deletes,
            adds,
            settlements,
        })
    }

    /// Records a successful run into `state`.
    fn settle(&self, created: Option<&CreateSessionResponse>, state: &mut SessionState) {
        if let (Some(created), Some(meta)) = (created, state.session.as_mut()) {
            meta.assign_remote(&created.short_code, &created.access_code);
            meta.flags = created.flags;
        }

        for (code, settlement) in &self.settlements {
            let position = state.items.iter().position(|t| &t.item.code == code);
            match (settlement, position) {
                (Settlement::Deleted, Some(index)) => {
                    if state.items[index].is_live() {
                        // Scanned again while the delete was in flight.
                        state.items[index].remote_quantity = 0;
                        state.items[index].replace_remote = false;
                        state.items[index].sync = SyncTag::PendingCreate;
                    } else {
                        state.items.remove(index);
                    }
                }
                (Settlement::Deleted, None) => {}
                (Settlement::Holds { remote_quantity, sent }, Some(index)) => {
                    let tracked = &mut state.items[index];
                    tracked.remote_quantity = *remote_quantity;
                    if tracked.is_live() {
                        if &tracked.item == sent {
                            tracked.sync = SyncTag::Synced;
                            tracked.replace_remote = false;
                        } else {
                            // A removal and re-scan during the request keeps
                            // its replace marker.
                            tracked.sync = SyncTag::PendingUpdate;
                        }
                    }
                }
                (Settlement::Holds { remote_quantity, sent }, None) => {
                    // Removed locally while its first upload was in flight; the
                    // remote row now exists and has to go.
                    state.items.push(TrackedScan {
                        item: sent.clone(),
                        sync: SyncTag::PendingDelete,
                        remote_quantity: *remote_quantity,
                        replace_remote: false,
                    });
                }
            }
        }
    }
}

fn holds(tracked: &TrackedScan) -> Settlement {
    Settlement::Holds {
        remote_quantity: tracked.item.quantity,
        sent: tracked.item.clone(),
    }
}

/// Reconciler state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "message", rename_all = "camelCase")]
pub enum SyncStatus {
    Idle,
    Syncing,
    /// The last attempt failed; pending markers are intact.
    Error(String),
}

/// Summary of a completed sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub short_code: String,
    pub access_code: Option<String>,
    pub created: bool,
    pub deleted: usize,
    pub sent: usize,
    pub total_scans: Option<usize>,
}

/// Result of one `sync` call.
#[derive(Debug)]
pub enum SyncOutcome {
    /// No active session or nothing pending.
    NothingToSync,
    /// Another sync is in flight; this request was dropped.
    AlreadySyncing,
    Completed(SyncReport),
    Failed(SyncError),
}

pub struct SyncReconciler<R> {
    store: Arc<SessionStore>,
    remote: R,
    status: Mutex<SyncStatus>,
}

impl<R: RemoteSessions> SyncReconciler<R> {
    pub fn new(store: Arc<SessionStore>, remote: R) -> Self {
        Self {
            store,
            remote,
            status: Mutex::new(SyncStatus::Idle),
        }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn status(&self) -> SyncStatus {
        self.lock_status().clone()
    }

    fn lock_status(&self) -> MutexGuard<'_, SyncStatus> {
        // Plain enum; a poisoned guard still holds a valid value.
        self.status.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_status(&self, status: SyncStatus) {
        *self.lock_status() = status;
    }

    /// Retries after a failure. Same as [`sync`](Self::sync): the plan is
    /// rebuilt from the current state.
    pub fn retry(&self) -> SyncOutcome {
        self.sync()
    }

    /// Runs one sync attempt unless one is already in flight.
    pub fn sync(&self) -> SyncOutcome {
        let plan = {
            let mut status = self.lock_status();
            if *status == SyncStatus::Syncing {
                return SyncOutcome::AlreadySyncing;
            }

            let state = match self.store.get_state() {
                Ok(state) => state,
                Err(e) => {
                    *status = SyncStatus::Error(e.to_string());
                    return SyncOutcome::Failed(e.into());
                }
            };

            match SyncPlan::from_state(&state) {
                Some(plan) => {
                    *status = SyncStatus::Syncing;
                    plan
                }
                None => {
                    *status = SyncStatus::Idle;
                    return SyncOutcome::NothingToSync;
                }
            }
        };

        match self.execute(&plan) {
            Ok(report) => {
                self.set_status(SyncStatus::Idle);
                info!(
                    "Synced session {} as {} ({} sent, {} deleted)",
                    plan.session_id, report.short_code, report.sent, report.deleted
                );
                SyncOutcome::Completed(report)
            }
            Err(e) => {
                warn!("Sync of session {} failed: {e}", plan.session_id);
                self.set_status(SyncStatus::Error(e.to_string()));
                SyncOutcome::Failed(e)
            }
        }
    }

    fn execute(&self, plan: &SyncPlan) -> Result<SyncReport, SyncError> {
        let (created, short_code, total_scans) = match (&plan.create, &plan.short_code) {
            (Some(request), _) => {
                let created = self.remote.create_session(request)?;
                let short_code = created.short_code.clone();
                let total = created.total_scans;
                (Some(created), short_code, Some(total))
            }
            (None, Some(short_code)) => {
                if !plan.deletes.is_empty() {
                    self.remote.delete_scans(short_code, &plan.deletes)?;
                }
                let total = if plan.adds.is_empty() {
                    None
                } else {
                    Some(self.remote.add_scans(short_code, &plan.adds)?.total_scans)
                };
                (None, short_code.clone(), total)
            }
            (None, None) => {
                let message = format!(
                    "session {} has neither a short code nor a create request",
                    plan.session_id
                );
                return Err(StoreError::Poisoned(message).into());
            }
        };

        let mut access_code = None;
        self.store.update_session(&plan.session_id, |state| {
            plan.settle(created.as_ref(), state);
            access_code = state.session.as_ref().and_then(|s| s.access_code.clone());
        })?;

        Ok(SyncReport {
            short_code,
            access_code,
            created: created.is_some(),
            deleted: plan.deletes.len(),
            sent: plan.adds.len(),
            total_scans,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::scan_model::{DetailsUpdate, SessionFlags, SessionMetaPatch};
    use std::sync::mpsc;
    use std::thread;
    use tempfile::TempDir;

    /// Records every call and fails while `failing` is set.
    #[derive(Default)]
    struct FakeRemote {
        calls: Mutex<Vec<String>>,
        failing: Mutex<bool>,
        fail_adds: Mutex<bool>,
        sent: Mutex<Vec<ScanItem>>,
    }

    impl FakeRemote {
        fn failing() -> Self {
            let fake = Self::default();
            *fake.failing.lock().unwrap() = true;
            fake
        }

        fn set_failing(&self, failing: bool) {
            *self.failing.lock().unwrap() = failing;
        }

        fn check(&self, call: String) -> Result<(), RemoteError> {
            self.calls.lock().unwrap().push(call);
            if *self.failing.lock().unwrap() {
                return Err(RemoteError::Transport("connection refused".into()));
            }
            Ok(())
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl RemoteSessions for FakeRemote {
        fn create_session(
            &self,
            request: &CreateSessionRequest,
        ) -> Result<CreateSessionResponse, RemoteError> {
            self.check(format!("create:{}", request.scans.len()))?;
            self.sent.lock().unwrap().extend(request.scans.iter().cloned());
            Ok(CreateSessionResponse {
                short_code: "a1b2c3".into(),
                access_code: "4321".into(),
                name: request.name.clone(),
                kind: request.kind.clone(),
                total_scans: request.scans.len(),
                flags: request.flags,
            })
        }

        fn add_scans(
            &self,
            short_code: &str,
            scans: &[ScanItem],
        ) -> Result<AddScansResponse, RemoteError> {
            self.check(format!("add:{short_code}:{}", scans.len()))?;
            if *self.fail_adds.lock().unwrap() {
                return Err(RemoteError::Transport("timeout".into()));
            }
            self.sent.lock().unwrap().extend(scans.iter().cloned());
            Ok(AddScansResponse {
                short_code: short_code.into(),
                total_scans: scans.len(),
            })
        }

        fn delete_scans(&self, short_code: &str, codes: &[String]) -> Result<(), RemoteError> {
            self.check(format!("delete:{short_code}:{}", codes.join(",")))
        }
    }

    fn store(dir: &TempDir) -> Arc<SessionStore> {
        Arc::new(SessionStore::open(StoreConfig::at(dir.path().join("sync.lmdb"))).unwrap())
    }

    fn mark_synced(store: &SessionStore) {
        store
            .set_session_meta(&SessionMetaPatch {
                short_code: Some("a1b2c3".into()),
                access_code: Some("4321".into()),
                ..Default::default()
            })
            .unwrap();
        store.clear_pending().unwrap();
    }

    #[test]
    fn nothing_pending_means_no_request() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let reconciler = SyncReconciler::new(Arc::clone(&store), FakeRemote::default());

        assert!(matches!(reconciler.sync(), SyncOutcome::NothingToSync));
        store.start("A", "stock", SessionFlags::default()).unwrap();
        assert!(matches!(reconciler.sync(), SyncOutcome::NothingToSync));
        assert!(reconciler.remote.calls().is_empty());
        assert_eq!(reconciler.status(), SyncStatus::Idle);
    }

    #[test]
    fn first_sync_creates_and_records_remote_codes() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store
            .start("Warehouse A", "stock", SessionFlags { ask_price: true, ..Default::default() })
            .unwrap();
        store.add_scan("1").unwrap();
        store.add_scan("1").unwrap();
        store.add_scan("2").unwrap();

        let reconciler = SyncReconciler::new(Arc::clone(&store), FakeRemote::default());
        let SyncOutcome::Completed(report) = reconciler.sync() else {
            panic!("sync should complete");
        };
        assert!(report.created);
        assert_eq!(report.short_code, "a1b2c3");
        assert_eq!(report.access_code.as_deref(), Some("4321"));
        assert_eq!(reconciler.remote.calls(), vec!["create:2".to_string()]);

        let state = store.get_state().unwrap();
        let meta = state.session.as_ref().unwrap();
        assert_eq!(meta.short_code.as_deref(), Some("a1b2c3"));
        assert!(meta.flags.ask_price);
        assert!(state.pending_scans().is_empty());
        assert_eq!(state.all_scans().len(), 2);
    }

    #[test]
    fn failed_sync_keeps_pending_items_untouched() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.start("A", "stock", SessionFlags::default()).unwrap();
        for code in ["1", "2", "3"] {
            store.add_scan(code).unwrap();
        }
        let before = store.get_state().unwrap();

        let reconciler = SyncReconciler::new(Arc::clone(&store), FakeRemote::failing());
        assert!(matches!(
            reconciler.sync(),
            SyncOutcome::Failed(SyncError::Remote(RemoteError::Transport(_)))
        ));
        assert!(matches!(reconciler.status(), SyncStatus::Error(_)));

        let after = store.get_state().unwrap();
        assert_eq!(after, before);
        assert_eq!(after.pending_scans().len(), 3);
        assert!(after.session.unwrap().short_code.is_none());

        reconciler.remote.set_failing(false);
        assert!(matches!(reconciler.retry(), SyncOutcome::Completed(_)));
        assert_eq!(reconciler.status(), SyncStatus::Idle);
        let synced = store.get_state().unwrap();
        assert!(synced.pending_scans().is_empty());
        assert!(synced.session.unwrap().short_code.is_some());
    }

    #[test]
    fn retry_uses_the_current_state() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.start("A", "stock", SessionFlags::default()).unwrap();
        store.add_scan("1").unwrap();

        let reconciler = SyncReconciler::new(Arc::clone(&store), FakeRemote::failing());
        assert!(matches!(reconciler.sync(), SyncOutcome::Failed(_)));

        store.add_scan("2").unwrap();
        reconciler.remote.set_failing(false);
        assert!(matches!(reconciler.retry(), SyncOutcome::Completed(_)));

        let calls = reconciler.remote.calls();
        assert_eq!(calls, vec!["create:1".to_string(), "create:2".to_string()]);
    }

    #[test]
    fn synced_session_sends_deletes_before_adds() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.start("A", "stock", SessionFlags::default()).unwrap();
        store.add_scan("old").unwrap();
        mark_synced(&store);

        store.remove_scan("old").unwrap();
        store.add_scan("new").unwrap();

        let reconciler = SyncReconciler::new(Arc::clone(&store), FakeRemote::default());
        let SyncOutcome::Completed(report) = reconciler.sync() else {
            panic!("sync should complete");
        };
        assert!(!report.created);
        assert_eq!(report.deleted, 1);
        assert_eq!(
            reconciler.remote.calls(),
            vec!["delete:a1b2c3:old".to_string(), "add:a1b2c3:1".to_string()]
        );

        let state = store.get_state().unwrap();
        assert!(state.pending_deletes().is_empty());
        assert!(state.find("old").is_none());
        assert_eq!(state.find("new").unwrap().sync, SyncTag::Synced);
    }

    #[test]
    fn failed_add_after_delete_keeps_both_pending() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.start("A", "stock", SessionFlags::default()).unwrap();
        store.add_scan("old").unwrap();
        mark_synced(&store);
        store.remove_scan("old").unwrap();
        store.add_scan("new").unwrap();

        let remote = FakeRemote::default();
        *remote.fail_adds.lock().unwrap() = true;
        let reconciler = SyncReconciler::new(Arc::clone(&store), remote);
        assert!(matches!(reconciler.sync(), SyncOutcome::Failed(_)));

        let state = store.get_state().unwrap();
        assert_eq!(state.pending_deletes(), vec!["old".to_string()]);
        assert_eq!(state.pending_scans(), vec![ScanItem::new("new", 1)]);

        *reconciler.remote.fail_adds.lock().unwrap() = false;
        assert!(matches!(reconciler.retry(), SyncOutcome::Completed(_)));
        let calls = reconciler.remote.calls();
        assert_eq!(calls.iter().filter(|c| c.starts_with("delete:")).count(), 2);
    }

    #[test]
    fn increments_on_synced_items_are_sent_as_deltas() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.start("A", "stock", SessionFlags::default()).unwrap();
        store.add_scan("1").unwrap();
        store.add_scan("1").unwrap();
        mark_synced(&store);
        store.add_scan("1").unwrap();

        let state = store.get_state().unwrap();
        let plan = SyncPlan::from_state(&state).unwrap();
        assert!(plan.deletes.is_empty());
        assert_eq!(plan.adds, vec![ScanItem::new("1", 1)]);
        assert_eq!(state.pending_scans(), vec![ScanItem::new("1", 3)]);
    }

    #[test]
    fn lowered_quantity_is_reset_remotely() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.start("A", "stock", SessionFlags::default()).unwrap();
        store.add_scan("1").unwrap();
        store.update_quantity("1", 5).unwrap();
        mark_synced(&store);
        store.update_quantity("1", 2).unwrap();

        let plan = SyncPlan::from_state(&store.get_state().unwrap()).unwrap();
        assert_eq!(plan.deletes, vec!["1".to_string()]);
        assert_eq!(plan.adds, vec![ScanItem::new("1", 2)]);
    }

    #[test]
    fn rescanned_code_replaces_the_remote_row() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.start("A", "stock", SessionFlags::default()).unwrap();
        store.add_scan("1").unwrap();
        let details: DetailsUpdate = serde_json::from_str(r#"{"productName":"Old"}"#).unwrap();
        store.update_details("1", &details).unwrap();
        mark_synced(&store);

        store.remove_scan("1").unwrap();
        store.add_scan("1").unwrap();
        let plan = SyncPlan::from_state(&store.get_state().unwrap()).unwrap();
        assert_eq!(plan.deletes, vec!["1".to_string()]);
        assert_eq!(plan.adds, vec![ScanItem::new("1", 1)]);

        let reconciler = SyncReconciler::new(Arc::clone(&store), FakeRemote::default());
        assert!(matches!(reconciler.sync(), SyncOutcome::Completed(_)));
        assert_eq!(
            reconciler.remote.calls(),
            vec!["delete:a1b2c3:1".to_string(), "add:a1b2c3:1".to_string()]
        );

        let state = store.get_state().unwrap();
        assert!(!state.has_pending());
        assert!(!state.find("1").unwrap().replace_remote);
    }

    #[test]
    fn edits_during_flight_stay_pending() {
        /// Performs a local edit while the add request is "on the wire".
        struct EditingRemote {
            store: Arc<SessionStore>,
        }

        impl RemoteSessions for EditingRemote {
            fn create_session(
                &self,
                _: &CreateSessionRequest,
            ) -> Result<CreateSessionResponse, RemoteError> {
                Err(RemoteError::Protocol("unexpected create".into()))
            }

            fn add_scans(
                &self,
                short_code: &str,
                scans: &[ScanItem],
            ) -> Result<AddScansResponse, RemoteError> {
                self.store.add_scan("1").unwrap();
                self.store.add_scan("late").unwrap();
                Ok(AddScansResponse {
                    short_code: short_code.into(),
                    total_scans: scans.len(),
                })
            }

            fn delete_scans(&self, _: &str, _: &[String]) -> Result<(), RemoteError> {
                Ok(())
            }
        }

        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.start("A", "stock", SessionFlags::default()).unwrap();
        mark_synced(&store);
        store.add_scan("1").unwrap();

        let reconciler = SyncReconciler::new(
            Arc::clone(&store),
            EditingRemote {
                store: Arc::clone(&store),
            },
        );
        assert!(matches!(reconciler.sync(), SyncOutcome::Completed(_)));

        let state = store.get_state().unwrap();
        let one = state.find("1").unwrap();
        assert_eq!(one.item.quantity, 2);
        assert_eq!(one.remote_quantity, 1);
        assert_eq!(one.sync, SyncTag::PendingUpdate);
        assert_eq!(state.find("late").unwrap().sync, SyncTag::PendingCreate);
        assert_eq!(state.pending_count(), 2);
    }

    #[test]
    fn removal_during_first_upload_becomes_pending_delete() {
        struct RemovingRemote {
            store: Arc<SessionStore>,
        }

        impl RemoteSessions for RemovingRemote {
            fn create_session(
                &self,
                request: &CreateSessionRequest,
            ) -> Result<CreateSessionResponse, RemoteError> {
                self.store.remove_scan("1").unwrap();
                Ok(CreateSessionResponse {
                    short_code: "c0ffee".into(),
                    access_code: "1111".into(),
                    name: request.name.clone(),
                    kind: request.kind.clone(),
                    total_scans: request.scans.len(),
                    flags: request.flags,
                })
            }

            fn add_scans(&self, _: &str, _: &[ScanItem]) -> Result<AddScansResponse, RemoteError> {
                Err(RemoteError::Protocol("unexpected add".into()))
            }

            fn delete_scans(&self, _: &str, _: &[String]) -> Result<(), RemoteError> {
                Ok(())
            }
        }

        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.start("A", "stock", SessionFlags::default()).unwrap();
        store.add_scan("1").unwrap();

        let reconciler = SyncReconciler::new(
            Arc::clone(&store),
            RemovingRemote {
                store: Arc::clone(&store),
            },
        );
        assert!(matches!(reconciler.sync(), SyncOutcome::Completed(_)));

        let state = store.get_state().unwrap();
        assert_eq!(state.pending_deletes(), vec!["1".to_string()]);
        assert!(state.all_scans().is_empty());
    }

    #[test]
    fn second_sync_while_syncing_is_dropped() {
        /// Blocks inside the create call until released.
        struct BlockingRemote {
            entered: Mutex<mpsc::Sender<()>>,
            release: Mutex<mpsc::Receiver<()>>,
        }

        impl RemoteSessions for BlockingRemote {
            fn create_session(
                &self,
                request: &CreateSessionRequest,
            ) -> Result<CreateSessionResponse, RemoteError> {
                self.entered.lock().unwrap().send(()).unwrap();
                self.release.lock().unwrap().recv().unwrap();
                Ok(CreateSessionResponse {
                    short_code: "b10c4d".into(),
                    access_code: "2222".into(),
                    name: request.name.clone(),
                    kind: request.kind.clone(),
                    total_scans: request.scans.len(),
                    flags: request.flags,
                })
            }

            fn add_scans(&self, _: &str, _: &[ScanItem]) -> Result<AddScansResponse, RemoteError> {
                Err(RemoteError::Protocol("unexpected add".into()))
            }

            fn delete_scans(&self, _: &str, _: &[String]) -> Result<(), RemoteError> {
                Ok(())
            }
        }

        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.start("A", "stock", SessionFlags::default()).unwrap();
        store.add_scan("1").unwrap();

        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let reconciler = Arc::new(SyncReconciler::new(
            Arc::clone(&store),
            BlockingRemote {
                entered: Mutex::new(entered_tx),
                release: Mutex::new(release_rx),
            },
        ));

        let background = {
            let reconciler = Arc::clone(&reconciler);
            thread::spawn(move || matches!(reconciler.sync(), SyncOutcome::Completed(_)))
        };

        entered_rx.recv().unwrap();
        assert_eq!(reconciler.status(), SyncStatus::Syncing);
        assert!(matches!(reconciler.sync(), SyncOutcome::AlreadySyncing));

        release_tx.send(()).unwrap();
        assert!(background.join().unwrap());
        assert_eq!(reconciler.status(), SyncStatus::Idle);
    }
}
