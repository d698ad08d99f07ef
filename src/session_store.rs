//! Local session store: the active session plus a history log, kept in LMDB.
//!
//! The active [`SessionState`] lives under one key of the `session` table. The
//! history is a keyed table (session id → [`HistoryEntry`]) with a recency
//! index stored next to the active record. Every mutation of the active state
//! loads it, applies the change, writes it back and upserts its history entry
//! inside a single LMDB write transaction.
//!
//! Sessions expire a fixed time after `created_at` (24 hours by default). An
//! expired active session reads as empty; expired history entries are pruned
//! whenever the history is listed. Unreadable stored blobs are treated as
//! absent, never reported to the caller.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};

use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::local_db::{LocalDb, WriteTxn};
use crate::scan_model::{
    DetailsUpdate, HistoryEntry, SessionFlags, SessionMeta, SessionMetaPatch, SessionState,
};

const SESSION_TABLE: &str = "session";
const HISTORY_TABLE: &str = "history";
const ACTIVE_KEY: &str = "active";
const HISTORY_INDEX_KEY: &str = "history_index";

/// Source of the current time.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// What a single counted scan produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanReceipt {
    /// `false` means the code was already in the list (duplicate scan).
    pub is_new: bool,
    /// The session asks for per-item details after each scan.
    pub needs_details: bool,
}

pub struct SessionStore {
    db: LocalDb,
    config: StoreConfig,
    ttl: chrono::Duration,
    clock: Clock,
}

impl SessionStore {
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        Self::with_clock(config, Arc::new(Utc::now))
    }

    /// Opens the store with an explicit time source. Rejects a non-positive or
    /// out-of-range expiry and a map size that does not fit in memory.
    pub fn with_clock(config: StoreConfig, clock: Clock) -> Result<Self, StoreError> {
        let ttl = config.expiry()?;
        let db = LocalDb::open(&config.path, config.map_size_mb, &[SESSION_TABLE, HISTORY_TABLE])?;
        Ok(Self {
            db,
            config,
            ttl,
            clock,
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Forces pending writes to disk.
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()
    }

    /// Starts a new, never-synced session and makes it the active one.
    pub fn start(
        &self,
        name: &str,
        kind: &str,
        flags: SessionFlags,
    ) -> Result<SessionMeta, StoreError> {
        let now = self.now();
        let meta = SessionMeta::new(name.trim(), kind.trim(), flags, now);
        let state = SessionState::new(meta.clone());

        self.db.write(|txn| {
            txn.put(SESSION_TABLE, ACTIVE_KEY, &state)?;
            self.upsert_history(txn, &state, now)
        })?;

        info!("Started session {} ({})", meta.id, meta.name);
        Ok(meta)
    }

    /// Makes a history entry the active session again, exactly as stored.
    /// The history is not touched; the entry is already there.
    pub fn resume(&self, entry: &HistoryEntry) -> Result<(), StoreError> {
        let state = entry.to_state();
        self.db.write(|txn| txn.put(SESSION_TABLE, ACTIVE_KEY, &state))?;
        info!("Resumed session {}", entry.session.id);
        Ok(())
    }

    /// Resumes the history entry with the given session id, if it is still there.
    pub fn resume_by_id(&self, id: &str) -> Result<bool, StoreError> {
        let now = self.now();
        let ttl = self.ttl;
        let entry = self.db.write(|txn| {
            let entry: Option<HistoryEntry> = txn.get_or_discard(HISTORY_TABLE, id)?;
            Ok(entry.filter(|e| !e.session.is_expired(now, ttl)))
        })?;

        match entry {
            Some(entry) => {
                self.resume(&entry)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Loads the active state. An expired session is dropped and reads as empty.
    pub fn get_state(&self) -> Result<SessionState, StoreError> {
        let now = self.now();
        let ttl = self.ttl;
        let state = self.db.write(|txn| load_active(txn, now, ttl))?;
        Ok(state.unwrap_or_default())
    }

    /// Counts one scan of `code`. Returns `None` when there is no active session.
    pub fn scan(&self, code: &str) -> Result<Option<ScanReceipt>, StoreError> {
        let receipt = self.mutate(|state| {
            let is_new = state.add_scan(code);
            let needs_details = state.session.as_ref().is_some_and(|s| s.flags.any());
            ScanReceipt { is_new, needs_details }
        })?;
        if let Some(receipt) = receipt {
            debug!("Scanned {code} (new: {})", receipt.is_new);
        }
        Ok(receipt)
    }

    /// Counts one scan of `code`; `false` means a duplicate (or no active session).
    pub fn add_scan(&self, code: &str) -> Result<bool, StoreError> {
        Ok(self.scan(code)?.is_some_and(|r| r.is_new))
    }

    pub fn remove_scan(&self, code: &str) -> Result<(), StoreError> {
        self.mutate(|state| state.remove_scan(code))?;
        Ok(())
    }

    pub fn update_quantity(&self, code: &str, quantity: u32) -> Result<bool, StoreError> {
        Ok(self.mutate(|state| state.update_quantity(code, quantity))?.unwrap_or(false))
    }

    pub fn update_details(&self, code: &str, update: &DetailsUpdate) -> Result<bool, StoreError> {
        Ok(self.mutate(|state| state.update_details(code, update))?.unwrap_or(false))
    }

    pub fn set_session_meta(&self, patch: &SessionMetaPatch) -> Result<(), StoreError> {
        self.mutate(|state| {
            if let Some(meta) = state.session.as_mut() {
                meta.apply(patch);
            }
        })?;
        Ok(())
    }

    /// Marks every pending item as acknowledged by the remote service.
    pub fn clear_pending(&self) -> Result<(), StoreError> {
        self.mutate(SessionState::clear_pending)?;
        Ok(())
    }

    /// Drops the active session pointer. Its history entry stays.
    pub fn clear_active(&self) -> Result<(), StoreError> {
        self.db.write(|txn| txn.delete(SESSION_TABLE, ACTIVE_KEY))?;
        Ok(())
    }

    /// Lists non-expired history entries, most recent first, pruning the rest.
    pub fn list_history(&self) -> Result<Vec<HistoryEntry>, StoreError> {
        let now = self.now();
        let ttl = self.ttl;

        self.db.write(|txn| {
            let index: Vec<String> = txn
                .get_or_discard(SESSION_TABLE, HISTORY_INDEX_KEY)?
                .unwrap_or_default();
            let mut kept_ids = Vec::with_capacity(index.len());
            let mut entries = Vec::with_capacity(index.len());

            for id in &index {
                match txn.get_or_discard::<HistoryEntry>(HISTORY_TABLE, id)? {
                    Some(entry) if !entry.session.is_expired(now, ttl) => {
                        kept_ids.push(id.clone());
                        entries.push(entry);
                    }
                    Some(_) => {
                        debug!("Pruning expired history entry {id}");
                        txn.delete(HISTORY_TABLE, id)?;
                    }
                    None => {}
                }
            }

            if kept_ids.len() != index.len() {
                txn.put(SESSION_TABLE, HISTORY_INDEX_KEY, &kept_ids)?;
            }
            Ok(entries)
        })
    }

    pub fn delete_history_entry(&self, id: &str) -> Result<bool, StoreError> {
        self.db.write(|txn| {
            let mut index: Vec<String> = txn
                .get_or_discard(SESSION_TABLE, HISTORY_INDEX_KEY)?
                .unwrap_or_default();
            let before = index.len();
            index.retain(|entry| entry != id);
            if index.len() != before {
                txn.put(SESSION_TABLE, HISTORY_INDEX_KEY, &index)?;
            }
            txn.delete(HISTORY_TABLE, id)
        })
    }

    /// Applies `apply` to the session with the given id, wherever it lives:
    /// the active slot if it still holds that session, otherwise its history
    /// entry. Returns `false` when the session is gone.
    ///
    /// Used to record a sync result after the user may have switched sessions
    /// while the request was in flight.
    pub fn update_session(
        &self,
        id: &str,
        apply: impl FnOnce(&mut SessionState),
    ) -> Result<bool, StoreError> {
        let now = self.now();
        let ttl = self.ttl;

        self.db.write(|txn| {
            let active = load_active(txn, now, ttl)?;
            let mut state = match active {
                Some(state) if state.session.as_ref().is_some_and(|s| s.id == id) => {
                    let mut state = state;
                    apply(&mut state);
                    txn.put(SESSION_TABLE, ACTIVE_KEY, &state)?;
                    self.upsert_history(txn, &state, now)?;
                    return Ok(true);
                }
                _ => match txn.get_or_discard::<HistoryEntry>(HISTORY_TABLE, id)? {
                    Some(entry) => entry.to_state(),
                    None => return Ok(false),
                },
            };

            apply(&mut state);
            self.upsert_history(txn, &state, now)?;
            Ok(true)
        })
    }

    /// Loads the active state, applies `apply`, persists it and mirrors it into
    /// the history. `None` when there is no active session.
    fn mutate<R>(
        &self,
        apply: impl FnOnce(&mut SessionState) -> R,
    ) -> Result<Option<R>, StoreError> {
        let now = self.now();
        let ttl = self.ttl;

        self.db.write(|txn| {
            let Some(mut state) = load_active(txn, now, ttl)? else {
                warn!("No active session; ignoring mutation");
                return Ok(None);
            };
            let result = apply(&mut state);
            txn.put(SESSION_TABLE, ACTIVE_KEY, &state)?;
            self.upsert_history(txn, &state, now)?;
            Ok(Some(result))
        })
    }

    /// Replaces the history entry for `state`'s session in place, or inserts it
    /// at the most recent position, dropping the oldest entries over the cap.
    fn upsert_history(
        &self,
        txn: &mut WriteTxn<'_>,
        state: &SessionState,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let Some(session) = &state.session else {
            return Ok(());
        };

        let existing: Option<HistoryEntry> = txn.get_or_discard(HISTORY_TABLE, &session.id)?;
        let entry = HistoryEntry {
            session: session.clone(),
            items: state.items.clone(),
            listed_at: existing.map(|e| e.listed_at).unwrap_or(now),
        };
        txn.put(HISTORY_TABLE, &session.id, &entry)?;

        let mut index: Vec<String> = txn
                .get_or_discard(SESSION_TABLE, HISTORY_INDEX_KEY)?
                .unwrap_or_default();
        if index.iter().any(|id| id == &session.id) {
            return Ok(());
        }
        index.insert(0, session.id.clone());
        while index.len() > self.config.max_history.max(1) {
            if let Some(oldest) = index.pop() {
                debug!("History full; dropping {oldest}");
                txn.delete(HISTORY_TABLE, &oldest)?;
            }
        }
        txn.put(SESSION_TABLE, HISTORY_INDEX_KEY, &index)
    }
}

/// Reads the active state, dropping it when unreadable, sessionless or expired.
fn load_active(
    txn: &mut WriteTxn<'_>,
    now: DateTime<Utc>,
    ttl: chrono::Duration,
) -> Result<Option<SessionState>, StoreError> {
    let Some(state) = txn.get_or_discard::<SessionState>(SESSION_TABLE, ACTIVE_KEY)? else {
        return Ok(None);
    };
    match &state.session {
        Some(session) if session.is_expired(now, ttl) => {
            info!("Session {} expired; dropping active record", session.id);
            txn.delete(SESSION_TABLE, ACTIVE_KEY)?;
            Ok(None)
        }
        Some(_) => Ok(Some(state)),
        None => Ok(None),
    }
}
