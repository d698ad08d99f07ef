//! Persistence behind the remote session service.
//!
//! A repository stores one [`StoredSession`] per short code. `modify` is the
//! only write path for an existing session and runs its closure while holding
//! that session exclusively, so concurrent deltas for one short code are
//! serialized while different sessions proceed independently.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};

use crate::aggregator::{self, Tally};
use crate::error::StoreError;
use crate::local_db::LocalDb;
use crate::scan_model::{ScanDetails, ScanItem, SessionFlags};
use crate::wire::{ScanRow, SessionView};

const SESSIONS_TABLE: &str = "remote_sessions";

impl Tally for ScanRow {
    fn code(&self) -> &str {
        &self.item.code
    }

    fn absorb(&mut self, quantity: u32, details: &ScanDetails) {
        self.item.absorb(quantity, details);
    }
}

/// A session as the service keeps it, access code included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredSession {
    pub short_code: String,
    pub access_code: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    #[serde(flatten)]
    pub flags: SessionFlags,
    pub created_at: DateTime<Utc>,
    /// Last row id handed out; ids grow with insertion order.
    pub next_row_id: u64,
    pub scans: Vec<ScanRow>,
}

impl StoredSession {
    /// Merges a delta into the rows. Returns how many rows were created.
    pub fn merge(&mut self, incoming: &[ScanItem], now: DateTime<Utc>) -> usize {
        let next_row_id = &mut self.next_row_id;
        aggregator::merge_delta(&mut self.scans, incoming, |item| {
            *next_row_id += 1;
            ScanRow {
                id: *next_row_id,
                item,
                scanned_at: now,
            }
        })
    }

    /// Drops the rows for `codes` and returns how many were removed.
    pub fn remove(&mut self, codes: &[String]) -> usize {
        let before = self.scans.len();
        self.scans.retain(|row| !codes.contains(&row.item.code));
        before - self.scans.len()
    }

    /// Rows in insertion order.
    pub fn rows(&self) -> Vec<ScanRow> {
        let mut rows = self.scans.clone();
        rows.sort_by_key(|row| row.id);
        rows
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            short_code: self.short_code.clone(),
            name: self.name.clone(),
            kind: self.kind.clone(),
            created_at: self.created_at,
            flags: self.flags,
            scans: self.rows(),
        }
    }
}

pub trait SessionRepository: Send + Sync {
    /// Stores a new session. `false` when the short code is already taken.
    fn insert(&self, session: StoredSession) -> Result<bool, StoreError>;

    fn load(&self, short_code: &str) -> Result<Option<StoredSession>, StoreError>;

    /// Applies `apply` to the stored session atomically. `false` when no
    /// session has that short code.
    fn modify(
        &self,
        short_code: &str,
        apply: &mut dyn FnMut(&mut StoredSession),
    ) -> Result<bool, StoreError>;
}

/// In-process repository with one lock per session.
#[derive(Default)]
pub struct MemoryRepository {
    sessions: RwLock<HashMap<String, Arc<Mutex<StoredSession>>>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, short_code: &str) -> Result<Option<Arc<Mutex<StoredSession>>>, StoreError> {
        let sessions = self.sessions.read().map_err(|e| StoreError::Poisoned(e.to_string()))?;
        Ok(sessions.get(short_code).cloned())
    }
}

impl SessionRepository for MemoryRepository {
    fn insert(&self, session: StoredSession) -> Result<bool, StoreError> {
        let mut sessions = self.sessions.write().map_err(|e| StoreError::Poisoned(e.to_string()))?;
        if sessions.contains_key(&session.short_code) {
            return Ok(false);
        }
        sessions.insert(session.short_code.clone(), Arc::new(Mutex::new(session)));
        Ok(true)
    }

    fn load(&self, short_code: &str) -> Result<Option<StoredSession>, StoreError> {
        let Some(entry) = self.entry(short_code)? else {
            return Ok(None);
        };
        let session = entry.lock().map_err(|e| StoreError::Poisoned(e.to_string()))?;
        Ok(Some(session.clone()))
    }

    fn modify(
        &self,
        short_code: &str,
        apply: &mut dyn FnMut(&mut StoredSession),
    ) -> Result<bool, StoreError> {
        // The map lock is released before the session lock is taken.
        let Some(entry) = self.entry(short_code)? else {
            return Ok(false);
        };
        let mut session = entry.lock().map_err(|e| StoreError::Poisoned(e.to_string()))?;
        apply(&mut session);
        Ok(true)
    }
}

/// LMDB-backed repository: one JSON record per short code.
pub struct LmdbRepository {
    db: LocalDb,
}

impl LmdbRepository {
    pub fn open(path: impl AsRef<Path>, map_size_mb: usize) -> Result<Self, StoreError> {
        let db = LocalDb::open(path, map_size_mb, &[SESSIONS_TABLE])?;
        info!("Remote session repository ready at {}", db.path().display());
        Ok(Self { db })
    }
}

impl SessionRepository for LmdbRepository {
    fn insert(&self, session: StoredSession) -> Result<bool, StoreError> {
        self.db.write(|txn| {
            if txn.get::<StoredSession>(SESSIONS_TABLE, &session.short_code)?.is_some() {
                return Ok(false);
            }
            txn.put(SESSIONS_TABLE, &session.short_code, &session)?;
            Ok(true)
        })
    }

    fn load(&self, short_code: &str) -> Result<Option<StoredSession>, StoreError> {
        self.db.get(SESSIONS_TABLE, short_code)
    }

    fn modify(
        &self,
        short_code: &str,
        apply: &mut dyn FnMut(&mut StoredSession),
    ) -> Result<bool, StoreError> {
        self.db.write(|txn| {
            let Some(mut session) = txn.get::<StoredSession>(SESSIONS_TABLE, short_code)? else {
                return Ok(false);
            };
            apply(&mut session);
            txn.put(SESSIONS_TABLE, short_code, &session)?;
            Ok(true)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use tempfile::TempDir;

    fn session(short_code: &str) -> StoredSession {
        StoredSession {
            short_code: short_code.into(),
            access_code: "1234".into(),
            name: "Warehouse A".into(),
            kind: Some("stock".into()),
            flags: SessionFlags::default(),
            created_at: Utc::now(),
            next_row_id: 0,
            scans: Vec::new(),
        }
    }

    fn exercise(repo: &dyn SessionRepository) {
        assert!(repo.insert(session("abc123")).unwrap());
        assert!(!repo.insert(session("abc123")).unwrap());

        let now = Utc::now();
        assert!(repo
            .modify("abc123", &mut |s| {
                s.merge(&[ScanItem::new("1", 2), ScanItem::new("2", 1)], now);
            })
            .unwrap());
        assert!(!repo.modify("missing", &mut |_| {}).unwrap());

        let loaded = repo.load("abc123").unwrap().unwrap();
        let ids: Vec<u64> = loaded.scans.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(loaded.next_row_id, 2);
        assert!(repo.load("missing").unwrap().is_none());
    }

    #[test]
    fn memory_repository_contract() {
        exercise(&MemoryRepository::new());
    }

    #[test]
    fn lmdb_repository_contract() {
        let dir = TempDir::new().unwrap();
        let repo = LmdbRepository::open(dir.path().join("remote.lmdb"), 4).unwrap();
        exercise(&repo);
    }

    #[test]
    fn removed_codes_never_reuse_row_ids() {
        let mut stored = session("abc123");
        let now = Utc::now();
        stored.merge(&[ScanItem::new("1", 1), ScanItem::new("2", 1)], now);
        assert_eq!(stored.remove(&["1".to_string(), "nope".to_string()]), 1);
        stored.merge(&[ScanItem::new("1", 3)], now);

        let rows = stored.rows();
        assert_eq!(rows.iter().map(|r| r.item.code.as_str()).collect::<Vec<_>>(), vec!["2", "1"]);
        assert_eq!(rows[1].id, 3);
        assert_eq!(rows[1].item.quantity, 3);
    }

    #[test]
    fn concurrent_deltas_for_one_session_are_all_counted() {
        let repo = Arc::new(MemoryRepository::new());
        repo.insert(session("abc123")).unwrap();

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let repo = Arc::clone(&repo);
                thread::spawn(move || {
                    for _ in 0..25 {
                        repo.modify("abc123", &mut |s| {
                            s.merge(&[ScanItem::new("shared", 1)], Utc::now());
                        })
                        .unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        let stored = repo.load("abc123").unwrap().unwrap();
        assert_eq!(stored.scans.len(), 1);
        assert_eq!(stored.scans[0].item.quantity, 200);
    }
}
