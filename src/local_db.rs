//! LMDB environment holding JSON-encoded records in named tables.
//!
//! Every table is an LMDB named database created when the environment is
//! opened. Values are `serde_json` documents keyed by UTF-8 strings.
//! Read-modify-write sequences go through [`LocalDb::write`], which runs the
//! whole closure inside one LMDB write transaction; LMDB allows a single writer
//! at a time, so each closure is atomic with respect to every other writer.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use lmdb::{Database, DatabaseFlags, Environment, RwTransaction, Transaction, WriteFlags};
use log::{info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::StoreError;

pub struct LocalDb {
    env: Environment,
    tables: HashMap<&'static str, Database>,
    path: PathBuf,
}

impl LocalDb {
    /// Opens (or creates) the environment at `path` with the given tables.
    pub fn open(
        path: impl AsRef<Path>,
        map_size_mb: usize,
        tables: &[&'static str],
    ) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let map_size = map_size_mb
            .max(1)
            .checked_mul(1024 * 1024)
            .ok_or_else(|| {
                StoreError::InvalidConfig(format!("mapSizeMb too large: {map_size_mb}"))
            })?;
        fs::create_dir_all(&path)?;

        let env = Environment::new()
            .set_max_dbs(tables.len().max(1) as u32)
            .set_map_size(map_size)
            .open(&path)?;

        let mut opened = HashMap::with_capacity(tables.len());
        for &name in tables {
            let db = env.create_db(Some(name), DatabaseFlags::empty())?;
            opened.insert(name, db);
        }

        info!("Opened LMDB environment at {} with {} tables", path.display(), opened.len());
        Ok(Self { env, tables: opened, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn table(&self, name: &'static str) -> Result<Database, StoreError> {
        self.tables.get(name).copied().ok_or(StoreError::UnknownTable(name))
    }

    /// Reads one record in a read-only transaction.
    pub fn get<T: DeserializeOwned>(
        &self,
        table: &'static str,
        key: &str,
    ) -> Result<Option<T>, StoreError> {
        let db = self.table(table)?;
        let txn = self.env.begin_ro_txn()?;
        decode(&txn, db, key)
    }

    /// Runs `apply` inside one write transaction and commits when it returns `Ok`.
    /// An `Err` aborts the transaction and leaves the environment untouched.
    pub fn write<R>(
        &self,
        apply: impl FnOnce(&mut WriteTxn<'_>) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        let txn = self.env.begin_rw_txn()?;
        let mut write = WriteTxn { txn, db: self };
        let result = apply(&mut write)?;
        write.txn.commit()?;
        Ok(result)
    }

    /// Forces buffered data to disk.
    pub fn flush(&self) -> Result<(), StoreError> {
        self.env.sync(true)?;
        Ok(())
    }
}

/// Handle passed to [`LocalDb::write`] closures.
pub struct WriteTxn<'env> {
    txn: RwTransaction<'env>,
    db: &'env LocalDb,
}

impl WriteTxn<'_> {
    pub fn get<T: DeserializeOwned>(
        &self,
        table: &'static str,
        key: &str,
    ) -> Result<Option<T>, StoreError> {
        let db = self.db.table(table)?;
        decode(&self.txn, db, key)
    }

    /// Like [`get`](Self::get), but an undecodable value is reported as absent.
    pub fn get_or_discard<T: DeserializeOwned>(
        &self,
        table: &'static str,
        key: &str,
    ) -> Result<Option<T>, StoreError> {
        match self.get(table, key) {
            Err(StoreError::Serialization(e)) => {
                warn!("Discarding unreadable record {table}/{key}: {e}");
                Ok(None)
            }
            other => other,
        }
    }

    pub fn put<T: Serialize>(
        &mut self,
        table: &'static str,
        key: &str,
        value: &T,
    ) -> Result<(), StoreError> {
        let db = self.db.table(table)?;
        let bytes = serde_json::to_vec(value)?;
        self.txn.put(db, &key, &bytes, WriteFlags::empty())?;
        Ok(())
    }

    /// Deletes `key`; returns whether it existed.
    pub fn delete(&mut self, table: &'static str, key: &str) -> Result<bool, StoreError> {
        let db = self.db.table(table)?;
        match self.txn.del(db, &key, None) {
            Ok(()) => Ok(true),
            Err(lmdb::Error::NotFound) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Writes raw bytes, bypassing JSON encoding.
    pub fn put_raw(
        &mut self,
        table: &'static str,
        key: &str,
        bytes: &[u8],
    ) -> Result<(), StoreError> {
        let db = self.db.table(table)?;
        self.txn.put(db, &key, &bytes, WriteFlags::empty())?;
        Ok(())
    }
}

fn decode<T: DeserializeOwned>(
    txn: &impl Transaction,
    db: Database,
    key: &str,
) -> Result<Option<T>, StoreError> {
    match txn.get(db, &key) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(bytes)?)),
        Err(lmdb::Error::NotFound) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Row {
        name: String,
        count: u32,
    }

    fn open(dir: &TempDir) -> LocalDb {
        LocalDb::open(dir.path().join("db.lmdb"), 4, &["rows", "meta"]).unwrap()
    }

    #[test]
    fn put_get_delete_round() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);

        db.write(|txn| txn.put("rows", "a", &Row { name: "a".into(), count: 1 })).unwrap();
        let row: Option<Row> = db.get("rows", "a").unwrap();
        assert_eq!(row, Some(Row { name: "a".into(), count: 1 }));

        let existed = db.write(|txn| txn.delete("rows", "a")).unwrap();
        assert!(existed);
        let again = db.write(|txn| txn.delete("rows", "a")).unwrap();
        assert!(!again);
        assert_eq!(db.get::<Row>("rows", "a").unwrap(), None);
    }

    #[test]
    fn failed_closure_aborts_the_transaction() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);

        let result: Result<(), StoreError> = db.write(|txn| {
            txn.put("rows", "b", &Row { name: "b".into(), count: 2 })?;
            Err(StoreError::Poisoned("forced".into()))
        });
        assert!(result.is_err());
        assert_eq!(db.get::<Row>("rows", "b").unwrap(), None);
    }

    #[test]
    fn unreadable_values_can_be_discarded() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);

        db.write(|txn| txn.put_raw("meta", "broken", b"{not json")).unwrap();
        assert!(matches!(db.get::<Row>("meta", "broken"), Err(StoreError::Serialization(_))));
        let discarded: Option<Row> = db.write(|txn| txn.get_or_discard("meta", "broken")).unwrap();
        assert_eq!(discarded, None);
    }

    #[test]
    fn unknown_tables_are_rejected() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);
        assert!(matches!(db.get::<Row>("nope", "k"), Err(StoreError::UnknownTable("nope"))));
    }

    #[test]
    fn data_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let db = open(&dir);
            let row = Row {
                name: "keep".into(),
                count: 7,
            };
            db.write(|txn| txn.put("rows", "keep", &row)).unwrap();
            db.flush().unwrap();
        }
        let db = open(&dir);
        assert_eq!(db.get::<Row>("rows", "keep").unwrap().map(|r| r.count), Some(7));
    }

    #[test]
    fn oversized_map_is_rejected() {
        let dir = TempDir::new().unwrap();
        let result = LocalDb::open(dir.path().join("huge.lmdb"), usize::MAX, &["rows"]);
        assert!(matches!(result, Err(StoreError::InvalidConfig(_))));
    }
}
