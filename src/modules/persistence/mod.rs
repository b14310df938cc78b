//! Key-value persistence port.
//!
//! The analytics log and pattern table are saved and restored through this
//! interface. Persistence is best-effort everywhere: failures are logged by
//! the caller and never fatal.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use redb::{Database, ReadableTable, TableDefinition};
use thiserror::Error;

const TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("banguard_state");

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("storage error: {0}")]
    Storage(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<redb::Error> for PersistenceError {
    fn from(err: redb::Error) -> Self {
        PersistenceError::Storage(err.to_string())
    }
}

/// Minimal blob store contract consumed by the core.
pub trait KeyValueStore: Send + Sync {
    fn save(&self, key: &str, blob: &[u8]) -> Result<(), PersistenceError>;
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, PersistenceError>;
}

/// Embedded-database store backed by redb.
pub struct RedbStore {
    db: Database,
}

impl RedbStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let db = Database::create(path).map_err(|err| PersistenceError::Storage(err.to_string()))?;
        Ok(Self { db })
    }
}

impl KeyValueStore for RedbStore {
    fn save(&self, key: &str, blob: &[u8]) -> Result<(), PersistenceError> {
        let txn = self
            .db
            .begin_write()
            .map_err(|err| PersistenceError::Storage(err.to_string()))?;
        {
            let mut table = txn
                .open_table(TABLE)
                .map_err(|err| PersistenceError::Storage(err.to_string()))?;
            table
                .insert(key, blob)
                .map_err(|err| PersistenceError::Storage(err.to_string()))?;
        }
        txn.commit()
            .map_err(|err| PersistenceError::Storage(err.to_string()))?;
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, PersistenceError> {
        let txn = self
            .db
            .begin_read()
            .map_err(|err| PersistenceError::Storage(err.to_string()))?;
        let table = match txn.open_table(TABLE) {
            Ok(table) => table,
            // First run: the table does not exist yet.
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(err) => return Err(PersistenceError::Storage(err.to_string())),
        };
        let value = table
            .get(key)
            .map_err(|err| PersistenceError::Storage(err.to_string()))?;
        Ok(value.map(|guard| guard.value().to_vec()))
    }
}

/// In-memory store for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn save(&self, key: &str, blob: &[u8]) -> Result<(), PersistenceError> {
        let mut guard = self.entries.lock().expect("memory store lock poisoned");
        guard.insert(key.to_string(), blob.to_vec());
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, PersistenceError> {
        let guard = self.entries.lock().expect("memory store lock poisoned");
        Ok(guard.get(key).cloned())
    }
}
