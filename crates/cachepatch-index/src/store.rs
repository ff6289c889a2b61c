//! Persistent record store backed by redb.
//!
//! One table maps stable names to bincode-encoded records. Persistence is
//! snapshot-oriented: the in-memory map in [`crate::ContentIndex`] is
//! authoritative and the whole record set is written in a single
//! transaction, so readers never observe a partially written state.

use crate::record::ContentRecord;
use cachepatch_common::StableName;
use redb::{Database, ReadableTable, TableDefinition};
use std::path::Path;
use tracing::error;

/// StableName -> bincode-encoded `ContentRecord`
const RECORDS: TableDefinition<&str, &[u8]> = TableDefinition::new("records");

/// Error type for index store operations
#[derive(Debug, thiserror::Error)]
pub enum IndexStoreError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::DatabaseError),
    #[error("redb storage error: {0}")]
    Storage(#[from] redb::StorageError),
    #[error("redb table error: {0}")]
    Table(#[from] redb::TableError),
    #[error("redb transaction error: {0}")]
    Transaction(Box<redb::TransactionError>),
    #[error("redb commit error: {0}")]
    Commit(#[from] redb::CommitError),
    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<redb::TransactionError> for IndexStoreError {
    fn from(e: redb::TransactionError) -> Self {
        Self::Transaction(Box::new(e))
    }
}

pub type IndexStoreResult<T> = Result<T, IndexStoreError>;

/// Persistent record store backed by redb.
pub struct IndexStore {
    db: Database,
}

impl IndexStore {
    /// Open (or create) the redb database at the given path.
    pub fn open(path: impl AsRef<Path>) -> IndexStoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let db = Database::create(path)?;

        // Create the table eagerly so a first read txn doesn't fail
        let write_txn = db.begin_write()?;
        {
            let _t = write_txn.open_table(RECORDS)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    /// Replace the persisted record set with the given snapshot in one
    /// transaction.
    pub fn save_all(&self, records: &[ContentRecord]) -> IndexStoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(RECORDS)?;
            // Drop keys that are no longer in the snapshot.
            let stale: Vec<String> = table
                .iter()?
                .filter_map(Result::ok)
                .map(|(k, _)| k.value().to_string())
                .filter(|k| !records.iter().any(|r| r.stable_name.as_str() == k))
                .collect();
            for key in stale {
                table.remove(key.as_str())?;
            }
            for record in records {
                let bytes = bincode::serialize(record)?;
                table.insert(record.stable_name.as_str(), bytes.as_slice())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Load every persisted record. Undecodable entries are logged and
    /// skipped rather than failing the whole load.
    pub fn load_all(&self) -> IndexStoreResult<Vec<ContentRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(RECORDS)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let entry = entry?;
            let key = entry.0.value().to_string();
            match bincode::deserialize::<ContentRecord>(entry.1.value()) {
                Ok(record) => result.push(record),
                Err(e) => error!("failed to decode persisted record '{}': {}", key, e),
            }
        }
        Ok(result)
    }

    /// Point lookup by stable name.
    pub fn get(&self, stable: &StableName) -> IndexStoreResult<Option<ContentRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(RECORDS)?;
        let Some(value) = table.get(stable.as_str())? else {
            return Ok(None);
        };
        Ok(Some(bincode::deserialize(value.value())?))
    }
}
