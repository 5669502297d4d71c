use std::path::{Path, PathBuf};

use redb::{Database, ReadableTable, TableDefinition, TableError};

use super::{KeyValueStore, StorageError};

const KV_TABLE: TableDefinition<&str, &str> = TableDefinition::new("client_shield_kv");

fn backend<E: Into<redb::Error>>(err: E) -> StorageError {
    StorageError::Redb(err.into())
}

/// Durable store backed by a single redb table.
pub struct RedbStore {
    db: Database,
    path: PathBuf,
}

impl RedbStore {
    /// Opens the database file, creating it when missing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let db = Database::create(&path).map_err(backend)?;
        log::debug!("opened redb store at {}", path.display());
        Ok(Self { db, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore").field("path", &self.path).finish()
    }
}

impl KeyValueStore for RedbStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let txn = self.db.begin_read().map_err(backend)?;
        let table = match txn.open_table(KV_TABLE) {
            Ok(table) => table,
            // Nothing has been written yet.
            Err(TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(err) => return Err(backend(err)),
        };
        let value = table.get(key).map_err(backend)?;
        Ok(value.map(|guard| guard.value().to_string()))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let txn = self.db.begin_write().map_err(backend)?;
        {
            let mut table = txn.open_table(KV_TABLE).map_err(backend)?;
            table.insert(key, value).map_err(backend)?;
        }
        txn.commit().map_err(backend)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let txn = self.db.begin_write().map_err(backend)?;
        {
            let mut table = txn.open_table(KV_TABLE).map_err(backend)?;
            table.remove(key).map_err(backend)?;
        }
        txn.commit().map_err(backend)?;
        Ok(())
    }
}
