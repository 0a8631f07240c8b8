use crate::infrastructure::error::InfraError;
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Synchronous, always-available key/value cache. Authoritative for this device.
///
/// Every entry carries a replication flag that survives restarts: `put` stores a value as
/// unsynced, and only `mark_synced` with the same value (or `put_synced`) clears it.
pub trait LocalCache: Send + Sync {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>, InfraError>;
    fn put(&self, namespace: &str, key: &str, value: &Value) -> Result<(), InfraError>;
    /// Stores a value that already matches the remote copy.
    fn put_synced(&self, namespace: &str, key: &str, value: &Value) -> Result<(), InfraError>;
    /// Flags the entry as replicated if it still holds `value`. Returns whether it did.
    fn mark_synced(&self, namespace: &str, key: &str, value: &Value) -> Result<bool, InfraError>;
    fn unsynced_keys(&self, namespace: &str) -> Result<Vec<String>, InfraError>;
}

#[derive(Debug)]
pub struct SqliteLocalCache {
    db_path: PathBuf,
    connection: Mutex<Option<Connection>>,
}

impl SqliteLocalCache {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
            connection: Mutex::new(None),
        }
    }

    fn with_connection<T>(
        &self,
        operation: impl FnOnce(&Connection) -> Result<T, InfraError>,
    ) -> Result<T, InfraError> {
        let mut guard = self
            .connection
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("local cache lock poisoned: {error}")))?;
        if guard.is_none() {
            *guard = Some(Connection::open(&self.db_path)?);
        }
        match guard.as_ref() {
            Some(connection) => operation(connection),
            None => Err(InfraError::InvalidConfig(
                "local cache connection unavailable".to_string(),
            )),
        }
    }

    fn upsert(&self, namespace: &str, key: &str, value: &Value, synced: bool) -> Result<(), InfraError> {
        let serialized = serde_json::to_string(value)?;
        self.with_connection(|connection| {
            // updated_at is row bookkeeping stamped by SQLite itself.
            connection.execute(
                "INSERT INTO kv_store (namespace, key, value, updated_at, synced)
                 VALUES (?1, ?2, ?3, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'), ?4)
                 ON CONFLICT(namespace, key) DO UPDATE SET
                   value = excluded.value,
                   updated_at = excluded.updated_at,
                   synced = excluded.synced",
                params![namespace, key, serialized, synced],
            )?;
            Ok(())
        })
    }
}

impl LocalCache for SqliteLocalCache {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>, InfraError> {
        let raw: Option<String> = self.with_connection(|connection| {
            connection
                .query_row(
                    "SELECT value FROM kv_store WHERE namespace = ?1 AND key = ?2",
                    params![namespace, key],
                    |row| row.get(0),
                )
                .optional()
                .map_err(InfraError::from)
        })?;

        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    fn put(&self, namespace: &str, key: &str, value: &Value) -> Result<(), InfraError> {
        self.upsert(namespace, key, value, false)
    }

    fn put_synced(&self, namespace: &str, key: &str, value: &Value) -> Result<(), InfraError> {
        self.upsert(namespace, key, value, true)
    }

    fn mark_synced(&self, namespace: &str, key: &str, value: &Value) -> Result<bool, InfraError> {
        // A newer local write in between stores different text and keeps the flag down.
        let serialized = serde_json::to_string(value)?;
        self.with_connection(|connection| {
            let changed = connection.execute(
                "UPDATE kv_store SET synced = 1
                 WHERE namespace = ?1 AND key = ?2 AND value = ?3",
                params![namespace, key, serialized],
            )?;
            Ok(changed > 0)
        })
    }

    fn unsynced_keys(&self, namespace: &str) -> Result<Vec<String>, InfraError> {
        self.with_connection(|connection| {
            let mut statement = connection.prepare(
                "SELECT key FROM kv_store WHERE namespace = ?1 AND synced = 0 ORDER BY key",
            )?;
            let keys = statement
                .query_map(params![namespace], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(keys)
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
struct MemoryEntry {
    value: Value,
    synced: bool,
}

#[derive(Debug, Default)]
pub struct InMemoryLocalCache {
    entries: Mutex<BTreeMap<(String, String), MemoryEntry>>,
}

impl InMemoryLocalCache {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<(String, String), MemoryEntry>>, InfraError> {
        self.entries
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("local cache lock poisoned: {error}")))
    }

    fn insert(&self, namespace: &str, key: &str, value: &Value, synced: bool) -> Result<(), InfraError> {
        let mut entries = self.lock()?;
        entries.insert(
            (namespace.to_string(), key.to_string()),
            MemoryEntry {
                value: value.clone(),
                synced,
            },
        );
        Ok(())
    }
}

impl LocalCache for InMemoryLocalCache {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>, InfraError> {
        let entries = self.lock()?;
        Ok(entries
            .get(&(namespace.to_string(), key.to_string()))
            .map(|entry| entry.value.clone()))
    }

    fn put(&self, namespace: &str, key: &str, value: &Value) -> Result<(), InfraError> {
        self.insert(namespace, key, value, false)
    }

    fn put_synced(&self, namespace: &str, key: &str, value: &Value) -> Result<(), InfraError> {
        self.insert(namespace, key, value, true)
    }

    fn mark_synced(&self, namespace: &str, key: &str, value: &Value) -> Result<bool, InfraError> {
        let mut entries = self.lock()?;
        match entries.get_mut(&(namespace.to_string(), key.to_string())) {
            Some(entry) if entry.value == *value => {
                entry.synced = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn unsynced_keys(&self, namespace: &str) -> Result<Vec<String>, InfraError> {
        let entries = self.lock()?;
        Ok(entries
            .iter()
            .filter(|((entry_namespace, _), entry)| entry_namespace == namespace && !entry.synced)
            .map(|((_, key), _)| key.clone())
            .collect())
    }
}
