//! Key/value facts

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;

use super::DbPool;
use crate::{Error, Result};

/// Key under which the last addressed persona is stored
pub const LAST_PERSONA_KEY: &str = "last_persona";

/// Durable single-value facts
pub trait FactStore: Send + Sync {
    /// Read a fact
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be read
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a fact, replacing any previous value
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be written
    fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// SQLite-backed fact store
#[derive(Clone)]
pub struct SqliteFactStore {
    pool: DbPool,
}

impl SqliteFactStore {
    /// Create a new fact store
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

impl FactStore for SqliteFactStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let value = conn.query_row("SELECT value FROM facts WHERE key = ?1", [key], |row| {
            row.get(0)
        });

        match value {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let now = Utc::now().to_rfc3339();

        conn.execute(
            "INSERT INTO facts (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = ?3",
            [key, value, &now],
        )
        .map_err(|e| Error::Database(e.to_string()))?;

        tracing::debug!(key, value, "fact stored");
        Ok(())
    }
}

/// In-process fact store for tests and ephemeral runs
///
/// Clones share the same facts.
#[derive(Debug, Clone, Default)]
pub struct MemoryFactStore {
    facts: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryFactStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl FactStore for MemoryFactStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let facts = self
            .facts
            .lock()
            .map_err(|_| Error::Database("fact store lock poisoned".to_string()))?;
        Ok(facts.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut facts = self
            .facts
            .lock()
            .map_err(|_| Error::Database("fact store lock poisoned".to_string()))?;
        facts.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{init, init_memory};

    #[test]
    fn test_sqlite_facts() {
        let store = SqliteFactStore::new(init_memory().unwrap());

        assert_eq!(store.get(LAST_PERSONA_KEY).unwrap(), None);

        store.set(LAST_PERSONA_KEY, "orion").unwrap();
        assert_eq!(store.get(LAST_PERSONA_KEY).unwrap(), Some("orion".to_string()));

        // Upsert
        store.set(LAST_PERSONA_KEY, "luna").unwrap();
        assert_eq!(store.get(LAST_PERSONA_KEY).unwrap(), Some("luna".to_string()));
    }

    #[test]
    fn test_sqlite_facts_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parley.db");

        SqliteFactStore::new(init(&path).unwrap())
            .set(LAST_PERSONA_KEY, "sol")
            .unwrap();

        let reopened = SqliteFactStore::new(init(&path).unwrap());
        assert_eq!(reopened.get(LAST_PERSONA_KEY).unwrap(), Some("sol".to_string()));
    }

    #[test]
    fn test_memory_facts_shared_between_clones() {
        let store = MemoryFactStore::new();
        let other = store.clone();

        store.set("k", "v").unwrap();
        assert_eq!(other.get("k").unwrap(), Some("v".to_string()));
    }
}
