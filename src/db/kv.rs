//! Synchronous key-value store on top of `SQLite`

use crate::db::DbPool;
use crate::{Error, Result};

/// Small string key-value store; every write is committed before returning
#[derive(Clone)]
pub struct KvStore {
    db: DbPool,
}

impl KvStore {
    /// Create a key-value store backed by the given pool
    #[must_use]
    pub const fn new(db: DbPool) -> Self {
        Self { db }
    }

    /// Read a value, or `None` if the key is absent
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = super::connection(&self.db)?;
        let result = conn.query_row(
            "SELECT value FROM kv_store WHERE key = ?1",
            rusqlite::params![key],
            |row| row.get(0),
        );
        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Error::Database(e.to_string())),
        }
    }

    /// Insert or replace a value
    ///
    /// # Errors
    ///
    /// Returns an error if the database write fails.
    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        let conn = super::connection(&self.db)?;
        conn.execute(
            "INSERT INTO kv_store (key, value, updated_at)
             VALUES (?1, ?2, datetime('now'))
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at",
            rusqlite::params![key, value],
        )
        .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    /// Remove a key; removing an absent key is not an error
    ///
    /// # Errors
    ///
    /// Returns an error if the database write fails.
    pub fn remove(&self, key: &str) -> Result<()> {
        let conn = super::connection(&self.db)?;
        conn.execute("DELETE FROM kv_store WHERE key = ?1", rusqlite::params![key])
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> KvStore {
        KvStore::new(crate::db::init_memory().unwrap())
    }

    #[test]
    fn set_and_get() {
        let store = test_store();
        store.set("greeting", "namaste").unwrap();
        assert_eq!(store.get("greeting").unwrap().as_deref(), Some("namaste"));
    }

    #[test]
    fn set_overwrites() {
        let store = test_store();
        store.set("k", "one").unwrap();
        store.set("k", "two").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("two"));
    }

    #[test]
    fn remove_is_idempotent() {
        let store = test_store();
        store.set("k", "v").unwrap();
        store.remove("k").unwrap();
        store.remove("k").unwrap();
        assert!(store.get("k").unwrap().is_none());
    }
}
