//! Local `SQLite` persistence

mod kv;
mod schema;

use std::path::Path;

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;

use crate::{Error, Result};

pub use kv::KvStore;
pub use schema::SCHEMA_VERSION;

/// Database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// Pooled database connection
pub type DbConn = PooledConnection<SqliteConnectionManager>;

/// Connection settings applied to every pooled connection
const CONNECTION_PRAGMAS: &str = "PRAGMA journal_mode = WAL; PRAGMA busy_timeout = 5000;";

/// Open (creating if needed) the database at `path` and migrate it
///
/// # Errors
///
/// Returns error if the file cannot be opened or a migration fails
pub fn init<P: AsRef<Path>>(path: P) -> Result<DbPool> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let manager =
        SqliteConnectionManager::file(path).with_init(|c| c.execute_batch(CONNECTION_PRAGMAS));
    let pool = migrated_pool(manager, 4)?;
    tracing::info!(path = %path.display(), version = SCHEMA_VERSION, "database ready");
    Ok(pool)
}

/// Single-connection in-memory database, for tests and throwaway runs
///
/// # Errors
///
/// Returns error if the schema cannot be created
pub fn init_memory() -> Result<DbPool> {
    // every connection of a memory manager is a separate database
    migrated_pool(SqliteConnectionManager::memory(), 1)
}

fn migrated_pool(manager: SqliteConnectionManager, size: u32) -> Result<DbPool> {
    let pool = Pool::builder()
        .max_size(size)
        .build(manager)
        .map_err(|e| Error::Database(e.to_string()))?;
    schema::init(&*connection(&pool)?)?;
    Ok(pool)
}

/// Check a connection out of the pool
///
/// # Errors
///
/// Returns error if the pool is exhausted or the database is unreachable
pub fn connection(pool: &DbPool) -> Result<DbConn> {
    pool.get().map_err(|e| Error::Database(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_memory() {
        let pool = init_memory().unwrap();
        let _conn = pool.get().unwrap();
    }

    #[test]
    fn test_init_file_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("parley.db");
        let pool = init(&path).unwrap();
        assert!(path.exists());

        let mode: String = connection(&pool)
            .unwrap()
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode, "wal");
    }
}
