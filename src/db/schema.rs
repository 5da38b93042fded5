//! Schema migrations, tracked in `PRAGMA user_version`

use rusqlite::Connection;

use crate::Result;

type Migration = fn(&Connection) -> Result<()>;

/// Migration `i` brings the schema to version `i + 1`
const MIGRATIONS: &[Migration] = &[kv_store];

/// Current schema version
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
pub const SCHEMA_VERSION: i32 = MIGRATIONS.len() as i32;

/// Apply every migration newer than the database's version
///
/// # Errors
///
/// Returns error if reading the version or a migration fails
pub fn init(conn: &Connection) -> Result<()> {
    let current: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    for (version, migrate) in (1..).zip(MIGRATIONS) {
        if version <= current {
            continue;
        }
        migrate(conn)?;
        conn.pragma_update(None, "user_version", version)?;
        tracing::info!(version, "applied schema migration");
    }
    Ok(())
}

/// v1: string key-value store holding the history ledger
fn kv_store(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS kv_store (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;
    Ok(())
}
