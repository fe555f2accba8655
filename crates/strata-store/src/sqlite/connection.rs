//! r2d2-backed `SQLite` connection pool.
//!
//! Every connection gets the same pragma set: WAL journal mode for
//! concurrent readers, foreign keys on, and a busy timeout so short lock
//! contention resolves inside `SQLite` before our own retry loop engages.

use std::path::Path;
use std::time::Duration;

use r2d2_sqlite::SqliteConnectionManager;
use tracing::debug;

use crate::errors::Result;
use crate::sqlite::migrations::run_migrations;

/// Pooled connection type used by the store.
pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// Shared connection pool handle.
pub type ConnectionPool = r2d2::Pool<SqliteConnectionManager>;

/// Pragmas applied to every pooled connection.
const CONNECTION_PRAGMAS: &str = "
    PRAGMA journal_mode = WAL;
    PRAGMA foreign_keys = ON;
    PRAGMA busy_timeout = 5000;
    PRAGMA synchronous = NORMAL;
";

/// Open (or create) the database at `path`, run migrations, and build a pool.
pub fn open_pool(path: &Path, max_size: u32) -> Result<ConnectionPool> {
    let manager = SqliteConnectionManager::file(path)
        .with_init(|conn| conn.execute_batch(CONNECTION_PRAGMAS));
    let pool = r2d2::Pool::builder()
        .max_size(max_size)
        .connection_timeout(Duration::from_secs(10))
        .build(manager)?;

    let conn = pool.get()?;
    run_migrations(&conn)?;
    drop(conn);
    debug!(?path, max_size, "sqlite pool opened");
    Ok(pool)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_pool_runs_migrations() {
        let dir = tempfile::tempdir().unwrap();
        let pool = open_pool(&dir.path().join("strata.db"), 4).unwrap();
        let conn = pool.get().unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'contexts'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn pool_hands_out_multiple_connections() {
        let dir = tempfile::tempdir().unwrap();
        let pool = open_pool(&dir.path().join("strata.db"), 4).unwrap();
        let a = pool.get().unwrap();
        let b = pool.get().unwrap();
        drop((a, b));
    }
}
