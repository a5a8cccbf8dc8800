//! Shared SQLite connection.
//!
//! Every caller goes through one mutex-guarded connection, so writes are
//! serialized and each upsert's read-then-write runs without interleaving.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::Connection;
use tracing::debug;

use crate::error::{Result, StorageError};
use crate::schema::run_migrations;

/// Pragmas applied to every freshly opened connection.
const CONNECTION_PRAGMAS: &str = "
    PRAGMA journal_mode = WAL;
    PRAGMA synchronous = NORMAL;
    PRAGMA busy_timeout = 5000;
";

/// Cloneable handle to the single migrated connection.
#[derive(Clone)]
pub struct ConnectionPool {
    shared: Arc<Mutex<Connection>>,
}

/// Exclusive access to the connection for the guard's lifetime.
pub type PooledConnection<'a> = MutexGuard<'a, Connection>;

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool").finish_non_exhaustive()
    }
}

impl ConnectionPool {
    /// Opens (or creates) the database file at `path`.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        Self::prepare(Connection::open(path.as_ref())?)
    }

    /// Opens a private in-memory database.
    pub fn in_memory() -> Result<Self> {
        Self::prepare(Connection::open_in_memory()?)
    }

    fn prepare(conn: Connection) -> Result<Self> {
        conn.execute_batch(CONNECTION_PRAGMAS)?;
        run_migrations(&conn)?;
        debug!("Connection ready");

        Ok(Self {
            shared: Arc::new(Mutex::new(conn)),
        })
    }

    /// Locks the connection. Fails only if a previous holder panicked.
    pub fn get(&self) -> Result<PooledConnection<'_>> {
        self.shared
            .lock()
            .map_err(|_| StorageError::Config("connection lock poisoned".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn table_rows(conn: &Connection, table: &str) -> i64 {
        conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
            row.get(0)
        })
        .unwrap()
    }

    #[test]
    fn in_memory_is_migrated() {
        let pool = ConnectionPool::in_memory().unwrap();
        let conn = pool.get().unwrap();

        assert_eq!(table_rows(&conn, "articles"), 0);
        assert_eq!(table_rows(&conn, "profiles"), 0);
    }

    #[test]
    fn clones_see_the_same_data() {
        let pool = ConnectionPool::in_memory().unwrap();
        let other = pool.clone();

        pool.get()
            .unwrap()
            .execute(
                "INSERT INTO profiles (biz, created_at, updated_at) VALUES ('MzA5', 'now', 'now')",
                [],
            )
            .unwrap();

        assert_eq!(table_rows(&other.get().unwrap(), "profiles"), 1);
    }

    #[test]
    fn file_database_uses_wal() {
        let dir = TempDir::new().unwrap();
        let pool = ConnectionPool::new(dir.path().join("backup.db")).unwrap();
        let conn = pool.get().unwrap();

        let mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }
}
