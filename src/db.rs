// SQLite handle shared by the job table, the work queue and the rating store
//
// rusqlite blocks the calling thread (up to the busy timeout under write contention), so
// every statement issued from async code runs on tokio's blocking pool.

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{Result, TandemError};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) a database file in WAL mode. Parent directories are created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::with_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            "#,
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` on the current thread. Only for setup, before the handle is shared.
    pub fn call_sync<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut conn)
    }

    /// Run `f` with the connection on the blocking pool.
    pub async fn call<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().unwrap_or_else(|e| e.into_inner());
            f(&mut conn)
        })
        .await
        .map_err(|e| TandemError::Storage(format!("Database task join error: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_call_runs_statements_off_the_runtime() {
        let db = Database::open_in_memory().unwrap();
        db.call_sync(|conn| {
            conn.execute_batch("CREATE TABLE t (v INTEGER NOT NULL);")?;
            Ok(())
        })
        .unwrap();

        db.call(|conn| {
            conn.execute("INSERT INTO t (v) VALUES (?1)", [7])?;
            Ok(())
        })
        .await
        .unwrap();

        let v: i64 = db
            .call(|conn| Ok(conn.query_row("SELECT v FROM t", [], |row| row.get(0))?))
            .await
            .unwrap();
        assert_eq!(v, 7);
    }

    #[tokio::test]
    async fn test_errors_propagate_from_blocking_pool() {
        let db = Database::open_in_memory().unwrap();
        let result = db
            .call(|conn| Ok(conn.execute("INSERT INTO missing (v) VALUES (1)", [])?))
            .await;
        assert!(matches!(result, Err(TandemError::Database(_))));
    }

    #[test]
    fn test_open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/data/jobs.db");
        Database::open(&path).unwrap();
        assert!(path.exists());
    }
}
