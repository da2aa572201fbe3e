//! `DuckDB` connection pool management.

use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use ::duckdb::Connection;

struct PoolInner {
    db_path: PathBuf,
    max_idle: usize,
    /// First connection opened; every other connection is cloned from it so
    /// all of them share one database instance.
    root: Mutex<Option<Connection>>,
    idle: Mutex<Vec<Connection>>,
}

/// Small reuse pool of `DuckDB` connections. Readers and writers draw from
/// the same idle list; `DuckDB` fixes access mode per database instance.
#[derive(Clone)]
pub struct DuckDbConnectionManager {
    inner: Arc<PoolInner>,
}

impl DuckDbConnectionManager {
    /// Create a pool for the database at `path` keeping at most `max_idle`
    /// idle connections.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, max_idle: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                db_path: path.into(),
                max_idle: max_idle.max(1),
                root: Mutex::new(None),
                idle: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Take an idle connection or open a new one.
    ///
    /// # Errors
    /// Returns an error if the database file cannot be opened or configured.
    ///
    /// # Panics
    /// Panics if the pool mutex is poisoned.
    pub fn acquire(&self) -> Result<PooledConnection, ::duckdb::Error> {
        let reused = self
            .inner
            .idle
            .lock()
            .expect("duckdb connection pool mutex poisoned")
            .pop();

        let connection = match reused {
            Some(connection) => connection,
            None => self.open_connection()?,
        };

        Ok(PooledConnection {
            pool: Arc::clone(&self.inner),
            connection: Some(connection),
        })
    }

    #[must_use]
    pub fn db_path(&self) -> &Path {
        self.inner.db_path.as_path()
    }

    fn open_connection(&self) -> Result<Connection, ::duckdb::Error> {
        let mut root = self
            .inner
            .root
            .lock()
            .expect("duckdb root connection mutex poisoned");
        let connection = match root.as_ref() {
            Some(root) => root.try_clone()?,
            None => {
                let opened = Connection::open(self.inner.db_path.as_path())?;
                let connection = opened.try_clone()?;
                *root = Some(opened);
                connection
            }
        };
        connection.execute_batch("PRAGMA disable_progress_bar;")?;
        Ok(connection)
    }
}

/// A pooled connection that returns to the pool when dropped.
pub struct PooledConnection {
    pool: Arc<PoolInner>,
    connection: Option<Connection>,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Self::Target {
        self.connection
            .as_ref()
            .expect("pooled connection unexpectedly missing")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.connection
            .as_mut()
            .expect("pooled connection unexpectedly missing")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(connection) = self.connection.take() else {
            return;
        };

        let mut idle = self
            .pool
            .idle
            .lock()
            .expect("duckdb connection pool mutex poisoned");
        if idle.len() < self.pool.max_idle {
            idle.push(connection);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn released_connections_are_reused_up_to_max_idle() {
        let temp = tempdir().expect("tempdir");
        let manager = DuckDbConnectionManager::new(temp.path().join("pool.duckdb"), 1);

        {
            let writer = manager.acquire().expect("acquire");
            writer
                .execute_batch("CREATE TABLE t (id INTEGER); INSERT INTO t VALUES (1)")
                .expect("create");
            let _second = manager.acquire().expect("acquire");
        }
        assert_eq!(manager.inner.idle.lock().expect("lock").len(), 1);

        let reader = manager.acquire().expect("acquire");
        assert!(manager.inner.idle.lock().expect("lock").is_empty());
        let count: i64 = reader
            .query_row("SELECT count(*) FROM t", [], |row| row.get(0))
            .expect("count");
        assert_eq!(count, 1);
    }
}
