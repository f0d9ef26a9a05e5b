//! Connection management: one serialized writer plus a small pool of
//! read connections, every connection configured with the same pragmas.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use bme_core::errors::KernelResult;
use rusqlite::Connection;

use crate::to_storage_err;

/// Apply the safety and performance pragmas to a connection.
///
/// WAL mode, NORMAL sync, foreign keys ON, 5 s busy_timeout.
pub fn apply_pragmas(conn: &Connection) -> KernelResult<()> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 5000;
        ",
    )
    .map_err(|e| to_storage_err(e.to_string()))?;
    Ok(())
}

/// The single write connection. All mutations serialize through it.
pub struct WriteConnection {
    conn: Mutex<Connection>,
}

impl WriteConnection {
    fn configure(conn: Connection) -> KernelResult<Self> {
        apply_pragmas(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open(path: &Path) -> KernelResult<Self> {
        let conn = Connection::open(path).map_err(|e| to_storage_err(e.to_string()))?;
        Self::configure(conn)
    }

    pub fn open_in_memory() -> KernelResult<Self> {
        let conn = Connection::open_in_memory().map_err(|e| to_storage_err(e.to_string()))?;
        Self::configure(conn)
    }

    /// Run a closure against the writer.
    pub fn with_conn_sync<F, T>(&self, f: F) -> KernelResult<T>
    where
        F: FnOnce(&Connection) -> KernelResult<T>,
    {
        let guard = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        f(&guard)
    }
}

/// Round-robin pool of read-only connections.
pub struct ReadPool {
    conns: Vec<Mutex<Connection>>,
    next: AtomicUsize,
}

impl ReadPool {
    pub fn open(path: &Path, size: usize) -> KernelResult<Self> {
        let mut conns = Vec::with_capacity(size);
        for _ in 0..size.max(1) {
            let conn = Connection::open(path).map_err(|e| to_storage_err(e.to_string()))?;
            apply_pragmas(&conn)?;
            conns.push(Mutex::new(conn));
        }
        Ok(Self {
            conns,
            next: AtomicUsize::new(0),
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> KernelResult<T>
    where
        F: FnOnce(&Connection) -> KernelResult<T>,
    {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.conns.len();
        let guard = self.conns[idx].lock().unwrap_or_else(|e| e.into_inner());
        f(&guard)
    }
}

/// The writer, the read pool, and the path they share.
///
/// In-memory mode routes reads through the writer: in-memory read
/// connections would be isolated databases that never see its changes.
pub struct ConnectionPool {
    pub writer: WriteConnection,
    readers: Option<ReadPool>,
    pub db_path: Option<PathBuf>,
}

impl ConnectionPool {
    pub fn open(path: &Path, read_pool_size: usize) -> KernelResult<Self> {
        let writer = WriteConnection::open(path)?;
        let readers = ReadPool::open(path, read_pool_size)?;
        Ok(Self {
            writer,
            readers: Some(readers),
            db_path: Some(path.to_path_buf()),
        })
    }

    pub fn open_in_memory() -> KernelResult<Self> {
        Ok(Self {
            writer: WriteConnection::open_in_memory()?,
            readers: None,
            db_path: None,
        })
    }

    /// Run a read-only query on the best available connection.
    pub fn with_reader<F, T>(&self, f: F) -> KernelResult<T>
    where
        F: FnOnce(&Connection) -> KernelResult<T>,
    {
        match &self.readers {
            Some(readers) => readers.with_conn(f),
            None => self.writer.with_conn_sync(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wal_mode_is_active_on_file_databases() {
        let dir = tempfile::TempDir::new().unwrap();
        let pool = ConnectionPool::open(&dir.path().join("t.db"), 2).unwrap();
        let mode: String = pool
            .writer
            .with_conn_sync(|conn| {
                conn.pragma_query_value(None, "journal_mode", |row| row.get(0))
                    .map_err(|e| crate::to_storage_err(e.to_string()))
            })
            .unwrap();
        assert!(mode.eq_ignore_ascii_case("wal"));
    }

    #[test]
    fn in_memory_reads_go_through_the_writer() {
        let pool = ConnectionPool::open_in_memory().unwrap();
        pool.writer
            .with_conn_sync(|conn| {
                conn.execute_batch("CREATE TABLE t(x); INSERT INTO t VALUES (1);")
                    .map_err(|e| crate::to_storage_err(e.to_string()))
            })
            .unwrap();
        let count: i64 = pool
            .with_reader(|conn| {
                conn.query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))
                    .map_err(|e| crate::to_storage_err(e.to_string()))
            })
            .unwrap();
        assert_eq!(count, 1);
    }
}
