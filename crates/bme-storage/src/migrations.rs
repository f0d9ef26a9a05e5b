//! Schema migrations, tracked through `PRAGMA user_version`.
//!
//! Each step is idempotent: column adds consult `pragma_table_info`
//! first, table creates use `IF NOT EXISTS`. The FTS virtual tables are
//! created best-effort; a build without FTS5 still gets a working
//! store, with the lexical channel downgraded at runtime.

use bme_core::errors::{KernelError, KernelResult, StorageError};
use rusqlite::Connection;
use tracing::{info, warn};

use crate::to_storage_err;

/// Current schema version.
pub const SCHEMA_VERSION: u32 = 6;

/// Run all outstanding migrations.
pub fn run_migrations(conn: &Connection) -> KernelResult<()> {
    let mut version = user_version(conn)?;

    while version < SCHEMA_VERSION {
        let next = version + 1;
        apply(conn, next).map_err(|e| {
            KernelError::Storage(StorageError::MigrationFailed {
                version: next,
                reason: e.to_string(),
            })
        })?;
        set_user_version(conn, next)?;
        info!(version = next, "applied schema migration");
        version = next;
    }

    Ok(())
}

fn apply(conn: &Connection, version: u32) -> KernelResult<()> {
    match version {
        1 => base_tables(conn),
        2 => add_column_if_missing(conn, "memories", "summary", "TEXT"),
        3 => {
            add_column_if_missing(conn, "memories", "privacy_class", "TEXT")?;
            add_column_if_missing(conn, "memories", "recall_policy", "TEXT")?;
            add_column_if_missing(conn, "memories", "expires_in", "TEXT")
        }
        4 => fts_tables(conn),
        5 => embedding_tables(conn),
        6 => chunk_tables(conn),
        other => Err(to_storage_err(format!("unknown migration version {other}"))),
    }
}

fn base_tables(conn: &Connection) -> KernelResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS memories (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          kind TEXT NOT NULL,
          key TEXT NOT NULL,
          value TEXT NOT NULL,
          ts TEXT NOT NULL
        );
        CREATE UNIQUE INDEX IF NOT EXISTS uq_memories_kind_key ON memories(kind, key);

        CREATE TABLE IF NOT EXISTS nudges (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          kind TEXT NOT NULL,
          message TEXT NOT NULL,
          actions TEXT,
          status TEXT CHECK(status IN ('pending','acked','dismissed')) DEFAULT 'pending',
          reason TEXT,
          created_ts TEXT NOT NULL,
          acted_ts TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_nudges_status_ts ON nudges(status, created_ts);

        CREATE TABLE IF NOT EXISTS reflections (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          kind TEXT NOT NULL,
          content TEXT NOT NULL,
          meta TEXT,
          ts TEXT NOT NULL,
          pinned INTEGER DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_reflections_kind_ts ON reflections(kind, ts);

        CREATE TABLE IF NOT EXISTS memory_consent (
          memory_id INTEGER PRIMARY KEY,
          consent_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
          source TEXT,
          FOREIGN KEY(memory_id) REFERENCES memories(id) ON DELETE CASCADE
        );
        ",
    )
    .map_err(|e| to_storage_err(e.to_string()))
}

fn fts_tables(conn: &Connection) -> KernelResult<()> {
    // The virtual table only ever holds sanitized index text; the map
    // table records which memory ids are represented.
    let fts = conn.execute_batch(
        "
        CREATE VIRTUAL TABLE IF NOT EXISTS memory_fts
          USING fts5(value, summary, tokenize='porter');
        ",
    );
    if let Err(e) = fts {
        warn!("FTS5 unavailable, skipping memory_fts creation: {e}");
    }

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS memory_fts_map (
          memory_id INTEGER PRIMARY KEY,
          FOREIGN KEY(memory_id) REFERENCES memories(id) ON DELETE CASCADE
        );
        ",
    )
    .map_err(|e| to_storage_err(e.to_string()))
}

fn embedding_tables(conn: &Connection) -> KernelResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS memory_embeddings (
          embedding_id INTEGER PRIMARY KEY AUTOINCREMENT,
          memory_id    INTEGER NOT NULL,
          source       TEXT NOT NULL CHECK(source IN ('summary','full')),
          dim          INTEGER NOT NULL,
          vec          BLOB NOT NULL,
          norm         REAL NOT NULL,
          provider     TEXT NOT NULL,
          model        TEXT NOT NULL,
          created_at   TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
          FOREIGN KEY(memory_id) REFERENCES memories(id) ON DELETE CASCADE
        );
        CREATE INDEX IF NOT EXISTS idx_mememb_memory_id ON memory_embeddings(memory_id);
        CREATE INDEX IF NOT EXISTS idx_mememb_source ON memory_embeddings(source);
        CREATE INDEX IF NOT EXISTS idx_mememb_dim ON memory_embeddings(dim);
        ",
    )
    .map_err(|e| to_storage_err(e.to_string()))
}

fn chunk_tables(conn: &Connection) -> KernelResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS memory_chunks (
          chunk_id INTEGER PRIMARY KEY AUTOINCREMENT,
          memory_id INTEGER NOT NULL,
          seq INTEGER NOT NULL,
          token_start INTEGER NOT NULL,
          token_end INTEGER NOT NULL,
          text TEXT NOT NULL,
          UNIQUE(memory_id, seq),
          FOREIGN KEY(memory_id) REFERENCES memories(id) ON DELETE CASCADE
        );
        CREATE INDEX IF NOT EXISTS idx_chunks_memory_id ON memory_chunks(memory_id);

        CREATE TABLE IF NOT EXISTS chunk_fts_map (
          chunk_id INTEGER PRIMARY KEY,
          FOREIGN KEY(chunk_id) REFERENCES memory_chunks(chunk_id) ON DELETE CASCADE
        );
        ",
    )
    .map_err(|e| to_storage_err(e.to_string()))?;

    let fts = conn.execute_batch(
        "
        CREATE VIRTUAL TABLE IF NOT EXISTS chunk_fts
          USING fts5(text, tokenize='porter');
        ",
    );
    if let Err(e) = fts {
        warn!("FTS5 unavailable, skipping chunk_fts creation: {e}");
    }
    Ok(())
}

fn add_column_if_missing(
    conn: &Connection,
    table: &str,
    column: &str,
    decl: &str,
) -> KernelResult<()> {
    if has_column(conn, table, column)? {
        return Ok(());
    }
    conn.execute_batch(&format!("ALTER TABLE {table} ADD COLUMN {column} {decl}"))
        .map_err(|e| to_storage_err(e.to_string()))
}

fn has_column(conn: &Connection, table: &str, column: &str) -> KernelResult<bool> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({table})"))
        .map_err(|e| to_storage_err(e.to_string()))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))
        .map_err(|e| to_storage_err(e.to_string()))?;
    for name in names {
        let name = name.map_err(|e| to_storage_err(e.to_string()))?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

fn user_version(conn: &Connection) -> KernelResult<u32> {
    conn.pragma_query_value(None, "user_version", |row| row.get::<_, i64>(0))
        .map(|v| v as u32)
        .map_err(|e| to_storage_err(e.to_string()))
}

fn set_user_version(conn: &Connection, version: u32) -> KernelResult<()> {
    conn.pragma_update(None, "user_version", version as i64)
        .map_err(|e| to_storage_err(e.to_string()))
}
