//! Row-level helpers over the `memories` table.

use bme_core::errors::KernelResult;
use bme_core::memory::MemoryRecord;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::to_storage_err;

pub(crate) fn parse_memory_row(row: &Row<'_>) -> rusqlite::Result<MemoryRecord> {
    Ok(MemoryRecord {
        id: row.get(0)?,
        kind: row.get(1)?,
        key: row.get(2)?,
        value: row.get(3)?,
        summary: row.get(4)?,
        ts: row.get(5)?,
    })
}

const MEMORY_COLUMNS: &str = "id, kind, key, value, summary, ts";

/// Fetch a memory by rowid.
pub fn get_memory(conn: &Connection, id: i64) -> KernelResult<Option<MemoryRecord>> {
    conn.query_row(
        &format!("SELECT {MEMORY_COLUMNS} FROM memories WHERE id = ?1"),
        params![id],
        parse_memory_row,
    )
    .optional()
    .map_err(|e| to_storage_err(e.to_string()))
}

/// Fetch a memory by its `(kind, key)` identity.
pub fn get_memory_by_kind_key(
    conn: &Connection,
    kind: &str,
    key: &str,
) -> KernelResult<Option<MemoryRecord>> {
    conn.query_row(
        &format!("SELECT {MEMORY_COLUMNS} FROM memories WHERE kind = ?1 AND key = ?2"),
        params![kind, key],
        parse_memory_row,
    )
    .optional()
    .map_err(|e| to_storage_err(e.to_string()))
}

/// Fetch several memories at once, keyed by id.
pub fn get_memories(
    conn: &Connection,
    ids: &[i64],
) -> KernelResult<std::collections::HashMap<i64, MemoryRecord>> {
    let mut out = std::collections::HashMap::with_capacity(ids.len());
    if ids.is_empty() {
        return Ok(out);
    }

    let placeholders = vec!["?"; ids.len()].join(",");
    let sql = format!("SELECT {MEMORY_COLUMNS} FROM memories WHERE id IN ({placeholders})");
    let mut stmt = conn.prepare(&sql).map_err(|e| to_storage_err(e.to_string()))?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(ids.iter()), parse_memory_row)
        .map_err(|e| to_storage_err(e.to_string()))?;
    for row in rows {
        let memory = row.map_err(|e| to_storage_err(e.to_string()))?;
        out.insert(memory.id, memory);
    }
    Ok(out)
}

/// All memories in id order (backfill, retention sweep).
pub fn all_memories(conn: &Connection) -> KernelResult<Vec<MemoryRecord>> {
    let mut stmt = conn
        .prepare(&format!("SELECT {MEMORY_COLUMNS} FROM memories ORDER BY id"))
        .map_err(|e| to_storage_err(e.to_string()))?;
    let rows = stmt
        .query_map([], parse_memory_row)
        .map_err(|e| to_storage_err(e.to_string()))?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row.map_err(|e| to_storage_err(e.to_string()))?);
    }
    Ok(out)
}

/// Total row count.
pub fn count_memories(conn: &Connection) -> KernelResult<i64> {
    conn.query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))
        .map_err(|e| to_storage_err(e.to_string()))
}
