//! Chunk persistence and the secondary chunk-level FTS index.
//!
//! Chunks are replaced wholesale on re-upsert and cascade-delete with
//! their memory; the chunk FTS rows are torn down explicitly in the
//! same transaction because virtual tables sit outside foreign keys.

use bme_core::errors::KernelResult;
use bme_core::memory::Chunk;
use rusqlite::{params, Connection, OptionalExtension};

use crate::to_storage_err;

fn chunk_fts_available(conn: &Connection) -> bool {
    conn.query_row(
        "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'chunk_fts'",
        [],
        |_| Ok(()),
    )
    .optional()
    .map(|found| found.is_some())
    .unwrap_or(false)
}

/// Remove all chunks (and their FTS rows) for a memory.
pub fn delete_chunks(conn: &Connection, memory_id: i64) -> KernelResult<()> {
    if chunk_fts_available(conn) {
        conn.execute(
            "DELETE FROM chunk_fts WHERE rowid IN
               (SELECT chunk_id FROM memory_chunks WHERE memory_id = ?1)",
            params![memory_id],
        )
        .map_err(|e| to_storage_err(e.to_string()))?;
    }
    conn.execute(
        "DELETE FROM chunk_fts_map WHERE chunk_id IN
           (SELECT chunk_id FROM memory_chunks WHERE memory_id = ?1)",
        params![memory_id],
    )
    .map_err(|e| to_storage_err(e.to_string()))?;
    conn.execute(
        "DELETE FROM memory_chunks WHERE memory_id = ?1",
        params![memory_id],
    )
    .map_err(|e| to_storage_err(e.to_string()))?;
    Ok(())
}

/// Replace a memory's chunk set wholesale with the given chunks,
/// indexing each chunk's text in `chunk_fts`.
pub fn replace_chunks(conn: &Connection, memory_id: i64, chunks: &[Chunk]) -> KernelResult<()> {
    delete_chunks(conn, memory_id)?;

    let index_chunks = chunk_fts_available(conn);
    for chunk in chunks {
        conn.execute(
            "INSERT INTO memory_chunks (memory_id, seq, token_start, token_end, text)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                memory_id,
                chunk.seq as i64,
                chunk.token_start as i64,
                chunk.token_end as i64,
                chunk.text
            ],
        )
        .map_err(|e| to_storage_err(e.to_string()))?;
        let chunk_id = conn.last_insert_rowid();

        conn.execute(
            "INSERT INTO chunk_fts_map(chunk_id) VALUES (?1)",
            params![chunk_id],
        )
        .map_err(|e| to_storage_err(e.to_string()))?;
        if index_chunks {
            conn.execute(
                "INSERT INTO chunk_fts(rowid, text) VALUES (?1, ?2)",
                params![chunk_id, chunk.text],
            )
            .map_err(|e| to_storage_err(e.to_string()))?;
        }
    }
    Ok(())
}

/// Chunks for a memory in sequence order.
pub fn chunks_for_memory(conn: &Connection, memory_id: i64) -> KernelResult<Vec<Chunk>> {
    let mut stmt = conn
        .prepare(
            "SELECT seq, token_start, token_end, text
             FROM memory_chunks WHERE memory_id = ?1 ORDER BY seq",
        )
        .map_err(|e| to_storage_err(e.to_string()))?;
    let rows = stmt
        .query_map(params![memory_id], |row| {
            Ok(Chunk {
                seq: row.get::<_, i64>(0)? as usize,
                token_start: row.get::<_, i64>(1)? as usize,
                token_end: row.get::<_, i64>(2)? as usize,
                text: row.get(3)?,
            })
        })
        .map_err(|e| to_storage_err(e.to_string()))?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row.map_err(|e| to_storage_err(e.to_string()))?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON").unwrap();
        migrations::run_migrations(&conn).unwrap();
        conn
    }

    fn insert_memory(conn: &Connection, id: i64) {
        conn.execute(
            "INSERT INTO memories(id, kind, key, value, ts)
             VALUES (?1, 'conversation.transcript', ?2, 'v', '2025-01-01T00:00:00Z')",
            params![id, format!("k{id}")],
        )
        .unwrap();
    }

    fn chunk(seq: usize, text: &str) -> Chunk {
        Chunk {
            seq,
            token_start: seq * 10,
            token_end: seq * 10 + 10,
            text: text.to_string(),
        }
    }

    #[test]
    fn replace_is_wholesale() {
        let c = conn();
        insert_memory(&c, 1);
        replace_chunks(&c, 1, &[chunk(0, "first pass"), chunk(1, "second pass")]).unwrap();
        replace_chunks(&c, 1, &[chunk(0, "only chunk")]).unwrap();

        let chunks = chunks_for_memory(&c, 1).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "only chunk");

        let fts_rows: i64 = c
            .query_row("SELECT COUNT(*) FROM chunk_fts", [], |r| r.get(0))
            .unwrap();
        assert_eq!(fts_rows, 1);
    }

    #[test]
    fn chunks_cascade_with_memory() {
        let c = conn();
        insert_memory(&c, 1);
        replace_chunks(&c, 1, &[chunk(0, "a"), chunk(1, "b")]).unwrap();
        delete_chunks(&c, 1).unwrap();
        c.execute("DELETE FROM memories WHERE id = 1", []).unwrap();

        let remaining: i64 = c
            .query_row("SELECT COUNT(*) FROM memory_chunks", [], |r| r.get(0))
            .unwrap();
        assert_eq!(remaining, 0);
        let mapped: i64 = c
            .query_row("SELECT COUNT(*) FROM chunk_fts_map", [], |r| r.get(0))
            .unwrap();
        assert_eq!(mapped, 0);
    }
}
