//! FTS5 client for the whole-memory index.
//!
//! `memory_fts` rows use `rowid = memory_id` and hold only the
//! sanitized index text the store computed, never raw input. The side
//! table `memory_fts_map` records which memory ids are represented.
//! FTS5 itself is an optional capability: every entry point degrades to
//! a no-op result when the virtual table is absent.

use bme_core::errors::KernelResult;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::to_storage_err;

/// One lexical hit: memory id plus its BM25 rank value (lower = better).
#[derive(Debug, Clone)]
pub struct FtsHit {
    pub memory_id: i64,
    pub rank: f64,
}

/// Whether the FTS5 virtual table exists on this connection.
pub fn is_available(conn: &Connection) -> bool {
    conn.query_row(
        "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'memory_fts'",
        [],
        |_| Ok(()),
    )
    .optional()
    .map(|found| found.is_some())
    .unwrap_or(false)
}

/// Replace the FTS row for a memory with fresh sanitized text, keeping
/// the map table in step.
pub fn reindex_row(conn: &Connection, memory_id: i64, index_text: &str) -> KernelResult<()> {
    conn.execute(
        "INSERT OR IGNORE INTO memory_fts_map(memory_id) VALUES (?1)",
        params![memory_id],
    )
    .map_err(|e| to_storage_err(e.to_string()))?;

    conn.execute("DELETE FROM memory_fts WHERE rowid = ?1", params![memory_id])
        .map_err(|e| to_storage_err(e.to_string()))?;
    conn.execute(
        "INSERT INTO memory_fts(rowid, value, summary) VALUES (?1, ?2, NULL)",
        params![memory_id, index_text],
    )
    .map_err(|e| to_storage_err(e.to_string()))?;

    debug!(memory_id, "FTS index updated");
    Ok(())
}

/// Remove a memory from the index and the map table.
pub fn remove_row(conn: &Connection, memory_id: i64) -> KernelResult<()> {
    if is_available(conn) {
        conn.execute("DELETE FROM memory_fts WHERE rowid = ?1", params![memory_id])
            .map_err(|e| to_storage_err(e.to_string()))?;
    }
    conn.execute(
        "DELETE FROM memory_fts_map WHERE memory_id = ?1",
        params![memory_id],
    )
    .map_err(|e| to_storage_err(e.to_string()))?;
    Ok(())
}

/// BM25-ranked search. Returns hits best-first; empty when FTS5 is
/// unavailable or the query is empty.
pub fn search(conn: &Connection, query: &str, limit: usize) -> KernelResult<Vec<FtsHit>> {
    if query.trim().is_empty() || !is_available(conn) {
        return Ok(Vec::new());
    }

    let mut stmt = conn
        .prepare(
            "SELECT f.rowid, bm25(memory_fts)
             FROM memory_fts f
             JOIN memory_fts_map m ON m.memory_id = f.rowid
             WHERE memory_fts MATCH ?1
             ORDER BY rank
             LIMIT ?2",
        )
        .map_err(|e| to_storage_err(e.to_string()))?;

    let rows = stmt.query_map(params![fts_quote(query), limit as i64], |row| {
        Ok(FtsHit {
            memory_id: row.get(0)?,
            rank: row.get(1)?,
        })
    });

    // A malformed MATCH expression is a user-typed query, not a bug:
    // treat it as no lexical hits.
    let rows = match rows {
        Ok(rows) => rows,
        Err(e) => {
            debug!("FTS query rejected: {e}");
            return Ok(Vec::new());
        }
    };

    let mut out = Vec::new();
    for row in rows {
        match row {
            Ok(hit) => out.push(hit),
            Err(e) => {
                debug!("FTS query failed mid-scan: {e}");
                return Ok(Vec::new());
            }
        }
    }
    Ok(out)
}

/// Extract a highlighted snippet for a memory under a query. Falls back
/// to `None` when the snippet function or the row is unavailable; the
/// caller substitutes a summary excerpt.
pub fn snippet(conn: &Connection, memory_id: i64, query: &str) -> Option<String> {
    if query.trim().is_empty() || !is_available(conn) {
        return None;
    }
    conn.query_row(
        "SELECT snippet(memory_fts, 0, '<b>', '</b>', '…', 12)
         FROM memory_fts
         WHERE memory_fts MATCH ?1 AND rowid = ?2",
        params![fts_quote(query), memory_id],
        |row| row.get::<_, String>(0),
    )
    .optional()
    .ok()
    .flatten()
    .filter(|s| !s.trim().is_empty())
}

/// Merge the FTS b-trees (post-backfill housekeeping).
pub fn optimize(conn: &Connection) -> KernelResult<()> {
    if !is_available(conn) {
        return Ok(());
    }
    conn.execute(
        "INSERT INTO memory_fts(memory_fts) VALUES ('optimize')",
        [],
    )
    .map_err(|e| to_storage_err(e.to_string()))?;
    Ok(())
}

/// Quote each bareword term so user text (hyphens, apostrophes) cannot
/// be misparsed as FTS5 query syntax, while preserving quoted phrases.
fn fts_quote(query: &str) -> String {
    if query.contains('"') {
        // The user is writing phrase syntax; pass it through.
        return query.to_string();
    }
    query
        .split_whitespace()
        .map(|term| format!("\"{}\"", term.replace('"', "")))
        .collect::<Vec<_>>()
        .join(" ")
}
