//! Consent records and the default terminal consent provider.

use std::collections::HashSet;
use std::io::Write;

use bme_core::errors::KernelResult;
use bme_core::traits::ConsentProvider;
use rusqlite::{params, Connection};

use crate::to_storage_err;

/// Record an explicit consent grant for a memory. Idempotent.
pub fn record_consent(conn: &Connection, memory_id: i64, source: &str) -> KernelResult<()> {
    conn.execute(
        "INSERT OR IGNORE INTO memory_consent (memory_id, source) VALUES (?1, ?2)",
        params![memory_id, source],
    )
    .map_err(|e| to_storage_err(e.to_string()))?;
    Ok(())
}

/// The set of memory ids with an explicit consent record.
pub fn consented_ids(conn: &Connection) -> KernelResult<HashSet<i64>> {
    let mut stmt = conn
        .prepare("SELECT memory_id FROM memory_consent")
        .map_err(|e| to_storage_err(e.to_string()))?;
    let rows = stmt
        .query_map([], |row| row.get::<_, i64>(0))
        .map_err(|e| to_storage_err(e.to_string()))?;
    let mut out = HashSet::new();
    for row in rows {
        out.insert(row.map_err(|e| to_storage_err(e.to_string()))?);
    }
    Ok(out)
}

/// Blocking terminal consent prompt: the default interactive provider.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdinConsent;

impl ConsentProvider for StdinConsent {
    fn request_consent(&self, kind: &str, key: &str, preview: &str) -> bool {
        println!(
            "I detected something sensitive ({kind}/{key}):\n\"{preview}\"\nDo you want me to remember this? (yes/no)"
        );
        print!("> ");
        let _ = std::io::stdout().flush();

        let mut answer = String::new();
        if std::io::stdin().read_line(&mut answer).is_err() {
            // An unreadable stdin is a headless run: deny.
            return false;
        }
        matches!(answer.trim().to_ascii_lowercase().as_str(), "yes" | "y")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations;

    #[test]
    fn consent_round_trip_and_cascade() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON").unwrap();
        migrations::run_migrations(&conn).unwrap();
        conn.execute(
            "INSERT INTO memories(id, kind, key, value, ts)
             VALUES (1, 'fact', 'k', 'v', '2025-01-01T00:00:00Z')",
            [],
        )
        .unwrap();

        record_consent(&conn, 1, "upsert_memory").unwrap();
        record_consent(&conn, 1, "upsert_memory").unwrap();
        assert!(consented_ids(&conn).unwrap().contains(&1));

        conn.execute("DELETE FROM memories WHERE id = 1", []).unwrap();
        assert!(consented_ids(&conn).unwrap().is_empty());
    }
}
