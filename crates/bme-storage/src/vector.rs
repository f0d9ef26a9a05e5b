//! Vector persistence and brute-force cosine search.
//!
//! One row per `(memory_id, source)`, float32 little-endian blobs with
//! an explicit dimension and the provider/model tuple that produced
//! them. Search matches that tuple strictly unless the caller opts into
//! mismatch mode. An optional `vss0` extension (hard-wired to 384
//! dimensions) can mirror the table through triggers; on a dimension
//! mismatch it is disabled and the brute-force path serves everything.

use bme_core::errors::KernelResult;
use bme_core::memory::EmbeddingSource;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{error, info};

use crate::pool::ConnectionPool;
use crate::to_storage_err;

/// Dimension the vss0 extension build is compiled for.
pub const VSS_DIM: usize = 384;

/// Filters for a vector search.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter<'a> {
    pub provider: Option<&'a str>,
    pub model: Option<&'a str>,
    pub dim: Option<usize>,
    pub source: Option<EmbeddingSource>,
    /// When false (default), only vectors matching the specified
    /// provider/model/dim are considered. Treated as true when all
    /// three are absent, for backwards compatibility.
    pub allow_mismatch: bool,
}

/// SQLite-backed vector store.
pub struct VectorStore {
    vss_available: bool,
}

impl VectorStore {
    /// Probe the optional vss0 extension and install its mirror
    /// triggers when usable. `configured_dim` is the embedding config's
    /// dimension; anything other than [`VSS_DIM`] disables the
    /// extension and leaves the brute-force path in charge.
    pub fn new(pool: &ConnectionPool, configured_dim: usize) -> Self {
        let vss_available = pool
            .writer
            .with_conn_sync(|conn| Ok(Self::probe_vss(conn, configured_dim)))
            .unwrap_or(false);
        Self { vss_available }
    }

    /// A store without the extension probe (tests, backfill).
    pub fn without_vss() -> Self {
        Self {
            vss_available: false,
        }
    }

    pub fn vss_available(&self) -> bool {
        self.vss_available
    }

    fn probe_vss(conn: &Connection, configured_dim: usize) -> bool {
        // Extension loading is opt-in and inherently unsafe in SQLite's
        // API; failure of any step just means brute-force search.
        let loaded = unsafe {
            conn.load_extension_enable().is_ok()
                && conn
                    .load_extension("vss0", None::<&str>)
                    .map(|_| ())
                    .is_ok()
        };
        let _ = conn.load_extension_disable();

        if !loaded {
            info!("sqlite-vss not available, using brute-force cosine fallback");
            return false;
        }

        if configured_dim != VSS_DIM {
            error!(
                configured_dim,
                vss_dim = VSS_DIM,
                "VSS disabled: dimension mismatch; using brute-force. \
                 Rebuild the VSS mirror after changing model/dim."
            );
            return false;
        }

        match Self::create_vss_triggers(conn) {
            Ok(()) => {
                info!("sqlite-vss extension loaded, mirror triggers installed");
                true
            }
            Err(e) => {
                error!("failed to create VSS triggers: {e}");
                false
            }
        }
    }

    fn create_vss_triggers(conn: &Connection) -> KernelResult<()> {
        conn.execute_batch(&format!(
            "
            CREATE VIRTUAL TABLE IF NOT EXISTS memory_embeddings_vss
              USING vss0(vec({VSS_DIM}));

            CREATE TRIGGER IF NOT EXISTS trg_mememb_insert
            AFTER INSERT ON memory_embeddings
            WHEN NEW.dim = {VSS_DIM}
            BEGIN
                INSERT INTO memory_embeddings_vss(rowid, vec)
                VALUES (NEW.embedding_id, NEW.vec);
            END;

            CREATE TRIGGER IF NOT EXISTS trg_mememb_update
            AFTER UPDATE OF vec, dim, model, provider, source ON memory_embeddings
            BEGIN
                DELETE FROM memory_embeddings_vss WHERE rowid = NEW.embedding_id;
                INSERT INTO memory_embeddings_vss(rowid, vec)
                SELECT NEW.embedding_id, NEW.vec WHERE NEW.dim = {VSS_DIM};
            END;

            CREATE TRIGGER IF NOT EXISTS trg_mememb_delete
            AFTER DELETE ON memory_embeddings
            BEGIN
                DELETE FROM memory_embeddings_vss WHERE rowid = OLD.embedding_id;
            END;
            "
        ))
        .map_err(|e| to_storage_err(e.to_string()))
    }

    /// Insert or update the embedding for `(memory_id, source)`.
    pub fn upsert(
        &self,
        conn: &Connection,
        memory_id: i64,
        vec: &[f32],
        source: EmbeddingSource,
        provider: &str,
        model: &str,
    ) -> KernelResult<()> {
        let norm = l2_norm(vec);
        let blob = f32_vec_to_bytes(vec);
        let dim = vec.len() as i64;

        let existing: Option<i64> = conn
            .query_row(
                "SELECT embedding_id FROM memory_embeddings WHERE memory_id = ?1 AND source = ?2",
                params![memory_id, source.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| to_storage_err(e.to_string()))?;

        match existing {
            Some(embedding_id) => {
                conn.execute(
                    "UPDATE memory_embeddings
                     SET vec = ?1, norm = ?2, dim = ?3, provider = ?4, model = ?5,
                         created_at = CURRENT_TIMESTAMP
                     WHERE embedding_id = ?6",
                    params![blob, norm, dim, provider, model, embedding_id],
                )
                .map_err(|e| to_storage_err(e.to_string()))?;
            }
            None => {
                conn.execute(
                    "INSERT INTO memory_embeddings (memory_id, source, dim, vec, norm, provider, model)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![memory_id, source.as_str(), dim, blob, norm, provider, model],
                )
                .map_err(|e| to_storage_err(e.to_string()))?;
            }
        }
        Ok(())
    }

    /// Delete every embedding for a memory.
    pub fn delete_for_memory(&self, conn: &Connection, memory_id: i64) -> KernelResult<()> {
        conn.execute(
            "DELETE FROM memory_embeddings WHERE memory_id = ?1",
            params![memory_id],
        )
        .map_err(|e| to_storage_err(e.to_string()))?;
        Ok(())
    }

    /// Sources currently stored for a memory.
    pub fn sources_for_memory(
        &self,
        conn: &Connection,
        memory_id: i64,
    ) -> KernelResult<Vec<EmbeddingSource>> {
        let mut stmt = conn
            .prepare("SELECT DISTINCT source FROM memory_embeddings WHERE memory_id = ?1")
            .map_err(|e| to_storage_err(e.to_string()))?;
        let rows = stmt
            .query_map(params![memory_id], |row| row.get::<_, String>(0))
            .map_err(|e| to_storage_err(e.to_string()))?;
        let mut out = Vec::new();
        for row in rows {
            let s = row.map_err(|e| to_storage_err(e.to_string()))?;
            if let Some(source) = EmbeddingSource::parse(&s) {
                out.push(source);
            }
        }
        Ok(out)
    }

    /// Brute-force cosine search. Returns `(memory_id, score)` pairs
    /// sorted by score descending, scores clamped to `[0, 1]`. Rows
    /// whose dimension differs from the query are skipped silently.
    pub fn search(
        &self,
        conn: &Connection,
        qvec: &[f32],
        top_k: usize,
        filter: &SearchFilter<'_>,
    ) -> KernelResult<Vec<(i64, f64)>> {
        let qnorm = l2_norm(qvec);
        if qnorm == 0.0 {
            return Ok(Vec::new());
        }
        let query: Vec<f32> = qvec.iter().map(|v| v / qnorm as f32).collect();

        // Backward compat: no filters at all means mismatch mode.
        let allow_mismatch = filter.allow_mismatch
            || (filter.provider.is_none() && filter.model.is_none() && filter.dim.is_none());

        let mut sql = String::from(
            "SELECT memory_id, vec, dim FROM memory_embeddings WHERE 1=1",
        );
        let mut args: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if !allow_mismatch {
            if let Some(provider) = filter.provider {
                sql.push_str(" AND provider = ?");
                args.push(Box::new(provider.to_string()));
            }
            if let Some(model) = filter.model {
                sql.push_str(" AND model = ?");
                args.push(Box::new(model.to_string()));
            }
            if let Some(dim) = filter.dim {
                sql.push_str(" AND dim = ?");
                args.push(Box::new(dim as i64));
            }
        } else if let Some(dim) = filter.dim {
            sql.push_str(" AND dim = ?");
            args.push(Box::new(dim as i64));
        }

        if let Some(source) = filter.source {
            sql.push_str(" AND source = ?");
            args.push(Box::new(source.as_str().to_string()));
        }

        let mut stmt = conn.prepare(&sql).map_err(|e| to_storage_err(e.to_string()))?;
        let rows = stmt
            .query_map(
                rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, Vec<u8>>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .map_err(|e| to_storage_err(e.to_string()))?;

        let mut scored: Vec<(i64, f64)> = Vec::new();
        for row in rows {
            let (memory_id, blob, dim) = row.map_err(|e| to_storage_err(e.to_string()))?;
            if dim as usize != query.len() {
                continue;
            }
            let stored = bytes_to_f32_vec(&blob);
            let score: f64 = query
                .iter()
                .zip(stored.iter())
                .map(|(a, b)| (*a as f64) * (*b as f64))
                .sum();
            scored.push((memory_id, score.clamp(0.0, 1.0)));
        }

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }

    /// Total embedding rows.
    pub fn count(&self, conn: &Connection) -> KernelResult<i64> {
        conn.query_row("SELECT COUNT(*) FROM memory_embeddings", [], |row| row.get(0))
            .map_err(|e| to_storage_err(e.to_string()))
    }
}

fn l2_norm(v: &[f32]) -> f64 {
    v.iter().map(|x| (*x as f64) * (*x as f64)).sum::<f64>().sqrt()
}

/// f32 slice to little-endian bytes.
fn f32_vec_to_bytes(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Little-endian bytes back to f32s.
fn bytes_to_f32_vec(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
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
             VALUES (?1, 'fact', ?2, 'v', '2025-01-01T00:00:00Z')",
            params![id, format!("k{id}")],
        )
        .unwrap();
    }

    fn unit(v: &[f32]) -> Vec<f32> {
        let n = l2_norm(v) as f32;
        v.iter().map(|x| x / n).collect()
    }

    #[test]
    fn upsert_is_unique_per_memory_and_source() {
        let c = conn();
        insert_memory(&c, 1);
        let store = VectorStore::without_vss();
        store
            .upsert(&c, 1, &unit(&[1.0, 0.0]), EmbeddingSource::Full, "p", "m")
            .unwrap();
        store
            .upsert(&c, 1, &unit(&[0.0, 1.0]), EmbeddingSource::Full, "p", "m")
            .unwrap();
        assert_eq!(store.count(&c).unwrap(), 1);
    }

    #[test]
    fn search_orders_by_cosine() {
        let c = conn();
        insert_memory(&c, 1);
        insert_memory(&c, 2);
        let store = VectorStore::without_vss();
        store
            .upsert(&c, 1, &unit(&[1.0, 0.0, 0.0]), EmbeddingSource::Full, "p", "m")
            .unwrap();
        store
            .upsert(&c, 2, &unit(&[0.6, 0.8, 0.0]), EmbeddingSource::Full, "p", "m")
            .unwrap();

        let hits = store
            .search(&c, &[1.0, 0.0, 0.0], 10, &SearchFilter::default())
            .unwrap();
        assert_eq!(hits[0].0, 1);
        assert!((hits[0].1 - 1.0).abs() < 1e-6);
        assert!((hits[1].1 - 0.6).abs() < 1e-6);
    }

    #[test]
    fn strict_matching_excludes_other_models() {
        let c = conn();
        insert_memory(&c, 1);
        insert_memory(&c, 2);
        let store = VectorStore::without_vss();
        store
            .upsert(&c, 1, &unit(&[1.0, 0.0]), EmbeddingSource::Full, "p", "model-a")
            .unwrap();
        store
            .upsert(&c, 2, &unit(&[1.0, 0.0]), EmbeddingSource::Full, "p", "model-b")
            .unwrap();

        let filter = SearchFilter {
            provider: Some("p"),
            model: Some("model-a"),
            dim: Some(2),
            ..Default::default()
        };
        let hits = store.search(&c, &[1.0, 0.0], 10, &filter).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, 1);
    }

    #[test]
    fn dimension_mismatches_are_skipped() {
        let c = conn();
        insert_memory(&c, 1);
        insert_memory(&c, 2);
        let store = VectorStore::without_vss();
        store
            .upsert(&c, 1, &unit(&[1.0, 0.0]), EmbeddingSource::Full, "p", "m")
            .unwrap();
        store
            .upsert(&c, 2, &unit(&[1.0, 0.0, 0.0]), EmbeddingSource::Full, "p", "m")
            .unwrap();

        let hits = store
            .search(&c, &[1.0, 0.0], 10, &SearchFilter::default())
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, 1);
    }

    #[test]
    fn zero_query_returns_empty() {
        let c = conn();
        let store = VectorStore::without_vss();
        assert!(store
            .search(&c, &[0.0, 0.0], 10, &SearchFilter::default())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn cascade_deletes_embeddings_with_memory() {
        let c = conn();
        insert_memory(&c, 1);
        let store = VectorStore::without_vss();
        store
            .upsert(&c, 1, &unit(&[1.0, 0.0]), EmbeddingSource::Full, "p", "m")
            .unwrap();
        c.execute("DELETE FROM memories WHERE id = 1", []).unwrap();
        assert_eq!(store.count(&c).unwrap(), 0);
    }
}
