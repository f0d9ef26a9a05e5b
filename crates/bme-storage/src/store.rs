//! The memory store: one transactional ingest pipeline per upsert.
//!
//! Order of operations is load-bearing: rules → redaction →
//! summarization → index-text selection → encryption → consent →
//! write transaction (row + FTS + chunks + consent) → embeddings.
//! Embedding persistence runs after the write transaction commits so a
//! slow embedder never holds the write lock.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bme_core::errors::KernelResult;
use bme_core::evaluated::{EmbedMode, EvaluatedMetadata, FtsIndexMode, SummaryMode};
use bme_core::memory::{EmbeddingSource, MemoryRecord, StoreResult, UpsertOutcome};
use bme_core::metrics::metrics;
use bme_core::traits::{ConsentProvider, EmbeddingBackend};
use bme_crypto::{AadContext, EncryptionEngine};
use bme_privacy::{apply_redaction, ChunkingEngine, SummarizationEngine};
use bme_rules::{MemoryInput, PolicyManager, RulesEngine};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, error, info, warn};

use crate::fts::{self, FtsHit};
use crate::pool::ConnectionPool;
use crate::vector::{SearchFilter, VectorStore};
use crate::{chunks, consent, queries, to_storage_err};

/// Chars of redacted content used when a summary embedding is requested
/// but no summary exists.
const SUMMARY_EMBED_FALLBACK_CHARS: usize = 500;

static SUMMARY_FALLBACK_WARNED: AtomicBool = AtomicBool::new(false);
static FTS_UNAVAILABLE_WARNED: AtomicBool = AtomicBool::new(false);

/// The transactional memory store.
pub struct MemoryStore {
    pool: Arc<ConnectionPool>,
    rules: Arc<RulesEngine>,
    policy: PolicyManager,
    encryption: EncryptionEngine,
    summarizer: SummarizationEngine,
    chunker: ChunkingEngine,
    consent_provider: Arc<dyn ConsentProvider>,
    embedder: Option<Arc<dyn EmbeddingBackend>>,
    vectors: VectorStore,
    /// Fallback FTS index mode when a rule does not set one
    /// (`kernel.yaml` `fts.index_mode`).
    fts_index_mode: FtsIndexMode,
}

impl MemoryStore {
    /// Open a store backed by a file on disk, running migrations.
    pub fn open(path: &Path, rules: Arc<RulesEngine>) -> KernelResult<Self> {
        let pool = Arc::new(ConnectionPool::open(path, 4)?);
        Self::with_pool(pool, rules)
    }

    /// Open an in-memory store (tests).
    pub fn open_in_memory(rules: Arc<RulesEngine>) -> KernelResult<Self> {
        let pool = Arc::new(ConnectionPool::open_in_memory()?);
        Self::with_pool(pool, rules)
    }

    fn with_pool(pool: Arc<ConnectionPool>, rules: Arc<RulesEngine>) -> KernelResult<Self> {
        pool.writer
            .with_conn_sync(crate::migrations::run_migrations)?;
        Ok(Self {
            pool,
            rules,
            policy: PolicyManager::load(None),
            encryption: EncryptionEngine::new(),
            summarizer: SummarizationEngine::default(),
            chunker: ChunkingEngine::default(),
            consent_provider: Arc::new(crate::consent::StdinConsent),
            embedder: None,
            vectors: VectorStore::without_vss(),
            fts_index_mode: FtsIndexMode::SummaryPreferred,
        })
    }

    pub fn with_policy(mut self, policy: PolicyManager) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_consent_provider(mut self, provider: Arc<dyn ConsentProvider>) -> Self {
        self.consent_provider = provider;
        self
    }

    /// Attach an embedder; probes the optional vector extension against
    /// the embedder's configured dimension.
    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingBackend>) -> Self {
        self.vectors = VectorStore::new(&self.pool, embedder.config().dim);
        self.embedder = Some(embedder);
        self
    }

    pub fn with_chunking(mut self, config: bme_core::config::ChunkingConfig) -> Self {
        self.chunker = ChunkingEngine::new(config);
        self
    }

    pub fn with_fts_index_mode(mut self, mode: FtsIndexMode) -> Self {
        self.fts_index_mode = mode;
        self
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    pub fn rules(&self) -> &Arc<RulesEngine> {
        &self.rules
    }

    pub fn encryption(&self) -> &EncryptionEngine {
        &self.encryption
    }

    pub fn policy(&self) -> &PolicyManager {
        &self.policy
    }

    /// Insert or replace the memory at `(kind, key)` and every derived
    /// artefact, honouring governance rules end to end.
    pub fn upsert(&self, kind: &str, key: &str, value: &str, ts: &str) -> KernelResult<StoreResult> {
        let input = MemoryInput::new(kind, key, value, ts);
        let evaluated = self.rules.evaluate(&input);

        if !evaluated.allow_store {
            info!(kind, key, "memory blocked by governance rules");
            let m = metrics();
            m.inc(&m.memories_blocked);
            return Ok(StoreResult::not_stored());
        }

        // Redaction comes first; everything downstream sees only the
        // redacted form.
        let redacted = if evaluated.wants_redaction() {
            apply_redaction(value, &evaluated)
        } else {
            value.to_string()
        };

        // Summarization (pre-encryption). Under summary_only the value
        // itself becomes the summary and the original is discarded.
        let mut plaintext_value = redacted.clone();
        let mut summary: Option<String> = None;
        let mut summary_for_embed: Option<String> = None;
        if self.summarizer.should_summarize(&evaluated, &redacted, kind) {
            let s = self.summarizer.summarize(&redacted);
            summary_for_embed = Some(s.clone());
            if evaluated.summary_mode == SummaryMode::SummaryOnly {
                plaintext_value = s;
            } else {
                summary = Some(s);
            }
        }

        // Sanitized index text: summary when preferred and present,
        // else the redacted value. Computed before encryption.
        let index_mode = evaluated.fts_index_mode.unwrap_or(self.fts_index_mode);
        let index_text = match (&summary, index_mode) {
            (Some(s), FtsIndexMode::SummaryPreferred) => s.clone(),
            _ => plaintext_value.clone(),
        };

        // Encryption replaces the stored forms, AAD-bound to this row.
        let ctx = AadContext { kind, key, ts };
        let mut stored_value = plaintext_value.clone();
        if let Some(cipher) = self
            .encryption
            .encrypt_for_policy(&plaintext_value, &evaluated, &ctx)?
        {
            stored_value = cipher;
        }
        let mut stored_summary = summary.clone();
        if let Some(s) = &summary {
            let summary_ctx = ctx.for_summary();
            if let Some(cipher) =
                self.encryption
                    .encrypt_for_policy(s, &evaluated, &summary_ctx.borrowed())?
            {
                stored_summary = Some(cipher);
            }
        }

        // Consent gate: blocking, before anything touches the database.
        let mut consent_granted = false;
        if evaluated.requires_consent {
            if self.consent_provider.request_consent(kind, key, value) {
                consent_granted = true;
            } else {
                info!(kind, key, "storage declined at consent prompt");
                return Ok(StoreResult::not_stored());
            }
        }

        // One transaction: row, FTS, chunks, consent.
        let fts_allowed = evaluated.fts_index && self.policy.can_index(&evaluated);
        let should_chunk = self.chunker.should_chunk(kind, &plaintext_value);
        let chunk_set = if should_chunk {
            self.chunker.chunk_text(&plaintext_value)
        } else {
            Vec::new()
        };

        let (memory_id, outcome) = self.pool.writer.with_conn_sync(|conn| {
            let tx = conn
                .unchecked_transaction()
                .map_err(|e| to_storage_err(e.to_string()))?;

            let existing: Option<i64> = tx
                .query_row(
                    "SELECT id FROM memories WHERE kind = ?1 AND key = ?2",
                    params![kind, key],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| to_storage_err(e.to_string()))?;
            let outcome = if existing.is_some() {
                UpsertOutcome::Updated
            } else {
                UpsertOutcome::Created
            };

            tx.execute(
                "INSERT INTO memories (kind, key, value, summary, ts, privacy_class, recall_policy, expires_in)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(kind, key) DO UPDATE SET
                   value = excluded.value,
                   summary = excluded.summary,
                   ts = excluded.ts,
                   privacy_class = excluded.privacy_class,
                   recall_policy = excluded.recall_policy,
                   expires_in = excluded.expires_in",
                params![
                    kind,
                    key,
                    stored_value,
                    stored_summary,
                    ts,
                    evaluated.privacy_class,
                    evaluated.recall_policy.map(|p| p.as_str()),
                    evaluated.expires_in,
                ],
            )
            .map_err(|e| to_storage_err(e.to_string()))?;

            let memory_id: i64 = tx
                .query_row(
                    "SELECT id FROM memories WHERE kind = ?1 AND key = ?2",
                    params![kind, key],
                    |row| row.get(0),
                )
                .map_err(|e| to_storage_err(e.to_string()))?;

            // FTS row changes share the transaction with the base row.
            if fts::is_available(&tx) {
                if fts_allowed {
                    fts::reindex_row(&tx, memory_id, &index_text)?;
                } else {
                    fts::remove_row(&tx, memory_id)?;
                    debug!(memory_id, "FTS row removed (policy denied)");
                }
            } else if !FTS_UNAVAILABLE_WARNED.swap(true, Ordering::SeqCst) {
                warn!("FTS5 unavailable; lexical index disabled for this process");
            }

            // Chunks are replaced wholesale from the redacted plaintext.
            if should_chunk {
                chunks::replace_chunks(&tx, memory_id, &chunk_set)?;
            } else {
                chunks::delete_chunks(&tx, memory_id)?;
            }

            if consent_granted {
                consent::record_consent(&tx, memory_id, "upsert_memory")?;
            }

            tx.commit().map_err(|e| to_storage_err(e.to_string()))?;
            Ok((memory_id, outcome))
        })?;

        let mut result = StoreResult {
            memory_id: Some(memory_id),
            stored: true,
            ephemeral_embeddings: Vec::new(),
            outcome,
        };

        // Embeddings run after the commit, in their own transaction.
        self.generate_embeddings(
            &evaluated,
            memory_id,
            &redacted,
            summary_for_embed.as_deref(),
            &mut result,
        );

        let m = metrics();
        m.inc(&m.memories_stored);
        Ok(result)
    }

    /// Compute and (depending on policy) persist embeddings for a fresh
    /// upsert. Failures are logged, never fatal to the ingest.
    fn generate_embeddings(
        &self,
        evaluated: &EvaluatedMetadata,
        memory_id: i64,
        redacted_value: &str,
        summary: Option<&str>,
        result: &mut StoreResult,
    ) {
        let Some(embedder) = &self.embedder else { return };

        let mut embed_mode = evaluated.embed;
        if embed_mode != EmbedMode::None && !self.policy.can_index(evaluated) {
            info!(memory_id, "vector embedding blocked by policy");
            embed_mode = EmbedMode::None;
        }
        if embed_mode == EmbedMode::None {
            return;
        }
        let embed_store = evaluated.embed_store.unwrap_or(true);

        let mut texts: Vec<String> = Vec::new();
        let mut sources: Vec<EmbeddingSource> = Vec::new();

        if matches!(embed_mode, EmbedMode::Summary | EmbedMode::Both) {
            match summary {
                Some(s) => {
                    texts.push(s.to_string());
                    sources.push(EmbeddingSource::Summary);
                }
                None => {
                    // No summary: fall back to a prefix of the redacted
                    // content so the summary channel is never empty.
                    if !SUMMARY_FALLBACK_WARNED.swap(true, Ordering::SeqCst) {
                        warn!("summary missing for embedding; using redacted content as fallback");
                    }
                    let fallback: String =
                        redacted_value.chars().take(SUMMARY_EMBED_FALLBACK_CHARS).collect();
                    let fallback = fallback.trim().to_string();
                    if !fallback.is_empty() {
                        texts.push(fallback);
                        sources.push(EmbeddingSource::Summary);
                    }
                }
            }
        }
        if matches!(embed_mode, EmbedMode::Full | EmbedMode::Both) {
            texts.push(redacted_value.to_string());
            sources.push(EmbeddingSource::Full);
        }
        if texts.is_empty() {
            return;
        }

        let vectors = match embedder.embed_texts(&texts) {
            Ok(v) => v,
            Err(e) => {
                error!(memory_id, "failed to generate embeddings: {e}");
                return;
            }
        };

        if !embed_store {
            result.ephemeral_embeddings =
                sources.iter().copied().zip(vectors).collect();
            debug!(
                memory_id,
                count = result.ephemeral_embeddings.len(),
                "computed ephemeral embeddings (not persisted)"
            );
            return;
        }

        let cfg = embedder.config();
        let persisted = self.pool.writer.with_conn_sync(|conn| {
            for (source, vec) in sources.iter().zip(vectors.iter()) {
                self.vectors
                    .upsert(conn, memory_id, vec, *source, &cfg.provider, &cfg.model)?;
            }
            Ok(sources.len())
        });
        match persisted {
            Ok(n) => debug!(memory_id, count = n, "stored embeddings"),
            Err(e) => error!(memory_id, "failed to persist embeddings: {e}"),
        }
    }

    /// Delete a memory and its derived artefacts atomically. Returns
    /// whether a row existed.
    pub fn delete(&self, kind: &str, key: &str) -> KernelResult<bool> {
        self.pool.writer.with_conn_sync(|conn| {
            let tx = conn
                .unchecked_transaction()
                .map_err(|e| to_storage_err(e.to_string()))?;

            let existing: Option<i64> = tx
                .query_row(
                    "SELECT id FROM memories WHERE kind = ?1 AND key = ?2",
                    params![kind, key],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| to_storage_err(e.to_string()))?;
            let Some(memory_id) = existing else {
                return Ok(false);
            };

            fts::remove_row(&tx, memory_id)?;
            chunks::delete_chunks(&tx, memory_id)?;
            // Embeddings, consent, and map rows cascade with the base row.
            tx.execute("DELETE FROM memories WHERE id = ?1", params![memory_id])
                .map_err(|e| to_storage_err(e.to_string()))?;

            tx.commit().map_err(|e| to_storage_err(e.to_string()))?;
            debug!(kind, key, memory_id, "deleted memory with derived rows");
            Ok(true)
        })
    }

    /// Post-hoc consent promotion: write a consent record and store
    /// vectors for the requested (or rule-default) sources. Returns the
    /// number of embeddings created.
    pub fn persist_embeddings_for(
        &self,
        memory_id: i64,
        sources: Option<Vec<EmbeddingSource>>,
    ) -> KernelResult<usize> {
        let Some(embedder) = &self.embedder else {
            return Ok(0);
        };

        let Some(record) = self.load_plaintext(memory_id)? else {
            warn!(memory_id, "memory not found");
            return Ok(0);
        };

        // Re-evaluate rules against plaintext; consent may have changed.
        let input = MemoryInput::new(
            &record.kind,
            &record.key,
            &record.value,
            record.ts.as_str(),
        );
        let evaluated = self.rules.evaluate(&input);
        if evaluated.embed == EmbedMode::None {
            return Ok(0);
        }

        let sources = sources.unwrap_or_else(|| match evaluated.embed {
            EmbedMode::Both => vec![EmbeddingSource::Summary, EmbeddingSource::Full],
            EmbedMode::Summary if record.summary.is_some() => vec![EmbeddingSource::Summary],
            EmbedMode::Summary => Vec::new(),
            _ => vec![EmbeddingSource::Full],
        });

        let mut texts = Vec::new();
        let mut to_store = Vec::new();
        for source in sources {
            match source {
                EmbeddingSource::Summary => {
                    if let Some(s) = &record.summary {
                        texts.push(s.clone());
                        to_store.push(EmbeddingSource::Summary);
                    }
                }
                EmbeddingSource::Full => {
                    texts.push(record.value.clone());
                    to_store.push(EmbeddingSource::Full);
                }
            }
        }
        if texts.is_empty() {
            return Ok(0);
        }

        let vectors = embedder.embed_texts(&texts)?;
        let cfg = embedder.config();
        self.pool.writer.with_conn_sync(|conn| {
            consent::record_consent(conn, memory_id, "persist_embeddings_for")?;
            for (source, vec) in to_store.iter().zip(vectors.iter()) {
                self.vectors
                    .upsert(conn, memory_id, vec, *source, &cfg.provider, &cfg.model)?;
            }
            Ok(())
        })?;

        info!(memory_id, count = to_store.len(), "persisted embeddings");
        Ok(to_store.len())
    }

    /// Re-compute a memory's vectors with the current embedding config.
    /// By default the set of sources already present is preserved.
    pub fn reembed(
        &self,
        memory_id: i64,
        sources: Option<Vec<EmbeddingSource>>,
    ) -> KernelResult<usize> {
        if self.embedder.is_none() {
            return Ok(0);
        }

        let sources = match sources {
            Some(s) => Some(s),
            None => {
                let existing = self.pool.with_reader(|conn| {
                    self.vectors.sources_for_memory(conn, memory_id)
                })?;
                if existing.is_empty() {
                    None
                } else {
                    Some(existing)
                }
            }
        };

        self.pool
            .writer
            .with_conn_sync(|conn| self.vectors.delete_for_memory(conn, memory_id))?;
        self.persist_embeddings_for(memory_id, sources)
    }

    /// Retention sweep: delete every memory whose rule-evaluated
    /// `expires_in` has elapsed relative to its timestamp. Returns the
    /// number of rows removed.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> KernelResult<usize> {
        let all = self.pool.with_reader(queries::all_memories)?;

        let mut removed = 0usize;
        for record in all {
            let plaintext = self.encryption.try_decrypt_if_envelope(&record.value);
            let input = MemoryInput::new(&record.kind, &record.key, &plaintext, &record.ts);
            let evaluated = self.rules.evaluate(&input);

            let Some(expires_in) = evaluated.expires_in.as_deref() else {
                continue;
            };
            let Some(ttl) = parse_duration(expires_in) else {
                warn!(memory_id = record.id, expires_in, "unparseable expires_in, skipping");
                continue;
            };
            let Some(ts) = record.parsed_ts() else { continue };

            if ts + ttl <= now {
                if self.delete(&record.kind, &record.key)? {
                    removed += 1;
                }
            }
        }

        if removed > 0 {
            info!(removed, "retention sweep removed expired memories");
        }
        Ok(removed)
    }

    /// Load a memory with value and summary decrypted best-effort.
    pub fn load_plaintext(&self, memory_id: i64) -> KernelResult<Option<MemoryRecord>> {
        let record = self.pool.with_reader(|conn| queries::get_memory(conn, memory_id))?;
        Ok(record.map(|r| self.decrypt_record(r)))
    }

    /// Batch variant of [`Self::load_plaintext`].
    pub fn load_plaintext_many(
        &self,
        ids: &[i64],
    ) -> KernelResult<std::collections::HashMap<i64, MemoryRecord>> {
        let rows = self.pool.with_reader(|conn| queries::get_memories(conn, ids))?;
        Ok(rows
            .into_iter()
            .map(|(id, r)| (id, self.decrypt_record(r)))
            .collect())
    }

    /// Fetch the stored row (ciphertext and all) by identity.
    pub fn get(&self, kind: &str, key: &str) -> KernelResult<Option<MemoryRecord>> {
        self.pool
            .with_reader(|conn| queries::get_memory_by_kind_key(conn, kind, key))
    }

    fn decrypt_record(&self, mut record: MemoryRecord) -> MemoryRecord {
        record.value = self.encryption.try_decrypt_if_envelope(&record.value);
        record.summary = record
            .summary
            .map(|s| self.encryption.try_decrypt_if_envelope(&s));
        record
    }

    /// Whether the lexical channel is available on this database.
    pub fn fts_available(&self) -> bool {
        self.pool
            .with_reader(|conn| Ok(fts::is_available(conn)))
            .unwrap_or(false)
    }

    /// BM25 candidate pull for the hybrid retriever.
    pub fn fts_search(&self, query: &str, limit: usize) -> KernelResult<Vec<FtsHit>> {
        self.pool.with_reader(|conn| fts::search(conn, query, limit))
    }

    /// Highlighted snippet for a hit, when FTS can produce one.
    pub fn fts_snippet(&self, memory_id: i64, query: &str) -> Option<String> {
        self.pool
            .with_reader(|conn| Ok(fts::snippet(conn, memory_id, query)))
            .ok()
            .flatten()
    }

    /// Vector candidate pull for the hybrid retriever.
    pub fn vector_search(
        &self,
        qvec: &[f32],
        top_k: usize,
        filter: &SearchFilter<'_>,
    ) -> KernelResult<Vec<(i64, f64)>> {
        self.pool
            .with_reader(|conn| self.vectors.search(conn, qvec, top_k, filter))
    }

    /// Consent records currently on file.
    pub fn consented_ids(&self) -> KernelResult<std::collections::HashSet<i64>> {
        self.pool.with_reader(consent::consented_ids)
    }

    /// The embedder this store was wired with, if any.
    pub fn embedder(&self) -> Option<&Arc<dyn EmbeddingBackend>> {
        self.embedder.as_ref()
    }

    /// Checkpoint the WAL and truncate auxiliary files. Retries with
    /// backoff for the transient file-lock errors some platforms throw
    /// during shutdown.
    pub fn close(&self) -> KernelResult<()> {
        let mut delay = std::time::Duration::from_millis(100);
        let mut last_err = None;
        for _ in 0..3 {
            let result = self.pool.writer.with_conn_sync(|conn| {
                conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE)")
                    .map_err(|e| to_storage_err(e.to_string()))
            });
            match result {
                Ok(()) => return Ok(()),
                Err(e) => {
                    last_err = Some(e);
                    std::thread::sleep(delay);
                    delay *= 2;
                }
            }
        }
        match last_err {
            Some(e) => {
                debug!("WAL checkpoint failed after retries: {e}");
                Err(e)
            }
            None => Ok(()),
        }
    }
}

/// Parse duration strings like `"30d"`, `"12h"`, `"45m"`.
fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    let unit = s.chars().last()?;
    let number = &s[..s.len() - unit.len_utf8()];
    let n: i64 = number.trim().parse().ok()?;
    match unit {
        'd' => Some(Duration::days(n)),
        'h' => Some(Duration::hours(n)),
        'm' => Some(Duration::minutes(n)),
        _ => None,
    }
}
