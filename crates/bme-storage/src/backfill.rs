//! One-shot FTS backfill.
//!
//! Re-indexes every memory with exactly the "summary preferred, else
//! redacted value" rule the ingest path applies, decrypting stored
//! cells best-effort and honouring the current governance rules.
//! Read-only on `memories`; writes touch only the FTS tables.

use bme_core::errors::KernelResult;
use bme_core::evaluated::FtsIndexMode;
use bme_crypto::EncryptionEngine;
use bme_privacy::apply_redaction;
use bme_rules::{MemoryInput, PolicyManager, RulesEngine};
use rusqlite::Connection;
use tracing::{debug, error, info, warn};

use crate::{fts, queries, to_storage_err};

/// Tuning knobs for a backfill run.
#[derive(Debug, Clone)]
pub struct BackfillOptions {
    /// Rows per write transaction.
    pub batch_size: usize,
    /// Merge the FTS b-trees afterwards.
    pub optimize: bool,
    /// Evaluate everything, write nothing.
    pub dry_run: bool,
    /// Fallback index mode when a rule does not set one.
    pub fts_index_mode: FtsIndexMode,
}

impl Default for BackfillOptions {
    fn default() -> Self {
        Self {
            batch_size: 500,
            optimize: true,
            dry_run: false,
            fts_index_mode: FtsIndexMode::SummaryPreferred,
        }
    }
}

/// Outcome counters for a backfill run.
#[derive(Debug, Default, Clone)]
pub struct BackfillStats {
    pub total: usize,
    pub indexed: usize,
    pub skipped: usize,
    pub deleted: usize,
    pub errors: usize,
}

impl BackfillStats {
    pub fn report(&self) -> String {
        format!(
            "FTS backfill complete: total={} indexed={} skipped={} deleted={} errors={}",
            self.total, self.indexed, self.skipped, self.deleted, self.errors
        )
    }
}

enum RowAction {
    Indexed,
    Skipped,
    Deleted,
}

/// Backfill the FTS index for every memory in the database.
pub fn run_backfill(
    conn: &Connection,
    rules: &RulesEngine,
    policy: &PolicyManager,
    encryption: &EncryptionEngine,
    options: &BackfillOptions,
) -> KernelResult<BackfillStats> {
    let mut stats = BackfillStats::default();

    if options.dry_run {
        info!("dry-run mode: no changes will be written");
    }
    if !fts::is_available(conn) && !options.dry_run {
        warn!("FTS5 unavailable; nothing to backfill");
        return Ok(stats);
    }

    let rows = queries::all_memories(conn)?;
    stats.total = rows.len();
    info!(total = stats.total, "starting FTS backfill");

    let mut in_batch = 0usize;
    for (i, record) in rows.iter().enumerate() {
        if in_batch == 0 && !options.dry_run {
            conn.execute_batch("BEGIN IMMEDIATE")
                .map_err(|e| to_storage_err(e.to_string()))?;
        }

        match backfill_row(conn, rules, policy, encryption, record, options) {
            Ok(RowAction::Indexed) => stats.indexed += 1,
            Ok(RowAction::Skipped) => stats.skipped += 1,
            Ok(RowAction::Deleted) => stats.deleted += 1,
            Err(e) => {
                error!(memory_id = record.id, kind = %record.kind, key = %record.key, "backfill row failed: {e}");
                stats.errors += 1;
            }
        }

        in_batch += 1;
        let is_last = i + 1 == rows.len();
        if (in_batch >= options.batch_size || is_last) && !options.dry_run {
            conn.execute_batch("COMMIT")
                .map_err(|e| to_storage_err(e.to_string()))?;
            in_batch = 0;
            if !is_last {
                debug!(processed = i + 1, total = stats.total, "committed backfill batch");
            }
        }
    }

    if options.optimize && !options.dry_run {
        info!("optimizing FTS index");
        fts::optimize(conn)?;
    }

    info!("{}", stats.report());
    Ok(stats)
}

fn backfill_row(
    conn: &Connection,
    rules: &RulesEngine,
    policy: &PolicyManager,
    encryption: &EncryptionEngine,
    record: &bme_core::memory::MemoryRecord,
    options: &BackfillOptions,
) -> KernelResult<RowAction> {
    // Decrypt stored cells best-effort; non-envelopes pass through.
    let plaintext_value = encryption.try_decrypt_if_envelope(&record.value);
    let plaintext_summary = record
        .summary
        .as_deref()
        .map(|s| encryption.try_decrypt_if_envelope(s));

    // Re-evaluate rules against the plaintext.
    let input = MemoryInput::new(&record.kind, &record.key, &plaintext_value, &record.ts);
    let evaluated = rules.evaluate(&input);

    // Policy may deny indexing outright: drop any existing FTS rows.
    if !evaluated.fts_index || !policy.can_index(&evaluated) {
        if !options.dry_run {
            fts::remove_row(conn, record.id)?;
        }
        debug!(memory_id = record.id, "removed from index (policy denied)");
        return Ok(RowAction::Deleted);
    }

    // Same sanitation as ingest: redact, then prefer the summary.
    let redacted_value = if evaluated.wants_redaction() {
        apply_redaction(&plaintext_value, &evaluated)
    } else {
        plaintext_value
    };

    let index_mode = evaluated.fts_index_mode.unwrap_or(options.fts_index_mode);
    let index_text = match (&plaintext_summary, index_mode) {
        (Some(s), FtsIndexMode::SummaryPreferred) if !s.trim().is_empty() => s.clone(),
        _ => redacted_value,
    };

    if index_text.trim().is_empty() {
        warn!(memory_id = record.id, "no indexable text");
        return Ok(RowAction::Skipped);
    }

    if !options.dry_run {
        fts::reindex_row(conn, record.id, &index_text)?;
    }
    Ok(RowAction::Indexed)
}
