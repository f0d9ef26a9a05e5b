//! Integration tests: the full ingest pipeline against governance rules.

use std::path::PathBuf;
use std::sync::Arc;

use bme_core::config::IndexingPolicy;
use bme_core::config::EmbeddingConfig;
use bme_core::memory::EmbeddingSource;
use bme_core::traits::{AutoDeny, AutoGrant, EmbeddingBackend};
use bme_crypto::Envelope;
use bme_embeddings::EmbeddingEngine;
use bme_rules::{PolicyManager, RulesEngine};
use bme_storage::vector::SearchFilter;
use bme_storage::MemoryStore;
use tempfile::TempDir;

const TS: &str = "2025-06-01T12:00:00Z";

fn rules_from(dir: &TempDir, yaml: &str) -> Arc<RulesEngine> {
    let path = dir.path().join("memory_rules.yaml");
    std::fs::write(&path, yaml).unwrap();
    Arc::new(RulesEngine::new(Some(path)))
}

fn empty_rules() -> Arc<RulesEngine> {
    Arc::new(RulesEngine::new(Some(PathBuf::from("/nonexistent/rules.yaml"))))
}

fn test_embedder(dim: usize) -> Arc<EmbeddingEngine> {
    Arc::new(
        EmbeddingEngine::new(EmbeddingConfig {
            provider: "hash-fallback".to_string(),
            model: "test".to_string(),
            dim,
        })
        .unwrap(),
    )
}

fn long_transcript() -> String {
    (0..120)
        .map(|i| format!("Speaker {} said something moderately interesting in turn {}.", i % 2, i))
        .collect::<Vec<_>>()
        .join(" ")
}

#[test]
fn never_store_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let rules = rules_from(
        &dir,
        r#"
never_store:
  - match:
      content: "social security"
"#,
    );
    let store = MemoryStore::open_in_memory(rules).unwrap();

    let result = store
        .upsert("fact", "ssn", "my social security number", TS)
        .unwrap();
    assert!(!result.stored);
    assert!(result.memory_id.is_none());
    assert!(store.get("fact", "ssn").unwrap().is_none());
}

#[test]
fn consent_refusal_blocks_storage() {
    // S1: ask_before_store + "no" at the prompt leaves zero rows.
    let dir = TempDir::new().unwrap();
    let rules = rules_from(
        &dir,
        r#"
ask_before_store:
  - match:
      content: "address"
"#,
    );
    let store = MemoryStore::open_in_memory(rules)
        .unwrap()
        .with_consent_provider(Arc::new(AutoDeny));

    let result = store
        .upsert(
            "reflection",
            "private_thought",
            "Taylor's address is 42 High Street",
            TS,
        )
        .unwrap();
    assert!(!result.stored);
    assert!(store.get("reflection", "private_thought").unwrap().is_none());
}

#[test]
fn consent_grant_stores_and_records_consent() {
    let dir = TempDir::new().unwrap();
    let rules = rules_from(
        &dir,
        r#"
ask_before_store:
  - match:
      content: "address"
"#,
    );
    let store = MemoryStore::open_in_memory(rules)
        .unwrap()
        .with_consent_provider(Arc::new(AutoGrant));

    let result = store
        .upsert("reflection", "pt", "the address is 42 High Street", TS)
        .unwrap();
    assert!(result.stored);
    let id = result.memory_id.unwrap();
    assert!(store.consented_ids().unwrap().contains(&id));
}

#[test]
fn redact_then_encrypt_ordering() {
    // S2: the stored value is an envelope whose plaintext is redacted.
    let dir = TempDir::new().unwrap();
    let rules = rules_from(
        &dir,
        r#"
always_keep:
  - match:
      content: "hunter2"
    metadata:
      redact: true
      content: "hunter2"
      encrypt: standard
"#,
    );
    let store = MemoryStore::open_in_memory(rules).unwrap();

    let result = store
        .upsert("credential", "pw", "the password is hunter2 ok", TS)
        .unwrap();
    assert!(result.stored);

    let stored = store.get("credential", "pw").unwrap().unwrap();
    assert!(Envelope::is_envelope(&stored.value), "value must be an envelope");

    let plaintext = store.encryption().try_decrypt_if_envelope(&stored.value);
    assert!(!plaintext.contains("hunter2"));
    assert!(plaintext.contains("****"));
}

#[test]
fn summary_preferred_fts_indexes_summary() {
    // S3: long transcript → the FTS row text equals the summary while
    // the full value stays reachable in the base table.
    let store = MemoryStore::open_in_memory(empty_rules()).unwrap();

    let transcript = long_transcript();
    let result = store
        .upsert("conversation.transcript", "meeting-1", &transcript, TS)
        .unwrap();
    let id = result.memory_id.unwrap();

    let record = store.get("conversation.transcript", "meeting-1").unwrap().unwrap();
    assert_eq!(record.value, transcript);
    let summary = record.summary.expect("long transcript should be summarized");
    assert!(summary.len() < transcript.len());

    let fts_text: String = store
        .pool()
        .with_reader(|conn| {
            conn.query_row(
                "SELECT value FROM memory_fts WHERE rowid = ?1",
                [id],
                |row| row.get(0),
            )
            .map_err(|e| bme_core::errors::to_storage_err(e.to_string()))
        })
        .unwrap();
    assert_eq!(fts_text, summary);
}

#[test]
fn summary_only_discards_original_value() {
    let dir = TempDir::new().unwrap();
    let rules = rules_from(
        &dir,
        r#"
always_keep:
  - match:
      kind: chat
    metadata:
      summarize: true
      summary_mode: summary_only
"#,
    );
    let store = MemoryStore::open_in_memory(rules).unwrap();

    let text = long_transcript();
    store.upsert("chat", "c1", &text, TS).unwrap();
    let record = store.get("chat", "c1").unwrap().unwrap();
    assert!(record.summary.is_none());
    assert!(record.value.len() < text.len(), "value should be the summary");
}

#[test]
fn reupsert_replaces_row_and_derived_rows() {
    let store = MemoryStore::open_in_memory(empty_rules()).unwrap();

    let first = store
        .upsert("conversation.transcript", "t", &long_transcript(), TS)
        .unwrap();
    let second = store
        .upsert("conversation.transcript", "t", "short replacement.", "2025-06-02T00:00:00Z")
        .unwrap();

    assert_eq!(first.memory_id, second.memory_id);
    assert_eq!(second.outcome, bme_core::memory::UpsertOutcome::Updated);

    let count: i64 = store
        .pool()
        .with_reader(|conn| {
            conn.query_row("SELECT COUNT(*) FROM memories", [], |r| r.get(0))
                .map_err(|e| bme_core::errors::to_storage_err(e.to_string()))
        })
        .unwrap();
    assert_eq!(count, 1);

    // The replacement is short: chunk set collapses to the new content.
    let chunks = store
        .pool()
        .with_reader(|conn| bme_storage::chunks::chunks_for_memory(conn, first.memory_id.unwrap()))
        .unwrap();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].text, "short replacement.");
}

#[test]
fn reupsert_identical_input_is_idempotent() {
    let store = MemoryStore::open_in_memory(empty_rules()).unwrap();
    let text = long_transcript();

    store.upsert("conversation.transcript", "t", &text, TS).unwrap();
    let before = store.get("conversation.transcript", "t").unwrap().unwrap();
    let chunks_before = store
        .pool()
        .with_reader(|conn| bme_storage::chunks::chunks_for_memory(conn, before.id))
        .unwrap();

    store.upsert("conversation.transcript", "t", &text, TS).unwrap();
    let after = store.get("conversation.transcript", "t").unwrap().unwrap();
    let chunks_after = store
        .pool()
        .with_reader(|conn| bme_storage::chunks::chunks_for_memory(conn, after.id))
        .unwrap();

    assert_eq!(before.value, after.value);
    assert_eq!(before.summary, after.summary);
    assert_eq!(chunks_before, chunks_after);
}

#[test]
fn delete_cascades_all_derived_rows() {
    let dir = TempDir::new().unwrap();
    let rules = rules_from(
        &dir,
        r#"
always_keep:
  - match:
      kind: note
    metadata:
      embed: full
      embed_store: true
"#,
    );
    let store = MemoryStore::open_in_memory(rules)
        .unwrap()
        .with_embedder(test_embedder(32));

    let text = format!("note body. {}", long_transcript());
    let result = store.upsert("note", "n1", &text, TS).unwrap();
    let id = result.memory_id.unwrap();

    assert!(store.delete("note", "n1").unwrap());
    assert!(!store.delete("note", "n1").unwrap());

    let counts: (i64, i64, i64, i64) = store
        .pool()
        .with_reader(|conn| {
            let q = |sql: &str| -> i64 {
                conn.query_row(sql, [id], |r| r.get(0)).unwrap_or(-1)
            };
            Ok((
                q("SELECT COUNT(*) FROM memory_embeddings WHERE memory_id = ?1"),
                q("SELECT COUNT(*) FROM memory_chunks WHERE memory_id = ?1"),
                q("SELECT COUNT(*) FROM memory_fts_map WHERE memory_id = ?1"),
                q("SELECT COUNT(*) FROM memory_consent WHERE memory_id = ?1"),
            ))
        })
        .unwrap();
    assert_eq!(counts, (0, 0, 0, 0));
}

#[test]
fn embed_store_false_returns_ephemeral_vectors() {
    let dir = TempDir::new().unwrap();
    let rules = rules_from(
        &dir,
        r#"
always_keep:
  - match:
      kind: scratch
    metadata:
      embed: full
      embed_store: false
"#,
    );
    let store = MemoryStore::open_in_memory(rules)
        .unwrap()
        .with_embedder(test_embedder(32));

    let result = store.upsert("scratch", "s1", "some scratch text", TS).unwrap();
    assert!(result.stored);
    assert_eq!(result.ephemeral_embeddings.len(), 1);
    assert_eq!(result.ephemeral_embeddings[0].0, EmbeddingSource::Full);
    assert_eq!(result.ephemeral_embeddings[0].1.len(), 32);

    let stored_vectors: i64 = store
        .pool()
        .with_reader(|conn| {
            conn.query_row("SELECT COUNT(*) FROM memory_embeddings", [], |r| r.get(0))
                .map_err(|e| bme_core::errors::to_storage_err(e.to_string()))
        })
        .unwrap();
    assert_eq!(stored_vectors, 0);
}

#[test]
fn embeddings_persist_and_search() {
    let dir = TempDir::new().unwrap();
    let rules = rules_from(
        &dir,
        r#"
always_keep:
  - match:
      kind: note
    metadata:
      embed: full
      embed_store: true
"#,
    );
    let store = MemoryStore::open_in_memory(rules)
        .unwrap()
        .with_embedder(test_embedder(32));

    let result = store
        .upsert("note", "n1", "the walrus discussed category theory", TS)
        .unwrap();
    let id = result.memory_id.unwrap();

    let embedder = store.embedder().unwrap().clone();
    let qvec = embedder
        .embed_texts(&["the walrus discussed category theory".to_string()])
        .unwrap()
        .remove(0);
    let cfg = embedder.config();
    let hits = store
        .vector_search(
            &qvec,
            5,
            &SearchFilter {
                provider: Some(&cfg.provider),
                model: Some(&cfg.model),
                dim: Some(cfg.dim),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(hits[0].0, id);
    assert!(hits[0].1 > 0.99, "identical text should score ~1.0");
}

#[test]
fn strong_only_veto_blocks_both_indexes() {
    let dir = TempDir::new().unwrap();
    let rules = rules_from(
        &dir,
        r#"
always_keep:
  - match:
      kind: health_record
    metadata:
      encrypt: strong
      embed: full
      embed_store: true
"#,
    );
    let store = MemoryStore::open_in_memory(rules)
        .unwrap()
        .with_policy(PolicyManager::from_policy(IndexingPolicy {
            disallow_strong_only: true,
        }))
        .with_embedder(test_embedder(32));

    let result = store
        .upsert("health_record", "hr1", "blood pressure was fine", TS)
        .unwrap();
    assert!(result.stored);
    let id = result.memory_id.unwrap();

    let (fts_rows, vec_rows): (i64, i64) = store
        .pool()
        .with_reader(|conn| {
            Ok((
                conn.query_row(
                    "SELECT COUNT(*) FROM memory_fts_map WHERE memory_id = ?1",
                    [id],
                    |r| r.get(0),
                )
                .unwrap_or(-1),
                conn.query_row(
                    "SELECT COUNT(*) FROM memory_embeddings WHERE memory_id = ?1",
                    [id],
                    |r| r.get(0),
                )
                .unwrap_or(-1),
            ))
        })
        .unwrap();
    assert_eq!(fts_rows, 0, "strong-only memories must not enter FTS");
    assert_eq!(vec_rows, 0, "strong-only memories must not enter the vector index");
}

#[test]
fn sweep_expired_removes_old_memories() {
    let dir = TempDir::new().unwrap();
    let rules = rules_from(
        &dir,
        r#"
auto_expire:
  - match:
      kind: ephemera
    metadata:
      expires_in: 1h
"#,
    );
    let store = MemoryStore::open_in_memory(rules).unwrap();

    store
        .upsert("ephemera", "old", "stale thing", "2025-06-01T00:00:00Z")
        .unwrap();
    store
        .upsert("ephemera", "fresh", "new thing", "2025-06-01T11:30:00Z")
        .unwrap();
    store.upsert("fact", "keep", "permanent thing", TS).unwrap();

    let now = chrono::DateTime::parse_from_rfc3339("2025-06-01T12:00:00Z")
        .unwrap()
        .with_timezone(&chrono::Utc);
    let removed = store.sweep_expired(now).unwrap();

    assert_eq!(removed, 1);
    assert!(store.get("ephemera", "old").unwrap().is_none());
    assert!(store.get("ephemera", "fresh").unwrap().is_some());
    assert!(store.get("fact", "keep").unwrap().is_some());
}

#[test]
fn persist_embeddings_after_posthoc_grant() {
    let dir = TempDir::new().unwrap();
    let rules = rules_from(
        &dir,
        r#"
always_keep:
  - match:
      kind: note
    metadata:
      embed: full
      embed_store: false
"#,
    );
    let store = MemoryStore::open_in_memory(rules)
        .unwrap()
        .with_embedder(test_embedder(32));

    let result = store.upsert("note", "n1", "compute only at first", TS).unwrap();
    let id = result.memory_id.unwrap();

    let created = store.persist_embeddings_for(id, None).unwrap();
    assert_eq!(created, 1);
    assert!(store.consented_ids().unwrap().contains(&id));

    // reembed preserves the existing source set.
    let recreated = store.reembed(id, None).unwrap();
    assert_eq!(recreated, 1);
}

#[test]
fn wal_files_are_checkpointed_on_close() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("bme.db");
    let store = MemoryStore::open(&db_path, empty_rules()).unwrap();
    store.upsert("fact", "k", "v", TS).unwrap();
    store.close().unwrap();

    let wal = std::fs::metadata(dir.path().join("bme.db-wal"))
        .map(|m| m.len())
        .unwrap_or(0);
    assert_eq!(wal, 0, "WAL should be truncated after close");
}
