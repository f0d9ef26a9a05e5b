//! `backfill-fts`: one-shot re-index of the FTS tables.
//!
//! Applies the same "summary preferred, else redacted value" sanitation
//! rule as live ingestion, under the current governance rules, in
//! batched transactions. Exits 0 on success, 1 on any per-row error.

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use bme_crypto::EncryptionEngine;
use bme_rules::{PolicyManager, RulesEngine};
use bme_storage::{run_backfill, BackfillOptions, ConnectionPool};

#[derive(Debug, Parser)]
#[command(name = "backfill-fts", about = "Backfill the FTS index for stored memories")]
struct Args {
    /// Path to the SQLite database (defaults to $BARTHO_DB_PATH).
    #[arg(long, env = "BARTHO_DB_PATH")]
    db: PathBuf,

    /// Rows per write transaction.
    #[arg(long, default_value_t = 500)]
    batch: usize,

    /// Preview changes without writing to the database.
    #[arg(long)]
    dry_run: bool,

    /// Enable verbose debug logging.
    #[arg(long)]
    verbose: bool,

    /// Skip FTS index optimization after the backfill.
    #[arg(long)]
    no_optimize: bool,

    /// Optional path to memory_rules.yaml (default search path otherwise).
    #[arg(long)]
    rules: Option<PathBuf>,

    /// Optional path to policy.yaml (default search path otherwise).
    #[arg(long)]
    policy: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    if !args.db.exists() {
        bail!("database not found: {}", args.db.display());
    }

    let pool = ConnectionPool::open(&args.db, 1)
        .with_context(|| format!("failed to open {}", args.db.display()))?;
    let rules = RulesEngine::new(args.rules);
    let policy = PolicyManager::load(args.policy.as_deref());
    let encryption = EncryptionEngine::new();

    let options = BackfillOptions {
        batch_size: args.batch.max(1),
        optimize: !args.no_optimize,
        dry_run: args.dry_run,
        ..Default::default()
    };

    let stats = pool
        .writer
        .with_conn_sync(|conn| {
            bme_storage::migrations::run_migrations(conn)?;
            run_backfill(conn, &rules, &policy, &encryption, &options)
        })
        .context("backfill failed")?;

    println!("{}", stats.report());
    if stats.errors > 0 {
        std::process::exit(1);
    }
    Ok(())
}
