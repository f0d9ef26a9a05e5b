//! Retrieval configuration manager: loads `retrieval.*` (plus the
//! `chunking.*` and `fts.*` blocks) from `kernel.yaml`, mutates the
//! shared config in place so live retrievers observe changes, and
//! watches the file for hot reload.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::SystemTime;

use bme_core::config::{ChunkingConfig, FusionMode, HybridRetrievalConfig};
use bme_core::evaluated::FtsIndexMode;
use bme_core::watch::{mtime, FileWatcher, WATCH_INTERVAL};
use serde::Deserialize;
use tracing::{debug, info, warn};

const DEFAULT_PATHS: [&str; 2] = ["config/kernel.yaml", "kernel.yaml"];

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct KernelFile {
    retrieval: RetrievalSection,
    chunking: Option<ChunkingConfig>,
    fts: FtsSection,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RetrievalSection {
    fts_candidates: usize,
    vec_candidates: usize,
    top_k: usize,
    fts_tokenizer: String,
    fusion_strategy: String,
    hybrid_weights: WeightsSection,
    rrf_k: u32,
    recency: RecencySection,
    kind_boosts: HashMap<String, f64>,
    query_aware: bool,
}

impl Default for RetrievalSection {
    fn default() -> Self {
        let d = HybridRetrievalConfig::default();
        Self {
            fts_candidates: d.fts_candidates,
            vec_candidates: d.vec_candidates,
            top_k: d.default_top_k,
            fts_tokenizer: d.fts_tokenizer,
            fusion_strategy: "weighted".to_string(),
            hybrid_weights: WeightsSection::default(),
            rrf_k: d.rrf_k,
            recency: RecencySection::default(),
            kind_boosts: HashMap::new(),
            query_aware: d.query_aware,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct WeightsSection {
    fts: f64,
    vector: f64,
}

impl Default for WeightsSection {
    fn default() -> Self {
        Self { fts: 0.6, vector: 0.4 }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RecencySection {
    half_life_days: f64,
}

impl Default for RecencySection {
    fn default() -> Self {
        Self { half_life_days: 7.0 }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FtsSection {
    index_mode: Option<FtsIndexMode>,
}

/// Owns the shared [`HybridRetrievalConfig`] and keeps it current.
pub struct RetrievalConfigManager {
    config: Arc<RwLock<HybridRetrievalConfig>>,
    chunking: Mutex<ChunkingConfig>,
    fts_index_mode: Mutex<FtsIndexMode>,
    config_path: Option<PathBuf>,
    last_mtime: Mutex<Option<SystemTime>>,
    watcher: Mutex<Option<FileWatcher>>,
}

impl RetrievalConfigManager {
    pub fn new(config_path: Option<PathBuf>) -> Self {
        let resolved = config_path.filter(|p| p.exists()).or_else(|| {
            DEFAULT_PATHS
                .iter()
                .map(Path::new)
                .find(|p| p.exists())
                .map(Path::to_path_buf)
        });
        let manager = Self {
            config: Arc::new(RwLock::new(HybridRetrievalConfig::default())),
            chunking: Mutex::new(ChunkingConfig::default()),
            fts_index_mode: Mutex::new(FtsIndexMode::SummaryPreferred),
            config_path: resolved,
            last_mtime: Mutex::new(None),
            watcher: Mutex::new(None),
        };
        manager.load();
        manager
    }

    /// The live config. Retrievers holding this Arc observe reloads.
    pub fn hybrid_config(&self) -> Arc<RwLock<HybridRetrievalConfig>> {
        Arc::clone(&self.config)
    }

    /// Chunking block for wiring the memory store.
    pub fn chunking_config(&self) -> ChunkingConfig {
        self.chunking.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// `fts.index_mode` fallback for the memory store.
    pub fn fts_index_mode(&self) -> FtsIndexMode {
        *self.fts_index_mode.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn load(&self) {
        let Some(path) = &self.config_path else {
            debug!("no kernel.yaml found, using retrieval defaults");
            return;
        };

        let parsed = std::fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|t| serde_yaml::from_str::<KernelFile>(&t).map_err(|e| e.to_string()));
        let file = match parsed {
            Ok(f) => f,
            Err(e) => {
                // Keep the last good config.
                warn!(path = %path.display(), "failed to load kernel.yaml: {e}");
                return;
            }
        };

        let r = file.retrieval;
        let fusion_mode = match r.fusion_strategy.as_str() {
            "rrf" => FusionMode::Rrf,
            _ => FusionMode::Weighted,
        };

        {
            // Mutate the shared struct in place: existing retrievers
            // see the new values without being reconstructed.
            let mut cfg = self.config.write().unwrap_or_else(|e| e.into_inner());
            cfg.fts_candidates = r.fts_candidates;
            cfg.vec_candidates = r.vec_candidates;
            cfg.default_top_k = r.top_k;
            cfg.fusion_mode = fusion_mode;
            cfg.weight_fts = r.hybrid_weights.fts;
            cfg.weight_vec = r.hybrid_weights.vector;
            cfg.rrf_k = r.rrf_k;
            cfg.half_life_hours = r.recency.half_life_days * 24.0;
            cfg.kind_boosts = r.kind_boosts;
            cfg.query_aware = r.query_aware;
            cfg.fts_tokenizer = r.fts_tokenizer;
            cfg.normalize_weights();

            debug!(
                fts_candidates = cfg.fts_candidates,
                vec_candidates = cfg.vec_candidates,
                top_k = cfg.default_top_k,
                ?fusion_mode,
                weight_fts = cfg.weight_fts,
                weight_vec = cfg.weight_vec,
                half_life_hours = cfg.half_life_hours,
                "loaded retrieval config"
            );
        }

        if let Some(chunking) = file.chunking {
            *self.chunking.lock().unwrap_or_else(|e| e.into_inner()) = chunking;
        }
        if let Some(mode) = file.fts.index_mode {
            *self.fts_index_mode.lock().unwrap_or_else(|e| e.into_inner()) = mode;
        }

        let mut last = self.last_mtime.lock().unwrap_or_else(|e| e.into_inner());
        *last = mtime(path);
    }

    /// Manually reload, logging what changed.
    pub fn reload(&self) {
        let before = self.config.read().unwrap_or_else(|e| e.into_inner()).clone();
        self.load();
        let after = self.config.read().unwrap_or_else(|e| e.into_inner()).clone();

        let mut changes = Vec::new();
        if before.fusion_mode != after.fusion_mode {
            changes.push(format!(
                "fusion: {:?} -> {:?}",
                before.fusion_mode, after.fusion_mode
            ));
        }
        if (before.weight_fts - after.weight_fts).abs() > f64::EPSILON {
            changes.push(format!(
                "weights: ({:.2}, {:.2}) -> ({:.2}, {:.2})",
                before.weight_fts, before.weight_vec, after.weight_fts, after.weight_vec
            ));
        }
        if (before.half_life_hours - after.half_life_hours).abs() > f64::EPSILON {
            changes.push(format!(
                "half_life_hours: {:.1} -> {:.1}",
                before.half_life_hours, after.half_life_hours
            ));
        }
        if before.fts_tokenizer != after.fts_tokenizer {
            changes.push(format!(
                "fts_tokenizer: {} -> {}",
                before.fts_tokenizer, after.fts_tokenizer
            ));
            warn!(
                "FTS tokenizer changed; the existing index keeps the old tokenizer \
                 until backfill-fts rebuilds it"
            );
        }

        if changes.is_empty() {
            debug!("reloaded retrieval config (no changes)");
        } else {
            info!("reloaded retrieval config: {}", changes.join(", "));
        }
    }

    /// Reload when the file's mtime moved.
    pub fn check_and_reload_if_needed(&self) {
        let Some(path) = &self.config_path else { return };
        let current = mtime(path);
        let changed = {
            let last = self.last_mtime.lock().unwrap_or_else(|e| e.into_inner());
            current.is_some() && current != *last
        };
        if changed {
            self.reload();
        }
    }

    /// Start the background watcher (~10 s cadence).
    pub fn start_watcher(self: &Arc<Self>) {
        let mut guard = self.watcher.lock().unwrap_or_else(|e| e.into_inner());
        if guard.is_some() {
            return;
        }
        let manager = Arc::clone(self);
        *guard = Some(FileWatcher::spawn("kernel_yaml", WATCH_INTERVAL, move || {
            manager.check_and_reload_if_needed();
        }));
    }

    /// Stop the background watcher.
    pub fn stop_watcher(&self) {
        let mut guard = self.watcher.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(mut w) = guard.take() {
            w.stop();
        }
    }
}

impl Drop for RetrievalConfigManager {
    fn drop(&mut self) {
        self.stop_watcher();
    }
}
