//! Atomic hot-reload of the embedding engine.
//!
//! The factory owns the current engine behind a lock and swaps the
//! whole instance when `embeddings.yaml` changes; readers always see a
//! fully-built engine. A one-time startup banner reports the effective
//! configuration when embeddings are enabled.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::SystemTime;

use bme_core::config::{embeddings_enabled, EmbeddingConfig};
use bme_core::errors::KernelResult;
use bme_core::traits::EmbeddingBackend;
use bme_core::watch::{mtime, FileWatcher, WATCH_INTERVAL};
use serde::Deserialize;
use tracing::{error, info, warn};

const DEFAULT_PATHS: [&str; 2] = ["config/embeddings.yaml", "embeddings.yaml"];

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct EmbeddingsFile {
    embeddings: EmbeddingsSection,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct EmbeddingsSection {
    default_provider: String,
    default_model: String,
    default_dim: usize,
}

impl Default for EmbeddingsSection {
    fn default() -> Self {
        let d = EmbeddingConfig::default();
        Self {
            default_provider: d.provider,
            default_model: d.model,
            default_dim: d.dim,
        }
    }
}

/// Factory for atomic engine swaps.
pub struct EmbeddingFactory {
    engine: RwLock<Option<Arc<crate::EmbeddingEngine>>>,
    config_path: Option<PathBuf>,
    last_mtime: Mutex<Option<SystemTime>>,
    watcher: Mutex<Option<FileWatcher>>,
    banner_shown: AtomicBool,
}

impl EmbeddingFactory {
    /// Build a factory resolving `embeddings.yaml` through the default
    /// search path, or an explicit override.
    pub fn new(config_path: Option<PathBuf>) -> Self {
        let resolved = config_path.or_else(|| {
            DEFAULT_PATHS
                .iter()
                .map(Path::new)
                .find(|p| p.exists())
                .map(Path::to_path_buf)
        });
        let last = resolved.as_deref().and_then(mtime);
        Self {
            engine: RwLock::new(None),
            config_path: resolved,
            last_mtime: Mutex::new(last),
            watcher: Mutex::new(None),
            banner_shown: AtomicBool::new(false),
        }
    }

    /// The current engine, building it from config on first use.
    /// Callers always receive a fully-initialized instance.
    pub fn get(&self) -> KernelResult<Arc<crate::EmbeddingEngine>> {
        {
            let guard = self.engine.read().unwrap_or_else(|e| e.into_inner());
            if let Some(engine) = guard.as_ref() {
                return Ok(Arc::clone(engine));
            }
        }

        let mut guard = self.engine.write().unwrap_or_else(|e| e.into_inner());
        if let Some(engine) = guard.as_ref() {
            return Ok(Arc::clone(engine));
        }
        let engine = Arc::new(crate::EmbeddingEngine::new(self.load_config())?);
        *guard = Some(Arc::clone(&engine));
        drop(guard);
        self.show_banner_once(&engine);
        Ok(engine)
    }

    /// Atomically swap in an engine built from the given config.
    pub fn rebuild(&self, config: EmbeddingConfig) -> KernelResult<()> {
        let engine = Arc::new(crate::EmbeddingEngine::new(config.clone())?);
        let mut guard = self.engine.write().unwrap_or_else(|e| e.into_inner());
        *guard = Some(engine);
        info!(
            provider = %config.provider,
            model = %config.model,
            dim = config.dim,
            "rebuilt embedding engine"
        );
        Ok(())
    }

    /// Reload config from `embeddings.yaml` and rebuild.
    pub fn reload_from_file(&self) {
        if let Err(e) = self.rebuild(self.load_config()) {
            // Keep the previous engine on a bad config.
            error!("embedding reload failed, keeping current engine: {e}");
            return;
        }
        let mut last = self.last_mtime.lock().unwrap_or_else(|e| e.into_inner());
        *last = self.config_path.as_deref().and_then(mtime);
    }

    fn load_config(&self) -> EmbeddingConfig {
        let Some(path) = &self.config_path else {
            return EmbeddingConfig::default();
        };
        match std::fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|t| serde_yaml::from_str::<EmbeddingsFile>(&t).map_err(|e| e.to_string()))
        {
            Ok(file) => EmbeddingConfig {
                provider: file.embeddings.default_provider,
                model: file.embeddings.default_model,
                dim: file.embeddings.default_dim,
            },
            Err(e) => {
                warn!(path = %path.display(), "failed to load embeddings.yaml, using defaults: {e}");
                EmbeddingConfig::default()
            }
        }
    }

    fn show_banner_once(&self, engine: &crate::EmbeddingEngine) {
        if !embeddings_enabled() {
            return;
        }
        if self.banner_shown.swap(true, Ordering::SeqCst) {
            return;
        }
        let cfg = engine.config();
        info!(
            provider = %cfg.provider,
            model = %cfg.model,
            dim = cfg.dim,
            fallback = engine.is_fallback(),
            "embeddings enabled"
        );
    }

    /// Start the background watcher unless `BARTHO_EMBED_RELOAD=0`.
    pub fn start_watcher(self: &Arc<Self>) {
        if matches!(
            std::env::var("BARTHO_EMBED_RELOAD").as_deref(),
            Ok("0") | Ok("false") | Ok("False")
        ) {
            info!("embeddings watcher disabled via BARTHO_EMBED_RELOAD=0");
            return;
        }

        let mut guard = self.watcher.lock().unwrap_or_else(|e| e.into_inner());
        if guard.is_some() {
            return;
        }
        let factory = Arc::clone(self);
        *guard = Some(FileWatcher::spawn("embeddings", WATCH_INTERVAL, move || {
            let Some(path) = factory.config_path.as_deref() else {
                return;
            };
            let current = mtime(path);
            let changed = {
                let last = factory.last_mtime.lock().unwrap_or_else(|e| e.into_inner());
                current.is_some() && current != *last
            };
            if changed {
                info!("detected embeddings.yaml change, reloading");
                factory.reload_from_file();
            }
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

impl Drop for EmbeddingFactory {
    fn drop(&mut self) {
        self.stop_watcher();
    }
}

/// Adapter so the factory itself can stand where an [`EmbeddingBackend`]
/// is expected; each call observes the latest swapped engine.
impl EmbeddingBackend for EmbeddingFactory {
    fn embed_texts(&self, texts: &[String]) -> KernelResult<Vec<Vec<f32>>> {
        self.get()?.embed_texts(texts)
    }

    fn config(&self) -> EmbeddingConfig {
        self.get()
            .map(|e| EmbeddingBackend::config(e.as_ref()))
            .unwrap_or_default()
    }
}
