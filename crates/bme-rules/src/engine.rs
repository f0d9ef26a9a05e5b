//! The rules engine: loads `memory_rules.yaml`, evaluates memories
//! against five priority-ordered categories, reloads on file change.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::SystemTime;

use bme_core::config::embeddings_enabled;
use bme_core::evaluated::{EmbedMode, EvaluatedMetadata};
use bme_core::watch::{mtime, FileWatcher, WATCH_INTERVAL};
use serde::Deserialize;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::rule::MemoryRule;

/// Category priority, highest first. Higher-priority categories win
/// metadata ties because their fields are merged first.
pub const PRIORITY: [&str; 5] = [
    "never_store",
    "ask_before_store",
    "always_keep",
    "auto_expire",
    "context_only",
];

const DEFAULT_PATHS: [&str; 2] = ["config/memory_rules.yaml", "memory_rules.yaml"];

/// Normalized memory input for rule evaluation. Built either from the
/// canonical upsert shape or from the richer alternate that nests tags
/// and speaker under a metadata sub-object.
#[derive(Debug, Clone, Default)]
pub struct MemoryInput {
    pub kind: String,
    pub key: String,
    pub content: String,
    pub tags: Vec<String>,
    pub speaker: Option<String>,
    pub ts: Option<String>,
}

impl MemoryInput {
    /// The canonical upsert shape.
    pub fn new(kind: &str, key: &str, content: &str, ts: &str) -> Self {
        Self {
            kind: kind.to_string(),
            key: key.to_string(),
            content: content.to_string(),
            tags: Vec::new(),
            speaker: None,
            ts: Some(ts.to_string()),
        }
    }

    /// Normalize a loosely-shaped JSON value. Accepts `kind`/`modality`/
    /// `type`, `key`/`id`, `content`/`value`, and tags/speaker either at
    /// the top level or nested under `metadata`.
    pub fn from_value(v: &Value) -> Self {
        let get_str = |keys: &[&str]| -> Option<String> {
            keys.iter()
                .find_map(|k| v.get(k).and_then(Value::as_str))
                .map(str::to_string)
        };

        let meta = v.get("metadata");
        let tags = v
            .get("tags")
            .or_else(|| meta.and_then(|m| m.get("tags")))
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let speaker = v
            .get("speaker")
            .or_else(|| meta.and_then(|m| m.get("speaker")))
            .and_then(Value::as_str)
            .map(str::to_string);

        Self {
            kind: get_str(&["kind", "modality", "type"]).unwrap_or_default(),
            key: get_str(&["key", "id"]).unwrap_or_default(),
            content: get_str(&["content", "value"]).unwrap_or_default(),
            tags,
            speaker,
            ts: get_str(&["ts", "timestamp"]),
        }
    }
}

/// The raw shape of `memory_rules.yaml`: five top-level category lists.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RulesFile {
    never_store: Vec<MemoryRule>,
    ask_before_store: Vec<MemoryRule>,
    always_keep: Vec<MemoryRule>,
    auto_expire: Vec<MemoryRule>,
    context_only: Vec<MemoryRule>,
}

impl RulesFile {
    fn into_categories(self) -> Vec<(String, Vec<MemoryRule>)> {
        let tag = |cat: &str, mut rules: Vec<MemoryRule>| {
            for r in &mut rules {
                r.category = cat.to_string();
            }
            (cat.to_string(), rules)
        };
        vec![
            tag("never_store", self.never_store),
            tag("ask_before_store", self.ask_before_store),
            tag("always_keep", self.always_keep),
            tag("auto_expire", self.auto_expire),
            tag("context_only", self.context_only),
        ]
    }
}

#[derive(Default)]
struct RulesState {
    /// Category name → ordered rules, in priority order.
    categories: Vec<(String, Vec<MemoryRule>)>,
    last_mtime: Option<SystemTime>,
}

/// Rule-based memory governance engine.
pub struct RulesEngine {
    config_path: Option<PathBuf>,
    state: RwLock<RulesState>,
    watcher: Mutex<Option<FileWatcher>>,
}

impl RulesEngine {
    /// Build an engine, loading rules from `config_path` or the default
    /// search path. Missing file means empty rules (permissive defaults).
    pub fn new(config_path: Option<PathBuf>) -> Self {
        let engine = Self {
            config_path,
            state: RwLock::new(RulesState::default()),
            watcher: Mutex::new(None),
        };
        engine.load_rules();
        engine
    }

    fn find_path(&self) -> Option<PathBuf> {
        if let Some(p) = &self.config_path {
            if p.exists() {
                return Some(p.clone());
            }
        }
        DEFAULT_PATHS
            .iter()
            .map(Path::new)
            .find(|p| p.exists())
            .map(Path::to_path_buf)
    }

    fn load_rules(&self) {
        let path = self.find_path();
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());

        let Some(path) = path else {
            state.categories = Vec::new();
            state.last_mtime = None;
            return;
        };

        let text = match std::fs::read_to_string(&path) {
            Ok(t) => t,
            Err(e) => {
                // Keep the last good rules on a read failure.
                error!(path = %path.display(), "failed to read rules file: {e}");
                return;
            }
        };

        match serde_yaml::from_str::<RulesFile>(&text) {
            Ok(file) => {
                state.categories = file.into_categories();
                state.last_mtime = mtime(&path);
            }
            Err(e) => {
                // Keep the last good rules on a parse failure.
                error!(path = %path.display(), "failed to parse rules file: {e}");
            }
        }
    }

    /// Manually reload rules from disk.
    pub fn reload(&self) {
        self.load_rules();
        match self.find_path() {
            Some(p) => info!(path = %p.display(), "reloaded memory rules"),
            None => info!("reloaded memory rules (no config file found)"),
        }
    }

    /// Reload if the backing file's mtime changed. Called before every
    /// evaluation and by the background watcher.
    pub fn check_and_reload_if_needed(&self) {
        let Some(path) = self.find_path() else { return };
        let current = mtime(&path);
        let last = {
            let state = self.state.read().unwrap_or_else(|e| e.into_inner());
            state.last_mtime
        };
        if current.is_some() && current != last {
            self.reload();
        }
    }

    /// Start the background watcher (~10 s cadence).
    pub fn start_watcher(self: &Arc<Self>) {
        let mut guard = self.watcher.lock().unwrap_or_else(|e| e.into_inner());
        if guard.is_some() {
            return;
        }
        let engine = Arc::clone(self);
        *guard = Some(FileWatcher::spawn("memory_rules", WATCH_INTERVAL, move || {
            engine.check_and_reload_if_needed();
        }));
    }

    /// Stop the background watcher.
    pub fn stop_watcher(&self) {
        let mut guard = self.watcher.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(mut w) = guard.take() {
            w.stop();
        }
    }

    /// Evaluate rules against a memory and return the enriched metadata.
    pub fn evaluate(&self, memory: &MemoryInput) -> EvaluatedMetadata {
        self.check_and_reload_if_needed();

        // Merge matched rule metadata in priority order, first wins.
        // Seeding the defaults up front means rule files cannot set the
        // gate fields directly; only matched categories do (below).
        let mut merged = serde_json::Map::new();
        merged.insert("allow_store".to_string(), Value::Bool(true));
        merged.insert("requires_consent".to_string(), Value::Bool(false));

        let mut matched_categories: Vec<String> = Vec::new();
        let mut matched_rules: Vec<(String, Value)> = Vec::new();

        {
            let state = self.state.read().unwrap_or_else(|e| e.into_inner());
            for (category, rules) in &state.categories {
                for rule in rules {
                    if rule.matches(memory) {
                        matched_categories.push(category.clone());
                        matched_rules.push((
                            category.clone(),
                            serde_json::to_value(&rule.matcher).unwrap_or(Value::Null),
                        ));
                        for (k, v) in &rule.metadata {
                            merged.entry(k.clone()).or_insert_with(|| v.clone());
                        }
                    }
                }
            }
        }

        let mut evaluated: EvaluatedMetadata =
            match serde_json::from_value(Value::Object(merged)) {
                Ok(e) => e,
                Err(e) => {
                    warn!("malformed rule metadata, falling back to defaults: {e}");
                    EvaluatedMetadata::default()
                }
            };

        // Category outcomes override anything a rule file said.
        if matched_categories.iter().any(|c| c == "never_store") {
            evaluated.allow_store = false;
        }
        if matched_categories.iter().any(|c| c == "ask_before_store") {
            evaluated.requires_consent = true;
        }

        // Redaction default: a bare `redact: true` means mask.
        if evaluated.redact && evaluated.redact_strategy.is_none() {
            evaluated.redact_strategy = Some("mask".to_string());
        }

        // When embeddings are globally enabled and the rule did not
        // decide, persist vectors so retrieval is not silently empty.
        if embeddings_enabled()
            && evaluated.embed != EmbedMode::None
            && evaluated.embed_store.is_none()
        {
            evaluated.embed_store = Some(true);
        }

        evaluated.matched_categories = matched_categories;
        evaluated.matched_rules = matched_rules;
        evaluated
    }

    /// Whether the memory may be stored at all.
    pub fn should_store(&self, memory: &MemoryInput) -> bool {
        self.evaluate(memory).allow_store
    }

    /// Whether storage needs an explicit user grant.
    pub fn requires_consent(&self, memory: &MemoryInput) -> bool {
        self.evaluate(memory).requires_consent
    }
}

impl Drop for RulesEngine {
    fn drop(&mut self) {
        self.stop_watcher();
    }
}
