//! Global indexing policy from `policy.yaml`.
//!
//! One knob today: `indexing.disallow_strong_only`, which vetoes FTS
//! and vector indexing for any memory whose evaluated encryption
//! strength is `strong`.

use std::path::{Path, PathBuf};

use bme_core::config::IndexingPolicy;
use bme_core::evaluated::{EncryptMode, EvaluatedMetadata};
use serde::Deserialize;
use tracing::error;

const DEFAULT_PATHS: [&str; 2] = ["config/policy.yaml", "policy.yaml"];

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PolicyFile {
    indexing: IndexingPolicy,
}

/// Loads and answers questions about the global policy file.
#[derive(Debug, Clone, Default)]
pub struct PolicyManager {
    indexing: IndexingPolicy,
}

impl PolicyManager {
    /// Load from an explicit path or the default search path; a missing
    /// or unparseable file yields permissive defaults.
    pub fn load(config_path: Option<&Path>) -> Self {
        let path: Option<PathBuf> = config_path
            .filter(|p| p.exists())
            .map(Path::to_path_buf)
            .or_else(|| {
                DEFAULT_PATHS
                    .iter()
                    .map(Path::new)
                    .find(|p| p.exists())
                    .map(Path::to_path_buf)
            });

        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(&path)
            .map_err(|e| e.to_string())
            .and_then(|t| serde_yaml::from_str::<PolicyFile>(&t).map_err(|e| e.to_string()))
        {
            Ok(file) => Self {
                indexing: file.indexing,
            },
            Err(e) => {
                error!(path = %path.display(), "failed to load policy.yaml: {e}");
                Self::default()
            }
        }
    }

    pub fn from_policy(indexing: IndexingPolicy) -> Self {
        Self { indexing }
    }

    /// Whether the evaluated memory may enter FTS and vector indexes.
    pub fn can_index(&self, evaluated: &EvaluatedMetadata) -> bool {
        !(self.indexing.disallow_strong_only && evaluated.encrypt == EncryptMode::Strong)
    }
}
