use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::vector::{AnnConfig, Metric};

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct MnemoConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub retrieval: RetrievalConfig,
    pub index: IndexConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Whether an embedding generator is wired in at all.
    pub enabled: bool,
    /// Fixed vector length for this deployment.
    pub dimension: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub default_max_results: usize,
    pub semantic_weight: f64,
    pub keyword_weight: f64,
    /// Each signal fetches `limit * candidate_multiplier` candidates.
    pub candidate_multiplier: usize,
    /// Upper bound on records read by one exact scan.
    pub exact_scan_limit: usize,
}

/// Which vector index implementation is active for the process.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IndexBackend {
    Exact,
    Approximate,
}

impl IndexBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Approximate => "approximate",
        }
    }
}

impl std::str::FromStr for IndexBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "exact" => Ok(Self::Exact),
            "approximate" | "ann" => Ok(Self::Approximate),
            _ => Err(format!("unknown index backend: {s}")),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IndexConfig {
    pub backend: IndexBackend,
    pub path: String,
    pub collection: String,
    pub connectivity: usize,
    pub expansion_add: usize,
    pub expansion_search: usize,
    pub compaction_ratio: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let db_path = default_mnemo_dir()
            .join("memory.db")
            .to_string_lossy()
            .into_owned();
        Self { db_path }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dimension: 384,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_max_results: 5,
            semantic_weight: 0.7,
            keyword_weight: 0.3,
            candidate_multiplier: 2,
            exact_scan_limit: 10_000,
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        let path = default_mnemo_dir()
            .join("index")
            .to_string_lossy()
            .into_owned();
        let ann = AnnConfig::default();
        Self {
            backend: IndexBackend::Exact,
            path,
            collection: "memories".into(),
            connectivity: ann.connectivity,
            expansion_add: ann.expansion_add,
            expansion_search: ann.expansion_search,
            compaction_ratio: ann.compaction_ratio,
        }
    }
}

impl IndexConfig {
    /// HNSW tuning for collections created under this config.
    pub fn ann_config(&self) -> AnnConfig {
        AnnConfig {
            metric: Metric::Cosine,
            connectivity: self.connectivity,
            expansion_add: self.expansion_add,
            expansion_search: self.expansion_search,
            compaction_ratio: self.compaction_ratio,
        }
    }
}

/// Returns `~/.mnemo/`, or `./.mnemo` when no home directory is known.
pub fn default_mnemo_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".mnemo")
}

/// Returns the default config file path: `~/.mnemo/config.toml`
pub fn default_config_path() -> PathBuf {
    default_mnemo_dir().join("config.toml")
}

impl MnemoConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            MnemoConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("MNEMO_DB") {
            self.storage.db_path = val;
        }
        if let Ok(val) = std::env::var("MNEMO_LOG_LEVEL") {
            self.server.log_level = val;
        }
        if let Ok(val) = std::env::var("MNEMO_INDEX_BACKEND") {
            match val.parse() {
                Ok(backend) => self.index.backend = backend,
                Err(e) => tracing::warn!(error = %e, "ignoring MNEMO_INDEX_BACKEND"),
            }
        }
        if let Ok(val) = std::env::var("MNEMO_INDEX_PATH") {
            self.index.path = val;
        }
    }

    /// Resolve the database path, expanding `~` if needed.
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }

    /// Resolve the approximate index root directory.
    pub fn resolved_index_path(&self) -> PathBuf {
        expand_tilde(&self.index.path)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}
