use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct CirclesConfig {
    pub logging: LoggingConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub index: IndexConfig,
    pub retrieval: RetrievalConfig,
    pub prediction: PredictionConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
    /// Directory backing the filesystem blob store.
    pub blob_dir: String,
    /// Blob key of the vector snapshot; the id mapping lives at `<index_key>.ids`.
    pub index_key: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: String,
    pub dimension: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IndexConfig {
    /// Snapshot the index to the blob store after this many new items.
    pub save_every: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub default_top_k: usize,
    /// Raw candidates fetched from the index per requested result before reranking.
    pub candidate_multiplier: usize,
    pub context_max_tokens: usize,
    pub cache_capacity: usize,
    pub cache_ttl_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PredictionConfig {
    pub threshold: f32,
    pub top_k: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let dir = default_circles_dir();
        Self {
            db_path: dir.join("circles.db").to_string_lossy().into_owned(),
            blob_dir: dir.join("blobs").to_string_lossy().into_owned(),
            index_key: "items.index".into(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "hashing".into(),
            dimension: crate::embedding::EMBEDDING_DIM,
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self { save_every: 10 }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_top_k: 10,
            candidate_multiplier: 3,
            context_max_tokens: 1000,
            cache_capacity: 100,
            cache_ttl_secs: 300,
        }
    }
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            threshold: 0.7,
            top_k: 3,
        }
    }
}

fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

/// Returns `~/.circles/`
pub fn default_circles_dir() -> PathBuf {
    home_dir().join(".circles")
}

/// Returns the default config file path: `~/.circles/config.toml`
pub fn default_config_path() -> PathBuf {
    default_circles_dir().join("config.toml")
}

impl CirclesConfig {
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
            CirclesConfig::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides (CIRCLES_DB, CIRCLES_BLOB_DIR, CIRCLES_LOG_LEVEL).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("CIRCLES_DB") {
            self.storage.db_path = val;
        }
        if let Ok(val) = std::env::var("CIRCLES_BLOB_DIR") {
            self.storage.blob_dir = val;
        }
        if let Ok(val) = std::env::var("CIRCLES_LOG_LEVEL") {
            self.logging.level = val;
        }
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.embedding.dimension > 0, "embedding.dimension must be positive");
        anyhow::ensure!(self.index.save_every > 0, "index.save_every must be positive");
        anyhow::ensure!(
            self.retrieval.default_top_k > 0,
            "retrieval.default_top_k must be positive"
        );
        anyhow::ensure!(
            self.retrieval.candidate_multiplier > 0,
            "retrieval.candidate_multiplier must be positive"
        );
        anyhow::ensure!(
            (0.0..=1.0).contains(&self.prediction.threshold),
            "prediction.threshold must be within [0, 1]"
        );
        anyhow::ensure!(self.prediction.top_k > 0, "prediction.top_k must be positive");
        Ok(())
    }

    /// Resolve the database path, expanding `~` if needed.
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }

    pub fn resolved_blob_dir(&self) -> PathBuf {
        expand_tilde(&self.storage.blob_dir)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        home_dir().join(rest)
    } else {
        PathBuf::from(path)
    }
}
