//! Configuration module for the retrieval engine.
//!
//! This module provides a layered configuration system that supports:
//! - Default values
//! - TOML configuration file
//! - Environment variable overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `SIMSEARCH_` and use double
//! underscores to separate nested levels:
//! - `SIMSEARCH_CHUNKING__CHUNK_SIZE=256` sets `chunking.chunk_size`
//! - `SIMSEARCH_SEARCH__METRIC=cosine` sets `search.metric`
//! - `SIMSEARCH_STORAGE__BACKEND=json` sets `storage.backend`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::chunking::{
    DEFAULT_SEPARATORS, SplitterKind, TextSplitter, Tokenizer, build_splitter,
};
use crate::error::{IndexError, IndexResult};
use crate::storage::{StoreKind, VectorStore};
use crate::vector::{DistanceMetric, MetricKind};

/// Directory holding the settings file, looked up from the current
/// directory upwards.
pub const CONFIG_DIR: &str = ".simsearch";
pub const CONFIG_FILE: &str = "settings.toml";
const ENV_PREFIX: &str = "SIMSEARCH_";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Directory where indexes are persisted
    #[serde(default = "default_index_path")]
    pub index_path: PathBuf,

    /// Name of the index the CLI operates on
    #[serde(default = "default_index_name")]
    pub index_name: String,

    /// Global debug mode
    #[serde(default = "default_false")]
    pub debug: bool,

    #[serde(default)]
    pub chunking: ChunkingConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ChunkingConfig {
    /// Token budget per chunk
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Tokens repeated from the previous chunk
    #[serde(default)]
    pub overlap: usize,

    /// Split points, coarse to fine
    #[serde(default = "default_separators")]
    pub separators: Vec<String>,

    #[serde(default)]
    pub strategy: SplitterKind,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SearchConfig {
    #[serde(default)]
    pub metric: MetricKind,

    /// Results returned when no limit is given
    #[serde(default = "default_limit")]
    pub default_limit: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StoreKind,

    /// Copy mapped vectors into memory on load
    #[serde(default = "default_false")]
    pub materialize_on_load: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct EmbeddingConfig {
    /// fastembed model name
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Texts per embedding batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Where model files are cached
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
}

// Default value functions
fn default_version() -> u32 {
    1
}
fn default_index_path() -> PathBuf {
    PathBuf::from(".simsearch/index")
}
fn default_index_name() -> String {
    "default".to_string()
}
fn default_false() -> bool {
    false
}
fn default_chunk_size() -> usize {
    510
}
fn default_separators() -> Vec<String> {
    DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect()
}
fn default_limit() -> usize {
    5
}
fn default_embedding_model() -> String {
    "AllMiniLML6V2".to_string()
}
fn default_batch_size() -> usize {
    32
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            index_path: default_index_path(),
            index_name: default_index_name(),
            debug: false,
            chunking: ChunkingConfig::default(),
            search: SearchConfig::default(),
            storage: StorageConfig::default(),
            embedding: EmbeddingConfig::default(),
        }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: 0,
            separators: default_separators(),
            strategy: SplitterKind::default(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            metric: MetricKind::default(),
            default_limit: default_limit(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            batch_size: default_batch_size(),
            cache_dir: None,
        }
    }
}

fn env_provider() -> Env {
    Env::prefixed(ENV_PREFIX).map(|key| {
        key.as_str()
            .to_lowercase()
            .replace("__", ".") // Double underscore becomes dot
            .into()
    })
}

impl Settings {
    /// Loads defaults, then the workspace settings file, then environment
    /// overrides.
    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join(CONFIG_FILE));
        Self::load_from(config_path)
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(env_provider())
            .extract()
            .map_err(Box::new)
    }

    fn find_workspace_config() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        for ancestor in current.ancestors() {
            let config_dir = ancestor.join(CONFIG_DIR);
            if config_dir.is_dir() {
                return Some(config_dir.join(CONFIG_FILE));
            }
        }

        None
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        let parent = path.as_ref().parent().ok_or("Invalid path")?;
        std::fs::create_dir_all(parent)?;

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }

    /// Writes the default settings to `.simsearch/settings.toml`.
    pub fn init_config_file(force: bool) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let config_path = PathBuf::from(CONFIG_DIR).join(CONFIG_FILE);

        if !force && config_path.exists() {
            return Err("Configuration file already exists. Use --force to overwrite".into());
        }

        Settings::default().save(&config_path)?;
        Ok(config_path)
    }

    /// Rejects values no index could run with.
    pub fn validate(&self) -> IndexResult<()> {
        let invalid = |reason: String| Err(IndexError::ConfigError { reason });

        if self.chunking.chunk_size == 0 {
            return invalid("chunking.chunk_size must be at least 1".to_string());
        }
        if self.chunking.overlap >= self.chunking.chunk_size {
            return invalid(format!(
                "chunking.overlap ({}) must be smaller than chunking.chunk_size ({})",
                self.chunking.overlap, self.chunking.chunk_size
            ));
        }
        if self.search.default_limit == 0 {
            return invalid("search.default_limit must be at least 1".to_string());
        }
        if self.embedding.batch_size == 0 {
            return invalid("embedding.batch_size must be at least 1".to_string());
        }
        Ok(())
    }

    pub fn metric(&self) -> Box<dyn DistanceMetric> {
        self.search.metric.build()
    }

    pub fn store(&self) -> Box<dyn VectorStore> {
        self.storage.backend.build(self.storage.materialize_on_load)
    }

    pub fn splitter(&self, tokenizer: Arc<dyn Tokenizer>) -> Box<dyn TextSplitter> {
        build_splitter(
            self.chunking.strategy,
            tokenizer,
            self.chunking.chunk_size,
            self.chunking.overlap,
            &self.chunking.separators,
        )
    }
}
