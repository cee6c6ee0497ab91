//! Configuration management for kbrecall
//!
//! Loads the TOML configuration, applies `KBRECALL_` environment overrides
//! and validates the result before anything is built from it.

use crate::error::{KbError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

mod validator;

pub use validator::ConfigValidator;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub indexing: IndexingConfig,
    pub tokenizer: TokenizerConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub rerank: RerankConfig,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
    #[serde(default = "current_timestamp")]
    pub last_modified: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub model: String,
    pub dimension: usize,
    pub batch_size: usize,
}

/// HNSW vector index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingConfig {
    pub hnsw_ef_construction: usize,
    pub hnsw_m: usize,
    pub hnsw_ef_search: usize,
    pub max_elements: usize,
}

/// Tokenizer used for budget accounting and embedding token cost
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenizerConfig {
    /// Local `tokenizer.json`; takes precedence over `repo`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    /// Hugging Face hub repository to fetch the tokenizer from
    pub repo: String,
}

/// Ranking pipeline constants
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Token budget used when a request does not carry one
    pub default_token_budget: usize,
    /// Upper bound applied to requested token budgets
    pub max_token_budget: usize,
    /// Tokens the last selected chunk may run past the budget
    pub token_overflow: usize,
    /// RRF constant for per-query ballots and embedding/full-text fusion
    pub recall_rrf_k: f64,
    /// RRF constant for the rerank ballot
    pub rerank_rrf_k: f64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_token_budget: 1500,
            max_token_budget: 20000,
            token_overflow: 500,
            recall_rrf_k: 60.0,
            rerank_rrf_k: 58.0,
        }
    }
}

/// Cross-encoder reranking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankConfig {
    pub enabled: bool,
    pub model: String,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            model: "BAAI/bge-reranker-base".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(KbError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| KbError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();

        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| KbError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: KBRECALL_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            if let Some(config_key) = key.strip_prefix("KBRECALL_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "STORAGE__DATA_DIR" => {
                self.storage.data_dir = PathBuf::from(value);
            }
            "EMBEDDING__MODEL" => {
                self.embedding.model = value.to_string();
            }
            "TOKENIZER__REPO" => {
                self.tokenizer.repo = value.to_string();
            }
            "TOKENIZER__FILE" => {
                self.tokenizer.file = Some(PathBuf::from(value));
            }
            "RERANK__ENABLED" => {
                self.rerank.enabled = value.parse().map_err(|_| KbError::InvalidConfigValue {
                    path: path.to_string(),
                    message: format!("Cannot parse '{}' as boolean", value),
                })?;
            }
            "RERANK__MODEL" => {
                self.rerank.model = value.to_string();
            }
            "SEARCH__MAX_TOKEN_BUDGET" => {
                self.search.max_token_budget =
                    value.parse().map_err(|_| KbError::InvalidConfigValue {
                        path: path.to_string(),
                        message: format!("Cannot parse '{}' as integer", value),
                    })?;
            }
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| KbError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("kbrecall").join("config.toml"))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            meta: MetaConfig {
                schema_version: "1.0.0".to_string(),
                created_at: current_timestamp(),
                last_modified: current_timestamp(),
            },
            storage: StorageConfig {
                data_dir: PathBuf::from("~/.kbrecall"),
            },
            embedding: EmbeddingConfig {
                model: "bge-small-en-v1.5".to_string(),
                dimension: 384,
                batch_size: 32,
            },
            indexing: IndexingConfig {
                hnsw_ef_construction: 200,
                hnsw_m: 16,
                hnsw_ef_search: 64,
                max_elements: 100_000,
            },
            tokenizer: TokenizerConfig {
                file: None,
                repo: "BAAI/bge-small-en-v1.5".to_string(),
            },
            search: SearchConfig::default(),
            rerank: RerankConfig::default(),
        }
    }
}
