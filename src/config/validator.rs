use crate::config::Config;
use crate::error::{KbError, Result, ValidationError};

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_storage(config, &mut errors);
        Self::validate_embedding(config, &mut errors);
        Self::validate_indexing(config, &mut errors);
        Self::validate_tokenizer(config, &mut errors);
        Self::validate_search(config, &mut errors);
        Self::validate_rerank(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(KbError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != "1.0.0" {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_storage(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.storage.data_dir.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.data_dir",
                "Data directory cannot be empty",
            ));
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.embedding.batch_size == 0 {
            errors.push(ValidationError::new(
                "embedding.batch_size",
                "Batch size must be greater than 0",
            ));
        }

        if config.embedding.dimension == 0 {
            errors.push(ValidationError::new(
                "embedding.dimension",
                "Embedding dimension must be greater than 0",
            ));
        }

        if config.embedding.model.is_empty() {
            errors.push(ValidationError::new(
                "embedding.model",
                "Model name cannot be empty",
            ));
        }
    }

    fn validate_indexing(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.indexing.hnsw_ef_construction == 0 {
            errors.push(ValidationError::new(
                "indexing.hnsw_ef_construction",
                "HNSW ef_construction must be greater than 0",
            ));
        }

        if config.indexing.hnsw_m == 0 {
            errors.push(ValidationError::new(
                "indexing.hnsw_m",
                "HNSW M must be greater than 0",
            ));
        }

        if config.indexing.hnsw_ef_search == 0 {
            errors.push(ValidationError::new(
                "indexing.hnsw_ef_search",
                "HNSW ef_search must be greater than 0",
            ));
        }

        if config.indexing.max_elements == 0 {
            errors.push(ValidationError::new(
                "indexing.max_elements",
                "Max elements must be greater than 0",
            ));
        }
    }

    fn validate_tokenizer(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.tokenizer.file.is_none() && config.tokenizer.repo.trim().is_empty() {
            errors.push(ValidationError::new(
                "tokenizer.repo",
                "Either tokenizer.file or tokenizer.repo must be set",
            ));
        }
    }

    fn validate_search(config: &Config, errors: &mut Vec<ValidationError>) {
        let search = &config.search;

        if search.default_token_budget == 0 {
            errors.push(ValidationError::new(
                "search.default_token_budget",
                "Default token budget must be greater than 0",
            ));
        }

        if search.max_token_budget < search.default_token_budget {
            errors.push(ValidationError::new(
                "search.max_token_budget",
                format!(
                    "Max token budget ({}) must not be below the default budget ({})",
                    search.max_token_budget, search.default_token_budget
                ),
            ));
        }

        for (path, k) in [
            ("search.recall_rrf_k", search.recall_rrf_k),
            ("search.rerank_rrf_k", search.rerank_rrf_k),
        ] {
            if !k.is_finite() || k < 0.0 {
                errors.push(ValidationError::new(
                    path,
                    format!("RRF constant must be a non-negative number, got {}", k),
                ));
            }
        }
    }

    fn validate_rerank(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.rerank.enabled && config.rerank.model.is_empty() {
            errors.push(ValidationError::new(
                "rerank.model",
                "Rerank model cannot be empty when reranking is enabled",
            ));
        }
    }
}
