/// Token counting for budget enforcement and embedding cost
use std::path::Path;
use thiserror::Error;
use tokenizers::Tokenizer;

#[derive(Error, Debug)]
pub enum TokenizerError {
    #[error("Tokenizer load failed: {0}")]
    LoadError(String),

    #[error("Encoding failed: {0}")]
    EncodeError(String),
}

/// Counts model tokens in a piece of text
pub trait TokenCounter: Send + Sync {
    fn count_tokens(&self, text: &str) -> Result<usize, TokenizerError>;
}

/// HuggingFace tokenizer backed counter
pub struct HfTokenizer {
    inner: Tokenizer,
}

impl HfTokenizer {
    /// Load a `tokenizer.json` from disk
    pub fn from_file(path: &Path) -> Result<Self, TokenizerError> {
        let inner = Tokenizer::from_file(path)
            .map_err(|e| TokenizerError::LoadError(format!("{}: {}", path.display(), e)))?;
        Ok(Self { inner })
    }

    /// Fetch the tokenizer of a hub repository (cached by `hf-hub`)
    pub fn from_pretrained(repo: &str) -> Result<Self, TokenizerError> {
        tracing::info!("Loading tokenizer from {}", repo);
        let inner = Tokenizer::from_pretrained(repo, None)
            .map_err(|e| TokenizerError::LoadError(format!("{}: {}", repo, e)))?;
        Ok(Self { inner })
    }

    pub fn from_tokenizer(inner: Tokenizer) -> Self {
        Self { inner }
    }
}

impl TokenCounter for HfTokenizer {
    fn count_tokens(&self, text: &str) -> Result<usize, TokenizerError> {
        if text.is_empty() {
            return Ok(0);
        }

        let encoding = self
            .inner
            .encode(text, false)
            .map_err(|e| TokenizerError::EncodeError(e.to_string()))?;

        Ok(encoding.get_ids().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use tempfile::TempDir;

    const WORD_LEVEL: &str = r#"{
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [],
        "normalizer": null,
        "pre_tokenizer": { "type": "Whitespace" },
        "post_processor": null,
        "decoder": null,
        "model": {
            "type": "WordLevel",
            "vocab": { "[UNK]": 0, "reset": 1, "the": 2, "router": 3 },
            "unk_token": "[UNK]"
        }
    }"#;

    #[test]
    fn test_count_word_level() {
        let tokenizer = HfTokenizer::from_tokenizer(Tokenizer::from_str(WORD_LEVEL).unwrap());

        assert_eq!(tokenizer.count_tokens("reset the router").unwrap(), 3);
        assert_eq!(tokenizer.count_tokens("reset the unknown router").unwrap(), 4);
        assert_eq!(tokenizer.count_tokens("").unwrap(), 0);
    }

    #[test]
    fn test_load_from_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("tokenizer.json");
        std::fs::write(&path, WORD_LEVEL).unwrap();

        let tokenizer = HfTokenizer::from_file(&path).unwrap();
        assert_eq!(tokenizer.count_tokens("the router").unwrap(), 2);
    }

    #[test]
    fn test_missing_file() {
        let temp = TempDir::new().unwrap();
        let result = HfTokenizer::from_file(&temp.path().join("missing.json"));
        assert!(matches!(result, Err(TokenizerError::LoadError(_))));
    }
}
