mod batch;
mod keyword_index;
/// Embedding, indexing and tokenization collaborators
///
/// - EmbeddingProvider trait with a FastEmbed implementation
/// - HNSW vector store filtered by team, dataset and collection visibility
/// - Tantivy lexical engine with the same filters as query clauses
/// - HuggingFace tokenizer for token counting
/// - Batch import into all of the above
mod provider;
mod tokenizer;
mod vector_index;

pub use batch::{BatchProcessor, BatchResult, ImportChunk, ImportCollection};
pub use keyword_index::{
    KeywordDocument, KeywordIndex, KeywordIndexError, LexicalEngine, LexicalHit,
};
pub use provider::{EmbeddingError, EmbeddingProvider, FastEmbedProvider, QueryEmbedding};
pub use tokenizer::{HfTokenizer, TokenCounter, TokenizerError};
pub use vector_index::{
    HnswParams, PointMeta, VectorHit, VectorIndex, VectorIndexError, VectorStore,
};

use crate::retrieval::SearchError;
use std::collections::HashMap;
use std::sync::Arc;

/// Embedding providers addressable by model identifier
#[derive(Clone)]
pub struct EmbeddingModels {
    providers: HashMap<String, Arc<dyn EmbeddingProvider>>,
    default_model: String,
}

impl EmbeddingModels {
    pub fn new(default: Arc<dyn EmbeddingProvider>) -> Self {
        let default_model = default.model_name().to_string();
        let mut providers: HashMap<String, Arc<dyn EmbeddingProvider>> = HashMap::new();
        providers.insert(default_model.clone(), default);

        Self {
            providers,
            default_model,
        }
    }

    pub fn register(&mut self, provider: Arc<dyn EmbeddingProvider>) {
        self.providers
            .insert(provider.model_name().to_string(), provider);
    }

    pub fn get(&self, model: &str) -> Result<Arc<dyn EmbeddingProvider>, SearchError> {
        self.providers
            .get(model)
            .cloned()
            .ok_or_else(|| SearchError::UnknownModel(model.to_string()))
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }
}
