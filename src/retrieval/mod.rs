//! Retrieval orchestration and ranking
//!
//! Recalls chunks per query variant from the vector store and the lexical
//! index, fuses the ranked lists with Reciprocal Rank Fusion, optionally
//! reranks them with a cross-encoder and trims the result to a token budget.

mod budget;
mod candidate;
mod deduplication;
mod embedding_recall;
mod filter;
mod fusion;
mod lexical_recall;
mod planner;
mod reranker;
mod searcher;
mod visibility;

pub use budget::{truncate_to_budget, TokenBudget};
pub use candidate::{CandidateChunk, CollectionSource, Score, ScoreType};
pub use deduplication::{content_hash, deduplicate_chunks, merge_recall_lists};
pub use embedding_recall::{EmbeddingRecall, EmbeddingRecallOutput};
pub use filter::{apply_score_filter, authoritative_score_type, ScoreFilterOutcome};
pub use fusion::{fuse_ranked_lists, reciprocal_rank_fusion, Ballot, FusedCandidate};
pub use lexical_recall::LexicalRecall;
pub use planner::RecallLimits;
pub use reranker::{
    rerank_candidates, FastEmbedReranker, RerankBackend, RerankDocument, RerankError, RerankHit,
};
pub use search_test::{expand_queries, SearchTestRequest, SearchTestResponse};
pub use searcher::{DatasetSearcher, PipelineState, SearchBackends};
pub use visibility::{resolve_visibility, CollectionVisibilityPolicy};

use serde::{Deserialize, Deserializer, Serialize};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unknown embedding model: {0}")]
    UnknownModel(String),

    #[error("Embedding generation failed: {0}")]
    EmbeddingError(String),

    #[error("Vector search failed: {0}")]
    VectorSearchError(String),

    #[error("Keyword search failed: {0}")]
    KeywordSearchError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Token counting failed: {0}")]
    TokenizerError(String),
}

/// Which recall sources a search uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum SearchMode {
    #[default]
    #[serde(rename = "embedding")]
    EmbeddingOnly,
    #[serde(rename = "fullTextRecall")]
    FullTextOnly,
    #[serde(rename = "mixedRecall")]
    Hybrid,
}

impl SearchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMode::EmbeddingOnly => "embedding",
            SearchMode::FullTextOnly => "fullTextRecall",
            SearchMode::Hybrid => "mixedRecall",
        }
    }

    /// Unknown or missing modes fall back to embedding-only search.
    pub fn parse_lenient(value: Option<&str>) -> Self {
        value
            .and_then(|v| v.parse().ok())
            .unwrap_or(SearchMode::EmbeddingOnly)
    }
}

impl FromStr for SearchMode {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "embedding" => Ok(SearchMode::EmbeddingOnly),
            "fullTextRecall" => Ok(SearchMode::FullTextOnly),
            "mixedRecall" => Ok(SearchMode::Hybrid),
            other => Err(SearchError::InvalidRequest(format!(
                "unknown search mode: {}",
                other
            ))),
        }
    }
}

impl<'de> Deserialize<'de> for SearchMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = serde_json::Value::deserialize(deserializer)?;
        Ok(SearchMode::parse_lenient(raw.as_str()))
    }
}

/// One search invocation over a set of datasets
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub team_id: String,

    /// Embedding model identifier
    pub model: String,

    /// Minimum similarity for the authoritative score type
    #[serde(default)]
    pub similarity: f64,

    /// Token budget for the returned chunks
    pub limit: usize,

    pub dataset_ids: Vec<String>,

    #[serde(default)]
    pub search_mode: SearchMode,

    #[serde(default, rename = "usingReRank")]
    pub using_rerank: bool,

    #[serde(default, rename = "reRankQuery")]
    pub rerank_query: String,

    /// Query variants, recalled independently and fused
    pub queries: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_tag: Option<String>,
}

impl SearchRequest {
    pub fn new(
        team_id: impl Into<String>,
        model: impl Into<String>,
        dataset_ids: Vec<String>,
        queries: Vec<String>,
    ) -> Self {
        let rerank_query = queries.first().cloned().unwrap_or_default();
        Self {
            team_id: team_id.into(),
            model: model.into(),
            similarity: 0.0,
            limit: 1500,
            dataset_ids,
            search_mode: SearchMode::EmbeddingOnly,
            using_rerank: false,
            rerank_query,
            queries,
            file_tag: None,
        }
    }

    /// Reject requests the pipeline cannot run
    pub fn validate(&self) -> Result<(), SearchError> {
        if self.team_id.trim().is_empty() {
            return Err(SearchError::InvalidRequest("teamId is required".to_string()));
        }
        if self.dataset_ids.is_empty() {
            return Err(SearchError::InvalidRequest(
                "datasetIds cannot be empty".to_string(),
            ));
        }
        if self.queries.iter().all(|q| q.trim().is_empty()) {
            return Err(SearchError::InvalidRequest(
                "queries cannot be empty".to_string(),
            ));
        }
        if !self.similarity.is_finite() || self.similarity < 0.0 {
            return Err(SearchError::InvalidRequest(format!(
                "similarity must be >= 0, got {}",
                self.similarity
            )));
        }
        if self.limit == 0 {
            return Err(SearchError::InvalidRequest(
                "limit must be a positive token budget".to_string(),
            ));
        }
        Ok(())
    }
}

/// Ranked, deduplicated and budget-trimmed chunks plus the effective settings
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub search_results: Vec<CandidateChunk>,

    /// Embedding tokens consumed across all query variants
    pub tokens: usize,

    pub search_mode: SearchMode,

    pub limit: usize,

    pub similarity: f64,

    #[serde(rename = "usingReRank")]
    pub using_rerank: bool,

    pub using_similarity_filter: bool,
}
