//! Cross-encoder reranking using FastEmbed

use super::{CandidateChunk, Score, ScoreType};
use ahash::{AHashMap, AHashSet};
use async_trait::async_trait;
use fastembed::{RerankInitOptions, RerankerModel, TextRerank};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RerankError {
    #[error("Reranker initialization failed: {0}")]
    InitializationError(String),

    #[error("Reranking failed: {0}")]
    RerankingError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Reranker returned no results")]
    EmptyResult,
}

/// Document handed to a rerank backend
#[derive(Debug, Clone, PartialEq)]
pub struct RerankDocument {
    pub id: String,
    pub text: String,
}

/// Backend score for one document
#[derive(Debug, Clone, PartialEq)]
pub struct RerankHit {
    pub id: String,
    pub score: f64,
}

/// Scores documents against a query; hits come back best first
#[async_trait]
pub trait RerankBackend: Send + Sync {
    async fn rerank(
        &self,
        query: &str,
        documents: &[RerankDocument],
    ) -> Result<Vec<RerankHit>, RerankError>;
}

/// Cross-encoder reranker for improving result precision
pub struct FastEmbedReranker {
    model: Arc<TextRerank>,
    model_name: String,
}

impl FastEmbedReranker {
    /// Create a new reranker with specified model
    ///
    /// # Arguments
    /// * `model_name` - Hub id, e.g. "BAAI/bge-reranker-base"
    pub fn new(model_name: &str) -> Result<Self, RerankError> {
        let model = match model_name {
            "BAAI/bge-reranker-base" => RerankerModel::BGERerankerBase,
            "rozgo/bge-reranker-v2-m3" => RerankerModel::BGERerankerV2M3,
            "jinaai/jina-reranker-v1-turbo-en" => RerankerModel::JINARerankerV1TurboEn,
            other => {
                return Err(RerankError::InitializationError(format!(
                    "Unsupported reranker: {}",
                    other
                )))
            }
        };

        tracing::info!("Initializing reranker model: {}", model_name);

        let init_options = RerankInitOptions::new(model).with_show_download_progress(true);

        let model = TextRerank::try_new(init_options)
            .map_err(|e| RerankError::InitializationError(e.to_string()))?;

        Ok(Self {
            model: Arc::new(model),
            model_name: model_name.to_string(),
        })
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }
}

#[async_trait]
impl RerankBackend for FastEmbedReranker {
    async fn rerank(
        &self,
        query: &str,
        documents: &[RerankDocument],
    ) -> Result<Vec<RerankHit>, RerankError> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        if query.is_empty() {
            return Err(RerankError::InvalidInput(
                "Query cannot be empty".to_string(),
            ));
        }

        let model = Arc::clone(&self.model);
        let query = query.to_string();
        let texts: Vec<String> = documents.iter().map(|d| d.text.clone()).collect();

        let results = tokio::task::spawn_blocking(move || {
            let texts: Vec<&str> = texts.iter().map(String::as_str).collect();
            model.rerank(query.as_str(), texts, false, None)
        })
        .await
        .map_err(|e| RerankError::RerankingError(e.to_string()))?
        .map_err(|e| RerankError::RerankingError(e.to_string()))?;

        let mut hits: Vec<RerankHit> = results
            .into_iter()
            .filter_map(|r| {
                documents.get(r.index).map(|d| RerankHit {
                    id: d.id.clone(),
                    score: r.score as f64,
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        Ok(hits)
    }
}

/// Rerank candidates in one backend call
///
/// Returned chunks carry only a Rerank score positioned by the backend's
/// order; candidates the backend omits are dropped. An empty candidate set
/// or an empty response is an error so the caller can fall back.
pub async fn rerank_candidates(
    backend: &dyn RerankBackend,
    query: &str,
    candidates: &[CandidateChunk],
) -> Result<Vec<CandidateChunk>, RerankError> {
    if candidates.is_empty() {
        return Err(RerankError::EmptyResult);
    }

    let documents: Vec<RerankDocument> = candidates
        .iter()
        .map(|c| RerankDocument {
            id: c.id.clone(),
            text: c.rerank_text(),
        })
        .collect();

    let hits = backend.rerank(query, &documents).await?;

    let by_id: AHashMap<&str, &CandidateChunk> =
        candidates.iter().map(|c| (c.id.as_str(), c)).collect();
    let mut seen: AHashSet<&str> = AHashSet::new();

    let reranked: Vec<CandidateChunk> = hits
        .iter()
        .filter(|hit| seen.insert(hit.id.as_str()))
        .filter_map(|hit| by_id.get(hit.id.as_str()).map(|c| (*c, hit.score)))
        .enumerate()
        .map(|(position, (chunk, score))| {
            chunk.with_single_score(Score::new(ScoreType::Rerank, score, position))
        })
        .collect();

    if reranked.is_empty() {
        return Err(RerankError::EmptyResult);
    }

    tracing::debug!("Reranked {} of {} candidates", reranked.len(), candidates.len());
    Ok(reranked)
}
