//! Full-text recall for one query variant

use super::embedding_recall::sort_and_rank;
use super::{CandidateChunk, CollectionVisibilityPolicy, Score, ScoreType, SearchError};
use crate::embedding::{LexicalEngine, LexicalHit};
use crate::storage::{ChunkRecord, ChunkStore};
use ahash::AHashMap;
use futures::future::try_join_all;
use std::sync::Arc;

pub struct LexicalRecall {
    engine: Arc<dyn LexicalEngine>,
    chunk_store: Arc<dyn ChunkStore>,
}

impl LexicalRecall {
    pub fn new(engine: Arc<dyn LexicalEngine>, chunk_store: Arc<dyn ChunkStore>) -> Self {
        Self {
            engine,
            chunk_store,
        }
    }

    /// Search every dataset concurrently, merge by score and keep the top
    /// `limit` hits
    pub async fn recall(
        &self,
        team_id: &str,
        dataset_ids: &[String],
        query: &str,
        limit: usize,
        policy: &CollectionVisibilityPolicy,
    ) -> Result<Vec<CandidateChunk>, SearchError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let per_dataset = try_join_all(
            dataset_ids
                .iter()
                .map(|dataset_id| self.engine.search(team_id, dataset_id, query, limit, policy)),
        )
        .await
        .map_err(|e| SearchError::KeywordSearchError(e.to_string()))?;

        let mut hits: Vec<LexicalHit> = per_dataset.into_iter().flatten().collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit);

        if hits.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = hits.iter().map(|h| h.chunk_id.clone()).collect();
        let records = self
            .chunk_store
            .fetch_by_ids(team_id, &ids)
            .await
            .map_err(|e| SearchError::DatabaseError(format!("Failed to load chunks: {}", e)))?;

        let mut by_id: AHashMap<String, ChunkRecord> =
            records.into_iter().map(|r| (r.id.clone(), r)).collect();

        let mut chunks = Vec::with_capacity(hits.len());
        for hit in &hits {
            let Some(record) = by_id.remove(&hit.chunk_id) else {
                tracing::debug!("Lexical hit {} has no stored chunk", hit.chunk_id);
                continue;
            };

            let collection_id = record.collection_id.clone();
            let score = Score::new(ScoreType::FullText, hit.score, 0);
            match CandidateChunk::from_record(record, score) {
                Some(chunk) => chunks.push(chunk),
                None => tracing::warn!(
                    "Collection {} not found for chunk {}, skipping",
                    collection_id,
                    hit.chunk_id
                ),
            }
        }

        sort_and_rank(&mut chunks, ScoreType::FullText);

        tracing::debug!(
            "Lexical recall: {} hits across {} datasets, {} chunks",
            hits.len(),
            dataset_ids.len(),
            chunks.len()
        );

        Ok(chunks)
    }
}
