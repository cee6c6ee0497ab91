//! Dense vector recall for one query variant

use super::{CandidateChunk, CollectionVisibilityPolicy, Score, ScoreType, SearchError};
use crate::embedding::{EmbeddingProvider, VectorStore};
use crate::storage::ChunkStore;
use ahash::AHashMap;
use std::sync::Arc;

/// Ranked embedding hits plus the tokens spent embedding the query
#[derive(Debug, Clone, Default)]
pub struct EmbeddingRecallOutput {
    pub chunks: Vec<CandidateChunk>,
    pub tokens: usize,
}

pub struct EmbeddingRecall {
    provider: Arc<dyn EmbeddingProvider>,
    vector_store: Arc<dyn VectorStore>,
    chunk_store: Arc<dyn ChunkStore>,
}

impl EmbeddingRecall {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        vector_store: Arc<dyn VectorStore>,
        chunk_store: Arc<dyn ChunkStore>,
    ) -> Self {
        Self {
            provider,
            vector_store,
            chunk_store,
        }
    }

    /// Embed `query`, search the vector store and hydrate the hits
    ///
    /// A chunk's score is its best-scoring index; chunks whose collection
    /// no longer resolves are dropped.
    pub async fn recall(
        &self,
        team_id: &str,
        dataset_ids: &[String],
        query: &str,
        limit: usize,
        policy: &CollectionVisibilityPolicy,
    ) -> Result<EmbeddingRecallOutput, SearchError> {
        if limit == 0 {
            return Ok(EmbeddingRecallOutput::default());
        }

        let embedding = self
            .provider
            .embed(query)
            .await
            .map_err(|e| SearchError::EmbeddingError(e.to_string()))?;

        let hits = self
            .vector_store
            .search(team_id, &embedding.vector, limit, policy, dataset_ids)
            .await
            .map_err(|e| SearchError::VectorSearchError(e.to_string()))?;

        if hits.is_empty() {
            return Ok(EmbeddingRecallOutput {
                chunks: Vec::new(),
                tokens: embedding.tokens,
            });
        }

        let mut best: AHashMap<&str, f64> = AHashMap::new();
        let mut collection_ids: Vec<String> = Vec::new();
        for hit in &hits {
            let score = best.entry(hit.index_id.as_str()).or_insert(hit.score);
            *score = score.max(hit.score);
            if !collection_ids.contains(&hit.collection_id) {
                collection_ids.push(hit.collection_id.clone());
            }
        }
        let index_ids: Vec<String> = hits.iter().map(|h| h.index_id.clone()).collect();

        let records = self
            .chunk_store
            .fetch_by_index_ids(team_id, dataset_ids, &collection_ids, &index_ids)
            .await
            .map_err(|e| SearchError::DatabaseError(format!("Failed to load chunks: {}", e)))?;

        let mut chunks: Vec<CandidateChunk> = Vec::with_capacity(records.len());
        for record in records {
            let score = record
                .index_ids
                .iter()
                .filter_map(|id| best.get(id.as_str()).copied())
                .reduce(f64::max)
                .unwrap_or(0.0);

            let chunk_id = record.id.clone();
            let collection_id = record.collection_id.clone();
            match CandidateChunk::from_record(record, Score::new(ScoreType::Embedding, score, 0)) {
                Some(chunk) => chunks.push(chunk),
                None => tracing::warn!(
                    "Collection {} not found for chunk {}, skipping",
                    collection_id,
                    chunk_id
                ),
            }
        }

        sort_and_rank(&mut chunks, ScoreType::Embedding);

        tracing::debug!(
            "Embedding recall: {} hits, {} chunks for '{}'",
            hits.len(),
            chunks.len(),
            query
        );

        Ok(EmbeddingRecallOutput {
            chunks,
            tokens: embedding.tokens,
        })
    }
}

/// Sort descending by the given score and record each 0-based position
pub(super) fn sort_and_rank(chunks: &mut [CandidateChunk], score_type: ScoreType) {
    chunks.sort_by(|a, b| {
        let a = a.score_of(score_type).unwrap_or(0.0);
        let b = b.score_of(score_type).unwrap_or(0.0);
        b.partial_cmp(&a).unwrap_or(std::cmp::Ordering::Equal)
    });

    for (position, chunk) in chunks.iter_mut().enumerate() {
        if let Some(score) = chunk.scores.iter_mut().find(|s| s.score_type == score_type) {
            score.index = position;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{EmbeddingError, QueryEmbedding, VectorHit, VectorIndexError};
    use crate::error::Result;
    use crate::storage::{ChunkRecord, CollectionRecord};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for CountingProvider {
        async fn embed(&self, text: &str) -> std::result::Result<QueryEmbedding, EmbeddingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(QueryEmbedding {
                vector: vec![1.0, 0.0],
                tokens: text.len(),
            })
        }

        fn embed_documents(
            &self,
            texts: &[String],
        ) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }

        fn dimension(&self) -> usize {
            2
        }

        fn model_name(&self) -> &str {
            "counting"
        }
    }

    struct FixedHits(Vec<VectorHit>);

    #[async_trait]
    impl VectorStore for FixedHits {
        async fn search(
            &self,
            _team_id: &str,
            _vector: &[f32],
            limit: usize,
            _policy: &CollectionVisibilityPolicy,
            _dataset_ids: &[String],
        ) -> std::result::Result<Vec<VectorHit>, VectorIndexError> {
            Ok(self.0.iter().take(limit).cloned().collect())
        }
    }

    struct FixedChunks(Vec<ChunkRecord>);

    #[async_trait]
    impl ChunkStore for FixedChunks {
        async fn fetch_by_index_ids(
            &self,
            _team_id: &str,
            _dataset_ids: &[String],
            _collection_ids: &[String],
            index_ids: &[String],
        ) -> Result<Vec<ChunkRecord>> {
            Ok(self
                .0
                .iter()
                .filter(|r| r.index_ids.iter().any(|i| index_ids.contains(i)))
                .cloned()
                .collect())
        }

        async fn fetch_by_ids(&self, _team_id: &str, ids: &[String]) -> Result<Vec<ChunkRecord>> {
            Ok(self.0.iter().filter(|r| ids.contains(&r.id)).cloned().collect())
        }
    }

    fn record(id: &str, index_ids: &[&str], with_collection: bool) -> ChunkRecord {
        ChunkRecord {
            id: id.to_string(),
            team_id: "team".to_string(),
            dataset_id: "ds".to_string(),
            collection_id: "col".to_string(),
            q: format!("q{}", id),
            a: String::new(),
            chunk_index: 0,
            index_ids: index_ids.iter().map(|s| s.to_string()).collect(),
            collection: with_collection.then(|| CollectionRecord {
                id: "col".to_string(),
                team_id: "team".to_string(),
                dataset_id: "ds".to_string(),
                name: "doc.md".to_string(),
                file_id: None,
                raw_link: Some("https://example.com/doc".to_string()),
                external_file_id: None,
                external_file_url: None,
                forbid: false,
                file_tag: None,
            }),
        }
    }

    fn hit(index_id: &str, score: f64) -> VectorHit {
        VectorHit {
            index_id: index_id.to_string(),
            collection_id: "col".to_string(),
            score,
        }
    }

    fn recall(
        hits: Vec<VectorHit>,
        records: Vec<ChunkRecord>,
    ) -> (EmbeddingRecall, Arc<CountingProvider>) {
        let provider = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
        });
        let recall = EmbeddingRecall::new(
            provider.clone(),
            Arc::new(FixedHits(hits)),
            Arc::new(FixedChunks(records)),
        );
        (recall, provider)
    }

    fn policy() -> CollectionVisibilityPolicy {
        CollectionVisibilityPolicy::ForbidList(vec![])
    }

    #[tokio::test]
    async fn test_best_index_score_and_order() {
        let (recall, _) = recall(
            vec![hit("a-0", 0.5), hit("b-0", 0.8), hit("a-1", 0.9)],
            vec![record("a", &["a-0", "a-1"], true), record("b", &["b-0"], true)],
        );

        let out = recall
            .recall("team", &["ds".to_string()], "reset", 10, &policy())
            .await
            .unwrap();

        assert_eq!(out.tokens, 5);
        let ids: Vec<&str> = out.chunks.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(out.chunks[0].score_of(ScoreType::Embedding), Some(0.9));
        assert_eq!(out.chunks[1].scores[0].index, 1);
        assert_eq!(
            out.chunks[0].source.source_id.as_deref(),
            Some("https://example.com/doc")
        );
    }

    #[tokio::test]
    async fn test_missing_collection_is_skipped() {
        let (recall, _) = recall(
            vec![hit("a-0", 0.9), hit("b-0", 0.8)],
            vec![record("a", &["a-0"], false), record("b", &["b-0"], true)],
        );

        let out = recall
            .recall("team", &["ds".to_string()], "reset", 10, &policy())
            .await
            .unwrap();

        assert_eq!(out.chunks.len(), 1);
        assert_eq!(out.chunks[0].id, "b");
        assert_eq!(out.chunks[0].scores[0].index, 0);
    }

    #[tokio::test]
    async fn test_zero_limit_skips_embedding() {
        let (recall, provider) = recall(vec![hit("a-0", 0.9)], vec![record("a", &["a-0"], true)]);

        let out = recall
            .recall("team", &["ds".to_string()], "reset", 0, &policy())
            .await
            .unwrap();

        assert!(out.chunks.is_empty());
        assert_eq!(out.tokens, 0);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }
}
