//! Dataset search combining embedding and full-text recall

use super::{
    apply_score_filter, deduplicate_chunks, fuse_ranked_lists, merge_recall_lists,
    rerank_candidates, resolve_visibility, truncate_to_budget, Ballot, CandidateChunk,
    CollectionVisibilityPolicy, EmbeddingRecall, EmbeddingRecallOutput, LexicalRecall,
    RecallLimits, RerankBackend, SearchError, SearchMode, SearchRequest, SearchResult,
    TokenBudget,
};
use crate::config::SearchConfig;
use crate::embedding::{EmbeddingModels, LexicalEngine, TokenCounter, VectorStore};
use crate::storage::{ChunkStore, CollectionStore};
use futures::future::try_join_all;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Collaborators the pipeline reads from
#[derive(Clone)]
pub struct SearchBackends {
    pub embedding_models: EmbeddingModels,
    pub vector_store: Arc<dyn VectorStore>,
    pub lexical_engine: Arc<dyn LexicalEngine>,
    pub chunk_store: Arc<dyn ChunkStore>,
    pub collection_store: Arc<dyn CollectionStore>,
    pub reranker: Option<Arc<dyn RerankBackend>>,
    pub tokenizer: Arc<dyn TokenCounter>,
}

/// Settings that may change while a request moves through the pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineState {
    pub search_mode: SearchMode,
    /// Cleared when reranking fails
    pub using_rerank: bool,
    pub using_similarity_filter: bool,
    /// Embedding tokens billed so far
    pub tokens: usize,
}

/// Recall output of one query variant
struct VariantRecall {
    embedding: EmbeddingRecallOutput,
    full_text: Vec<CandidateChunk>,
}

/// Searches datasets with multi-query recall, RRF fusion, optional
/// reranking and token-budget truncation
pub struct DatasetSearcher {
    backends: SearchBackends,
    config: SearchConfig,
}

impl DatasetSearcher {
    pub fn new(backends: SearchBackends, config: SearchConfig) -> Self {
        Self { backends, config }
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub fn default_model(&self) -> &str {
        self.backends.embedding_models.default_model()
    }

    pub fn has_reranker(&self) -> bool {
        self.backends.reranker.is_some()
    }

    /// Run the full ranking pipeline for one request
    pub async fn search(&self, request: &SearchRequest) -> Result<SearchResult, SearchError> {
        request.validate()?;

        let provider = self.backends.embedding_models.get(&request.model)?;

        let mut state = PipelineState {
            search_mode: request.search_mode,
            using_rerank: request.using_rerank && self.has_reranker(),
            using_similarity_filter: false,
            tokens: 0,
        };

        let limits = RecallLimits::for_mode(state.search_mode);

        let policy = resolve_visibility(
            self.backends.collection_store.as_ref(),
            &request.team_id,
            &request.dataset_ids,
            request.file_tag.as_deref(),
        )
        .await?;

        let embedding_recall = EmbeddingRecall::new(
            provider,
            Arc::clone(&self.backends.vector_store),
            Arc::clone(&self.backends.chunk_store),
        );
        let lexical_recall = LexicalRecall::new(
            Arc::clone(&self.backends.lexical_engine),
            Arc::clone(&self.backends.chunk_store),
        );

        let queries: Vec<&str> = request
            .queries
            .iter()
            .map(|q| q.trim())
            .filter(|q| !q.is_empty())
            .collect();

        // Step 1: Recall every variant, both sources concurrently
        let recalls = try_join_all(queries.iter().map(|query| {
            self.recall_variant(
                &embedding_recall,
                &lexical_recall,
                request,
                query,
                limits,
                &policy,
            )
        }))
        .await?;

        // Step 2: Fuse variants per source
        let mut embedding_ballots = Vec::with_capacity(recalls.len());
        let mut full_text_ballots = Vec::with_capacity(recalls.len());
        for recall in recalls {
            state.tokens += recall.embedding.tokens;
            embedding_ballots.push(Ballot::new(self.config.recall_rrf_k, recall.embedding.chunks));
            full_text_ballots.push(Ballot::new(self.config.recall_rrf_k, recall.full_text));
        }

        let mut embedding_results = fuse_ranked_lists(embedding_ballots);
        embedding_results.truncate(limits.embedding);
        let mut full_text_results = fuse_ranked_lists(full_text_ballots);
        full_text_results.truncate(limits.full_text);

        debug!(
            "Fused {} queries: {} embedding, {} full-text candidates",
            queries.len(),
            embedding_results.len(),
            full_text_results.len()
        );

        // Step 3: Rerank the deduplicated union
        let rerank_results = if state.using_rerank {
            self.rerank(&request.rerank_query, &embedding_results, &full_text_results, &mut state)
                .await
        } else {
            Vec::new()
        };

        // Step 4: Fuse sources and deduplicate
        let fused = fuse_ranked_lists(vec![
            Ballot::new(self.config.recall_rrf_k, embedding_results),
            Ballot::new(self.config.recall_rrf_k, full_text_results),
            Ballot::new(self.config.rerank_rrf_k, rerank_results),
        ]);
        let deduped = deduplicate_chunks(fused);

        // Step 5: Similarity threshold
        let fallback = deduped.first().cloned();
        let filtered = apply_score_filter(
            deduped,
            request.similarity,
            state.search_mode,
            state.using_rerank,
        );
        state.using_similarity_filter = filtered.used;

        // Step 6: Token budget
        let budget = TokenBudget::new(request.limit).with_overflow(self.config.token_overflow);
        let search_results = truncate_to_budget(
            filtered.chunks,
            fallback,
            self.backends.tokenizer.as_ref(),
            budget,
        )
        .map_err(|e| SearchError::TokenizerError(e.to_string()))?;

        info!(
            "Search returned {} chunks (mode {}, rerank {}, {} tokens)",
            search_results.len(),
            state.search_mode.as_str(),
            state.using_rerank,
            state.tokens
        );

        Ok(SearchResult {
            search_results,
            tokens: state.tokens,
            search_mode: state.search_mode,
            limit: request.limit,
            similarity: request.similarity,
            using_rerank: state.using_rerank,
            using_similarity_filter: state.using_similarity_filter,
        })
    }

    async fn recall_variant(
        &self,
        embedding_recall: &EmbeddingRecall,
        lexical_recall: &LexicalRecall,
        request: &SearchRequest,
        query: &str,
        limits: RecallLimits,
        policy: &CollectionVisibilityPolicy,
    ) -> Result<VariantRecall, SearchError> {
        let (embedding, full_text) = tokio::try_join!(
            embedding_recall.recall(
                &request.team_id,
                &request.dataset_ids,
                query,
                limits.embedding,
                policy
            ),
            lexical_recall.recall(
                &request.team_id,
                &request.dataset_ids,
                query,
                limits.full_text,
                policy
            )
        )?;

        Ok(VariantRecall {
            embedding,
            full_text,
        })
    }

    /// Rerank the deduplicated recall union; failures disable reranking
    async fn rerank(
        &self,
        query: &str,
        embedding_results: &[CandidateChunk],
        full_text_results: &[CandidateChunk],
        state: &mut PipelineState,
    ) -> Vec<CandidateChunk> {
        let Some(reranker) = self.backends.reranker.as_ref() else {
            state.using_rerank = false;
            return Vec::new();
        };

        let candidates =
            deduplicate_chunks(merge_recall_lists(embedding_results, full_text_results));

        match rerank_candidates(reranker.as_ref(), query, &candidates).await {
            Ok(results) => results,
            Err(e) => {
                warn!("Rerank failed, continuing without it: {}", e);
                state.using_rerank = false;
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{
        EmbeddingError, EmbeddingProvider, KeywordIndexError, LexicalHit, QueryEmbedding,
        TokenizerError, VectorHit, VectorIndexError,
    };
    use crate::error::{KbError, Result as KbResult};
    use crate::retrieval::{RerankDocument, RerankError, RerankHit, ScoreType};
    use crate::storage::{ChunkRecord, CollectionRecord};
    use async_trait::async_trait;

    struct StaticProvider;

    #[async_trait]
    impl EmbeddingProvider for StaticProvider {
        async fn embed(&self, _text: &str) -> Result<QueryEmbedding, EmbeddingError> {
            Ok(QueryEmbedding {
                vector: vec![1.0],
                tokens: 3,
            })
        }

        fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(texts.iter().map(|_| vec![1.0]).collect())
        }

        fn dimension(&self) -> usize {
            1
        }

        fn model_name(&self) -> &str {
            "static"
        }
    }

    struct Vectors;

    #[async_trait]
    impl VectorStore for Vectors {
        async fn search(
            &self,
            _team_id: &str,
            _vector: &[f32],
            _limit: usize,
            _policy: &CollectionVisibilityPolicy,
            _dataset_ids: &[String],
        ) -> Result<Vec<VectorHit>, VectorIndexError> {
            Ok(vec![
                VectorHit {
                    index_id: "a".to_string(),
                    collection_id: "col".to_string(),
                    score: 0.9,
                },
                VectorHit {
                    index_id: "b".to_string(),
                    collection_id: "col".to_string(),
                    score: 0.4,
                },
            ])
        }
    }

    struct NoText;

    #[async_trait]
    impl LexicalEngine for NoText {
        async fn search(
            &self,
            _team_id: &str,
            _dataset_id: &str,
            _text: &str,
            _limit: usize,
            _policy: &CollectionVisibilityPolicy,
        ) -> Result<Vec<LexicalHit>, KeywordIndexError> {
            Ok(Vec::new())
        }
    }

    struct Store;

    fn record(id: &str) -> ChunkRecord {
        ChunkRecord {
            id: id.to_string(),
            team_id: "team".to_string(),
            dataset_id: "ds".to_string(),
            collection_id: "col".to_string(),
            q: format!("question {}", id),
            a: String::new(),
            chunk_index: 0,
            index_ids: vec![id.to_string()],
            collection: Some(CollectionRecord {
                id: "col".to_string(),
                team_id: "team".to_string(),
                dataset_id: "ds".to_string(),
                name: "doc.md".to_string(),
                file_id: None,
                raw_link: None,
                external_file_id: None,
                external_file_url: None,
                forbid: false,
                file_tag: None,
            }),
        }
    }

    #[async_trait]
    impl ChunkStore for Store {
        async fn fetch_by_index_ids(
            &self,
            _team_id: &str,
            _dataset_ids: &[String],
            _collection_ids: &[String],
            index_ids: &[String],
        ) -> KbResult<Vec<ChunkRecord>> {
            Ok(index_ids.iter().map(|id| record(id)).collect())
        }

        async fn fetch_by_ids(&self, _team_id: &str, ids: &[String]) -> KbResult<Vec<ChunkRecord>> {
            Ok(ids.iter().map(|id| record(id)).collect())
        }
    }

    #[async_trait]
    impl CollectionStore for Store {
        async fn tagged_collections(
            &self,
            _team_id: &str,
            _dataset_ids: &[String],
            _tag: &str,
        ) -> KbResult<Vec<String>> {
            Ok(Vec::new())
        }

        async fn forbidden_collections(
            &self,
            _team_id: &str,
            _dataset_ids: &[String],
        ) -> KbResult<Vec<String>> {
            Ok(Vec::new())
        }
    }

    struct Failing;

    #[async_trait]
    impl RerankBackend for Failing {
        async fn rerank(
            &self,
            _query: &str,
            _documents: &[RerankDocument],
        ) -> Result<Vec<RerankHit>, RerankError> {
            Err(RerankError::RerankingError("service unavailable".to_string()))
        }
    }

    struct Words;

    impl TokenCounter for Words {
        fn count_tokens(&self, text: &str) -> Result<usize, TokenizerError> {
            Ok(text.split_whitespace().count())
        }
    }

    /// Every backend call fails
    struct Broken;

    #[async_trait]
    impl EmbeddingProvider for Broken {
        async fn embed(&self, _text: &str) -> Result<QueryEmbedding, EmbeddingError> {
            Err(EmbeddingError::GenerationError("model crashed".to_string()))
        }

        fn embed_documents(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Err(EmbeddingError::GenerationError("model crashed".to_string()))
        }

        fn dimension(&self) -> usize {
            1
        }

        fn model_name(&self) -> &str {
            "static"
        }
    }

    #[async_trait]
    impl VectorStore for Broken {
        async fn search(
            &self,
            _team_id: &str,
            _vector: &[f32],
            _limit: usize,
            _policy: &CollectionVisibilityPolicy,
            _dataset_ids: &[String],
        ) -> Result<Vec<VectorHit>, VectorIndexError> {
            Err(VectorIndexError::SearchError("graph unavailable".to_string()))
        }
    }

    #[async_trait]
    impl ChunkStore for Broken {
        async fn fetch_by_index_ids(
            &self,
            _team_id: &str,
            _dataset_ids: &[String],
            _collection_ids: &[String],
            _index_ids: &[String],
        ) -> KbResult<Vec<ChunkRecord>> {
            Err(KbError::Index("chunk table locked".to_string()))
        }

        async fn fetch_by_ids(
            &self,
            _team_id: &str,
            _ids: &[String],
        ) -> KbResult<Vec<ChunkRecord>> {
            Err(KbError::Index("chunk table locked".to_string()))
        }
    }

    #[async_trait]
    impl CollectionStore for Broken {
        async fn tagged_collections(
            &self,
            _team_id: &str,
            _dataset_ids: &[String],
            _tag: &str,
        ) -> KbResult<Vec<String>> {
            Err(KbError::Index("collection table locked".to_string()))
        }

        async fn forbidden_collections(
            &self,
            _team_id: &str,
            _dataset_ids: &[String],
        ) -> KbResult<Vec<String>> {
            Err(KbError::Index("collection table locked".to_string()))
        }
    }

    impl TokenCounter for Broken {
        fn count_tokens(&self, _text: &str) -> Result<usize, TokenizerError> {
            Err(TokenizerError::EncodeError("vocabulary missing".to_string()))
        }
    }

    fn backends(reranker: Option<Arc<dyn RerankBackend>>) -> SearchBackends {
        SearchBackends {
            embedding_models: EmbeddingModels::new(Arc::new(StaticProvider)),
            vector_store: Arc::new(Vectors),
            lexical_engine: Arc::new(NoText),
            chunk_store: Arc::new(Store),
            collection_store: Arc::new(Store),
            reranker,
            tokenizer: Arc::new(Words),
        }
    }

    fn searcher(reranker: Option<Arc<dyn RerankBackend>>) -> DatasetSearcher {
        DatasetSearcher::new(backends(reranker), SearchConfig::default())
    }

    fn request() -> SearchRequest {
        SearchRequest::new("team", "static", vec!["ds".to_string()], vec!["q".to_string()])
    }

    #[tokio::test]
    async fn test_embedding_search() {
        let result = searcher(None).search(&request()).await.unwrap();

        let ids: Vec<&str> = result.search_results.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(result.tokens, 3);
        assert!(result.using_similarity_filter);
        assert!(!result.using_rerank);
    }

    #[tokio::test]
    async fn test_threshold_falls_back_to_top_candidate() {
        let mut request = request();
        request.similarity = 0.95;

        let result = searcher(None).search(&request).await.unwrap();
        assert_eq!(result.search_results.len(), 1);
        assert_eq!(result.search_results[0].id, "a");
    }

    #[tokio::test]
    async fn test_rerank_forced_off_without_backend() {
        let mut request = request();
        request.using_rerank = true;

        let result = searcher(None).search(&request).await.unwrap();
        assert!(!result.using_rerank);
    }

    #[tokio::test]
    async fn test_rerank_failure_degrades() {
        let mut request = request();
        request.using_rerank = true;
        request.similarity = 0.5;

        let result = searcher(Some(Arc::new(Failing))).search(&request).await.unwrap();
        assert!(!result.using_rerank);
        let ids: Vec<&str> = result.search_results.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a"]);
        assert!(result.search_results[0]
            .score_of(ScoreType::Rerank)
            .is_none());
    }

    #[tokio::test]
    async fn test_unknown_model() {
        let mut request = request();
        request.model = "missing".to_string();

        let result = searcher(None).search(&request).await;
        assert!(matches!(result, Err(SearchError::UnknownModel(_))));
    }

    #[tokio::test]
    async fn test_embedding_failure_is_fatal() {
        let mut backends = backends(None);
        backends.embedding_models = EmbeddingModels::new(Arc::new(Broken));

        let result = DatasetSearcher::new(backends, SearchConfig::default())
            .search(&request())
            .await;
        assert!(matches!(result, Err(SearchError::EmbeddingError(_))));
    }

    #[tokio::test]
    async fn test_vector_store_failure_is_fatal() {
        let mut backends = backends(None);
        backends.vector_store = Arc::new(Broken);

        let result = DatasetSearcher::new(backends, SearchConfig::default())
            .search(&request())
            .await;
        assert!(matches!(result, Err(SearchError::VectorSearchError(_))));
    }

    #[tokio::test]
    async fn test_chunk_store_failure_is_fatal() {
        let mut backends = backends(None);
        backends.chunk_store = Arc::new(Broken);

        let result = DatasetSearcher::new(backends, SearchConfig::default())
            .search(&request())
            .await;
        assert!(matches!(result, Err(SearchError::DatabaseError(_))));
    }

    #[tokio::test]
    async fn test_collection_store_failure_is_fatal() {
        let mut backends = backends(None);
        backends.collection_store = Arc::new(Broken);

        let result = DatasetSearcher::new(backends, SearchConfig::default())
            .search(&request())
            .await;
        assert!(matches!(result, Err(SearchError::DatabaseError(_))));
    }

    #[tokio::test]
    async fn test_tokenizer_failure_is_fatal() {
        let mut backends = backends(None);
        backends.tokenizer = Arc::new(Broken);

        let result = DatasetSearcher::new(backends, SearchConfig::default())
            .search(&request())
            .await;
        assert!(matches!(result, Err(SearchError::TokenizerError(_))));
    }
}
