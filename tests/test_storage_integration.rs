use async_trait::async_trait;
use kbrecall::config::SearchConfig;
use kbrecall::embedding::{
    BatchProcessor, EmbeddingError, EmbeddingModels, EmbeddingProvider, HfTokenizer, HnswParams,
    ImportCollection, KeywordIndex, QueryEmbedding, TokenCounter, VectorIndex,
};
use kbrecall::retrieval::{
    DatasetSearcher, SearchBackends, SearchMode, SearchRequest, SearchResult, SearchTestRequest,
};
use kbrecall::storage::StorageManager;
use std::str::FromStr;
use std::sync::Arc;
use tempfile::TempDir;
use tokenizers::Tokenizer;

const VOCAB: [&str; 7] = ["reset", "router", "warranty", "battery", "cable", "button", "lights"];

/// Bag-of-words vectors over a tiny vocabulary plus a constant bias term
struct BagOfWords;

impl BagOfWords {
    fn vectorize(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; VOCAB.len() + 1];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .map(str::to_lowercase)
        {
            if let Some(i) = VOCAB.iter().position(|w| *w == word) {
                v[i] += 1.0;
            }
        }
        v[VOCAB.len()] = 0.1;
        v
    }
}

#[async_trait]
impl EmbeddingProvider for BagOfWords {
    async fn embed(&self, text: &str) -> Result<QueryEmbedding, EmbeddingError> {
        Ok(QueryEmbedding {
            vector: Self::vectorize(text),
            tokens: text.split_whitespace().count(),
        })
    }

    fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|t| Self::vectorize(t)).collect())
    }

    fn dimension(&self) -> usize {
        VOCAB.len() + 1
    }

    fn model_name(&self) -> &str {
        "bag-of-words"
    }
}

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
        "vocab": { "[UNK]": 0, "reset": 1, "router": 2, "warranty": 3 },
        "unk_token": "[UNK]"
    }
}"#;

fn hnsw_params() -> HnswParams {
    HnswParams {
        m: 16,
        ef_construction: 200,
        ef_search: 64,
        max_elements: 1_000,
    }
}

fn import_lines() -> Vec<ImportCollection> {
    let lines = [
        serde_json::json!({
            "id": "manual",
            "teamId": "team",
            "datasetId": "ds",
            "name": "router-manual.pdf",
            "fileId": "file-manual",
            "fileTag": "guide",
            "chunks": [
                {
                    "id": "c1",
                    "q": "How do I reset the router?",
                    "a": "Hold the reset button for ten seconds.",
                    "indexes": ["factory reset router"]
                },
                { "id": "c2", "q": "Router lights blinking", "a": "Check the cable.", "chunkIndex": 1 }
            ]
        }),
        serde_json::json!({
            "id": "faq",
            "teamId": "team",
            "datasetId": "ds",
            "name": "faq.md",
            "chunks": [
                { "id": "c3", "q": "What is the warranty?", "a": "Two years for every battery." }
            ]
        }),
        serde_json::json!({
            "id": "notes",
            "teamId": "team",
            "datasetId": "ds",
            "name": "internal-notes.md",
            "forbid": true,
            "chunks": [
                { "id": "c4", "q": "reset router", "a": "internal escalation notes" }
            ]
        }),
    ];

    lines
        .into_iter()
        .map(|line| serde_json::from_value(line).unwrap())
        .collect()
}

struct Harness {
    _temp: TempDir,
    storage: StorageManager,
    vector_index: Arc<VectorIndex>,
    keyword_index: Arc<KeywordIndex>,
    processor: BatchProcessor,
    searcher: DatasetSearcher,
}

async fn imported() -> Harness {
    let temp = TempDir::new().unwrap();
    let storage = StorageManager::new(temp.path().to_path_buf()).unwrap();

    let provider: Arc<dyn EmbeddingProvider> = Arc::new(BagOfWords);
    let vector_index = Arc::new(VectorIndex::new(provider.dimension(), hnsw_params()));
    let keyword_index = Arc::new(KeywordIndex::new(storage.keyword_index_dir()).unwrap());

    let processor = BatchProcessor::new(
        storage.database.clone(),
        Arc::clone(&provider),
        Arc::clone(&vector_index),
        Arc::clone(&keyword_index),
        2,
    );
    let result = processor.process(import_lines()).await.unwrap();
    assert_eq!(result.collections, 3);
    assert_eq!(result.chunks, 4);
    assert_eq!(result.vectors, 5);
    assert_eq!(result.failed, 0);

    let tokenizer: Arc<dyn TokenCounter> = Arc::new(HfTokenizer::from_tokenizer(
        Tokenizer::from_str(WORD_LEVEL).unwrap(),
    ));
    let database = Arc::new(storage.database.clone());

    let searcher = DatasetSearcher::new(
        SearchBackends {
            embedding_models: EmbeddingModels::new(provider),
            vector_store: vector_index.clone(),
            lexical_engine: keyword_index.clone(),
            chunk_store: database.clone(),
            collection_store: database,
            reranker: None,
            tokenizer,
        },
        SearchConfig::default(),
    );

    Harness {
        _temp: temp,
        storage,
        vector_index,
        keyword_index,
        processor,
        searcher,
    }
}

fn request(query: &str, mode: SearchMode) -> SearchRequest {
    let mut request = SearchRequest::new(
        "team",
        "bag-of-words",
        vec!["ds".to_string()],
        vec![query.to_string()],
    );
    request.search_mode = mode;
    request
}

fn ids(result: &SearchResult) -> Vec<&str> {
    result.search_results.iter().map(|c| c.id.as_str()).collect()
}

#[tokio::test]
async fn test_import_populates_store() {
    let harness = imported().await;

    let stats = harness.storage.database.stats().unwrap();
    assert_eq!(stats.collection_count, 3);
    assert_eq!(stats.chunk_count, 4);
    assert_eq!(stats.index_count, 5);
    assert_eq!(stats.embedding_count, 5);

    assert_eq!(harness.vector_index.len(), 5);
    assert_eq!(harness.keyword_index.len(), 4);
}

#[tokio::test]
async fn test_vector_index_rebuilds_from_database() {
    let harness = imported().await;

    let embeddings = harness
        .storage
        .database
        .load_embeddings("bag-of-words")
        .unwrap();
    let rebuilt =
        VectorIndex::from_embeddings(VOCAB.len() + 1, hnsw_params(), embeddings).unwrap();
    assert_eq!(rebuilt.len(), harness.vector_index.len());

    assert!(harness
        .storage
        .database
        .load_embeddings("other-model")
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_embedding_search_end_to_end() {
    let harness = imported().await;

    let result = harness
        .searcher
        .search(&request("reset router", SearchMode::EmbeddingOnly))
        .await
        .unwrap();

    assert_eq!(result.search_results[0].id, "c1");
    assert_eq!(result.search_results[0].source.source_name, "router-manual.pdf");
    assert_eq!(
        result.search_results[0].source.source_id.as_deref(),
        Some("file-manual")
    );
    assert!(!ids(&result).contains(&"c4"));
    assert_eq!(result.tokens, 2);
}

#[tokio::test]
async fn test_full_text_search_end_to_end() {
    let harness = imported().await;

    let result = harness
        .searcher
        .search(&request("warranty", SearchMode::FullTextOnly))
        .await
        .unwrap();

    assert_eq!(ids(&result), vec!["c3"]);
    assert_eq!(result.tokens, 0);
}

#[tokio::test]
async fn test_hybrid_file_tag_end_to_end() {
    let harness = imported().await;

    let mut search = request("reset router", SearchMode::Hybrid);
    search.file_tag = Some("guide".to_string());
    let result = harness.searcher.search(&search).await.unwrap();

    assert!(!result.search_results.is_empty());
    assert!(result
        .search_results
        .iter()
        .all(|c| c.collection_id == "manual"));
}

#[tokio::test]
async fn test_forbidden_collection_hidden_in_hybrid() {
    let harness = imported().await;

    let result = harness
        .searcher
        .search(&request("reset router", SearchMode::Hybrid))
        .await
        .unwrap();

    assert!(ids(&result).contains(&"c1"));
    assert!(!ids(&result).contains(&"c4"));
}

#[tokio::test]
async fn test_reimport_into_forbidden_collection_hides_chunk() {
    let harness = imported().await;

    let moved: ImportCollection = serde_json::from_value(serde_json::json!({
        "id": "notes",
        "teamId": "team",
        "datasetId": "ds",
        "name": "internal-notes.md",
        "forbid": true,
        "chunks": [
            { "id": "c1", "q": "How do I reset the router?", "a": "Escalate to support." }
        ]
    }))
    .unwrap();
    harness.processor.process(vec![moved]).await.unwrap();

    let stats = harness.storage.database.stats().unwrap();
    assert_eq!(stats.chunk_count, 4);
    assert_eq!(stats.index_count, 4);
    assert_eq!(stats.embedding_count, 4);
    assert_eq!(harness.vector_index.len(), 4);
    assert_eq!(harness.keyword_index.len(), 4);

    for mode in [SearchMode::FullTextOnly, SearchMode::EmbeddingOnly, SearchMode::Hybrid] {
        let result = harness
            .searcher
            .search(&request("reset router", mode))
            .await
            .unwrap();
        assert!(!ids(&result).contains(&"c1"), "{:?} returned a moved chunk", mode);
        assert!(!ids(&result).contains(&"c4"));
    }
}

#[tokio::test]
async fn test_search_test_end_to_end() {
    let harness = imported().await;

    let request: SearchTestRequest = serde_json::from_value(serde_json::json!({
        "teamId": "team",
        "datasetId": "ds",
        "text": "router warranty",
        "searchMode": "mixedRecall",
        "limit": 5
    }))
    .unwrap();

    let response = harness.searcher.search_test(request).await.unwrap();
    assert_eq!(response.limit, 5);
    assert!(!response.list.is_empty());
    assert!(response.duration.ends_with('s'));
}
