/// Batch import of collections into the database and both indexes
use super::{
    EmbeddingError, EmbeddingProvider, KeywordDocument, KeywordIndex, PointMeta, VectorIndex,
};
use crate::error::{KbError, Result};
use crate::storage::{ChunkRecord, CollectionRecord, Database};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One chunk of an imported collection
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportChunk {
    /// Generated when absent
    #[serde(default)]
    pub id: Option<String>,
    pub q: String,
    #[serde(default)]
    pub a: String,
    #[serde(default, alias = "chunk_index")]
    pub chunk_index: u32,
    /// Extra texts embedded as separate vectors for this chunk
    #[serde(default)]
    pub indexes: Vec<String>,
}

/// One line of an import file: a collection with its chunks
#[derive(Debug, Clone, Deserialize)]
pub struct ImportCollection {
    #[serde(flatten)]
    pub collection: CollectionRecord,
    #[serde(default)]
    pub chunks: Vec<ImportChunk>,
}

/// Result of batch processing
#[derive(Debug, Default)]
pub struct BatchResult {
    pub collections: usize,
    pub chunks: usize,
    pub vectors: usize,
    pub failed: usize,
    pub duration_ms: u64,
}

struct PendingVector {
    index_id: String,
    meta: PointMeta,
    text: String,
}

/// Writes chunk rows, vectors and keyword documents for imported collections
pub struct BatchProcessor {
    database: Database,
    provider: Arc<dyn EmbeddingProvider>,
    vector_index: Arc<VectorIndex>,
    keyword_index: Arc<KeywordIndex>,
    batch_size: usize,
}

impl BatchProcessor {
    pub fn new(
        database: Database,
        provider: Arc<dyn EmbeddingProvider>,
        vector_index: Arc<VectorIndex>,
        keyword_index: Arc<KeywordIndex>,
        batch_size: usize,
    ) -> Self {
        Self {
            database,
            provider,
            vector_index,
            keyword_index,
            batch_size: batch_size.max(1),
        }
    }

    /// Import collections; a failed embedding batch is counted and skipped
    pub async fn process(&self, collections: Vec<ImportCollection>) -> Result<BatchResult> {
        let start = std::time::Instant::now();
        let mut result = BatchResult::default();

        info!("Starting import of {} collections", collections.len());

        let mut pending: Vec<PendingVector> = Vec::new();

        for import in collections {
            let collection = import.collection;
            self.database.upsert_collection(&collection)?;
            result.collections += 1;

            for chunk in import.chunks {
                let chunk_id = chunk
                    .id
                    .clone()
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

                let record = ChunkRecord {
                    id: chunk_id.clone(),
                    team_id: collection.team_id.clone(),
                    dataset_id: collection.dataset_id.clone(),
                    collection_id: collection.id.clone(),
                    q: chunk.q.clone(),
                    a: chunk.a.clone(),
                    chunk_index: chunk.chunk_index,
                    index_ids: Vec::new(),
                    collection: None,
                };
                self.replace_existing(&chunk_id)?;
                self.database.insert_chunk(&record)?;

                let full_text = if chunk.a.is_empty() {
                    chunk.q.clone()
                } else {
                    format!("{}\n{}", chunk.q, chunk.a)
                };

                self.keyword_index
                    .insert(&KeywordDocument {
                        chunk_id: chunk_id.clone(),
                        team_id: collection.team_id.clone(),
                        dataset_id: collection.dataset_id.clone(),
                        collection_id: collection.id.clone(),
                        text: full_text.clone(),
                    })
                    .map_err(|e| KbError::Index(e.to_string()))?;

                let texts = std::iter::once(full_text)
                    .chain(chunk.indexes.into_iter().filter(|t| !t.trim().is_empty()));

                for (position, text) in texts.enumerate() {
                    let index_id = format!("{}-{}", chunk_id, position);
                    self.database.insert_chunk_index(&index_id, &chunk_id, &text)?;
                    pending.push(PendingVector {
                        index_id: index_id.clone(),
                        meta: PointMeta {
                            index_id,
                            team_id: collection.team_id.clone(),
                            dataset_id: collection.dataset_id.clone(),
                            collection_id: collection.id.clone(),
                        },
                        text,
                    });
                }

                result.chunks += 1;
            }
        }

        for batch in pending.chunks(self.batch_size) {
            match self.embed_batch(batch).await {
                Ok(vectors) => {
                    for (item, vector) in batch.iter().zip(vectors) {
                        self.database.store_embedding(
                            &item.index_id,
                            &vector,
                            self.provider.model_name(),
                        )?;
                        self.vector_index
                            .insert(item.meta.clone(), &vector)
                            .map_err(|e| KbError::Index(e.to_string()))?;
                    }
                    result.vectors += batch.len();
                    debug!("Embedded batch of {} texts", batch.len());
                }
                Err(e) => {
                    warn!("Failed to embed batch: {}", e);
                    result.failed += batch.len();
                }
            }
        }

        self.keyword_index
            .commit()
            .map_err(|e| KbError::Index(e.to_string()))?;

        result.duration_ms = start.elapsed().as_millis() as u64;

        info!(
            "Import complete: {} collections, {} chunks, {} vectors, {} failed, {}ms",
            result.collections, result.chunks, result.vectors, result.failed, result.duration_ms
        );

        Ok(result)
    }

    /// Clear what an earlier import of `chunk_id` left in the indexes
    fn replace_existing(&self, chunk_id: &str) -> Result<()> {
        for index_id in self.database.delete_chunk_indexes(chunk_id)? {
            self.vector_index
                .remove(&index_id)
                .map_err(|e| KbError::Index(e.to_string()))?;
        }

        self.keyword_index
            .delete(chunk_id)
            .map_err(|e| KbError::Index(e.to_string()))
    }

    async fn embed_batch(
        &self,
        batch: &[PendingVector],
    ) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
        let texts: Vec<String> = batch.iter().map(|item| item.text.clone()).collect();
        let provider = Arc::clone(&self.provider);

        let vectors = tokio::task::spawn_blocking(move || provider.embed_documents(&texts))
            .await
            .map_err(|e| EmbeddingError::GenerationError(e.to_string()))??;

        if vectors.len() != batch.len() {
            return Err(EmbeddingError::GenerationError(format!(
                "Embedding count mismatch: expected {}, got {}",
                batch.len(),
                vectors.len()
            )));
        }

        Ok(vectors)
    }
}
