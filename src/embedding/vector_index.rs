/// HNSW vector index for similarity search
use crate::retrieval::CollectionVisibilityPolicy;
use crate::storage::StoredEmbedding;
use async_trait::async_trait;
use hnsw_rs::prelude::*;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VectorIndexError {
    #[error("Insert failed: {0}")]
    InsertError(String),

    #[error("Search failed: {0}")]
    SearchError(String),

    #[error("Invalid dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },
}

/// One neighbor returned by the vector store
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    /// Id of the embedded chunk index
    pub index_id: String,
    pub collection_id: String,
    /// Cosine similarity (higher is more similar)
    pub score: f64,
}

/// Nearest-neighbor search restricted to a team, its datasets and the
/// visible collections
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn search(
        &self,
        team_id: &str,
        vector: &[f32],
        limit: usize,
        policy: &CollectionVisibilityPolicy,
        dataset_ids: &[String],
    ) -> Result<Vec<VectorHit>, VectorIndexError>;
}

/// Metadata stored alongside each HNSW point
#[derive(Debug, Clone)]
pub struct PointMeta {
    pub index_id: String,
    pub team_id: String,
    pub dataset_id: String,
    pub collection_id: String,
}

/// HNSW construction and search parameters
#[derive(Debug, Clone, Copy)]
pub struct HnswParams {
    pub m: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
    pub max_elements: usize,
}

const MAX_LAYERS: usize = 16;

/// Point metadata by insertion position; superseded points become `None`
#[derive(Default)]
struct Points {
    slots: Vec<Option<PointMeta>>,
    live: HashMap<String, usize>,
}

struct Graph {
    index: Hnsw<'static, f32, DistCosine>,
    points: RwLock<Points>,
    dimension: usize,
    ef_search: usize,
}

/// HNSW vector index wrapper
///
/// Points are addressed by their insertion position; metadata filtering
/// happens after the graph search. HNSW cannot drop points, so re-inserting
/// or removing an index id only hides the old position.
#[derive(Clone)]
pub struct VectorIndex {
    graph: Arc<Graph>,
}

impl VectorIndex {
    pub fn new(dimension: usize, params: HnswParams) -> Self {
        let index = Hnsw::<f32, DistCosine>::new(
            params.m,
            params.max_elements,
            MAX_LAYERS,
            params.ef_construction,
            DistCosine,
        );

        Self {
            graph: Arc::new(Graph {
                index,
                points: RwLock::new(Points::default()),
                dimension,
                ef_search: params.ef_search,
            }),
        }
    }

    /// Build an index from persisted embeddings
    pub fn from_embeddings(
        dimension: usize,
        params: HnswParams,
        embeddings: Vec<StoredEmbedding>,
    ) -> Result<Self, VectorIndexError> {
        let index = Self::new(dimension, params);
        let count = embeddings.len();

        for embedding in embeddings {
            let meta = PointMeta {
                index_id: embedding.index_id,
                team_id: embedding.team_id,
                dataset_id: embedding.dataset_id,
                collection_id: embedding.collection_id,
            };
            index.insert(meta, &embedding.vector)?;
        }

        tracing::info!("Rebuilt vector index with {} points", count);
        Ok(index)
    }

    /// Insert a vector, hiding any earlier point with the same index id
    pub fn insert(&self, meta: PointMeta, vector: &[f32]) -> Result<(), VectorIndexError> {
        if vector.len() != self.graph.dimension {
            return Err(VectorIndexError::InvalidDimension {
                expected: self.graph.dimension,
                actual: vector.len(),
            });
        }

        let mut points = self
            .graph
            .points
            .write()
            .map_err(|e| VectorIndexError::InsertError(e.to_string()))?;

        let id = points.slots.len();
        if let Some(old) = points.live.insert(meta.index_id.clone(), id) {
            points.slots[old] = None;
        }
        points.slots.push(Some(meta));
        self.graph.index.insert((vector, id));

        Ok(())
    }

    /// Hide the point stored under `index_id`; returns whether one was live
    pub fn remove(&self, index_id: &str) -> Result<bool, VectorIndexError> {
        let mut points = self
            .graph
            .points
            .write()
            .map_err(|e| VectorIndexError::InsertError(e.to_string()))?;

        match points.live.remove(index_id) {
            Some(slot) => {
                points.slots[slot] = None;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Get the number of live vectors in the index
    pub fn len(&self) -> usize {
        self.graph.points.read().map(|p| p.live.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dimension(&self) -> usize {
        self.graph.dimension
    }
}

impl Graph {
    /// Search for up to `limit` neighbors accepted by `accept`
    ///
    /// The graph is queried for twice the limit and the pool doubles until
    /// enough neighbors pass or every point has been considered.
    fn filtered_search<F>(
        &self,
        query: &[f32],
        limit: usize,
        accept: F,
    ) -> Result<Vec<VectorHit>, VectorIndexError>
    where
        F: Fn(&PointMeta) -> bool,
    {
        if query.len() != self.dimension {
            return Err(VectorIndexError::InvalidDimension {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        let points = self
            .points
            .read()
            .map_err(|e| VectorIndexError::SearchError(e.to_string()))?;

        let total = points.slots.len();
        if points.live.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let mut pool = limit.saturating_mul(2).min(total);
        loop {
            let neighbours = self.index.search(query, pool, self.ef_search.max(pool));

            let hits: Vec<VectorHit> = neighbours
                .into_iter()
                .filter_map(|n| {
                    points
                        .slots
                        .get(n.d_id)
                        .and_then(Option::as_ref)
                        .map(|meta| (meta, n.distance))
                })
                .filter(|(meta, _)| accept(meta))
                .take(limit)
                .map(|(meta, distance)| VectorHit {
                    index_id: meta.index_id.clone(),
                    collection_id: meta.collection_id.clone(),
                    score: 1.0 - distance as f64,
                })
                .collect();

            if hits.len() >= limit || pool >= total {
                return Ok(hits);
            }

            tracing::debug!(
                "Vector filter kept {} of {} neighbours, widening search",
                hits.len(),
                pool
            );
            pool = pool.saturating_mul(2).min(total);
        }
    }
}

#[async_trait]
impl VectorStore for VectorIndex {
    async fn search(
        &self,
        team_id: &str,
        vector: &[f32],
        limit: usize,
        policy: &CollectionVisibilityPolicy,
        dataset_ids: &[String],
    ) -> Result<Vec<VectorHit>, VectorIndexError> {
        if policy.is_empty_allow_list() {
            return Ok(Vec::new());
        }

        let graph = Arc::clone(&self.graph);
        let team_id = team_id.to_string();
        let vector = vector.to_vec();
        let policy = policy.clone();
        let dataset_ids = dataset_ids.to_vec();

        tokio::task::spawn_blocking(move || {
            graph.filtered_search(&vector, limit, |meta| {
                meta.team_id == team_id
                    && dataset_ids.iter().any(|d| *d == meta.dataset_id)
                    && policy.permits(&meta.collection_id)
            })
        })
        .await
        .map_err(|e| VectorIndexError::SearchError(e.to_string()))?
    }
}
