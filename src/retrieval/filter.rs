//! Minimum-similarity filtering

use super::{CandidateChunk, ScoreType, SearchMode};

/// Score type the similarity threshold applies to, if any
///
/// Fused hybrid scores are not comparable to a single threshold, so hybrid
/// search without reranking is not filtered.
pub fn authoritative_score_type(mode: SearchMode, using_rerank: bool) -> Option<ScoreType> {
    if using_rerank {
        Some(ScoreType::Rerank)
    } else if mode == SearchMode::EmbeddingOnly {
        Some(ScoreType::Embedding)
    } else {
        None
    }
}

#[derive(Debug, Clone)]
pub struct ScoreFilterOutcome {
    pub chunks: Vec<CandidateChunk>,
    /// Whether a threshold was applied
    pub used: bool,
}

/// Drop chunks whose authoritative score is below `similarity`
///
/// Chunks without that score type pass.
pub fn apply_score_filter(
    chunks: Vec<CandidateChunk>,
    similarity: f64,
    mode: SearchMode,
    using_rerank: bool,
) -> ScoreFilterOutcome {
    let Some(score_type) = authoritative_score_type(mode, using_rerank) else {
        return ScoreFilterOutcome {
            chunks,
            used: false,
        };
    };

    let before = chunks.len();
    let chunks: Vec<CandidateChunk> = chunks
        .into_iter()
        .filter(|c| c.score_of(score_type).map_or(true, |v| v >= similarity))
        .collect();

    tracing::debug!(
        "Similarity filter ({:?} >= {}) kept {} of {}",
        score_type,
        similarity,
        chunks.len(),
        before
    );

    ScoreFilterOutcome { chunks, used: true }
}
