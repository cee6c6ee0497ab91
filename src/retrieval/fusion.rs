//! Reciprocal Rank Fusion over ranked candidate lists

use super::CandidateChunk;
use ahash::AHashMap;

/// One ranked list and its RRF constant
#[derive(Debug, Clone)]
pub struct Ballot {
    pub k: f64,
    pub list: Vec<CandidateChunk>,
}

impl Ballot {
    pub fn new(k: f64, list: Vec<CandidateChunk>) -> Self {
        Self { k, list }
    }
}

/// A candidate with its fused score
#[derive(Debug, Clone)]
pub struct FusedCandidate {
    pub chunk: CandidateChunk,
    pub rrf_score: f64,
}

/// Apply Reciprocal Rank Fusion across ballots
///
/// RRF formula: score(id) = sum over ballots containing id of 1 / (k + rank),
/// with rank 1-based. A candidate seen in several ballots keeps the record
/// from the first ballot it appeared in, with score lists merged.
///
/// # Returns
/// Fused candidates sorted by score descending; ties keep first-seen order
pub fn reciprocal_rank_fusion(ballots: Vec<Ballot>) -> Vec<FusedCandidate> {
    let mut slots: AHashMap<String, usize> = AHashMap::new();
    let mut fused: Vec<FusedCandidate> = Vec::new();

    for ballot in ballots {
        for (position, chunk) in ballot.list.into_iter().enumerate() {
            let contribution = 1.0 / (ballot.k + (position as f64) + 1.0);

            match slots.get(&chunk.id) {
                Some(&slot) => {
                    let entry = &mut fused[slot];
                    entry.chunk.merge_scores(&chunk.scores);
                    entry.rrf_score += contribution;
                }
                None => {
                    slots.insert(chunk.id.clone(), fused.len());
                    fused.push(FusedCandidate {
                        chunk,
                        rrf_score: contribution,
                    });
                }
            }
        }
    }

    fused.sort_by(|a, b| {
        b.rrf_score
            .partial_cmp(&a.rrf_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    fused
}

/// Fuse ballots and keep only the ranked chunks
pub fn fuse_ranked_lists(ballots: Vec<Ballot>) -> Vec<CandidateChunk> {
    reciprocal_rank_fusion(ballots)
        .into_iter()
        .map(|f| f.chunk)
        .collect()
}
