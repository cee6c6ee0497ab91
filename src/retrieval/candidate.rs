//! Candidate chunks and their accumulated scores

use crate::storage::ChunkRecord;
use serde::{Deserialize, Serialize};

/// Source of a score attached to a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScoreType {
    #[serde(rename = "embedding")]
    Embedding,
    #[serde(rename = "fullText")]
    FullText,
    #[serde(rename = "reRank")]
    Rerank,
}

/// One score entry: its type, raw value and 0-based position in the list
/// that produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Score {
    #[serde(rename = "type")]
    pub score_type: ScoreType,
    pub value: f64,
    pub index: usize,
}

impl Score {
    pub fn new(score_type: ScoreType, value: f64, index: usize) -> Self {
        Self {
            score_type,
            value,
            index,
        }
    }
}

/// Where a chunk's collection came from
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSource {
    pub source_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
}

/// A recalled chunk moving through the ranking pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateChunk {
    pub id: String,
    pub dataset_id: String,
    pub collection_id: String,
    pub q: String,
    pub a: String,
    pub chunk_index: u32,
    #[serde(flatten)]
    pub source: CollectionSource,
    #[serde(rename = "score")]
    pub scores: Vec<Score>,
}

impl CandidateChunk {
    /// Candidate from a stored chunk; `None` when its collection is gone
    pub fn from_record(record: ChunkRecord, score: Score) -> Option<Self> {
        let source = record.collection.as_ref()?.source();
        Some(Self {
            id: record.id,
            dataset_id: record.dataset_id,
            collection_id: record.collection_id,
            q: record.q,
            a: record.a,
            chunk_index: record.chunk_index,
            source,
            scores: vec![score],
        })
    }

    /// Value of the first score of the given type, if any
    pub fn score_of(&self, score_type: ScoreType) -> Option<f64> {
        self.scores
            .iter()
            .find(|s| s.score_type == score_type)
            .map(|s| s.value)
    }

    /// Text billed against the token budget
    pub fn budget_text(&self) -> String {
        format!("{}{}", self.q, self.a)
    }

    /// Document text handed to the reranker
    pub fn rerank_text(&self) -> String {
        format!("{}\n{}", self.q, self.a)
    }

    /// Copy of this chunk carrying only the given score
    pub fn with_single_score(&self, score: Score) -> Self {
        Self {
            scores: vec![score],
            ..self.clone()
        }
    }

    /// Merge another chunk's scores into this one; same-typed scores keep
    /// the larger value
    pub fn merge_scores(&mut self, other: &[Score]) {
        for incoming in other {
            match self
                .scores
                .iter_mut()
                .find(|s| s.score_type == incoming.score_type)
            {
                Some(existing) => existing.value = existing.value.max(incoming.value),
                None => self.scores.push(incoming.clone()),
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::chunk;
    use super::*;

    #[test]
    fn test_merge_scores_keeps_max_per_type() {
        let mut base = chunk("1", "q", "a", vec![Score::new(ScoreType::Embedding, 0.4, 3)]);
        base.merge_scores(&[
            Score::new(ScoreType::Embedding, 0.7, 0),
            Score::new(ScoreType::FullText, 2.5, 1),
        ]);

        assert_eq!(base.scores.len(), 2);
        assert_eq!(base.score_of(ScoreType::Embedding), Some(0.7));
        assert_eq!(base.scores[0].index, 3);
        assert_eq!(base.score_of(ScoreType::FullText), Some(2.5));
        assert_eq!(base.score_of(ScoreType::Rerank), None);
    }

    #[test]
    fn test_serialized_shape() {
        let mut c = chunk("42", "What?", "That.", vec![Score::new(ScoreType::Rerank, 0.9, 0)]);
        c.source = CollectionSource {
            source_name: "guide.pdf".to_string(),
            source_id: Some("file-1".to_string()),
        };

        let value = serde_json::to_value(&c).unwrap();
        assert_eq!(value["id"], "42");
        assert_eq!(value["chunkIndex"], 0);
        assert_eq!(value["sourceName"], "guide.pdf");
        assert_eq!(value["sourceId"], "file-1");
        assert_eq!(value["score"][0]["type"], "reRank");
    }
}
