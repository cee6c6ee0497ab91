//! Token-budget truncation of the final ranking

use super::CandidateChunk;
use crate::embedding::{TokenCounter, TokenizerError};

/// Token budget with a bounded overflow for the last selected chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBudget {
    pub limit: usize,
    pub overflow: usize,
}

impl TokenBudget {
    pub const DEFAULT_OVERFLOW: usize = 500;

    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            overflow: Self::DEFAULT_OVERFLOW,
        }
    }

    pub fn with_overflow(mut self, overflow: usize) -> Self {
        self.overflow = overflow;
        self
    }

    pub fn ceiling(&self) -> usize {
        self.limit.saturating_add(self.overflow)
    }
}

/// Greedily take the ranked prefix that fits the budget
///
/// A chunk that would lift the total above `limit + overflow` is not taken;
/// selection stops once the total exceeds `limit`. When nothing is selected
/// the first filtered chunk is returned, or `fallback` if the filter left
/// nothing.
pub fn truncate_to_budget(
    filtered: Vec<CandidateChunk>,
    fallback: Option<CandidateChunk>,
    counter: &dyn TokenCounter,
    budget: TokenBudget,
) -> Result<Vec<CandidateChunk>, TokenizerError> {
    let mut total = 0usize;
    let mut selected: Vec<CandidateChunk> = Vec::new();
    let mut first: Option<CandidateChunk> = None;

    for chunk in filtered {
        if first.is_none() {
            first = Some(chunk.clone());
        }

        let tokens = counter.count_tokens(&chunk.budget_text())?;
        if total + tokens > budget.ceiling() {
            break;
        }

        total += tokens;
        selected.push(chunk);

        if total > budget.limit {
            break;
        }
    }

    if selected.is_empty() {
        tracing::debug!("Token budget selected nothing, falling back to top candidate");
        return Ok(first.or(fallback).into_iter().collect());
    }

    tracing::debug!(
        "Token budget {} selected {} chunks ({} tokens)",
        budget.limit,
        selected.len(),
        total
    );

    Ok(selected)
}
