//! Result deduplication by normalized content

use crate::retrieval::CandidateChunk;
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

static NON_ALPHANUMERIC: OnceLock<Regex> = OnceLock::new();

fn non_alphanumeric() -> &'static Regex {
    NON_ALPHANUMERIC
        .get_or_init(|| Regex::new(r"[^\p{L}\p{N}]").expect("static pattern compiles"))
}

/// BLAKE3 hash of `q + a` with everything but letters and digits removed
pub fn content_hash(q: &str, a: &str) -> String {
    let joined = format!("{}{}", q, a);
    let normalized = non_alphanumeric().replace_all(&joined, "");
    blake3::hash(normalized.as_bytes()).to_hex().to_string()
}

/// Deduplicate chunks by content hash, keeping the first occurrence
///
/// Input must already be ranked, so the first occurrence is the best one.
pub fn deduplicate_chunks(chunks: Vec<CandidateChunk>) -> Vec<CandidateChunk> {
    let mut seen: HashSet<String> = HashSet::new();

    chunks
        .into_iter()
        .filter(|chunk| seen.insert(content_hash(&chunk.q, &chunk.a)))
        .collect()
}

/// Embedding results followed by full-text results not already present
pub fn merge_recall_lists(
    embedding: &[CandidateChunk],
    full_text: &[CandidateChunk],
) -> Vec<CandidateChunk> {
    let ids: HashSet<&str> = embedding.iter().map(|c| c.id.as_str()).collect();

    embedding
        .iter()
        .chain(full_text.iter().filter(|c| !ids.contains(c.id.as_str())))
        .cloned()
        .collect()
}
