use super::SearchMode;

/// Per-source recall limits for one search; 0 skips that source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecallLimits {
    pub embedding: usize,
    pub full_text: usize,
}

impl RecallLimits {
    pub fn for_mode(mode: SearchMode) -> Self {
        match mode {
            SearchMode::EmbeddingOnly => Self {
                embedding: 100,
                full_text: 0,
            },
            SearchMode::FullTextOnly => Self {
                embedding: 0,
                full_text: 100,
            },
            SearchMode::Hybrid => Self {
                embedding: 80,
                full_text: 60,
            },
        }
    }
}
