//! Which collections a search may return chunks from

use super::SearchError;
use crate::storage::CollectionStore;
use serde::{Deserialize, Serialize};

/// Collection filter shared by both recall sources.
///
/// A content tag yields an allow-list of tagged, non-forbidden collections;
/// otherwise the forbidden collections are excluded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollectionVisibilityPolicy {
    AllowList(Vec<String>),
    ForbidList(Vec<String>),
}

impl CollectionVisibilityPolicy {
    pub fn permits(&self, collection_id: &str) -> bool {
        match self {
            CollectionVisibilityPolicy::AllowList(ids) => ids.iter().any(|id| id == collection_id),
            CollectionVisibilityPolicy::ForbidList(ids) => {
                !ids.iter().any(|id| id == collection_id)
            }
        }
    }

    /// True when no collection can pass
    pub fn is_empty_allow_list(&self) -> bool {
        matches!(self, CollectionVisibilityPolicy::AllowList(ids) if ids.is_empty())
    }
}

/// Resolve the visibility policy once per request
pub async fn resolve_visibility(
    store: &dyn CollectionStore,
    team_id: &str,
    dataset_ids: &[String],
    file_tag: Option<&str>,
) -> Result<CollectionVisibilityPolicy, SearchError> {
    match file_tag.filter(|tag| !tag.is_empty()) {
        Some(tag) => {
            let ids = store
                .tagged_collections(team_id, dataset_ids, tag)
                .await
                .map_err(|e| {
                    SearchError::DatabaseError(format!("Failed to load tagged collections: {}", e))
                })?;
            tracing::debug!("File tag '{}' allows {} collections", tag, ids.len());
            Ok(CollectionVisibilityPolicy::AllowList(ids))
        }
        None => {
            let ids = store
                .forbidden_collections(team_id, dataset_ids)
                .await
                .map_err(|e| {
                    SearchError::DatabaseError(format!(
                        "Failed to load forbidden collections: {}",
                        e
                    ))
                })?;
            tracing::debug!("{} forbidden collections excluded", ids.len());
            Ok(CollectionVisibilityPolicy::ForbidList(ids))
        }
    }
}
