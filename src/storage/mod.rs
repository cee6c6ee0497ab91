//! Storage layer for kbrecall
//!
//! SQLite holds collections, chunks, chunk indexes and their vectors; the
//! keyword index lives next to it on disk.

pub mod database;

use crate::error::{KbError, Result};
use crate::retrieval::CollectionSource;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub use database::{Database, DbPool, DbStats, StoredEmbedding};

/// Collection row with its visibility attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionRecord {
    pub id: String,
    pub team_id: String,
    pub dataset_id: String,
    pub name: String,
    #[serde(default)]
    pub file_id: Option<String>,
    #[serde(default)]
    pub raw_link: Option<String>,
    #[serde(default)]
    pub external_file_id: Option<String>,
    #[serde(default)]
    pub external_file_url: Option<String>,
    #[serde(default)]
    pub forbid: bool,
    #[serde(default)]
    pub file_tag: Option<String>,
}

impl CollectionRecord {
    /// Display name plus the first available origin reference
    pub fn source(&self) -> CollectionSource {
        CollectionSource {
            source_name: self.name.clone(),
            source_id: [
                &self.file_id,
                &self.raw_link,
                &self.external_file_id,
                &self.external_file_url,
            ]
            .into_iter()
            .flatten()
            .find(|s| !s.is_empty())
            .cloned(),
        }
    }
}

/// Chunk row joined with its collection, if the collection still exists
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRecord {
    pub id: String,
    pub team_id: String,
    pub dataset_id: String,
    pub collection_id: String,
    pub q: String,
    pub a: String,
    pub chunk_index: u32,
    /// Ids of the vectors indexed for this chunk
    pub index_ids: Vec<String>,
    pub collection: Option<CollectionRecord>,
}

/// Chunk lookups used to hydrate recall hits
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Chunks owning any of `index_ids`, restricted to the given datasets
    /// and collections
    async fn fetch_by_index_ids(
        &self,
        team_id: &str,
        dataset_ids: &[String],
        collection_ids: &[String],
        index_ids: &[String],
    ) -> Result<Vec<ChunkRecord>>;

    async fn fetch_by_ids(&self, team_id: &str, ids: &[String]) -> Result<Vec<ChunkRecord>>;
}

/// Collection metadata queries behind the visibility policy
#[async_trait]
pub trait CollectionStore: Send + Sync {
    /// Non-forbidden collections carrying `tag`
    async fn tagged_collections(
        &self,
        team_id: &str,
        dataset_ids: &[String],
        tag: &str,
    ) -> Result<Vec<String>>;

    async fn forbidden_collections(
        &self,
        team_id: &str,
        dataset_ids: &[String],
    ) -> Result<Vec<String>>;
}

/// Lays out the on-disk store and opens the database
pub struct StorageManager {
    pub database: Database,
    base_path: PathBuf,
}

impl StorageManager {
    /// Create a new storage manager
    pub fn new(base_path: PathBuf) -> Result<Self> {
        let store = base_path.join("store");

        for dir in [store.clone(), store.join("keywords")] {
            std::fs::create_dir_all(&dir).map_err(|e| KbError::Io {
                source: e,
                context: format!("Failed to create store directory: {}", dir.display()),
            })?;
        }

        let database = Database::new(&store.join("db.sqlite"))?;

        Ok(Self {
            database,
            base_path,
        })
    }

    /// Internal, rebuildable data
    pub fn store_dir(&self) -> PathBuf {
        self.base_path.join("store")
    }

    pub fn keyword_index_dir(&self) -> PathBuf {
        self.store_dir().join("keywords")
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn collection() -> CollectionRecord {
        CollectionRecord {
            id: "col".to_string(),
            team_id: "team".to_string(),
            dataset_id: "ds".to_string(),
            name: "manual.pdf".to_string(),
            file_id: None,
            raw_link: Some(String::new()),
            external_file_id: Some("ext-1".to_string()),
            external_file_url: Some("https://example.com/manual".to_string()),
            forbid: false,
            file_tag: None,
        }
    }

    #[test]
    fn test_source_prefers_first_non_empty_reference() {
        let source = collection().source();
        assert_eq!(source.source_name, "manual.pdf");
        assert_eq!(source.source_id.as_deref(), Some("ext-1"));
    }

    #[test]
    fn test_storage_layout() {
        let temp = TempDir::new().unwrap();
        let storage = StorageManager::new(temp.path().to_path_buf()).unwrap();

        assert!(storage.store_dir().join("db.sqlite").exists());
        assert!(storage.keyword_index_dir().is_dir());
    }
}
