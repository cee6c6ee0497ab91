//! SQLite database management with migrations
//!
//! Holds collections, chunks, chunk indexes and embedding vectors

use super::{ChunkRecord, ChunkStore, CollectionRecord, CollectionStore};
use crate::error::{KbError, Result};
use async_trait::async_trait;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, params_from_iter, Connection};
use std::collections::HashMap;
use std::path::Path;

/// Database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// Embedding vector as persisted, with the metadata the vector store filters on
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEmbedding {
    pub index_id: String,
    pub team_id: String,
    pub dataset_id: String,
    pub collection_id: String,
    pub vector: Vec<f32>,
}

/// Database manager with migration support
#[derive(Clone)]
pub struct Database {
    pool: DbPool,
}

impl Database {
    /// Create a new database connection
    pub fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| KbError::Io {
                source: e,
                context: format!("Failed to create database directory: {:?}", parent),
            })?;
        }

        let manager = SqliteConnectionManager::file(db_path);
        Self::with_manager(manager, 16)
    }

    /// In-memory database with a single shared connection
    pub fn in_memory() -> Result<Self> {
        Self::with_manager(SqliteConnectionManager::memory(), 1)
    }

    fn with_manager(manager: SqliteConnectionManager, max_size: u32) -> Result<Self> {
        let pool = Pool::builder().max_size(max_size).build(manager)?;

        {
            let conn = pool.get()?;

            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                PRAGMA foreign_keys = ON;
                PRAGMA busy_timeout = 5000;
                ",
            )?;
        }

        let db = Self { pool };
        db.migrate()?;

        Ok(db)
    }

    /// Get a connection from the pool
    pub fn get_conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    /// Run database migrations
    fn migrate(&self) -> Result<()> {
        let conn = self.get_conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
            [],
        )?;

        let current_version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM _migrations",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        for (version, migration) in MIGRATIONS.iter().enumerate() {
            let version = version as i32 + 1;

            if version > current_version {
                tracing::info!("Applying migration {}", version);

                conn.execute_batch(migration)?;

                conn.execute(
                    "INSERT INTO _migrations (version, applied_at) VALUES (?1, datetime('now'))",
                    params![version],
                )?;
            }
        }

        Ok(())
    }

    pub fn upsert_collection(&self, collection: &CollectionRecord) -> Result<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO collections
                (id, team_id, dataset_id, name, file_id, raw_link, external_file_id,
                 external_file_url, forbid, file_tag)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                file_id = excluded.file_id,
                raw_link = excluded.raw_link,
                external_file_id = excluded.external_file_id,
                external_file_url = excluded.external_file_url,
                forbid = excluded.forbid,
                file_tag = excluded.file_tag",
            params![
                collection.id,
                collection.team_id,
                collection.dataset_id,
                collection.name,
                collection.file_id,
                collection.raw_link,
                collection.external_file_id,
                collection.external_file_url,
                collection.forbid,
                collection.file_tag,
            ],
        )?;
        Ok(())
    }

    /// Insert a chunk row; `chunk.collection` and `chunk.index_ids` are ignored
    pub fn insert_chunk(&self, chunk: &ChunkRecord) -> Result<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO chunks
                (id, team_id, dataset_id, collection_id, q, a, chunk_index)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                chunk.id,
                chunk.team_id,
                chunk.dataset_id,
                chunk.collection_id,
                chunk.q,
                chunk.a,
                chunk.chunk_index,
            ],
        )?;
        Ok(())
    }

    pub fn insert_chunk_index(&self, index_id: &str, chunk_id: &str, text: &str) -> Result<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO chunk_indexes (data_id, chunk_id, text) VALUES (?1, ?2, ?3)",
            params![index_id, chunk_id, text],
        )?;
        Ok(())
    }

    pub fn store_embedding(&self, index_id: &str, vector: &[f32], model: &str) -> Result<()> {
        let bytes: Vec<u8> = vector.iter().flat_map(|v| v.to_le_bytes()).collect();
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO embeddings (data_id, vector, model, created_at)
             VALUES (?1, ?2, ?3, strftime('%s', 'now'))",
            params![index_id, bytes, model],
        )?;
        Ok(())
    }

    /// All vectors produced by `model`, joined with their chunk's location
    pub fn load_embeddings(&self, model: &str) -> Result<Vec<StoredEmbedding>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT e.data_id, c.team_id, c.dataset_id, c.collection_id, e.vector
             FROM embeddings e
             JOIN chunk_indexes i ON i.data_id = e.data_id
             JOIN chunks c ON c.id = i.chunk_id
             WHERE e.model = ?1
             ORDER BY e.data_id",
        )?;

        let rows = stmt.query_map(params![model], |row| {
            let bytes: Vec<u8> = row.get(4)?;
            Ok(StoredEmbedding {
                index_id: row.get(0)?,
                team_id: row.get(1)?,
                dataset_id: row.get(2)?,
                collection_id: row.get(3)?,
                vector: bytes
                    .chunks_exact(4)
                    .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                    .collect(),
            })
        })?;

        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats> {
        let conn = self.get_conn()?;

        let count = |table: &str| -> Result<usize> {
            let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                row.get(0)
            })?;
            Ok(n as usize)
        };

        Ok(DbStats {
            collection_count: count("collections")?,
            chunk_count: count("chunks")?,
            index_count: count("chunk_indexes")?,
            embedding_count: count("embeddings")?,
        })
    }

    /// Drop a chunk's index rows and their embeddings, returning the removed index ids
    pub fn delete_chunk_indexes(&self, chunk_id: &str) -> Result<Vec<String>> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let removed = Self::query_ids(
            &tx,
            "SELECT data_id FROM chunk_indexes WHERE chunk_id = ?1 ORDER BY data_id",
            vec![chunk_id],
        )?;
        tx.execute(
            "DELETE FROM embeddings
             WHERE data_id IN (SELECT data_id FROM chunk_indexes WHERE chunk_id = ?1)",
            params![chunk_id],
        )?;
        tx.execute("DELETE FROM chunk_indexes WHERE chunk_id = ?1", params![chunk_id])?;
        tx.commit()?;

        Ok(removed)
    }

    /// Run `work` on the blocking pool so SQLite I/O stays off the async workers
    async fn blocking<T, F>(&self, work: F) -> Result<T>
    where
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || work(&db)).await?
    }

    fn query_ids(conn: &Connection, sql: &str, args: Vec<&str>) -> Result<Vec<String>> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params_from_iter(args), |row| row.get(0))?;
        Ok(rows.collect::<std::result::Result<Vec<String>, _>>()?)
    }

    fn load_chunks(conn: &Connection, team_id: &str, ids: &[String]) -> Result<Vec<ChunkRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT c.id, c.team_id, c.dataset_id, c.collection_id, c.q, c.a, c.chunk_index,
                    col.id, col.team_id, col.dataset_id, col.name, col.file_id, col.raw_link,
                    col.external_file_id, col.external_file_url, col.forbid, col.file_tag
             FROM chunks c
             LEFT JOIN collections col ON col.id = c.collection_id
             WHERE c.team_id = ? AND c.id IN ({})",
            placeholders(ids.len())
        );

        let mut args: Vec<&str> = vec![team_id];
        args.extend(ids.iter().map(String::as_str));

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args), |row| {
            let collection_id: Option<String> = row.get(7)?;
            let collection = match collection_id {
                Some(id) => Some(CollectionRecord {
                    id,
                    team_id: row.get(8)?,
                    dataset_id: row.get(9)?,
                    name: row.get(10)?,
                    file_id: row.get(11)?,
                    raw_link: row.get(12)?,
                    external_file_id: row.get(13)?,
                    external_file_url: row.get(14)?,
                    forbid: row.get(15)?,
                    file_tag: row.get(16)?,
                }),
                None => None,
            };

            Ok(ChunkRecord {
                id: row.get(0)?,
                team_id: row.get(1)?,
                dataset_id: row.get(2)?,
                collection_id: row.get(3)?,
                q: row.get(4)?,
                a: row.get(5)?,
                chunk_index: row.get(6)?,
                index_ids: Vec::new(),
                collection,
            })
        })?;
        let mut chunks = rows.collect::<std::result::Result<Vec<_>, _>>()?;

        let index_sql = format!(
            "SELECT chunk_id, data_id FROM chunk_indexes WHERE chunk_id IN ({}) ORDER BY data_id",
            placeholders(ids.len())
        );
        let mut stmt = conn.prepare(&index_sql)?;
        let index_rows = stmt.query_map(params_from_iter(ids.iter()), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut index_ids: HashMap<String, Vec<String>> = HashMap::new();
        for row in index_rows {
            let (chunk_id, data_id) = row?;
            index_ids.entry(chunk_id).or_default().push(data_id);
        }

        for chunk in &mut chunks {
            chunk.index_ids = index_ids.remove(&chunk.id).unwrap_or_default();
        }

        Ok(chunks)
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

#[async_trait]
impl ChunkStore for Database {
    async fn fetch_by_index_ids(
        &self,
        team_id: &str,
        dataset_ids: &[String],
        collection_ids: &[String],
        index_ids: &[String],
    ) -> Result<Vec<ChunkRecord>> {
        if dataset_ids.is_empty() || collection_ids.is_empty() || index_ids.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT DISTINCT c.id FROM chunks c
             JOIN chunk_indexes i ON i.chunk_id = c.id
             WHERE c.team_id = ?
               AND c.dataset_id IN ({})
               AND c.collection_id IN ({})
               AND i.data_id IN ({})",
            placeholders(dataset_ids.len()),
            placeholders(collection_ids.len()),
            placeholders(index_ids.len())
        );

        let team_id = team_id.to_string();
        let mut args: Vec<String> = vec![team_id.clone()];
        args.extend(dataset_ids.iter().cloned());
        args.extend(collection_ids.iter().cloned());
        args.extend(index_ids.iter().cloned());

        self.blocking(move |db| {
            let conn = db.get_conn()?;
            let args: Vec<&str> = args.iter().map(String::as_str).collect();
            let chunk_ids = Self::query_ids(&conn, &sql, args)?;
            Self::load_chunks(&conn, &team_id, &chunk_ids)
        })
        .await
    }

    async fn fetch_by_ids(&self, team_id: &str, ids: &[String]) -> Result<Vec<ChunkRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let team_id = team_id.to_string();
        let ids = ids.to_vec();
        self.blocking(move |db| {
            let conn = db.get_conn()?;
            Self::load_chunks(&conn, &team_id, &ids)
        })
        .await
    }
}

#[async_trait]
impl CollectionStore for Database {
    async fn tagged_collections(
        &self,
        team_id: &str,
        dataset_ids: &[String],
        tag: &str,
    ) -> Result<Vec<String>> {
        if dataset_ids.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT id FROM collections
             WHERE team_id = ? AND dataset_id IN ({}) AND file_tag = ? AND forbid = 0
             ORDER BY id",
            placeholders(dataset_ids.len())
        );

        let mut args: Vec<String> = vec![team_id.to_string()];
        args.extend(dataset_ids.iter().cloned());
        args.push(tag.to_string());

        self.blocking(move |db| {
            let conn = db.get_conn()?;
            Self::query_ids(&conn, &sql, args.iter().map(String::as_str).collect())
        })
        .await
    }

    async fn forbidden_collections(
        &self,
        team_id: &str,
        dataset_ids: &[String],
    ) -> Result<Vec<String>> {
        if dataset_ids.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT id FROM collections
             WHERE team_id = ? AND dataset_id IN ({}) AND forbid = 1
             ORDER BY id",
            placeholders(dataset_ids.len())
        );

        let mut args: Vec<String> = vec![team_id.to_string()];
        args.extend(dataset_ids.iter().cloned());

        self.blocking(move |db| {
            let conn = db.get_conn()?;
            Self::query_ids(&conn, &sql, args.iter().map(String::as_str).collect())
        })
        .await
    }
}

/// Database statistics
#[derive(Debug)]
pub struct DbStats {
    pub collection_count: usize,
    pub chunk_count: usize,
    pub index_count: usize,
    pub embedding_count: usize,
}

/// Database migrations (each string is one migration)
const MIGRATIONS: &[&str] = &[
    // Migration 1: Initial schema
    r#"
    -- Collections: one source document or link inside a dataset
    CREATE TABLE collections (
        id TEXT PRIMARY KEY,
        team_id TEXT NOT NULL,
        dataset_id TEXT NOT NULL,
        name TEXT NOT NULL,
        file_id TEXT,
        raw_link TEXT,
        external_file_id TEXT,
        external_file_url TEXT,
        forbid BOOLEAN NOT NULL DEFAULT 0,
        file_tag TEXT
    );

    CREATE INDEX idx_collections_dataset ON collections(team_id, dataset_id);
    CREATE INDEX idx_collections_tag ON collections(file_tag);

    -- Chunks: question/answer pairs; collection_id is not enforced so that
    -- chunks of deleted collections stay readable
    CREATE TABLE chunks (
        id TEXT PRIMARY KEY,
        team_id TEXT NOT NULL,
        dataset_id TEXT NOT NULL,
        collection_id TEXT NOT NULL,
        q TEXT NOT NULL,
        a TEXT NOT NULL DEFAULT '',
        chunk_index INTEGER NOT NULL DEFAULT 0
    );

    CREATE INDEX idx_chunks_dataset ON chunks(team_id, dataset_id);
    CREATE INDEX idx_chunks_collection ON chunks(collection_id);

    -- Chunk indexes: each one is embedded as a separate vector
    CREATE TABLE chunk_indexes (
        data_id TEXT PRIMARY KEY,
        chunk_id TEXT NOT NULL,
        text TEXT NOT NULL,
        FOREIGN KEY (chunk_id) REFERENCES chunks(id) ON DELETE CASCADE
    );

    CREATE INDEX idx_chunk_indexes_chunk ON chunk_indexes(chunk_id);

    -- Embeddings table
    CREATE TABLE embeddings (
        data_id TEXT PRIMARY KEY,
        vector BLOB NOT NULL,
        model TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        FOREIGN KEY (data_id) REFERENCES chunk_indexes(data_id) ON DELETE CASCADE
    );

    CREATE INDEX idx_embeddings_model ON embeddings(model);
    "#,
];
