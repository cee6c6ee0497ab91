/// Tantivy keyword index for full-text search
use crate::retrieval::CollectionVisibilityPolicy;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Mutex;
use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, ConstScoreQuery, Occur, Query, QueryParser, TermQuery};
use tantivy::schema::*;
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KeywordIndexError {
    #[error("Index initialization failed: {0}")]
    InitializationError(String),

    #[error("Insert failed: {0}")]
    InsertError(String),

    #[error("Search failed: {0}")]
    SearchError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Tantivy error: {0}")]
    TantivyError(#[from] TantivyError),
}

/// A chunk matched by the lexical engine
#[derive(Debug, Clone, PartialEq)]
pub struct LexicalHit {
    pub chunk_id: String,
    /// BM25 relevance score
    pub score: f64,
}

/// Text indexed for one chunk
#[derive(Debug, Clone)]
pub struct KeywordDocument {
    pub chunk_id: String,
    pub team_id: String,
    pub dataset_id: String,
    pub collection_id: String,
    pub text: String,
}

/// Full-text search over a single dataset
#[async_trait]
pub trait LexicalEngine: Send + Sync {
    async fn search(
        &self,
        team_id: &str,
        dataset_id: &str,
        text: &str,
        limit: usize,
        policy: &CollectionVisibilityPolicy,
    ) -> Result<Vec<LexicalHit>, KeywordIndexError>;
}

#[derive(Clone, Copy)]
struct KeywordFields {
    chunk_id: Field,
    team_id: Field,
    dataset_id: Field,
    collection_id: Field,
    text: Field,
}

impl KeywordFields {
    fn from_schema(schema: &Schema) -> Result<Self, KeywordIndexError> {
        let field = |name: &str| {
            schema.get_field(name).map_err(|_| {
                KeywordIndexError::InitializationError(format!(
                    "Missing '{}' field in schema",
                    name
                ))
            })
        };

        Ok(Self {
            chunk_id: field("chunk_id")?,
            team_id: field("team_id")?,
            dataset_id: field("dataset_id")?,
            collection_id: field("collection_id")?,
            text: field("text")?,
        })
    }
}

/// Read side of the index; cheap to clone into blocking searches
#[derive(Clone)]
struct IndexView {
    index: Index,
    reader: IndexReader,
    fields: KeywordFields,
}

/// Tantivy keyword index wrapper
///
/// Provides BM25 ranking; team, dataset and collection restrictions are
/// zero-score filter clauses.
pub struct KeywordIndex {
    view: IndexView,
    writer: Mutex<IndexWriter>,
    #[allow(dead_code)]
    index_path: PathBuf,
}

impl KeywordIndex {
    /// Open the index in `index_path`, creating it if needed
    pub fn new(index_path: PathBuf) -> Result<Self, KeywordIndexError> {
        let index = if index_path.join("meta.json").exists() {
            Index::open_in_dir(&index_path)
                .map_err(|e| KeywordIndexError::InitializationError(e.to_string()))?
        } else {
            std::fs::create_dir_all(&index_path)?;
            Index::create_in_dir(&index_path, Self::schema())
                .map_err(|e| KeywordIndexError::InitializationError(e.to_string()))?
        };

        let fields = KeywordFields::from_schema(&index.schema())?;

        let writer = index
            .writer(50_000_000) // 50MB buffer
            .map_err(|e| KeywordIndexError::InitializationError(e.to_string()))?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()
            .map_err(|e| KeywordIndexError::InitializationError(e.to_string()))?;

        Ok(Self {
            view: IndexView {
                index,
                reader,
                fields,
            },
            writer: Mutex::new(writer),
            index_path,
        })
    }

    fn schema() -> Schema {
        let mut schema_builder = Schema::builder();

        schema_builder.add_text_field("chunk_id", STRING | STORED);
        schema_builder.add_text_field("team_id", STRING);
        schema_builder.add_text_field("dataset_id", STRING);
        schema_builder.add_text_field("collection_id", STRING);
        schema_builder.add_text_field("text", TEXT);

        schema_builder.build()
    }

    /// Queue a document; visible to searches after `commit`
    pub fn insert(&self, document: &KeywordDocument) -> Result<(), KeywordIndexError> {
        let fields = self.view.fields;
        let doc = doc!(
            fields.chunk_id => document.chunk_id.as_str(),
            fields.team_id => document.team_id.as_str(),
            fields.dataset_id => document.dataset_id.as_str(),
            fields.collection_id => document.collection_id.as_str(),
            fields.text => document.text.as_str(),
        );

        let writer = self
            .writer
            .lock()
            .map_err(|e| KeywordIndexError::InsertError(e.to_string()))?;

        writer
            .add_document(doc)
            .map_err(|e| KeywordIndexError::InsertError(e.to_string()))?;

        Ok(())
    }

    /// Commit all pending changes
    pub fn commit(&self) -> Result<(), KeywordIndexError> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|e| KeywordIndexError::InsertError(e.to_string()))?;

        writer
            .commit()
            .map_err(|e| KeywordIndexError::InsertError(e.to_string()))?;

        self.view
            .reader
            .reload()
            .map_err(|e| KeywordIndexError::SearchError(e.to_string()))?;

        Ok(())
    }

    /// Delete a chunk's document by id; documents inserted afterwards survive
    pub fn delete(&self, chunk_id: &str) -> Result<(), KeywordIndexError> {
        let writer = self
            .writer
            .lock()
            .map_err(|e| KeywordIndexError::InsertError(e.to_string()))?;

        writer.delete_term(Term::from_field_text(self.view.fields.chunk_id, chunk_id));
        Ok(())
    }

    /// Get the number of documents in the index
    pub fn len(&self) -> u64 {
        self.view.reader.searcher().num_docs()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl IndexView {
    fn term(&self, field: Field, value: &str) -> Box<dyn Query> {
        Box::new(TermQuery::new(
            Term::from_field_text(field, value),
            IndexRecordOption::Basic,
        ))
    }

    fn filter(&self, query: Box<dyn Query>) -> Box<dyn Query> {
        Box::new(ConstScoreQuery::new(query, 0.0))
    }

    fn build_query(
        &self,
        team_id: &str,
        dataset_id: &str,
        text: &str,
        policy: &CollectionVisibilityPolicy,
    ) -> Box<dyn Query> {
        let parser = QueryParser::for_index(&self.index, vec![self.fields.text]);
        let (text_query, errors) = parser.parse_query_lenient(text);
        if !errors.is_empty() {
            tracing::debug!("Lenient query parse dropped {} fragments", errors.len());
        }

        let mut clauses: Vec<(Occur, Box<dyn Query>)> = vec![
            (Occur::Must, text_query),
            (
                Occur::Must,
                self.filter(self.term(self.fields.team_id, team_id)),
            ),
            (
                Occur::Must,
                self.filter(self.term(self.fields.dataset_id, dataset_id)),
            ),
        ];

        match policy {
            CollectionVisibilityPolicy::AllowList(ids) => {
                let any_of: Vec<(Occur, Box<dyn Query>)> = ids
                    .iter()
                    .map(|id| (Occur::Should, self.term(self.fields.collection_id, id)))
                    .collect();
                clauses.push((
                    Occur::Must,
                    self.filter(Box::new(BooleanQuery::new(any_of))),
                ));
            }
            CollectionVisibilityPolicy::ForbidList(ids) => {
                for id in ids {
                    clauses.push((Occur::MustNot, self.term(self.fields.collection_id, id)));
                }
            }
        }

        Box::new(BooleanQuery::new(clauses))
    }

    fn search(
        &self,
        team_id: &str,
        dataset_id: &str,
        text: &str,
        limit: usize,
        policy: &CollectionVisibilityPolicy,
    ) -> Result<Vec<LexicalHit>, KeywordIndexError> {
        let searcher = self.reader.searcher();
        let query = self.build_query(team_id, dataset_id, text, policy);

        let top_docs = searcher
            .search(query.as_ref(), &TopDocs::with_limit(limit))
            .map_err(|e| KeywordIndexError::SearchError(e.to_string()))?;

        let mut results = Vec::with_capacity(top_docs.len());
        for (score, doc_address) in top_docs {
            let retrieved_doc: TantivyDocument = searcher
                .doc(doc_address)
                .map_err(|e| KeywordIndexError::SearchError(e.to_string()))?;

            let chunk_id = retrieved_doc
                .get_first(self.fields.chunk_id)
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    KeywordIndexError::SearchError("Missing or invalid chunk_id field".to_string())
                })?;

            results.push(LexicalHit {
                chunk_id: chunk_id.to_string(),
                score: score as f64,
            });
        }

        Ok(results)
    }
}

#[async_trait]
impl LexicalEngine for KeywordIndex {
    async fn search(
        &self,
        team_id: &str,
        dataset_id: &str,
        text: &str,
        limit: usize,
        policy: &CollectionVisibilityPolicy,
    ) -> Result<Vec<LexicalHit>, KeywordIndexError> {
        if limit == 0 || policy.is_empty_allow_list() {
            return Ok(Vec::new());
        }

        let view = self.view.clone();
        let team_id = team_id.to_string();
        let dataset_id = dataset_id.to_string();
        let text = text.to_string();
        let policy = policy.clone();

        tokio::task::spawn_blocking(move || {
            view.search(&team_id, &dataset_id, &text, limit, &policy)
        })
        .await
        .map_err(|e| KeywordIndexError::SearchError(e.to_string()))?
    }
}
