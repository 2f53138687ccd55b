//! BM25 keyword index, backed by tantivy. Supports the boolean query surface
//! required by §4.1: AND/OR/NOT, parenthesised groups, quoted phrases, and
//! `*` prefix wildcards — all native to tantivy's `QueryParser` syntax.

use crate::error::EngineResult;
use std::path::Path;
use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::{self, Schema, STORED, STRING, TEXT, Value as TantivyValue};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument};
use thiserror::Error;

/// Distinguishes malformed queries (the user's fault) from backend/runtime
/// failures (ours), per §4.1's `KeywordQueryError`.
#[derive(Debug, Error)]
pub enum KeywordQueryError {
    #[error("query syntax error at position {position}: {message}")]
    Syntax { message: String, position: usize },
    #[error("keyword backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Clone)]
pub struct KeywordHit {
    pub chunk_id: String,
    pub document_id: String,
    pub content: String,
    pub bm25_score: f32,
}

pub struct KeywordIndex {
    index: Index,
    reader: IndexReader,
    writer: parking_lot::Mutex<IndexWriter>,
    id_field: schema::Field,
    document_id_field: schema::Field,
    text_field: schema::Field,
}

impl KeywordIndex {
    fn build_schema() -> (Schema, schema::Field, schema::Field, schema::Field) {
        let mut sb = Schema::builder();
        let id_field = sb.add_text_field("chunk_id", STRING | STORED);
        let document_id_field = sb.add_text_field("document_id", STRING | STORED);
        let text_field = sb.add_text_field("text", TEXT | STORED);
        (sb.build(), id_field, document_id_field, text_field)
    }

    pub fn open(data_dir: &Path) -> EngineResult<Self> {
        let index_path = data_dir.join("keyword_index");
        std::fs::create_dir_all(&index_path).map_err(|e| crate::error::EngineError::BackendUnavailable {
            backend: "keyword".to_string(),
            message: e.to_string(),
        })?;

        let (schema, id_field, document_id_field, text_field) = Self::build_schema();

        let index = {
            let dir = tantivy::directory::MmapDirectory::open(&index_path).map_err(kw_backend)?;
            if Index::exists(&dir).map_err(kw_backend)? {
                Index::open_in_dir(&index_path).map_err(kw_backend)?
            } else {
                Index::create_in_dir(&index_path, schema).map_err(kw_backend)?
            }
        };

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()
            .map_err(kw_backend)?;

        let writer = index.writer(50_000_000).map_err(kw_backend)?;

        Ok(Self {
            index,
            reader,
            writer: parking_lot::Mutex::new(writer),
            id_field,
            document_id_field,
            text_field,
        })
    }

    pub fn index_chunk(&self, chunk_id: &str, document_id: &str, text: &str) -> EngineResult<()> {
        let writer = self.writer.lock();
        writer
            .add_document(doc!(
                self.id_field => chunk_id,
                self.document_id_field => document_id,
                self.text_field => text,
            ))
            .map_err(kw_backend)?;
        Ok(())
    }

    pub fn commit(&self) -> EngineResult<()> {
        let mut writer = self.writer.lock();
        writer.commit().map_err(kw_backend)?;
        self.reader.reload().map_err(kw_backend)?;
        Ok(())
    }

    /// Parse and execute a boolean keyword query, returning BM25-ranked hits.
    pub fn search(&self, query: &str, k: usize) -> Result<Vec<KeywordHit>, KeywordQueryError> {
        let searcher = self.reader.searcher();
        let query_parser = QueryParser::for_index(&self.index, vec![self.text_field]);

        let parsed = query_parser.parse_query(query).map_err(|e| KeywordQueryError::Syntax {
            message: e.to_string(),
            position: 0,
        })?;

        let top_docs = searcher
            .search(&parsed, &TopDocs::with_limit(k))
            .map_err(|e| KeywordQueryError::Backend(e.to_string()))?;

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, addr) in top_docs {
            let doc: TantivyDocument = searcher
                .doc(addr)
                .map_err(|e| KeywordQueryError::Backend(e.to_string()))?;
            let chunk_id = doc
                .get_first(self.id_field)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let document_id = doc
                .get_first(self.document_id_field)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let content = doc
                .get_first(self.text_field)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            hits.push(KeywordHit {
                chunk_id,
                document_id,
                content,
                bm25_score: score,
            });
        }
        Ok(hits)
    }

    pub fn delete_by_chunk_id(&self, chunk_id: &str) -> EngineResult<()> {
        let writer = self.writer.lock();
        let term = tantivy::Term::from_field_text(self.id_field, chunk_id);
        writer.delete_term(term);
        Ok(())
    }

    pub fn delete_by_document(&self, document_id: &str) -> EngineResult<()> {
        let writer = self.writer.lock();
        let term = tantivy::Term::from_field_text(self.document_id_field, document_id);
        writer.delete_term(term);
        Ok(())
    }

    pub fn clear(&self) -> EngineResult<()> {
        let mut writer = self.writer.lock();
        writer.delete_all_documents().map_err(kw_backend)?;
        writer.commit().map_err(kw_backend)?;
        self.reader.reload().map_err(kw_backend)?;
        Ok(())
    }

    pub fn count(&self) -> EngineResult<usize> {
        Ok(self.reader.searcher().num_docs() as usize)
    }

    pub fn health(&self) -> EngineResult<()> {
        self.reader.searcher();
        Ok(())
    }
}

fn kw_backend(e: impl std::fmt::Display) -> crate::error::EngineError {
    crate::error::EngineError::BackendUnavailable {
        backend: "keyword".to_string(),
        message: e.to_string(),
    }
}

/// BM25 normalisation: `s_norm = min(1, raw / divisor)` (§4.2).
pub fn normalise_bm25(raw: f32, divisor: f32) -> f32 {
    (raw / divisor).min(1.0).max(0.0)
}
