//! Relational side of the index: `documents` and `vector_metadata` tables in
//! a dedicated SQLite database, separate from the vector backend's own
//! columnar metadata (§4.1.1). Connections are opened per-operation rather
//! than held for the engine's lifetime, so this store never contends for
//! SQLite's single writer lock with the long-lived vector/keyword handles.

use crate::error::{EngineError, EngineResult};
use crate::filter::Filter;
use crate::types::{Chunk, Document, ExtractionMetadata, DublinCore, Sensitivity};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

pub struct MetadataStore {
    pool: SqlitePool,
}

/// Search-time fields that live outside a chunk's generic metadata map:
/// the owning document's filename plus its position in the original text.
#[derive(Debug, Clone)]
pub struct ChunkEnrichment {
    pub filename: String,
    pub chunk_index: usize,
    pub page_numbers: Option<Vec<u32>>,
    pub char_start: usize,
    pub char_end: usize,
}

impl MetadataStore {
    pub async fn open(path: &Path) -> EngineResult<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))
            .map_err(|e| EngineError::BackendUnavailable {
                backend: "metadata".to_string(),
                message: e.to_string(),
            })?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| EngineError::BackendUnavailable {
                backend: "metadata".to_string(),
                message: e.to_string(),
            })?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> EngineResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS documents (
                document_id TEXT PRIMARY KEY,
                path TEXT NOT NULL,
                filename TEXT NOT NULL,
                file_type TEXT NOT NULL,
                file_size INTEGER NOT NULL,
                chunk_count INTEGER NOT NULL,
                indexed_at TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                extraction_json TEXT NOT NULL,
                embedding_model TEXT NOT NULL,
                embedding_dimension INTEGER NOT NULL,
                dublin_core_json TEXT NOT NULL,
                tags_json TEXT NOT NULL,
                project TEXT,
                sensitivity TEXT NOT NULL,
                schema_version INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_content_hash ON documents(content_hash)")
            .execute(&self.pool)
            .await
            .map_err(store_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS vector_metadata (
                vector_id TEXT PRIMARY KEY,
                chunk_id TEXT NOT NULL UNIQUE,
                document_id TEXT NOT NULL,
                content TEXT NOT NULL,
                metadata_json TEXT NOT NULL,
                chunk_json TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_vector_metadata_document_id ON vector_metadata(document_id)")
            .execute(&self.pool)
            .await
            .map_err(store_err)?;

        Ok(())
    }

    pub async fn insert_document(&self, doc: &Document) -> EngineResult<()> {
        let extraction_json = serde_json::to_string(&doc.extraction).map_err(internal_err)?;
        let dublin_core_json = serde_json::to_string(&doc.dublin_core).map_err(internal_err)?;
        let tags_json = serde_json::to_string(&doc.tags).map_err(internal_err)?;
        let sensitivity = serde_json::to_value(doc.sensitivity)
            .map_err(internal_err)?
            .as_str()
            .unwrap_or("internal")
            .to_string();

        sqlx::query(
            "INSERT INTO documents
             (document_id, path, filename, file_type, file_size, chunk_count, indexed_at,
              content_hash, extraction_json, embedding_model, embedding_dimension,
              dublin_core_json, tags_json, project, sensitivity, schema_version)
             VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?)",
        )
        .bind(&doc.document_id)
        .bind(&doc.path)
        .bind(&doc.filename)
        .bind(&doc.file_type)
        .bind(doc.file_size as i64)
        .bind(doc.chunk_count as i64)
        .bind(doc.indexed_at.to_rfc3339())
        .bind(&doc.content_hash)
        .bind(extraction_json)
        .bind(&doc.embedding_model)
        .bind(doc.embedding_dimension as i64)
        .bind(dublin_core_json)
        .bind(tags_json)
        .bind(&doc.project)
        .bind(sensitivity)
        .bind(doc.schema_version as i64)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(())
    }

    pub async fn insert_vector_metadata(&self, chunk: &Chunk) -> EngineResult<()> {
        let metadata_json = serde_json::to_string(&chunk.metadata).map_err(internal_err)?;
        let chunk_json = serde_json::to_string(chunk).map_err(internal_err)?;
        sqlx::query(
            "INSERT INTO vector_metadata (vector_id, chunk_id, document_id, content, metadata_json, chunk_json)
             VALUES (?,?,?,?,?,?)",
        )
        .bind(&chunk.chunk_id)
        .bind(&chunk.chunk_id)
        .bind(&chunk.document_id)
        .bind(&chunk.text)
        .bind(metadata_json)
        .bind(chunk_json)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    pub async fn document_exists_by_hash(&self, content_hash: &str) -> EngineResult<Option<String>> {
        let row = sqlx::query("SELECT document_id FROM documents WHERE content_hash = ? LIMIT 1")
            .bind(content_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(row.map(|r| r.get::<String, _>("document_id")))
    }

    pub async fn get_document(&self, document_id: &str) -> EngineResult<Option<Document>> {
        let row = sqlx::query("SELECT * FROM documents WHERE document_id = ?")
            .bind(document_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;
        row.map(row_to_document).transpose()
    }

    pub async fn list_documents(&self, filter: Option<&Filter>) -> EngineResult<Vec<Document>> {
        let rows = sqlx::query("SELECT * FROM documents ORDER BY indexed_at DESC")
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;

        let mut docs = Vec::with_capacity(rows.len());
        for row in rows {
            let doc = row_to_document(row)?;
            if let Some(f) = filter {
                let as_row = document_filter_row(&doc);
                if !f.matches(&as_row) {
                    continue;
                }
            }
            docs.push(doc);
        }
        Ok(docs)
    }

    pub async fn delete_document(&self, document_id: &str) -> EngineResult<()> {
        sqlx::query("DELETE FROM vector_metadata WHERE document_id = ?")
            .bind(document_id)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        sqlx::query("DELETE FROM documents WHERE document_id = ?")
            .bind(document_id)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    /// Candidate `chunk_id`s satisfying a metadata filter, for the two-stage
    /// filtered ANN path (§4.1 "Two-stage filtered ANN").
    pub async fn candidate_chunk_ids(&self, filter: &Filter) -> EngineResult<Vec<String>> {
        let rows = sqlx::query(
            "SELECT vm.chunk_id, vm.metadata_json, vm.document_id, d.sensitivity, d.project, d.file_size
             FROM vector_metadata vm JOIN documents d ON vm.document_id = d.document_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        let mut out = Vec::new();
        for row in rows {
            let chunk_id: String = row.get("chunk_id");
            let metadata_json: String = row.get("metadata_json");
            let mut fields: HashMap<String, String> =
                serde_json::from_str(&metadata_json).unwrap_or_default();
            fields.insert("document_id".to_string(), row.get("document_id"));
            fields.insert("sensitivity".to_string(), row.get("sensitivity"));
            if let Some(project) = row.get::<Option<String>, _>("project") {
                fields.insert("project".to_string(), project);
            }
            fields.insert("file_size".to_string(), row.get::<i64, _>("file_size").to_string());

            if filter.matches(&fields) {
                out.push(chunk_id);
            }
        }
        Ok(out)
    }

    pub async fn get_chunks_metadata(
        &self,
        chunk_ids: &[String],
    ) -> EngineResult<HashMap<String, (String, String, HashMap<String, String>)>> {
        let mut out = HashMap::new();
        for chunk_id in chunk_ids {
            let row = sqlx::query(
                "SELECT document_id, content, metadata_json FROM vector_metadata WHERE chunk_id = ?",
            )
            .bind(chunk_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;

            if let Some(row) = row {
                let document_id: String = row.get("document_id");
                let content: String = row.get("content");
                let metadata_json: String = row.get("metadata_json");
                let metadata: HashMap<String, String> =
                    serde_json::from_str(&metadata_json).unwrap_or_default();
                out.insert(chunk_id.clone(), (document_id, content, metadata));
            }
        }
        Ok(out)
    }

    /// Search-time enrichment (filename, chunk index, location) joining
    /// `vector_metadata.chunk_json` with the owning document's filename.
    /// Separate from [`Self::get_chunks_metadata`] because the hot search
    /// path only needs these fields, not the arbitrary per-chunk metadata map.
    pub async fn get_chunks_enrichment(
        &self,
        chunk_ids: &[String],
    ) -> EngineResult<HashMap<String, ChunkEnrichment>> {
        let mut out = HashMap::new();
        for chunk_id in chunk_ids {
            let row = sqlx::query(
                "SELECT vm.chunk_json, d.filename
                 FROM vector_metadata vm JOIN documents d ON vm.document_id = d.document_id
                 WHERE vm.chunk_id = ?",
            )
            .bind(chunk_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;

            if let Some(row) = row {
                let chunk_json: String = row.get("chunk_json");
                let filename: String = row.get("filename");
                let chunk: Chunk = serde_json::from_str(&chunk_json).map_err(internal_err)?;
                out.insert(
                    chunk_id.clone(),
                    ChunkEnrichment {
                        filename,
                        chunk_index: chunk.chunk_index,
                        page_numbers: chunk.page_numbers,
                        char_start: chunk.char_start,
                        char_end: chunk.char_end,
                    },
                );
            }
        }
        Ok(out)
    }

    /// Full `Chunk` records for archive export, where the generic
    /// `(document_id, content, metadata)` projection used by search isn't
    /// enough to round-trip `char_start`/`page_numbers`/`section`/`context`.
    pub async fn get_full_chunks(&self, document_id: &str) -> EngineResult<Vec<Chunk>> {
        let rows = sqlx::query("SELECT chunk_json FROM vector_metadata WHERE document_id = ?")
            .bind(document_id)
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;

        let mut chunks = Vec::with_capacity(rows.len());
        for row in rows {
            let chunk_json: String = row.get("chunk_json");
            chunks.push(serde_json::from_str(&chunk_json).map_err(internal_err)?);
        }
        chunks.sort_by_key(|c: &Chunk| c.chunk_index);
        Ok(chunks)
    }

    pub async fn document_count(&self) -> EngineResult<usize> {
        let row = sqlx::query("SELECT COUNT(*) as c FROM documents")
            .fetch_one(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(row.get::<i64, _>("c") as usize)
    }

    pub async fn chunk_count(&self) -> EngineResult<usize> {
        let row = sqlx::query("SELECT COUNT(*) as c FROM vector_metadata")
            .fetch_one(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(row.get::<i64, _>("c") as usize)
    }

    pub async fn health_check(&self) -> EngineResult<()> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await.map_err(store_err)?;
        Ok(())
    }

    pub async fn reset(&self) -> EngineResult<()> {
        sqlx::query("DELETE FROM vector_metadata").execute(&self.pool).await.map_err(store_err)?;
        sqlx::query("DELETE FROM documents").execute(&self.pool).await.map_err(store_err)?;
        Ok(())
    }
}

fn document_filter_row(doc: &Document) -> HashMap<String, String> {
    let mut row = HashMap::new();
    row.insert("document_id".to_string(), doc.document_id.clone());
    row.insert("filename".to_string(), doc.filename.clone());
    row.insert("file_type".to_string(), doc.file_type.clone());
    row.insert("file_size".to_string(), doc.file_size.to_string());
    row.insert(
        "sensitivity".to_string(),
        match doc.sensitivity {
            Sensitivity::Public => "public".to_string(),
            Sensitivity::Internal => "internal".to_string(),
            Sensitivity::Confidential => "confidential".to_string(),
        },
    );
    if let Some(project) = &doc.project {
        row.insert("project".to_string(), project.clone());
    }
    row
}

fn row_to_document(row: sqlx::sqlite::SqliteRow) -> EngineResult<Document> {
    let extraction_json: String = row.get("extraction_json");
    let dublin_core_json: String = row.get("dublin_core_json");
    let tags_json: String = row.get("tags_json");
    let sensitivity_str: String = row.get("sensitivity");
    let indexed_at_str: String = row.get("indexed_at");

    let extraction: ExtractionMetadata = serde_json::from_str(&extraction_json).unwrap_or_default();
    let dublin_core: DublinCore = serde_json::from_str(&dublin_core_json).unwrap_or_default();
    let tags: Vec<String> = serde_json::from_str(&tags_json).unwrap_or_default();
    let sensitivity = match sensitivity_str.as_str() {
        "public" => Sensitivity::Public,
        "confidential" => Sensitivity::Confidential,
        _ => Sensitivity::Internal,
    };
    let indexed_at = chrono::DateTime::parse_from_rfc3339(&indexed_at_str)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(internal_err)?;

    Ok(Document {
        document_id: row.get("document_id"),
        path: row.get("path"),
        filename: row.get("filename"),
        file_type: row.get("file_type"),
        file_size: row.get::<i64, _>("file_size") as u64,
        chunk_count: row.get::<i64, _>("chunk_count") as usize,
        indexed_at,
        content_hash: row.get("content_hash"),
        extraction,
        embedding_model: row.get("embedding_model"),
        embedding_dimension: row.get::<i64, _>("embedding_dimension") as usize,
        dublin_core,
        tags,
        project: row.get("project"),
        sensitivity,
        schema_version: row.get::<i64, _>("schema_version") as u32,
    })
}

fn store_err(e: sqlx::Error) -> EngineError {
    EngineError::BackendUnavailable {
        backend: "metadata".to_string(),
        message: e.to_string(),
    }
}

fn internal_err(e: impl std::fmt::Display) -> EngineError {
    EngineError::Internal(e.to_string())
}
