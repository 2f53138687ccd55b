//! The `IndexStore`: owns the three coupled physical stores (vector,
//! keyword, metadata) and guarantees cross-store consistency per document
//! (§4.1).

pub mod keyword;
pub mod metadata;
pub mod vector;

use crate::config::BackendConfig;
use crate::error::{EngineError, EngineResult};
use crate::filter::{Filter, FilterValue};
use crate::types::{Chunk, Document, HealthReport, HealthStatus, IndexStats};
use keyword::{KeywordIndex, KeywordQueryError};
use metadata::{ChunkEnrichment, MetadataStore};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Instant;
use vector::{cosine_similarity, LanceVectorStore, VectorStore};

pub struct SemanticHit {
    pub chunk_id: String,
    pub score: f32,
    pub content: String,
    pub document_id: String,
    pub metadata: HashMap<String, String>,
    pub filename: String,
    pub chunk_index: usize,
    pub page_numbers: Option<Vec<u32>>,
    pub char_start: usize,
    pub char_end: usize,
}

pub struct KeywordHitRow {
    pub chunk_id: String,
    pub document_id: String,
    pub content: String,
    pub bm25_score: f32,
    pub rank: usize,
    pub filename: String,
    pub chunk_index: usize,
    pub page_numbers: Option<Vec<u32>>,
    pub char_start: usize,
    pub char_end: usize,
}

fn enrich_or_default(enrichment: &HashMap<String, ChunkEnrichment>, chunk_id: &str, document_id: &str) -> ChunkEnrichment {
    enrichment.get(chunk_id).cloned().unwrap_or_else(|| ChunkEnrichment {
        filename: document_id.to_string(),
        chunk_index: 0,
        page_numbers: None,
        char_start: 0,
        char_end: 0,
    })
}

pub struct AddDocumentOutcome {
    pub skipped: bool,
    pub existing_document_id: Option<String>,
}

/// Cross-store writer lock: §5 requires add/delete_document to be serialised
/// while search never takes this lock.
pub struct IndexStore {
    vector: Box<dyn VectorStore>,
    keyword: KeywordIndex,
    metadata: MetadataStore,
    dimension: usize,
    write_lock: tokio::sync::Mutex<()>,
}

impl IndexStore {
    pub async fn open(data_dir: &Path, dimension: usize, backend: BackendConfig) -> EngineResult<Self> {
        std::fs::create_dir_all(data_dir).map_err(|e| EngineError::BackendUnavailable {
            backend: "index".to_string(),
            message: e.to_string(),
        })?;

        let vector = LanceVectorStore::open(&data_dir.join("vector"), dimension, backend).await?;
        let keyword = KeywordIndex::open(data_dir)?;
        let metadata = MetadataStore::open(&data_dir.join("metadata.db")).await?;

        Ok(Self {
            vector: Box::new(vector),
            keyword,
            metadata,
            dimension,
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Atomically add one document with all its chunks, vectors, and
    /// metadata. Applies metadata → vectors → keyword postings in order;
    /// on failure, compensates by deleting whatever already landed.
    pub async fn add_document(
        &self,
        document: &Document,
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
        skip_duplicates: bool,
    ) -> EngineResult<AddDocumentOutcome> {
        let _guard = self.write_lock.lock().await;

        if let Some(existing) = self.metadata.document_exists_by_hash(&document.content_hash).await? {
            if skip_duplicates {
                return Ok(AddDocumentOutcome {
                    skipped: true,
                    existing_document_id: Some(existing),
                });
            }
            return Err(EngineError::DuplicateContent {
                content_hash: document.content_hash.clone(),
                existing_document_id: existing,
            });
        }

        for v in vectors {
            if v.len() != self.dimension {
                return Err(EngineError::DimensionMismatch {
                    expected: self.dimension,
                    actual: v.len(),
                });
            }
        }
        if chunks.len() != vectors.len() {
            return Err(EngineError::Validation {
                message: format!(
                    "chunk count ({}) does not match vector count ({})",
                    chunks.len(),
                    vectors.len()
                ),
            });
        }

        tracing::info!(document_id = %document.document_id, chunk_count = chunks.len(), "indexing document");

        // 1. metadata
        self.metadata.insert_document(document).await?;
        for chunk in chunks {
            if let Err(e) = self.metadata.insert_vector_metadata(chunk).await {
                self.metadata.delete_document(&document.document_id).await.ok();
                return Err(e);
            }
        }

        // 2. vectors
        let entries: Vec<(String, Vec<f32>)> = chunks
            .iter()
            .zip(vectors.iter())
            .map(|(c, v)| (c.chunk_id.clone(), v.clone()))
            .collect();
        if let Err(e) = self.vector.add_batch(&entries).await {
            self.metadata.delete_document(&document.document_id).await.ok();
            return Err(e);
        }

        // 3. keyword postings
        for chunk in chunks {
            if let Err(e) = self
                .keyword
                .index_chunk(&chunk.chunk_id, &chunk.document_id, &chunk.indexable_text())
            {
                let ids: Vec<String> = chunks.iter().map(|c| c.chunk_id.clone()).collect();
                self.vector.delete(&ids).await.ok();
                self.metadata.delete_document(&document.document_id).await.ok();
                return Err(e);
            }
        }
        self.keyword.commit()?;

        Ok(AddDocumentOutcome {
            skipped: false,
            existing_document_id: None,
        })
    }

    pub async fn delete_document(&self, document_id: &str) -> EngineResult<bool> {
        let _guard = self.write_lock.lock().await;

        let existed = self.metadata.get_document(document_id).await?.is_some();
        if !existed {
            return Ok(false);
        }

        let chunk_ids: Vec<String> = self
            .metadata
            .candidate_chunk_ids(&Filter::eq("document_id", FilterValue::Str(document_id.to_string())))
            .await?;

        self.vector.delete(&chunk_ids).await?;
        self.keyword.delete_by_document(document_id)?;
        self.keyword.commit()?;
        self.metadata.delete_document(document_id).await?;

        tracing::info!(document_id = %document_id, chunks_removed = chunk_ids.len(), "deleted document");
        Ok(true)
    }

    pub async fn get_document(&self, document_id: &str) -> EngineResult<Option<Document>> {
        self.metadata.get_document(document_id).await
    }

    pub async fn list_documents(&self, filter: Option<&Filter>) -> EngineResult<Vec<Document>> {
        self.metadata.list_documents(filter).await
    }

    pub async fn document_exists(&self, content_hash: &str) -> EngineResult<Option<String>> {
        self.metadata.document_exists_by_hash(content_hash).await
    }

    /// `vector_search` per §4.1: scores are cosine-normalised to [0, 1].
    /// When `filter` is present, implements the two-stage filtered ANN
    /// policy: exact scoring below `exact_filter_multiple * k` candidates,
    /// otherwise an over-fetch-and-intersect delegated to the backend.
    pub async fn vector_search(
        &self,
        query_vector: &[f32],
        k: usize,
        filter: Option<&Filter>,
        exact_filter_multiple: usize,
    ) -> EngineResult<Vec<SemanticHit>> {
        let candidates = match filter {
            Some(f) => Some(self.metadata.candidate_chunk_ids(f).await?),
            None => None,
        };

        let hits = match &candidates {
            Some(ids) if ids.len() <= exact_filter_multiple * k => {
                self.score_candidates_exactly(query_vector, ids, k).await?
            }
            Some(ids) => {
                let set: HashSet<String> = ids.iter().cloned().collect();
                self.vector.search(query_vector, k, Some(&set)).await?
            }
            None => self.vector.search(query_vector, k, None).await?,
        };

        let chunk_ids: Vec<String> = hits.iter().map(|h| h.chunk_id.clone()).collect();
        let rows = self.metadata.get_chunks_metadata(&chunk_ids).await?;
        let enrichment = self.metadata.get_chunks_enrichment(&chunk_ids).await?;

        let mut out = Vec::with_capacity(hits.len());
        for hit in hits {
            if let Some((document_id, content, metadata)) = rows.get(&hit.chunk_id) {
                let e = enrich_or_default(&enrichment, &hit.chunk_id, document_id);
                out.push(SemanticHit {
                    chunk_id: hit.chunk_id,
                    score: hit.score,
                    content: content.clone(),
                    document_id: document_id.clone(),
                    metadata: metadata.clone(),
                    filename: e.filename,
                    chunk_index: e.chunk_index,
                    page_numbers: e.page_numbers,
                    char_start: e.char_start,
                    char_end: e.char_end,
                });
            }
            // Chunks missing a metadata row are dropped — the read-time
            // safety net for partial writes (§4.1 "Atomicity").
        }
        Ok(out)
    }

    async fn score_candidates_exactly(
        &self,
        query_vector: &[f32],
        candidate_ids: &[String],
        k: usize,
    ) -> EngineResult<Vec<vector::VectorHit>> {
        let mut scored = Vec::with_capacity(candidate_ids.len());
        for id in candidate_ids {
            if let Some(vector) = self.vector.get(id).await? {
                let score = vector::normalise_cosine(cosine_similarity(query_vector, &vector));
                scored.push(vector::VectorHit {
                    chunk_id: id.clone(),
                    score,
                });
            }
        }
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    pub async fn keyword_search(&self, query: &str, k: usize) -> Result<Vec<KeywordHitRow>, KeywordQueryError> {
        let hits = self.keyword.search(query, k)?;
        let chunk_ids: Vec<String> = hits.iter().map(|h| h.chunk_id.clone()).collect();
        let enrichment = self
            .metadata
            .get_chunks_enrichment(&chunk_ids)
            .await
            .map_err(|e| KeywordQueryError::Backend(e.to_string()))?;

        Ok(hits
            .into_iter()
            .enumerate()
            .map(|(rank, h)| {
                let e = enrich_or_default(&enrichment, &h.chunk_id, &h.document_id);
                KeywordHitRow {
                    chunk_id: h.chunk_id,
                    document_id: h.document_id,
                    content: h.content,
                    bm25_score: h.bm25_score,
                    rank,
                    filename: e.filename,
                    chunk_index: e.chunk_index,
                    page_numbers: e.page_numbers,
                    char_start: e.char_start,
                    char_end: e.char_end,
                }
            })
            .collect())
    }

    pub async fn get_chunks_by_ids(&self, chunk_ids: &[String]) -> EngineResult<Vec<SemanticHit>> {
        let rows = self.metadata.get_chunks_metadata(chunk_ids).await?;
        let enrichment = self.metadata.get_chunks_enrichment(chunk_ids).await?;
        Ok(chunk_ids
            .iter()
            .filter_map(|id| {
                rows.get(id).map(|(document_id, content, metadata)| {
                    let e = enrich_or_default(&enrichment, id, document_id);
                    SemanticHit {
                        chunk_id: id.clone(),
                        score: 0.0,
                        content: content.clone(),
                        document_id: document_id.clone(),
                        metadata: metadata.clone(),
                        filename: e.filename,
                        chunk_index: e.chunk_index,
                        page_numbers: e.page_numbers,
                        char_start: e.char_start,
                        char_end: e.char_end,
                    }
                })
            })
            .collect())
    }

    /// Full `Chunk` records for one document (char spans, page numbers,
    /// section, context gloss), used by the archive exporter which needs
    /// more than the generic search-time projection.
    pub async fn get_full_chunks(&self, document_id: &str) -> EngineResult<Vec<Chunk>> {
        self.metadata.get_full_chunks(document_id).await
    }

    /// Raw vector for one chunk, used by the archive exporter. Not on the
    /// search hot path (search returns vectors only as scores).
    pub async fn get_vector(&self, chunk_id: &str) -> EngineResult<Option<Vec<f32>>> {
        self.vector.get(chunk_id).await
    }

    pub async fn stats(&self) -> EngineResult<IndexStats> {
        Ok(IndexStats {
            document_count: self.metadata.document_count().await?,
            chunk_count: self.metadata.chunk_count().await?,
            dimension: self.dimension,
            backend_type: format!("{:?}", self.vector.current_tier()),
            index_size_bytes: None,
        })
    }

    pub async fn health_check(&self) -> HealthReport {
        let start = Instant::now();
        let vector_ok = self.vector.health().await;
        let keyword_ok = self.keyword.health();
        let metadata_ok = self.metadata.health_check().await;

        let latency_ms = start.elapsed().as_millis() as u64;
        let failures: Vec<&str> = [
            vector_ok.err().map(|_| "vector"),
            keyword_ok.err().map(|_| "keyword"),
            metadata_ok.err().map(|_| "metadata"),
        ]
        .into_iter()
        .flatten()
        .collect();

        if failures.is_empty() {
            HealthReport {
                status: HealthStatus::Healthy,
                latency_ms,
                message: "all stores reachable".to_string(),
            }
        } else if failures.len() < 3 {
            HealthReport {
                status: HealthStatus::Degraded,
                latency_ms,
                message: format!("unreachable: {}", failures.join(", ")),
            }
        } else {
            HealthReport {
                status: HealthStatus::Unhealthy,
                latency_ms,
                message: "no store reachable".to_string(),
            }
        }
    }

    pub async fn persist(&self) -> EngineResult<()> {
        self.vector.persist().await
    }

    pub async fn reset(&self) -> EngineResult<()> {
        let _guard = self.write_lock.lock().await;
        self.vector.reset().await?;
        self.keyword.clear()?;
        self.metadata.reset().await?;
        Ok(())
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }
}
