//! Turns extracted document text into an indexed `Document` (§4.5). The
//! coordinator does not extract text from raw files itself — that lives
//! upstream of this crate — but it gates, chunks, embeds, and classifies
//! whatever extraction handed it.

use crate::chunking::TextChunker;
use crate::config::{ChunkingConfig, EmbeddingConfig};
use crate::embeddings::Embedder;
use crate::error::{EngineError, EngineResult, FailureCategory};
use crate::store::IndexStore;
use crate::types::{CURRENT_SCHEMA_VERSION, Document, DublinCore, ExtractionMetadata, Sensitivity};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Signal from the upstream extractor that this text could not be produced
/// cleanly, so the coordinator should refuse rather than index noise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionHint {
    ImageOnly,
    Encrypted,
    JsRendered,
}

pub struct IngestRequest {
    pub path: String,
    pub filename: String,
    pub file_type: String,
    pub file_size: u64,
    pub text: String,
    pub extraction_hint: Option<ExtractionHint>,
    pub extraction_method: Option<String>,
    pub pages: Option<u32>,
    pub dublin_core: DublinCore,
    pub tags: Vec<String>,
    pub project: Option<String>,
    pub sensitivity: Sensitivity,
    pub skip_duplicates: bool,
}

pub struct IngestOutcome {
    pub document_id: String,
    pub chunk_count: usize,
    pub skipped: bool,
}

/// Surfaced when a document is rejected before it ever reaches the store,
/// distinct from `EngineError` because it carries a `FailureCategory` the
/// caller can use to decide whether retrying makes sense (§4.5).
#[derive(Debug)]
pub struct IngestFailure {
    pub category: FailureCategory,
    pub message: String,
}

impl std::fmt::Display for IngestFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.category, self.message)
    }
}

impl std::error::Error for IngestFailure {}

#[derive(Debug)]
pub enum IngestError {
    Classified(IngestFailure),
    Engine(EngineError),
}

impl From<EngineError> for IngestError {
    fn from(e: EngineError) -> Self {
        Self::Engine(e)
    }
}

impl std::fmt::Display for IngestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Classified(c) => write!(f, "{c}"),
            Self::Engine(e) => write!(f, "{e}"),
        }
    }
}

/// A document's text is too short to be chunked usefully below this length,
/// independent of the chunker's own `min_chunk_size` (which bounds individual
/// chunks, not the whole document).
const MIN_DOCUMENT_LEN: usize = 40;

pub struct IngestCoordinator {
    store: Arc<IndexStore>,
    embedder: Arc<dyn Embedder>,
    chunking: ChunkingConfig,
    embedding: EmbeddingConfig,
}

impl IngestCoordinator {
    pub fn new(store: Arc<IndexStore>, embedder: Arc<dyn Embedder>, chunking: ChunkingConfig, embedding: EmbeddingConfig) -> Self {
        Self {
            store,
            embedder,
            chunking,
            embedding,
        }
    }

    pub async fn ingest(&self, request: IngestRequest) -> Result<IngestOutcome, IngestError> {
        if let Some(category) = classify_pre_chunk(&request) {
            return Err(IngestError::Classified(IngestFailure {
                category,
                message: format!("rejected before indexing: {category}"),
            }));
        }

        let content_hash = hash_content(&request.text);

        if let Some(existing) = self.store.document_exists(&content_hash).await? {
            if request.skip_duplicates {
                return Ok(IngestOutcome {
                    document_id: existing,
                    chunk_count: 0,
                    skipped: true,
                });
            }
            return Err(IngestError::Engine(EngineError::DuplicateContent {
                content_hash,
                existing_document_id: existing,
            }));
        }

        let document_id = Document::derive_id(&request.path);

        let chunker = TextChunker::new(
            self.chunking.chunk_size,
            self.chunking.chunk_overlap,
            self.chunking.min_chunk_size,
        );
        let chunks = chunker.chunk(
            &document_id,
            &request.text,
            request.dublin_core.title.as_deref(),
            Some(&request.filename),
            self.chunking.contextual_ingestion,
        );

        if chunks.is_empty() {
            return Err(IngestError::Classified(IngestFailure {
                category: FailureCategory::TooShort,
                message: "no chunk met the configured minimum chunk size".to_string(),
            }));
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.indexable_text()).collect();
        let vectors = self
            .embedder
            .embed_documents(&texts)
            .await
            .map_err(IngestError::Engine)?;

        for v in &vectors {
            if v.len() != self.embedding.dimension {
                return Err(IngestError::Engine(EngineError::DimensionMismatch {
                    expected: self.embedding.dimension,
                    actual: v.len(),
                }));
            }
        }

        let document = Document {
            document_id: document_id.clone(),
            path: request.path,
            filename: request.filename,
            file_type: request.file_type,
            file_size: request.file_size,
            chunk_count: chunks.len(),
            indexed_at: Utc::now(),
            content_hash,
            extraction: ExtractionMetadata {
                method: request.extraction_method,
                pages: request.pages,
            },
            embedding_model: self.embedding.model.clone(),
            embedding_dimension: self.embedding.dimension,
            dublin_core: request.dublin_core,
            tags: request.tags,
            project: request.project,
            sensitivity: request.sensitivity,
            schema_version: CURRENT_SCHEMA_VERSION,
        };

        let outcome = self
            .store
            .add_document(&document, &chunks, &vectors, request.skip_duplicates)
            .await?;

        Ok(IngestOutcome {
            document_id,
            chunk_count: chunks.len(),
            skipped: outcome.skipped,
        })
    }
}

fn hash_content(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

fn classify_pre_chunk(request: &IngestRequest) -> Option<FailureCategory> {
    match request.extraction_hint {
        Some(ExtractionHint::ImageOnly) => return Some(FailureCategory::ImageOnly),
        Some(ExtractionHint::Encrypted) => return Some(FailureCategory::Encrypted),
        Some(ExtractionHint::JsRendered) => return Some(FailureCategory::JsRendered),
        None => {}
    }

    let trimmed = request.text.trim();
    if trimmed.is_empty() {
        return Some(FailureCategory::Empty);
    }
    if trimmed.len() < MIN_DOCUMENT_LEN {
        return Some(FailureCategory::TooShort);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_request(text: &str) -> IngestRequest {
        IngestRequest {
            path: "/tmp/doc.txt".to_string(),
            filename: "doc.txt".to_string(),
            file_type: "text/plain".to_string(),
            file_size: text.len() as u64,
            text: text.to_string(),
            extraction_hint: None,
            extraction_method: None,
            pages: None,
            dublin_core: DublinCore::default(),
            tags: Vec::new(),
            project: None,
            sensitivity: Sensitivity::default(),
            skip_duplicates: true,
        }
    }

    #[test]
    fn classifies_empty_text() {
        let req = base_request("   ");
        assert_eq!(classify_pre_chunk(&req), Some(FailureCategory::Empty));
    }

    #[test]
    fn classifies_too_short_text() {
        let req = base_request("hi there");
        assert_eq!(classify_pre_chunk(&req), Some(FailureCategory::TooShort));
    }

    #[test]
    fn extraction_hint_takes_priority() {
        let mut req = base_request("a perfectly long and reasonable document body right here");
        req.extraction_hint = Some(ExtractionHint::Encrypted);
        assert_eq!(classify_pre_chunk(&req), Some(FailureCategory::Encrypted));
    }

    #[test]
    fn content_hash_is_stable() {
        assert_eq!(hash_content("same text"), hash_content("same text"));
        assert_ne!(hash_content("same text"), hash_content("different text"));
    }
}
