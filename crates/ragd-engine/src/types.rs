//! Core data model: Document, Chunk, Citation, and the small value types
//! that travel with them across the store, searcher, and orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Document-level classification label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sensitivity {
    Public,
    Internal,
    Confidential,
}

impl Default for Sensitivity {
    fn default() -> Self {
        Self::Internal
    }
}

/// Extraction provenance recorded at ingest time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionMetadata {
    pub method: Option<String>,
    pub pages: Option<u32>,
}

/// Optional Dublin-Core bibliographic fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DublinCore {
    pub title: Option<String>,
    pub creator: Option<String>,
    pub date: Option<String>,
    pub subject: Option<String>,
}

/// A persistent record describing one ingested artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub document_id: String,
    pub path: String,
    pub filename: String,
    pub file_type: String,
    pub file_size: u64,
    pub chunk_count: usize,
    pub indexed_at: DateTime<Utc>,
    pub content_hash: String,
    pub extraction: ExtractionMetadata,
    pub embedding_model: String,
    pub embedding_dimension: usize,
    pub dublin_core: DublinCore,
    pub tags: Vec<String>,
    pub project: Option<String>,
    pub sensitivity: Sensitivity,
    pub schema_version: u32,
}

pub const CURRENT_SCHEMA_VERSION: u32 = 1;

impl Document {
    /// Derive a stable `document_id` deterministically from the canonical path.
    /// Using a content-independent hash of the path means re-ingesting the same
    /// path (even with edited content) keeps the same identity.
    pub fn derive_id(canonical_path: &str) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(canonical_path.as_bytes());
        format!("doc_{:x}", hasher.finalize())
    }
}

/// A contiguous text span produced from a document's normalised text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub document_id: String,
    pub text: String,
    pub chunk_index: usize,
    pub char_start: usize,
    pub char_end: usize,
    pub page_numbers: Option<Vec<u32>>,
    pub section: Option<String>,
    /// Document-level gloss prepended during contextual ingestion, if any.
    pub context: Option<String>,
    pub metadata: HashMap<String, String>,
}

impl Chunk {
    pub fn make_id(document_id: &str, index: usize) -> String {
        format!("{document_id}_chunk_{index}")
    }

    /// Text actually embedded/indexed: context gloss (if any) followed by body.
    pub fn indexable_text(&self) -> String {
        match &self.context {
            Some(ctx) if !ctx.is_empty() => format!("{ctx} {}", self.text),
            _ => self.text.clone(),
        }
    }
}

/// `{document_id, filename, optional page(s), optional char span}` — cited by
/// a chat turn or emitted by the context builder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    pub document_id: String,
    pub filename: String,
    pub page_number: Option<u32>,
    pub all_pages: Option<Vec<u32>>,
    pub char_start: Option<usize>,
    pub char_end: Option<usize>,
    pub relevance: Option<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
    pub citations: Vec<Citation>,
    pub timestamp: DateTime<Utc>,
}

/// A mapping from `document_id` to a set of tag strings with provenance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagProvenance {
    Manual,
    Suggested,
    Imported,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagAssignment {
    pub document_id: String,
    pub tags: Vec<String>,
    pub provenance: TagProvenance,
    pub confidence: Option<f32>,
}

/// Result of a hybrid/semantic/keyword search over the index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub content: String,
    pub combined_score: f32,
    pub semantic_score: Option<f32>,
    pub keyword_score: Option<f32>,
    pub semantic_rank: Option<usize>,
    pub keyword_rank: Option<usize>,
    pub rrf_score: f32,
    pub document_id: String,
    pub filename: String,
    pub chunk_id: String,
    pub chunk_index: usize,
    pub metadata: HashMap<String, String>,
    pub location: Option<ChunkLocation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkLocation {
    pub page_numbers: Option<Vec<u32>>,
    pub char_start: usize,
    pub char_end: usize,
}

/// `IndexStore::stats()` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexStats {
    pub document_count: usize,
    pub chunk_count: usize,
    pub dimension: usize,
    pub backend_type: String,
    pub index_size_bytes: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub latency_ms: u64,
    pub message: String,
}
