//! Shared test doubles for the scenario-level integration tests (§8).
//!
//! Both the embedder and the generator are external collaborators the engine
//! never implements itself (§1), so every integration test supplies a fake
//! rather than reaching out over the network.

use async_trait::async_trait;
use ragd_engine::embeddings::Embedder;
use ragd_engine::generator::{GenerationRequest, GenerationResponse, Generator, TokenStream};
use ragd_engine::ingest::{ExtractionHint, IngestRequest};
use ragd_engine::types::{DublinCore, Sensitivity};
use ragd_engine::EngineResult;
use std::collections::HashMap;

/// Embeds by exact-text lookup against a fixed table, falling back to a
/// constant vector for anything not registered. Lets a test pin down exactly
/// which vector each chunk/query gets without depending on how the chunker
/// happens to split a longer document.
pub struct FixedEmbedder {
    dimension: usize,
    table: HashMap<String, Vec<f32>>,
    default_vector: Vec<f32>,
}

impl FixedEmbedder {
    pub fn new(dimension: usize, default_vector: Vec<f32>) -> Self {
        Self {
            dimension,
            table: HashMap::new(),
            default_vector,
        }
    }

    pub fn set(&mut self, text: impl Into<String>, vector: Vec<f32>) {
        self.table.insert(text.into(), vector);
    }
}

#[async_trait]
impl Embedder for FixedEmbedder {
    async fn embed_query(&self, text: &str) -> EngineResult<Vec<f32>> {
        Ok(self.table.get(text).cloned().unwrap_or_else(|| self.default_vector.clone()))
    }

    async fn embed_document(&self, text: &str) -> EngineResult<Vec<f32>> {
        Ok(self.table.get(text).cloned().unwrap_or_else(|| self.default_vector.clone()))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Always returns the same canned reply, regardless of the prompt. Good
/// enough for scenarios that never exercise CRAG/Self-RAG (both default off).
pub struct ScriptedGenerator {
    reply: String,
}

impl ScriptedGenerator {
    pub fn new(reply: impl Into<String>) -> Self {
        Self { reply: reply.into() }
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(&self, _request: &GenerationRequest) -> EngineResult<GenerationResponse> {
        Ok(GenerationResponse {
            content: self.reply.clone(),
            model: "scripted".to_string(),
            tokens_used: None,
            finish_reason: Some("stop".to_string()),
        })
    }

    async fn generate_stream(&self, _request: &GenerationRequest) -> EngineResult<TokenStream> {
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        let _ = tx.send(self.reply.clone()).await;
        Ok(TokenStream::new(rx))
    }
}

/// An `EngineConfig` sized for fast, deterministic tests: small chunk/overlap
/// bounds so short fixture text survives chunking, and a small dimension
/// matching whatever fixed vectors the test supplies.
pub fn test_config(data_dir: std::path::PathBuf, dimension: usize) -> ragd_engine::EngineConfig {
    let mut config = ragd_engine::EngineConfig::default();
    config.data_dir = data_dir;
    config.embedding.model = "fixed-test-embedder".to_string();
    config.embedding.dimension = dimension;
    config.chunking.chunk_size = 2000;
    config.chunking.chunk_overlap = 0;
    config.chunking.min_chunk_size = 10;
    config
}

pub fn ingest_request(path: &str, filename: &str, text: &str) -> IngestRequest {
    IngestRequest {
        path: path.to_string(),
        filename: filename.to_string(),
        file_type: "text/plain".to_string(),
        file_size: text.len() as u64,
        text: text.to_string(),
        extraction_hint: None::<ExtractionHint>,
        extraction_method: None,
        pages: None,
        dublin_core: DublinCore::default(),
        tags: Vec::new(),
        project: None,
        sensitivity: Sensitivity::default(),
        skip_duplicates: true,
    }
}
