//! The embedding model is an external collaborator (§1 Non-goals): this
//! module only defines the trait boundary and an HTTP-backed implementation
//! that talks to whatever embedding server the deployment points at.

use crate::error::{EngineError, EngineResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Unified embedding model boundary. Implementations may be local (in-process)
/// or remote (HTTP); the engine itself never trains or fine-tunes one.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a search query. Some models use an asymmetric query/document
    /// prefix convention; implementations apply it here.
    async fn embed_query(&self, text: &str) -> EngineResult<Vec<f32>>;

    /// Embed a single document chunk.
    async fn embed_document(&self, text: &str) -> EngineResult<Vec<f32>>;

    /// Batch embed chunks for ingestion. Default implementation calls
    /// `embed_document` sequentially; implementations backed by a batching
    /// API should override this.
    async fn embed_documents(&self, texts: &[String]) -> EngineResult<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for t in texts {
            out.push(self.embed_document(t).await?);
        }
        Ok(out)
    }

    /// Vector dimension this embedder produces. Used to validate consistency
    /// against `IndexStats::dimension` before a write lands.
    fn dimension(&self) -> usize;

    /// Optional "late chunking" variant (§6): embed the full document once
    /// and derive one vector per `chunk_boundaries` slice from the
    /// contextualised representation, rather than embedding each chunk in
    /// isolation. Default implementation falls back to per-chunk embedding,
    /// since most embedders don't expose access to token-level hidden states.
    async fn embed_document_chunks(
        &self,
        full_text: &str,
        chunk_boundaries: &[(usize, usize)],
    ) -> EngineResult<Vec<Vec<f32>>> {
        let texts: Vec<String> = chunk_boundaries
            .iter()
            .map(|(start, end)| full_text[*start..*end].to_string())
            .collect();
        self.embed_documents(&texts).await
    }
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    input: &'a [String],
    model: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedResponseItem {
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedResponseItem>,
}

/// Calls an OpenAI-embeddings-compatible HTTP endpoint.
pub struct HttpEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    dimension: usize,
    query_prefix: Option<String>,
    document_prefix: Option<String>,
}

/// Embedder calls default to a 60s timeout (§5 "Timeouts").
const EMBEDDER_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(60);

impl HttpEmbedder {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>, dimension: usize) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(EMBEDDER_TIMEOUT)
                .build()
                .unwrap_or_default(),
            endpoint: endpoint.into(),
            model: model.into(),
            dimension,
            query_prefix: None,
            document_prefix: None,
        }
    }

    pub fn with_prefixes(mut self, query_prefix: Option<String>, document_prefix: Option<String>) -> Self {
        self.query_prefix = query_prefix;
        self.document_prefix = document_prefix;
        self
    }

    async fn embed_batch(&self, texts: Vec<String>) -> EngineResult<Vec<Vec<f32>>> {
        let body = EmbedRequest {
            input: &texts,
            model: &self.model,
        };

        let resp = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::ExternalService {
                service: "embedder".to_string(),
                message: e.to_string(),
            })?;

        if !resp.status().is_success() {
            return Err(EngineError::ExternalService {
                service: "embedder".to_string(),
                message: format!("HTTP {}", resp.status()),
            });
        }

        let parsed: EmbedResponse = resp.json().await.map_err(|e| EngineError::ExternalService {
            service: "embedder".to_string(),
            message: format!("malformed response: {e}"),
        })?;

        let vectors: Vec<Vec<f32>> = parsed.data.into_iter().map(|d| d.embedding).collect();
        for v in &vectors {
            if v.len() != self.dimension {
                return Err(EngineError::DimensionMismatch {
                    expected: self.dimension,
                    actual: v.len(),
                });
            }
        }
        Ok(vectors)
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed_query(&self, text: &str) -> EngineResult<Vec<f32>> {
        let prefixed = match &self.query_prefix {
            Some(p) => format!("{p}{text}"),
            None => text.to_string(),
        };
        self.embed_batch(vec![prefixed])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::Internal("empty embedding response".into()))
    }

    async fn embed_document(&self, text: &str) -> EngineResult<Vec<f32>> {
        let prefixed = match &self.document_prefix {
            Some(p) => format!("{p}{text}"),
            None => text.to_string(),
        };
        self.embed_batch(vec![prefixed])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::Internal("empty embedding response".into()))
    }

    async fn embed_documents(&self, texts: &[String]) -> EngineResult<Vec<Vec<f32>>> {
        let prefixed: Vec<String> = texts
            .iter()
            .map(|t| match &self.document_prefix {
                Some(p) => format!("{p}{t}"),
                None => t.clone(),
            })
            .collect();
        self.embed_batch(prefixed).await
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
