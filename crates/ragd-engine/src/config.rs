//! Engine-wide configuration, loaded from `config.yaml` under the data
//! directory (§6 "Persisted state layout").

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub data_dir: PathBuf,
    pub embedding: EmbeddingConfig,
    pub chunking: ChunkingConfig,
    pub search: SearchConfig,
    pub orchestrator: OrchestratorConfig,
    pub backend: BackendConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub model: String,
    pub dimension: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub min_chunk_size: usize,
    /// Prepend a short document-level gloss to each chunk before embedding
    /// ("contextual retrieval"). Off by default since it doubles embedding calls.
    pub contextual_ingestion: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    pub default_limit: usize,
    /// `m` in the hybrid over-fetch `k' = limit * m` (§4.2).
    pub overfetch_multiplier: usize,
    pub rrf_k: usize,
    pub weight_semantic: f32,
    pub weight_keyword: f32,
    /// BM25 normalisation divisor (§9 open question; default ~10, configurable).
    pub bm25_divisor: f32,
    pub min_score: f32,
    /// Candidate-count threshold below which filtered ANN scores candidates
    /// exactly rather than delegating to the backend (§4.1 "Two-stage filtered ANN").
    pub exact_filter_multiple: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Minimum history turns passed to the rewriter. §9 flags < 4 as a bug.
    pub rewrite_history_turns: usize,
    pub min_relevance: f32,
    pub enable_fallback_retrieval: bool,
    pub fallback_min_relevance: f32,
    pub enable_crag: bool,
    pub crag_relevance_threshold: f32,
    pub max_rewrites: usize,
    pub enable_self_rag: bool,
    pub faithfulness_threshold: f32,
    pub max_refinements: usize,
    pub confidence_alpha: f32,
    pub confidence_beta: f32,
    pub rewrite_temperature: f32,
    pub rewrite_max_tokens: usize,
}

/// Vector backend tier, selected by chunk-count policy unless pinned (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorBackendTier {
    Flat,
    Ivf,
    IvfPq,
    Hnsw,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub pinned_tier: Option<VectorBackendTier>,
    pub ivf_threshold: usize,
    pub ivfpq_threshold: usize,
    pub hnsw_threshold: usize,
}

impl BackendConfig {
    pub fn select_tier(&self, chunk_count: usize) -> VectorBackendTier {
        if let Some(pinned) = self.pinned_tier {
            return pinned;
        }
        if chunk_count >= self.hnsw_threshold {
            VectorBackendTier::Hnsw
        } else if chunk_count >= self.ivfpq_threshold {
            VectorBackendTier::IvfPq
        } else if chunk_count >= self.ivf_threshold {
            VectorBackendTier::Ivf
        } else {
            VectorBackendTier::Flat
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.embedding.dimension == 0 {
            return Err("embedding.dimension must be > 0".into());
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return Err("chunking.chunk_overlap must be < chunk_size".into());
        }
        if !(0.0..=1.0).contains(&self.search.min_score) {
            return Err("search.min_score must be in [0.0, 1.0]".into());
        }
        if self.orchestrator.rewrite_history_turns < 4 {
            tracing::debug!(
                requested = self.orchestrator.rewrite_history_turns,
                "rewrite_history_turns below the recommended minimum of 4; the rewrite \
                 prompt may not include the turn that introduced the topic"
            );
        }
        if self.orchestrator.fallback_min_relevance >= self.orchestrator.min_relevance {
            return Err("orchestrator.fallback_min_relevance must be < min_relevance".into());
        }
        Ok(())
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read config file {}: {e}", path.display()))?;
        let config: Self =
            serde_yaml::from_str(&content).map_err(|e| format!("failed to parse config.yaml: {e}"))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml_file(&self, path: &Path) -> Result<(), String> {
        let content = serde_yaml::to_string(self).map_err(|e| e.to_string())?;
        std::fs::write(path, content).map_err(|e| e.to_string())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ragd");

        Self {
            data_dir,
            embedding: EmbeddingConfig {
                model: "external-embedder".to_string(),
                dimension: 768,
            },
            chunking: ChunkingConfig {
                chunk_size: 1750,
                chunk_overlap: 200,
                min_chunk_size: 100,
                contextual_ingestion: false,
            },
            search: SearchConfig {
                default_limit: 10,
                overfetch_multiplier: 3,
                rrf_k: 60,
                weight_semantic: 0.7,
                weight_keyword: 0.3,
                bm25_divisor: 10.0,
                min_score: 0.1,
                exact_filter_multiple: 10,
            },
            orchestrator: OrchestratorConfig {
                rewrite_history_turns: 4,
                min_relevance: 0.55,
                enable_fallback_retrieval: true,
                fallback_min_relevance: 0.35,
                enable_crag: false,
                crag_relevance_threshold: 0.5,
                max_rewrites: 2,
                enable_self_rag: false,
                faithfulness_threshold: 0.6,
                max_refinements: 1,
                confidence_alpha: 0.4,
                confidence_beta: 0.6,
                rewrite_temperature: 0.3,
                rewrite_max_tokens: 64,
            },
            backend: BackendConfig {
                pinned_tier: None,
                ivf_threshold: 10_000,
                ivfpq_threshold: 100_000,
                hnsw_threshold: 1_000_000,
            },
        }
    }
}
