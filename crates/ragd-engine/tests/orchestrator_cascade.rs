//! S5 — when the original query's best match falls below `min_relevance`,
//! the orchestrator either falls back to a lowered threshold (when enabled)
//! or reports `RetrievalStrategy::None` (when it isn't). Wired directly from
//! `IndexStore`/`HybridSearcher`/`AgenticOrchestrator` rather than through
//! `Engine`, since this scenario needs a non-default `OrchestratorConfig`.

mod common;

use common::{ingest_request, FixedEmbedder, ScriptedGenerator};
use ragd_engine::config::{BackendConfig, ChunkingConfig, EmbeddingConfig, OrchestratorConfig, SearchConfig};
use ragd_engine::embeddings::Embedder;
use ragd_engine::ingest::IngestCoordinator;
use ragd_engine::orchestrator::{AgenticOrchestrator, RetrievalStrategy};
use ragd_engine::search::hybrid::HybridSearcher;
use ragd_engine::store::IndexStore;
use std::sync::Arc;

const DIMENSION: usize = 2;

async fn build_orchestrator(data_dir: &std::path::Path, enable_fallback: bool) -> AgenticOrchestrator {
    let backend = BackendConfig {
        pinned_tier: None,
        ivf_threshold: 10_000,
        ivfpq_threshold: 100_000,
        hnsw_threshold: 1_000_000,
    };
    let store = Arc::new(IndexStore::open(data_dir, DIMENSION, backend).await.unwrap());

    // The query vector is [1, 0]. The single "best" chunk sits orthogonal to
    // it (cos similarity 0, a mid-range score after the (cos+1)/2 mapping),
    // and every filler chunk sits diametrically opposite it (cos similarity
    // -1, the lowest possible score). That keeps the best chunk's combined
    // score comfortably inside the (fallback_min_relevance, min_relevance)
    // bracket regardless of the exact ANN distance-to-score conversion used.
    let mut embedder = FixedEmbedder::new(DIMENSION, vec![-1.0, 0.0]);
    embedder.set("q1", vec![1.0, 0.0]);
    let best_text = "the one passage that is only partially related to the question asked".to_string();
    embedder.set(best_text.clone(), vec![0.0, 1.0]);
    let embedder: Arc<dyn Embedder> = Arc::new(embedder);

    let chunking = ChunkingConfig {
        chunk_size: 2000,
        chunk_overlap: 0,
        min_chunk_size: 10,
        contextual_ingestion: false,
    };
    let embedding = EmbeddingConfig {
        model: "fixed-test-embedder".to_string(),
        dimension: DIMENSION,
    };
    let ingest = IngestCoordinator::new(store.clone(), embedder.clone(), chunking, embedding);

    for i in 0..9 {
        let text = format!("unrelated filler passage number {i} about nothing in particular today at all");
        ingest
            .ingest(ingest_request(&format!("/c/filler_{i}.txt"), &format!("filler_{i}.txt"), &text))
            .await
            .unwrap();
    }
    ingest
        .ingest(ingest_request("/c/best.txt", "best.txt", &best_text))
        .await
        .unwrap();

    let search_config = SearchConfig {
        default_limit: 10,
        overfetch_multiplier: 3,
        rrf_k: 60,
        weight_semantic: 0.7,
        weight_keyword: 0.3,
        bm25_divisor: 10.0,
        min_score: 0.0,
        exact_filter_multiple: 10,
    };
    let searcher = Arc::new(HybridSearcher::new(store, embedder, search_config));

    let orchestrator_config = OrchestratorConfig {
        rewrite_history_turns: 4,
        min_relevance: 0.55,
        enable_fallback_retrieval: enable_fallback,
        fallback_min_relevance: 0.2,
        enable_crag: false,
        crag_relevance_threshold: 0.5,
        max_rewrites: 0,
        enable_self_rag: false,
        faithfulness_threshold: 0.6,
        max_refinements: 0,
        confidence_alpha: 0.4,
        confidence_beta: 0.6,
        rewrite_temperature: 0.3,
        rewrite_max_tokens: 64,
    };

    AgenticOrchestrator::new(searcher, Arc::new(ScriptedGenerator::new("synthesized answer")), orchestrator_config)
}

#[tokio::test]
async fn s5_cascading_fallback_succeeds_when_enabled() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = build_orchestrator(dir.path(), true).await;

    let answer = orchestrator.answer("q1", &[]).await;

    assert_eq!(answer.strategy_used, RetrievalStrategy::LoweredThreshold);
    assert!(!answer.citations.is_empty());
}

#[tokio::test]
async fn s5_cascading_fallback_reports_none_when_disabled() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = build_orchestrator(dir.path(), false).await;

    let answer = orchestrator.answer("q1", &[]).await;

    assert_eq!(answer.strategy_used, RetrievalStrategy::None);
    assert!(answer.citations.is_empty());
}
