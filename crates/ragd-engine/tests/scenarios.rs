//! End-to-end coverage of the literal scenarios from §8, driven through the
//! `Engine` facade against a temp-dir-backed instance with scripted
//! embedder/generator collaborators.

mod common;

use common::{ingest_request, test_config, FixedEmbedder, ScriptedGenerator};
use ragd_engine::engine::{Engine, EngineDeps};
use ragd_engine::search::hybrid::{SearchMode, SearchOptions};
use ragd_engine::EngineError;
use std::sync::Arc;

/// S1 — ingest two short documents, one close to the query and one far from
/// it, and confirm semantic search ranks the close one first, keyword search
/// only turns up the document that shares vocabulary with the query, and
/// hybrid search reports both ranks for a chunk present in both result sets.
#[tokio::test]
async fn s1_ingest_and_retrieve_orders_best_match_first() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path().to_path_buf(), 2);

    let doc_a = "The quick brown fox jumps over the lazy dog near the river bank.";
    let doc_b = "Quarterly revenue figures for the regional logistics division improved this year.";

    let mut embedder = FixedEmbedder::new(2, vec![0.0, 0.0]);
    embedder.set(doc_a, vec![1.0, 0.0]);
    embedder.set(doc_b, vec![-1.0, 0.0]);
    embedder.set("quick fox", vec![1.0, 0.0]);

    let deps = EngineDeps {
        embedder: Arc::new(embedder),
        generator: Arc::new(ScriptedGenerator::new("n/a")),
    };
    let engine = Engine::init(config, deps).await.unwrap();

    engine.index(ingest_request("/docs/a.txt", "a.txt", doc_a)).await.unwrap();
    engine.index(ingest_request("/docs/b.txt", "b.txt", doc_b)).await.unwrap();

    let semantic = engine
        .search(
            "quick fox",
            SearchOptions {
                mode: SearchMode::Semantic,
                limit: 5,
                min_score: 0.0,
                ..SearchOptions::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(semantic.len(), 2);
    assert_eq!(semantic[0].filename, "a.txt");

    let keyword = engine
        .search(
            "quick fox",
            SearchOptions {
                mode: SearchMode::Keyword,
                limit: 5,
                min_score: 0.0,
                ..SearchOptions::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(keyword.len(), 1);
    assert_eq!(keyword[0].filename, "a.txt");

    let hybrid = engine
        .search(
            "quick fox",
            SearchOptions {
                mode: SearchMode::Hybrid,
                limit: 5,
                min_score: 0.0,
                ..SearchOptions::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(hybrid[0].filename, "a.txt");
    assert!(hybrid[0].semantic_rank.is_some());
    assert!(hybrid[0].keyword_rank.is_some());
}

/// S2 — the same content ingested under a second path is rejected as a
/// duplicate rather than indexed twice.
#[tokio::test]
async fn s2_duplicate_content_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path().to_path_buf(), 2);

    let text = "Identical normalised text shared between two different source paths entirely.";
    let mut embedder = FixedEmbedder::new(2, vec![0.0, 0.0]);
    embedder.set(text, vec![0.5, 0.5]);

    let deps = EngineDeps {
        embedder: Arc::new(embedder),
        generator: Arc::new(ScriptedGenerator::new("n/a")),
    };
    let engine = Engine::init(config, deps).await.unwrap();

    let first = engine.index(ingest_request("/docs/original.txt", "original.txt", text)).await.unwrap();
    assert!(!first.skipped);
    assert!(first.chunk_count > 0);

    let second = engine.index(ingest_request("/docs/copy.txt", "copy.txt", text)).await.unwrap();
    assert!(second.skipped);
    assert_eq!(second.chunk_count, 0);
    assert_eq!(second.document_id, first.document_id);

    let stats = engine.stats().await.unwrap();
    assert_eq!(stats.document_count, 1);
}

/// S3 — boolean keyword queries combine AND/OR/NOT correctly, and a
/// malformed query surfaces as a classified `QueryParse` error rather than
/// panicking or silently returning nothing.
#[tokio::test]
async fn s3_boolean_keyword_query_filters_correctly() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path().to_path_buf(), 2);
    let embedder = FixedEmbedder::new(2, vec![0.0, 0.0]);

    let deps = EngineDeps {
        embedder: Arc::new(embedder),
        generator: Arc::new(ScriptedGenerator::new("n/a")),
    };
    let engine = Engine::init(config, deps).await.unwrap();

    let docs = [
        ("/c/py_web.txt", "py_web.txt", "python developers build scalable web services daily using modern frameworks"),
        ("/c/java_web.txt", "java_web.txt", "java engineers also build scalable web services for enterprise clients"),
        ("/c/py_django_web.txt", "py_django_web.txt", "python and django together build scalable web services for startups"),
        ("/c/plain.txt", "plain.txt", "completely unrelated text about gardening and houseplants for beginners"),
    ];
    for (path, filename, text) in docs {
        engine.index(ingest_request(path, filename, text)).await.unwrap();
    }

    let results = engine
        .search(
            "(python OR java) AND web NOT django",
            SearchOptions {
                mode: SearchMode::Keyword,
                limit: 10,
                min_score: 0.0,
                ..SearchOptions::default()
            },
        )
        .await
        .unwrap();

    let filenames: Vec<&str> = results.iter().map(|r| r.filename.as_str()).collect();
    assert!(filenames.contains(&"py_web.txt"));
    assert!(filenames.contains(&"java_web.txt"));
    assert!(!filenames.contains(&"py_django_web.txt"));
    assert!(!filenames.contains(&"plain.txt"));

    let malformed = engine
        .search(
            "python AND",
            SearchOptions {
                mode: SearchMode::Keyword,
                limit: 10,
                min_score: 0.0,
                ..SearchOptions::default()
            },
        )
        .await;
    assert!(matches!(malformed, Err(EngineError::QueryParse { .. })));
}
