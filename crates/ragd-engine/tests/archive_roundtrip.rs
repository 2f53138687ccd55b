//! S7 — exporting an engine's index and importing the resulting archive into
//! a fresh store reproduces the same document set, chunk counts, and v1.1
//! provenance fields (sensitivity, embedding model, embedding dimension),
//! even though the default export omits embeddings and the import side has
//! to re-embed via the supplied `Embedder`.

mod common;

use common::{ingest_request, test_config, FixedEmbedder};
use ragd_engine::archive::{export_archive, import_archive, ExportOptions, ImportOptions};
use ragd_engine::config::BackendConfig;
use ragd_engine::store::IndexStore;
use ragd_engine::types::Sensitivity;
use std::collections::HashSet;
use std::sync::Arc;

async fn open_store(data_dir: &std::path::Path, dimension: usize) -> IndexStore {
    let backend = BackendConfig {
        pinned_tier: None,
        ivf_threshold: 10_000,
        ivfpq_threshold: 100_000,
        hnsw_threshold: 1_000_000,
    };
    IndexStore::open(data_dir, dimension, backend).await.unwrap()
}

#[tokio::test]
async fn s7_export_then_import_preserves_documents_and_provenance() {
    let source_dir = tempfile::tempdir().unwrap();
    let config = test_config(source_dir.path().to_path_buf(), 2);

    let doc_a = "The archive round trip must preserve every document's provenance fields exactly.";
    let doc_b = "A second unrelated document included purely to exercise multi-document export.";

    let mut embedder = FixedEmbedder::new(2, vec![0.0, 0.0]);
    embedder.set(doc_a, vec![1.0, 0.0]);
    embedder.set(doc_b, vec![0.0, 1.0]);
    let embedder: Arc<dyn ragd_engine::embeddings::Embedder> = Arc::new(embedder);

    let source_store = Arc::new(open_store(source_dir.path(), 2).await);
    let ingest = ragd_engine::ingest::IngestCoordinator::new(
        source_store.clone(),
        embedder.clone(),
        config.chunking.clone(),
        config.embedding.clone(),
    );

    let mut request_a = ingest_request("/docs/a.txt", "a.txt", doc_a);
    request_a.sensitivity = Sensitivity::Confidential;
    let mut request_b = ingest_request("/docs/b.txt", "b.txt", doc_b);
    request_b.sensitivity = Sensitivity::Public;

    let outcome_a = ingest.ingest(request_a).await.unwrap();
    let outcome_b = ingest.ingest(request_b).await.unwrap();

    let archive_path = source_dir.path().join("export.tar.gz");
    let export_result = export_archive(&source_store, &ExportOptions::default(), &archive_path)
        .await
        .unwrap();
    assert_eq!(export_result.documents_exported, 2);

    let target_dir = tempfile::tempdir().unwrap();
    let target_store = open_store(target_dir.path(), 2).await;
    let import_result = import_archive(
        &target_store,
        &archive_path,
        &ImportOptions::default(),
        Some(embedder.as_ref()),
    )
    .await
    .unwrap();

    assert_eq!(import_result.documents_imported, 2);
    assert!(import_result.errors.is_empty());

    let imported_ids: HashSet<String> = target_store
        .list_documents(None)
        .await
        .unwrap()
        .into_iter()
        .map(|d| d.document_id)
        .collect();
    assert_eq!(imported_ids, HashSet::from([outcome_a.document_id.clone(), outcome_b.document_id.clone()]));

    let imported_a = target_store.get_document(&outcome_a.document_id).await.unwrap().unwrap();
    assert_eq!(imported_a.chunk_count, outcome_a.chunk_count);
    assert_eq!(imported_a.sensitivity, Sensitivity::Confidential);
    assert_eq!(imported_a.embedding_model, config.embedding.model);
    assert_eq!(imported_a.embedding_dimension, config.embedding.dimension);

    let imported_b = target_store.get_document(&outcome_b.document_id).await.unwrap().unwrap();
    assert_eq!(imported_b.sensitivity, Sensitivity::Public);
}
