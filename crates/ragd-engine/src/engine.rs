//! Top-level facade wiring `IndexStore` + `HybridSearcher` + `ContextBuilder`
//! + `AgenticOrchestrator` + `IngestCoordinator` + `AuditLog` together behind
//! the CLI/API surface named in §6: `init`, `index`, `search`, `ask`, `chat`,
//! `list`, `delete`, `stats`, `doctor`, `reindex`,
//! `backend show|list|set|health|benchmark|migrate`, `export`, `import`.
//!
//! This crate implements every one of those as a library function — it does
//! not ship a CLI binary, since front-ends are explicitly out of scope as a
//! product surface (§1).

use crate::archive::{self, ExportOptions, ExportResult, ImportOptions, ImportResult};
use crate::audit::{AuditAction, AuditLog, AuditRecord};
use crate::config::{BackendConfig, EngineConfig, VectorBackendTier};
use crate::embeddings::Embedder;
use crate::error::{EngineError, EngineResult};
use crate::generator::Generator;
use crate::ingest::{IngestCoordinator, IngestError, IngestOutcome, IngestRequest};
use crate::maintenance::{self, Checkpoint, CheckpointManager, DoctorReport, MigrationReport};
use crate::orchestrator::{AgenticOrchestrator, AnswerStream, OrchestratorAnswer};
use crate::search::hybrid::{HybridSearcher, SearchMode, SearchOptions};
use crate::store::IndexStore;
use crate::types::{ChatTurn, Document, IndexStats, SearchResult};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Everything needed to open an [`Engine`]: the config plus the two external
/// collaborators (§1) the engine never implements itself.
pub struct EngineDeps {
    pub embedder: Arc<dyn Embedder>,
    pub generator: Arc<dyn Generator>,
}

/// The whole engine, ready to drive the surface operations below. Holds the
/// store behind an `arc_swap`-free `tokio::sync::RwLock<Arc<IndexStore>>` so
/// `backend migrate` can swap the active handle without requiring callers to
/// re-open the engine.
pub struct Engine {
    store: tokio::sync::RwLock<Arc<IndexStore>>,
    searcher: tokio::sync::RwLock<Arc<HybridSearcher>>,
    orchestrator: tokio::sync::RwLock<Arc<AgenticOrchestrator>>,
    ingest: IngestCoordinator,
    audit: AuditLog,
    checkpoints: CheckpointManager,
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn Generator>,
    config: EngineConfig,
}

impl Engine {
    /// `init`: opens (creating if absent) the index, search, and audit state
    /// under `config.data_dir`.
    pub async fn init(config: EngineConfig, deps: EngineDeps) -> EngineResult<Self> {
        config.validate().map_err(|message| EngineError::Validation { message })?;
        std::fs::create_dir_all(&config.data_dir).map_err(|e| EngineError::BackendUnavailable {
            backend: "data_dir".to_string(),
            message: e.to_string(),
        })?;

        let store = Arc::new(
            IndexStore::open(&config.data_dir, config.embedding.dimension, config.backend.clone()).await?,
        );
        let searcher = Arc::new(HybridSearcher::new(store.clone(), deps.embedder.clone(), config.search.clone()));
        let orchestrator = Arc::new(AgenticOrchestrator::new(
            searcher.clone(),
            deps.generator.clone(),
            config.orchestrator.clone(),
        ));
        let ingest = IngestCoordinator::new(
            store.clone(),
            deps.embedder.clone(),
            config.chunking.clone(),
            config.embedding.clone(),
        );
        let audit = AuditLog::open(&config.data_dir)?;
        let checkpoints = CheckpointManager::open(&config.data_dir)?;

        config.to_yaml_file(&config.data_dir.join("config.yaml")).map_err(|message| EngineError::Validation { message })?;

        Ok(Self {
            store: tokio::sync::RwLock::new(store),
            searcher: tokio::sync::RwLock::new(searcher),
            orchestrator: tokio::sync::RwLock::new(orchestrator),
            ingest,
            audit,
            checkpoints,
            embedder: deps.embedder,
            generator: deps.generator,
            config,
        })
    }

    /// `index`: ingest one pre-extracted document (§4.5).
    pub async fn index(&self, request: IngestRequest) -> Result<IngestOutcome, IngestError> {
        self.ingest.ingest(request).await
    }

    /// `search`: ad hoc hybrid/semantic/keyword search without the agentic
    /// orchestration layer.
    pub async fn search(&self, query: &str, options: SearchOptions<'_>) -> EngineResult<Vec<SearchResult>> {
        self.searcher.read().await.search(query, options).await
    }

    /// `ask`: one-shot orchestrated question answering (§4.4).
    pub async fn ask(&self, question: &str) -> OrchestratorAnswer {
        self.orchestrator.read().await.answer(question, &[]).await
    }

    /// `chat`: orchestrated question answering with conversational history,
    /// enabling follow-up query rewriting (§4.4).
    pub async fn chat(&self, question: &str, history: &[ChatTurn]) -> OrchestratorAnswer {
        self.orchestrator.read().await.answer(question, history).await
    }

    /// Streaming variant of `chat`, for front-ends that want incremental
    /// tokens. Requires cloning the orchestrator handle since the stream
    /// outlives this call.
    pub async fn chat_stream(&self, question: &str, history: &[ChatTurn]) -> EngineResult<AnswerStream> {
        let orchestrator = self.orchestrator.read().await.clone();
        orchestrator.answer_stream(question, history).await
    }

    /// `list`: enumerate indexed documents, optionally filtered.
    pub async fn list(&self, filter: Option<&crate::filter::Filter>) -> EngineResult<Vec<Document>> {
        self.store.read().await.list_documents(filter).await
    }

    /// `delete`: remove one document and everything derived from it,
    /// appending an audit record regardless of outcome visibility to the
    /// caller (§3.1).
    pub async fn delete(&self, document_id: &str, user_confirmed: bool) -> EngineResult<bool> {
        let document = self.store.read().await.get_document(document_id).await?;
        let chunks_removed = match &document {
            Some(d) => d.chunk_count,
            None => 0,
        };

        let removed = self.store.read().await.delete_document(document_id).await?;

        if let Some(document) = document {
            self.audit.record(&AuditRecord {
                timestamp: chrono::Utc::now(),
                action: AuditAction::DeleteDocument,
                document_id: document_id.to_string(),
                document_hash: document.content_hash,
                chunks_removed,
                key_rotated: false,
                user_confirmed,
                level: "info".to_string(),
            })?;
        }

        Ok(removed)
    }

    /// `stats`: index-wide counts and current backend tier.
    pub async fn stats(&self) -> EngineResult<IndexStats> {
        self.store.read().await.stats().await
    }

    /// `doctor`: aggregated health rollup (§4.7).
    pub async fn doctor(&self) -> DoctorReport {
        maintenance::doctor(&*self.store.read().await).await
    }

    /// `reindex`: wipes and rebuilds the index in place, appending an audit
    /// record for the reset (§3.1).
    pub async fn reindex(&self, user_confirmed: bool) -> EngineResult<()> {
        self.store.read().await.reset().await?;
        self.audit.record(&AuditRecord {
            timestamp: chrono::Utc::now(),
            action: AuditAction::Reset,
            document_id: String::new(),
            document_hash: String::new(),
            chunks_removed: 0,
            key_rotated: false,
            user_confirmed,
            level: "warn".to_string(),
        })?;
        Ok(())
    }

    /// `backend show`: the currently active vector backend tier.
    pub async fn backend_show(&self) -> EngineResult<VectorBackendTier> {
        Ok(self.store.read().await.stats().await?.backend_type.parse().unwrap_or(VectorBackendTier::Flat))
    }

    /// `backend list`: every tier the engine can select, in ascending scale order.
    pub fn backend_list(&self) -> Vec<VectorBackendTier> {
        vec![
            VectorBackendTier::Flat,
            VectorBackendTier::Ivf,
            VectorBackendTier::IvfPq,
            VectorBackendTier::Hnsw,
        ]
    }

    /// `backend health`: identical to `doctor`, offered under the name the
    /// CLI surface uses for it.
    pub async fn backend_health(&self) -> DoctorReport {
        self.doctor().await
    }

    /// `backend migrate`: re-index into `target_backend` at `new_data_dir`,
    /// then swap the active store/searcher/orchestrator handles.
    pub async fn backend_migrate(
        &self,
        new_data_dir: &Path,
        target_backend: BackendConfig,
    ) -> EngineResult<MigrationReport> {
        let (new_store, report) = {
            let store = self.store.read().await;
            maintenance::migrate_backend(&store, new_data_dir, target_backend).await?
        };

        let new_store = Arc::new(new_store);
        let new_searcher = Arc::new(HybridSearcher::new(
            new_store.clone(),
            self.embedder.clone(),
            self.config.search.clone(),
        ));
        let new_orchestrator = Arc::new(AgenticOrchestrator::new(
            new_searcher.clone(),
            self.generator.clone(),
            self.config.orchestrator.clone(),
        ));

        *self.store.write().await = new_store;
        *self.searcher.write().await = new_searcher;
        *self.orchestrator.write().await = new_orchestrator;

        Ok(report)
    }

    /// `backend benchmark`: times `count` vector searches against a random
    /// query already in the index, returning mean latency in milliseconds.
    /// Exists so an operator can decide whether a `backend migrate` is
    /// warranted before committing to it.
    pub async fn backend_benchmark(&self, query: &str, count: usize) -> EngineResult<f64> {
        let searcher = self.searcher.read().await;
        let start = std::time::Instant::now();
        for _ in 0..count.max(1) {
            searcher
                .search(
                    query,
                    SearchOptions {
                        mode: SearchMode::Semantic,
                        ..SearchOptions::default()
                    },
                )
                .await?;
        }
        Ok(start.elapsed().as_secs_f64() * 1000.0 / count.max(1) as f64)
    }

    /// Checkpoints the current document/chunk counts under `checkpoints/`.
    pub async fn checkpoint(&self) -> EngineResult<Checkpoint> {
        self.checkpoints.checkpoint(&*self.store.read().await).await
    }

    /// `export`: write a portable archive (§6).
    pub async fn export(&self, options: &ExportOptions, output_path: &Path) -> EngineResult<ExportResult> {
        archive::export_archive(&*self.store.read().await, options, output_path).await
    }

    /// `import`: load a portable archive, re-embedding any chunk whose
    /// vector wasn't included in the archive.
    pub async fn import(&self, archive_path: &Path, options: &ImportOptions) -> EngineResult<ImportResult> {
        archive::import_archive(
            &*self.store.read().await,
            archive_path,
            options,
            Some(self.embedder.as_ref()),
        )
        .await
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn data_dir(&self) -> &PathBuf {
        &self.config.data_dir
    }
}

impl std::str::FromStr for VectorBackendTier {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "flat" => Ok(Self::Flat),
            "ivf" => Ok(Self::Ivf),
            "ivfpq" | "ivf_pq" => Ok(Self::IvfPq),
            "hnsw" => Ok(Self::Hnsw),
            _ => Err(()),
        }
    }
}
