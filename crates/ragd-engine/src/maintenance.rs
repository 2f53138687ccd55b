//! Background maintenance (§4.7, supplemented): checkpointing, backend
//! migration, and an engine-level `doctor()` rollup over
//! [`IndexStore::health_check`].

use crate::config::BackendConfig;
use crate::error::{EngineError, EngineResult};
use crate::store::IndexStore;
use crate::types::{HealthReport, HealthStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A resumable-ingest marker: the last-committed document count at the time
/// the checkpoint was taken, plus a monotonically increasing sequence number
/// so a caller can tell which of several checkpoint files is newest without
/// relying on file mtimes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub sequence: u64,
    pub document_count: usize,
    pub chunk_count: usize,
    pub created_at: DateTime<Utc>,
}

/// Writes and reads checkpoint markers under `checkpoints/` (§6 "Persisted
/// state layout"). A background "checkpoint" operation must never observe a
/// writer mid-transaction (§5); since it only reads `IndexStore::stats()`,
/// which itself goes through the metadata store's own connection, it never
/// needs the write lock.
pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    pub fn open(data_dir: &Path) -> EngineResult<Self> {
        let dir = data_dir.join("checkpoints");
        std::fs::create_dir_all(&dir).map_err(|e| io_err(e))?;
        Ok(Self { dir })
    }

    /// Writes a new checkpoint, one sequence number past whatever was
    /// latest on disk.
    pub async fn checkpoint(&self, store: &IndexStore) -> EngineResult<Checkpoint> {
        let next_sequence = self.latest()?.map(|c| c.sequence + 1).unwrap_or(0);
        let stats = store.stats().await?;
        let checkpoint = Checkpoint {
            sequence: next_sequence,
            document_count: stats.document_count,
            chunk_count: stats.chunk_count,
            created_at: Utc::now(),
        };

        let path = self.dir.join(format!("checkpoint_{:020}.json", checkpoint.sequence));
        let bytes = serde_json::to_vec_pretty(&checkpoint).map_err(|e| EngineError::Internal(e.to_string()))?;
        std::fs::write(&path, bytes).map_err(io_err)?;

        tracing::info!(sequence = checkpoint.sequence, documents = checkpoint.document_count, "wrote checkpoint");
        Ok(checkpoint)
    }

    /// The highest-sequence checkpoint on disk, if any.
    pub fn latest(&self) -> EngineResult<Option<Checkpoint>> {
        let mut best: Option<Checkpoint> = None;
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(it) => it,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_err(e)),
        };

        for entry in entries.filter_map(Result::ok) {
            if entry.path().extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = std::fs::read(entry.path()).map_err(io_err)?;
            let checkpoint: Checkpoint =
                serde_json::from_slice(&bytes).map_err(|e| EngineError::Internal(e.to_string()))?;
            if best.as_ref().map(|b| checkpoint.sequence > b.sequence).unwrap_or(true) {
                best = Some(checkpoint);
            }
        }
        Ok(best)
    }
}

fn io_err(e: std::io::Error) -> EngineError {
    EngineError::BackendUnavailable {
        backend: "checkpoint".to_string(),
        message: e.to_string(),
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MigrationReport {
    pub migrated_count: usize,
    pub failed_count: usize,
}

/// Re-indexes every document from `source` into a freshly opened
/// `IndexStore` at `new_data_dir` under `target_backend` (§4.7 "Backend
/// migration"). Builds the new store alongside the old one without taking
/// `source`'s write lock for the read side, so reads against `source`
/// continue to work throughout. Returns the new store plus a report; the
/// caller is responsible for the "swap the active handle, then drop the
/// old" step, since only the caller (the engine facade) knows what other
/// handles reference the old store.
pub async fn migrate_backend(
    source: &IndexStore,
    new_data_dir: &Path,
    target_backend: BackendConfig,
) -> EngineResult<(IndexStore, MigrationReport)> {
    let target = IndexStore::open(new_data_dir, source.dimension(), target_backend).await?;

    let mut report = MigrationReport::default();
    for document in source.list_documents(None).await? {
        let chunks = match source.get_full_chunks(&document.document_id).await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(document_id = %document.document_id, error = %e, "migration: failed to read chunks");
                report.failed_count += 1;
                continue;
            }
        };

        let mut vectors = Vec::with_capacity(chunks.len());
        let mut ok = true;
        for chunk in &chunks {
            match source.get_vector(&chunk.chunk_id).await {
                Ok(Some(v)) => vectors.push(v),
                Ok(None) => {
                    tracing::warn!(chunk_id = %chunk.chunk_id, "migration: chunk has no vector, skipping document");
                    ok = false;
                    break;
                }
                Err(e) => {
                    tracing::warn!(chunk_id = %chunk.chunk_id, error = %e, "migration: failed to read vector");
                    ok = false;
                    break;
                }
            }
        }
        if !ok {
            report.failed_count += 1;
            continue;
        }

        match target.add_document(&document, &chunks, &vectors, true).await {
            Ok(_) => report.migrated_count += 1,
            Err(e) => {
                tracing::warn!(document_id = %document.document_id, error = %e, "migration: failed to write document");
                report.failed_count += 1;
            }
        }
    }

    tracing::info!(
        migrated = report.migrated_count,
        failed = report.failed_count,
        "backend migration complete"
    );
    Ok((target, report))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoctorReport {
    pub status: HealthStatus,
    pub latency_ms: u64,
    pub message: String,
    pub remediation: Option<String>,
}

/// Engine-level health rollup over [`IndexStore::health_check`] (§4.7).
pub async fn doctor(store: &IndexStore) -> DoctorReport {
    let HealthReport {
        status,
        latency_ms,
        message,
    } = store.health_check().await;

    let remediation = match status {
        HealthStatus::Healthy => None,
        HealthStatus::Degraded => Some(format!("investigate and restart the affected store(s): {message}")),
        HealthStatus::Unhealthy => {
            Some("no backing store is reachable; verify the data directory and restart the engine".to_string())
        }
    };

    DoctorReport {
        status,
        latency_ms,
        message,
        remediation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_sequence_increases_monotonically() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::open(dir.path()).unwrap();
        assert!(manager.latest().unwrap().is_none());

        let path = manager.dir.join("checkpoint_00000000000000000000.json");
        let c0 = Checkpoint {
            sequence: 0,
            document_count: 1,
            chunk_count: 3,
            created_at: Utc::now(),
        };
        std::fs::write(&path, serde_json::to_vec(&c0).unwrap()).unwrap();

        let latest = manager.latest().unwrap().unwrap();
        assert_eq!(latest.sequence, 0);
    }
}
