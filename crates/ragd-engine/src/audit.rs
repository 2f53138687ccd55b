//! Append-only deletion audit log under `audit/` (§3.1, §6 "Persisted state
//! layout"). The engine does not perform key rotation or secure deletion
//! itself — that lives with an external security collaborator (§1) — this
//! module only gives that collaborator a consistent record to correlate
//! against.

use crate::error::{EngineError, EngineResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    DeleteDocument,
    Reset,
}

/// One line of `audit/deletions.jsonl`. `key_rotated` and `level` are carried
/// through verbatim from the caller; the engine never sets them itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub action: AuditAction,
    pub document_id: String,
    pub document_hash: String,
    pub chunks_removed: usize,
    pub key_rotated: bool,
    pub user_confirmed: bool,
    pub level: String,
}

/// Append-only JSON-lines writer. One file handle opened per process
/// lifetime (unlike the metadata store's per-operation connections), since
/// append-mode writes to a single file don't contend for a write lock the
/// way SQLite does.
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn open(data_dir: &Path) -> EngineResult<Self> {
        let dir = data_dir.join("audit");
        std::fs::create_dir_all(&dir).map_err(|e| EngineError::BackendUnavailable {
            backend: "audit".to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            path: dir.join("deletions.jsonl"),
        })
    }

    pub fn record(&self, record: &AuditRecord) -> EngineResult<()> {
        let line = serde_json::to_string(record).map_err(|e| EngineError::Internal(e.to_string()))?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| EngineError::BackendUnavailable {
                backend: "audit".to_string(),
                message: e.to_string(),
            })?;
        writeln!(file, "{line}").map_err(|e| EngineError::BackendUnavailable {
            backend: "audit".to_string(),
            message: e.to_string(),
        })?;
        Ok(())
    }

    /// Read back every record, in append order. Used by tests and by a
    /// `doctor()`-style audit-trail sanity check; not on the hot path.
    pub fn read_all(&self) -> EngineResult<Vec<AuditRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.path).map_err(|e| EngineError::BackendUnavailable {
            backend: "audit".to_string(),
            message: e.to_string(),
        })?;
        content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(|e| EngineError::Internal(e.to_string())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_append_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::open(dir.path()).unwrap();

        for i in 0..3 {
            log.record(&AuditRecord {
                timestamp: Utc::now(),
                action: AuditAction::DeleteDocument,
                document_id: format!("doc_{i}"),
                document_hash: "hash".to_string(),
                chunks_removed: i,
                key_rotated: false,
                user_confirmed: true,
                level: "info".to_string(),
            })
            .unwrap();
        }

        let records = log.read_all().unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].document_id, "doc_0");
        assert_eq!(records[2].chunks_removed, 2);
    }

    #[test]
    fn read_all_on_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::open(dir.path()).unwrap();
        assert!(log.read_all().unwrap().is_empty());
    }
}
