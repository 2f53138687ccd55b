//! Portable archive format (§6 "Portable archive format (v1.1)"): a
//! self-contained gzip'd tarball of documents, chunks, and (optionally)
//! embeddings, checksummed so an operator can move a collection between
//! machines without standing up the original backends.
//!
//! Grounded on the original exporter/importer (`archive/export.py`,
//! `archive/import_.py`), which lay out the same `documents/`, `chunks/`,
//! `embeddings/`, and `checksums.sha256` members. The original's importer
//! extracts with no path checks at all; this one does not carry that over —
//! every entry is validated before it touches disk.

use crate::embeddings::Embedder;
use crate::error::{EngineError, EngineResult};
use crate::store::IndexStore;
use crate::types::{Chunk, Document};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

/// Versions this build can import. `export_archive` always writes
/// `CURRENT_ARCHIVE_VERSION`.
pub const SUPPORTED_VERSIONS: &[&str] = &["1.0", "1.1"];
pub const CURRENT_ARCHIVE_VERSION: &str = "1.1";

#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    pub include_embeddings: bool,
    pub tags: Option<Vec<String>>,
    pub project: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveManifest {
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub ragd_version: String,
    pub document_count: usize,
    pub chunk_count: usize,
    pub includes_embeddings: bool,
    pub compression: String,
    pub filters: ArchiveFilters,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArchiveFilters {
    pub tags: Option<Vec<String>>,
    pub project: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct ExportResult {
    pub archive_path: PathBuf,
    pub archive_size_bytes: u64,
    pub documents_exported: usize,
    pub chunks_exported: usize,
    pub embeddings_exported: usize,
}

fn document_matches(document: &Document, options: &ExportOptions) -> bool {
    if let Some(tags) = &options.tags {
        if !tags.iter().any(|t| document.tags.contains(t)) {
            return false;
        }
    }
    if let Some(project) = &options.project {
        if document.project.as_deref() != Some(project.as_str()) {
            return false;
        }
    }
    if let Some(since) = options.since {
        if document.indexed_at < since {
            return false;
        }
    }
    if let Some(until) = options.until {
        if document.indexed_at > until {
            return false;
        }
    }
    true
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> EngineResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_err("archive", e))?;
    }
    let bytes = serde_json::to_vec_pretty(value).map_err(|e| EngineError::Internal(e.to_string()))?;
    std::fs::write(path, bytes).map_err(|e| io_err("archive", e))
}

fn io_err(backend: &str, e: std::io::Error) -> EngineError {
    EngineError::BackendUnavailable {
        backend: backend.to_string(),
        message: e.to_string(),
    }
}

/// Export every document matching `options` into a gzip'd tarball at
/// `output_path`. Builds the tree in a temp directory first so checksums can
/// be computed over the exact bytes that land in the archive.
pub async fn export_archive(
    store: &IndexStore,
    options: &ExportOptions,
    output_path: &Path,
) -> EngineResult<ExportResult> {
    let staging = tempfile::tempdir().map_err(|e| io_err("archive", e))?;
    let root = staging.path();

    let all_documents = store.list_documents(None).await?;
    let selected: Vec<Document> = all_documents.into_iter().filter(|d| document_matches(d, options)).collect();

    let mut document_ids = Vec::with_capacity(selected.len());
    let mut chunk_index: Vec<String> = Vec::new();
    let mut embeddings: HashMap<String, Vec<f32>> = HashMap::new();
    let mut chunk_count = 0usize;

    for document in &selected {
        write_json(&root.join("documents/metadata").join(format!("{}.json", document.document_id)), document)?;
        document_ids.push(document.document_id.clone());

        let chunks = store.get_full_chunks(&document.document_id).await?;
        for chunk in &chunks {
            write_json(
                &root
                    .join("chunks/data")
                    .join(&document.document_id)
                    .join(format!("{}.json", chunk.chunk_id)),
                chunk,
            )?;
            chunk_index.push(chunk.chunk_id.clone());
            chunk_count += 1;

            if options.include_embeddings {
                if let Some(vector) = store.get_vector(&chunk.chunk_id).await? {
                    embeddings.insert(chunk.chunk_id.clone(), vector);
                }
            }
        }
    }

    write_json(&root.join("documents/index.json"), &document_ids)?;
    write_json(&root.join("chunks/index.json"), &chunk_index)?;
    let embeddings_exported = embeddings.len();
    if options.include_embeddings {
        write_json(&root.join("embeddings/embeddings.json"), &embeddings)?;
    }

    let manifest = ArchiveManifest {
        version: CURRENT_ARCHIVE_VERSION.to_string(),
        created_at: Utc::now(),
        ragd_version: env!("CARGO_PKG_VERSION").to_string(),
        document_count: selected.len(),
        chunk_count,
        includes_embeddings: options.include_embeddings,
        compression: "gzip".to_string(),
        filters: ArchiveFilters {
            tags: options.tags.clone(),
            project: options.project.clone(),
            since: options.since,
            until: options.until,
        },
    };
    write_json(&root.join("manifest.json"), &manifest)?;

    write_checksums(root)?;

    let file = std::fs::File::create(output_path).map_err(|e| io_err("archive", e))?;
    let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.append_dir_all(".", root).map_err(|e| io_err("archive", e))?;
    let encoder = builder.into_inner().map_err(|e| io_err("archive", e))?;
    encoder.finish().map_err(|e| io_err("archive", e))?;

    let archive_size_bytes = std::fs::metadata(output_path).map_err(|e| io_err("archive", e))?.len();

    tracing::info!(
        documents = selected.len(),
        chunks = chunk_count,
        path = %output_path.display(),
        "exported archive"
    );

    Ok(ExportResult {
        archive_path: output_path.to_path_buf(),
        archive_size_bytes,
        documents_exported: selected.len(),
        chunks_exported: chunk_count,
        embeddings_exported,
    })
}

/// Walks `root` and writes `checksums.sha256` as `sha256:<hex>  <relative path>`
/// lines, one per regular file, matching the original's checksum format.
fn write_checksums(root: &Path) -> EngineResult<()> {
    let mut lines = Vec::new();
    for entry in walkdir::WalkDir::new(root).into_iter().filter_map(Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry.path().strip_prefix(root).unwrap_or(entry.path());
        let bytes = std::fs::read(entry.path()).map_err(|e| io_err("archive", e))?;
        lines.push(format!("sha256:{}  {}", sha256_hex(&bytes), rel.display()));
    }
    lines.sort();
    std::fs::write(root.join("checksums.sha256"), lines.join("\n")).map_err(|e| io_err("archive", e))
}

#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    pub skip_duplicates: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ImportResult {
    pub documents_imported: usize,
    pub documents_skipped: usize,
    pub chunks_imported: usize,
    pub errors: Vec<String>,
}

/// Validates that a tar entry path cannot escape the extraction root: no
/// absolute paths, no `..` components. The original importer had no such
/// check; a crafted archive there could write anywhere the process could
/// reach.
fn reject_unsafe_path(path: &Path) -> EngineResult<()> {
    if path.is_absolute() {
        return Err(EngineError::Validation {
            message: format!("archive entry has an absolute path: {}", path.display()),
        });
    }
    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(EngineError::Validation {
            message: format!("archive entry escapes the extraction root: {}", path.display()),
        });
    }
    Ok(())
}

/// Extracts `archive_path` into a fresh temp directory, rejecting any entry
/// that is a symlink/hardlink or whose path escapes the root, before a
/// single byte is written to the real data directory.
fn extract_to_tempdir(archive_path: &Path) -> EngineResult<tempfile::TempDir> {
    let file = std::fs::File::open(archive_path).map_err(|e| io_err("archive", e))?;
    let decoder = flate2::read::GzDecoder::new(file);
    let mut archive = tar::Archive::new(decoder);
    let staging = tempfile::tempdir().map_err(|e| io_err("archive", e))?;

    let entries = archive.entries().map_err(|e| io_err("archive", e))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| io_err("archive", e))?;
        let entry_type = entry.header().entry_type();
        if entry_type.is_symlink() || entry_type.is_hard_link() {
            return Err(EngineError::Validation {
                message: "archive contains a symlink or hard link entry, refusing to import".to_string(),
            });
        }
        let path = entry.path().map_err(|e| EngineError::Validation {
            message: format!("archive entry has an unreadable path: {e}"),
        })?;
        reject_unsafe_path(&path)?;
        let path = path.into_owned();
        entry.unpack_in(staging.path()).map_err(|e| io_err("archive", e))?;
        let _ = path;
    }
    Ok(staging)
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> EngineResult<T> {
    let bytes = std::fs::read(path).map_err(|e| io_err("archive", e))?;
    serde_json::from_slice(&bytes).map_err(|e| EngineError::Validation {
        message: format!("malformed {}: {e}", path.display()),
    })
}

/// Recomputes every checksum listed in `checksums.sha256` against the files
/// actually extracted, before any of them is loaded into the real store.
fn verify_checksums(root: &Path) -> EngineResult<()> {
    let listing = std::fs::read_to_string(root.join("checksums.sha256")).map_err(|e| io_err("archive", e))?;
    for line in listing.lines().filter(|l| !l.trim().is_empty()) {
        let (hash_part, path_part) = line.split_once("  ").ok_or_else(|| EngineError::Validation {
            message: format!("malformed checksums.sha256 line: {line}"),
        })?;
        let expected = hash_part.strip_prefix("sha256:").unwrap_or(hash_part);
        let path = root.join(path_part);
        let bytes = std::fs::read(&path).map_err(|e| io_err("archive", e))?;
        let actual = sha256_hex(&bytes);
        if actual != expected {
            return Err(EngineError::Validation {
                message: format!("checksum mismatch for {path_part}: expected {expected}, got {actual}"),
            });
        }
    }
    Ok(())
}

/// Imports an archive produced by [`export_archive`]. Chunks missing an
/// embedding (the archive was exported with `include_embeddings: false`) are
/// re-embedded via `embedder` when one is supplied; otherwise the containing
/// document is skipped and recorded in `ImportResult::errors`.
pub async fn import_archive(
    store: &IndexStore,
    archive_path: &Path,
    options: &ImportOptions,
    embedder: Option<&dyn Embedder>,
) -> EngineResult<ImportResult> {
    let staging = extract_to_tempdir(archive_path)?;
    let root = staging.path();

    let manifest: ArchiveManifest = read_json(&root.join("manifest.json"))?;
    if !SUPPORTED_VERSIONS.contains(&manifest.version.as_str()) {
        return Err(EngineError::Validation {
            message: format!(
                "unsupported archive version {} (supported: {})",
                manifest.version,
                SUPPORTED_VERSIONS.join(", ")
            ),
        });
    }
    verify_checksums(root)?;

    let document_ids: Vec<String> = read_json(&root.join("documents/index.json"))?;
    let embeddings: HashMap<String, Vec<f32>> = if manifest.includes_embeddings {
        read_json(&root.join("embeddings/embeddings.json"))?
    } else {
        HashMap::new()
    };

    let mut result = ImportResult::default();
    for document_id in &document_ids {
        let document: Document = match read_json(&root.join("documents/metadata").join(format!("{document_id}.json"))) {
            Ok(d) => d,
            Err(e) => {
                result.errors.push(format!("{document_id}: {e}"));
                continue;
            }
        };

        let chunk_dir = root.join("chunks/data").join(document_id);
        let mut chunks = Vec::new();
        let mut entries: Vec<_> = match std::fs::read_dir(&chunk_dir) {
            Ok(it) => it.filter_map(Result::ok).collect(),
            Err(_) => Vec::new(),
        };
        entries.sort_by_key(|e| e.path());
        for entry in entries {
            match read_json::<Chunk>(&entry.path()) {
                Ok(chunk) => chunks.push(chunk),
                Err(e) => result.errors.push(format!("{document_id}: {e}")),
            }
        }
        chunks.sort_by_key(|c| c.chunk_index);

        let mut vectors = Vec::with_capacity(chunks.len());
        let mut missing = Vec::new();
        for chunk in &chunks {
            match embeddings.get(&chunk.chunk_id) {
                Some(v) => vectors.push(v.clone()),
                None => missing.push(chunk.clone()),
            }
        }

        if !missing.is_empty() {
            let Some(embedder) = embedder else {
                result.errors.push(format!(
                    "{document_id}: archive has no embeddings for {} chunk(s) and no embedder was supplied",
                    missing.len()
                ));
                continue;
            };
            let texts: Vec<String> = missing.iter().map(|c| c.indexable_text()).collect();
            let regenerated = embedder.embed_documents(&texts).await?;
            vectors.clear();
            for chunk in &chunks {
                if let Some(v) = embeddings.get(&chunk.chunk_id) {
                    vectors.push(v.clone());
                } else {
                    let idx = missing.iter().position(|m| m.chunk_id == chunk.chunk_id).unwrap();
                    vectors.push(regenerated[idx].clone());
                }
            }
        }

        match store.add_document(&document, &chunks, &vectors, options.skip_duplicates).await {
            Ok(outcome) if outcome.skipped => result.documents_skipped += 1,
            Ok(_) => {
                result.documents_imported += 1;
                result.chunks_imported += chunks.len();
            }
            Err(e) => result.errors.push(format!("{document_id}: {e}")),
        }
    }

    tracing::info!(
        imported = result.documents_imported,
        skipped = result.documents_skipped,
        errors = result.errors.len(),
        "imported archive"
    );

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_absolute_path() {
        assert!(reject_unsafe_path(Path::new("/etc/passwd")).is_err());
    }

    #[test]
    fn rejects_parent_traversal() {
        assert!(reject_unsafe_path(Path::new("../../etc/passwd")).is_err());
    }

    #[test]
    fn accepts_plain_relative_path() {
        assert!(reject_unsafe_path(Path::new("documents/metadata/doc_1.json")).is_ok());
    }

    #[test]
    fn checksum_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("documents/metadata")).unwrap();
        std::fs::write(dir.path().join("documents/metadata/a.json"), b"{}").unwrap();
        write_checksums(dir.path()).unwrap();
        assert!(verify_checksums(dir.path()).is_ok());

        std::fs::write(dir.path().join("documents/metadata/a.json"), b"{\"tampered\":true}").unwrap();
        assert!(verify_checksums(dir.path()).is_err());
    }
}
