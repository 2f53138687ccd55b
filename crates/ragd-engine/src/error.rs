//! The `EngineError` sum type every public operation returns through.
//!
//! Each variant carries the fields needed to build a user-visible message
//! without the caller having to re-derive context from a generic error string.

use thiserror::Error;

/// Classification surfaced to ingest callers when a document fails to index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum FailureCategory {
    ImageOnly,
    Encrypted,
    Malformed,
    JsRendered,
    Empty,
    TooShort,
    Unknown,
}

impl std::fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ImageOnly => "image-only",
            Self::Encrypted => "encrypted",
            Self::Malformed => "malformed",
            Self::JsRendered => "js-rendered",
            Self::Empty => "empty",
            Self::TooShort => "too-short",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("document not found: {id}")]
    DocumentNotFound { id: String },

    #[error("chunk not found: {id}")]
    ChunkNotFound { id: String },

    #[error("duplicate content: a document with content_hash {content_hash} is already indexed as {existing_document_id}")]
    DuplicateContent {
        content_hash: String,
        existing_document_id: String,
    },

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("keyword query parse error at position {position}: {message}")]
    QueryParse { message: String, position: usize },

    #[error("backend unavailable ({backend}): {message}")]
    BackendUnavailable { backend: String, message: String },

    #[error("external service failure ({service}): {message}")]
    ExternalService { service: String, message: String },

    #[error("validation failed: {message}")]
    Validation { message: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// The single-line, user-visible message (never an internal stack trace).
    pub fn user_message(&self) -> String {
        self.to_string()
    }

    /// A short remediation hint for a human operator, where one exists.
    pub fn remediation(&self) -> Option<String> {
        match self {
            Self::DuplicateContent { .. } => {
                Some("the document is already indexed; pass skip_duplicates=false to re-ingest anyway".into())
            }
            Self::DimensionMismatch { expected, .. } => Some(format!(
                "re-embed the document with the configured model (expected dimension {expected})"
            )),
            Self::QueryParse { .. } => {
                Some("check for unbalanced parentheses or unterminated quotes in the query".into())
            }
            Self::BackendUnavailable { backend, .. } => {
                Some(format!("verify the {backend} store is reachable and not corrupted"))
            }
            Self::ExternalService { service, .. } => {
                Some(format!("retry once the {service} is reachable; the engine treats this as transient"))
            }
            Self::Validation { .. } => Some("refuse the archive/import and inspect it manually".into()),
            _ => None,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
