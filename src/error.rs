//! Error taxonomy for the retrieval pipeline.
//!
//! Chunking and normalization skip missing optional fields but fail fast on
//! structurally required ones. Index, embedding, and generation failures
//! propagate unchanged to the caller; downgrading them to user-facing text
//! is left to the HTTP layer.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the document pipeline, the index, and the model
/// capabilities.
#[derive(Debug, Error)]
pub enum RagError {
    /// A source document or ledger entry does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// An issue record or upload is malformed or missing a required field.
    #[error("invalid input: {0}")]
    Validation(String),

    /// The storage layer could not be reached or rejected an operation.
    #[error("index unavailable: {0}")]
    IndexUnavailable(#[from] sqlx::Error),

    /// The storage layer returned data that cannot be decoded.
    #[error("index corrupt: {0}")]
    IndexCorrupt(String),

    /// The embedding capability failed.
    #[error("embedding failed: {0}")]
    Embedding(String),

    /// The generation capability failed.
    #[error("generation failed: {0}")]
    Generation(String),

    /// Text could not be extracted from a source file.
    #[error("extraction failed for {path}: {message}")]
    Extract { path: PathBuf, message: String },

    /// An upload with the same file name is already stored.
    #[error("file already exists: {0}")]
    AlreadyExists(String),

    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

impl RagError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        RagError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn json(context: impl Into<String>, source: serde_json::Error) -> Self {
        RagError::Json {
            context: context.into(),
            source,
        }
    }
}

pub type Result<T, E = RagError> = std::result::Result<T, E>;
