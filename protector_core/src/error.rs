//! Error types shared across the core crate.

use thiserror::Error;

/// Errors produced by snapshot handling and the persistent stores.
#[derive(Debug, Error)]
pub enum ProtectorError {
    /// Filesystem access failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A persisted document could not be parsed or serialized.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A tool's input schema is not a JSON object and cannot be normalized.
    #[error("malformed input schema for tool '{0}'")]
    MalformedSchema(String),

    /// The named tool is not present in the snapshot being approved.
    #[error("tool '{0}' not found in snapshot")]
    UnknownTool(String),

    /// Atomic replacement of a store file failed after the write.
    #[error("failed to persist store file: {0}")]
    Persist(String),

    /// The requested quarantine entry does not exist.
    #[error("quarantine entry '{0}' not found")]
    QuarantineNotFound(String),
}

pub type Result<T> = std::result::Result<T, ProtectorError>;
