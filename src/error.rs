use std::io;
use thiserror::Error;

/// Result type for coffer operations
pub type Result<T> = std::result::Result<T, CofferError>;

/// Unified error type for all coffer operations
#[derive(Debug, Error)]
pub enum CofferError {
    // Archive errors
    #[error("Wrong password for archive")]
    WrongPassword,

    #[error("Corrupt archive: {0}")]
    CorruptArchive(String),

    #[error("Archive is already open in another process: {0}")]
    ArchiveLocked(String),

    #[error("Not found in archive: {0}")]
    NotFound(String),

    // Tree operation errors
    #[error("Name conflict: {0}")]
    NameConflict(String),

    #[error("Invalid name: {0}")]
    InvalidName(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    // Cancellation is a normal early exit, never retried internally
    #[error("Operation aborted")]
    Aborted,

    // Crypto errors
    #[error("Crypto error: {0}")]
    Crypto(String),

    // Envelope errors
    #[error("Invalid envelope format: {0}")]
    InvalidFormat(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    // Serialization errors
    #[error("Metadata serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
