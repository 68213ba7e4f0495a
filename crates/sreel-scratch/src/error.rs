//! Storage error types.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for scratch operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in the scratch store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("path escapes the scratch tree: {0}")]
    OutsideScratch(PathBuf),
}
