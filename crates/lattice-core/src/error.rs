//! Core error types for Lattice.

use lattice_indexer::IndexerError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur in engine operations
#[derive(Debug, Error)]
pub enum CoreError {
    /// Error from the indexing engine
    #[error(transparent)]
    Indexer(#[from] IndexerError),

    /// Config file could not be parsed
    #[error("Invalid config {path}: {message}")]
    Config { path: PathBuf, message: String },

    /// Root path does not exist or is not a directory
    #[error("Invalid root: {0}")]
    InvalidRoot(PathBuf),

    /// Engine was shut down
    #[error("Engine is shut down")]
    ShutDown,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
