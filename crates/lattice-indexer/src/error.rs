//! Indexer error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during watching, analysis, and persistence.
#[derive(Debug, Error)]
pub enum IndexerError {
    /// I/O error outside of a per-file read
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A root could not be watched (missing path, permissions, OS limits)
    #[error("Cannot watch {root}: {message}")]
    Watch { root: PathBuf, message: String },

    /// File vanished or became unreadable between the event and the read
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The parser rejected the file
    #[error("Parse error in {path}: {message}")]
    Parse { path: PathBuf, message: String },

    /// The analyzer rejected the parse result
    #[error("Analysis error in {path}: {message}")]
    Analysis { path: PathBuf, message: String },

    /// Parse + analyze exceeded the per-file budget
    #[error("Analysis of {path} timed out")]
    Timeout { path: PathBuf },

    /// Durable snapshot write failed
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A newer version of the path was already committed
    #[error("Stale write for {path}: version {version} < {latest}")]
    StaleWrite {
        path: PathBuf,
        version: u64,
        latest: u64,
    },

    /// Path is not under any registered root
    #[error("No registered root contains {0}")]
    UnknownRoot(PathBuf),

    /// The state store was used before `load()`
    #[error("State store has not been loaded")]
    NotLoaded,
}

impl IndexerError {
    /// The path or root this error is attributed to, if any.
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            IndexerError::Watch { root, .. } => Some(root),
            IndexerError::Read { path, .. }
            | IndexerError::Parse { path, .. }
            | IndexerError::Analysis { path, .. }
            | IndexerError::Timeout { path }
            | IndexerError::StaleWrite { path, .. } => Some(path),
            IndexerError::UnknownRoot(path) => Some(path),
            _ => None,
        }
    }

    /// Whether this error is scoped to a single file and must not abort
    /// a workspace-wide run.
    pub fn is_per_file(&self) -> bool {
        matches!(
            self,
            IndexerError::Read { .. }
                | IndexerError::Parse { .. }
                | IndexerError::Analysis { .. }
                | IndexerError::Timeout { .. }
        )
    }
}

impl From<serde_json::Error> for IndexerError {
    fn from(e: serde_json::Error) -> Self {
        IndexerError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for IndexerError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        IndexerError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for IndexerError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        IndexerError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = IndexerError::UnknownRoot(PathBuf::from("/test/path"));
        assert!(err.to_string().contains("/test/path"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: IndexerError = io_err.into();
        assert!(matches!(err, IndexerError::Io(_)));
    }

    #[test]
    fn test_per_file_classification() {
        let parse = IndexerError::Parse {
            path: PathBuf::from("a.rs"),
            message: "bad".into(),
        };
        assert!(parse.is_per_file());
        assert_eq!(parse.path(), Some(&PathBuf::from("a.rs")));

        let persist = IndexerError::Persistence("disk full".into());
        assert!(!persist.is_per_file());
        assert!(persist.path().is_none());
    }
}
