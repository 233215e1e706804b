//! Key-value backends for the durable snapshot.

use crate::IndexerError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Opaque durable key-value storage.
///
/// The store only ever writes whole snapshots, one value per key.
#[async_trait]
pub trait StateBackend: Send + Sync {
    /// Read a value; `None` if the key was never written.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, IndexerError>;

    /// Replace a value. Readers must see either the old or the new value.
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), IndexerError>;
}

/// One file per key under a directory, written atomically.
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the snapshot files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File that stores `key`.
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.snapshot", key))
    }
}

#[async_trait]
impl StateBackend for FileBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, IndexerError> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), IndexerError> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let path = self.path_for(key);
        let temp_path = self.dir.join(format!(".{}.snapshot.tmp", key));

        // Atomic write: write + fsync temp file, then rename
        let mut file = tokio::fs::File::create(&temp_path).await?;
        file.write_all(&value).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&temp_path, &path).await?;

        debug!(path = ?path, size = value.len(), "Wrote snapshot");
        Ok(())
    }
}

/// Process-local backend, for embedding and tests.
#[derive(Default)]
pub struct MemoryBackend {
    values: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, IndexerError> {
        Ok(self.values.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), IndexerError> {
        self.values.lock().insert(key.to_string(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_file_backend_roundtrip() {
        let temp_dir = tempdir().unwrap();
        let backend = FileBackend::new(temp_dir.path().join("state"));

        assert!(backend.get("main").await.unwrap().is_none());

        backend.set("main", b"one".to_vec()).await.unwrap();
        backend.set("main", b"two".to_vec()).await.unwrap();
        assert_eq!(backend.get("main").await.unwrap(), Some(b"two".to_vec()));

        // No temp file is left behind
        let leftovers: Vec<_> = std::fs::read_dir(backend.dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_file_backend_keys_are_separate_files() {
        let temp_dir = tempdir().unwrap();
        let backend = FileBackend::new(temp_dir.path());

        backend.set("k", b"v".to_vec()).await.unwrap();
        backend.set("k.corrupt", b"old".to_vec()).await.unwrap();
        assert_eq!(backend.get("k").await.unwrap(), Some(b"v".to_vec()));
        assert!(backend.path_for("k.corrupt").exists());
    }

    #[tokio::test]
    async fn test_memory_backend() {
        let backend = MemoryBackend::new();
        backend.set("k", vec![1, 2, 3]).await.unwrap();
        assert_eq!(backend.get("k").await.unwrap(), Some(vec![1, 2, 3]));
        assert!(backend.get("other").await.unwrap().is_none());
    }
}
