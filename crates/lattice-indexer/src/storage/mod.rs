//! Durable state store.
//!
//! Holds the last known-good [`PersistedSnapshot`] in memory and writes the
//! whole snapshot through to a [`StateBackend`] on every mutation. A mutation
//! only becomes visible in memory after the backend accepted it.

mod backend;
mod snapshot;

pub use backend::{FileBackend, MemoryBackend, StateBackend};
pub use snapshot::{PersistedSnapshot, SnapshotFormat};

use crate::model::{AnalysisResult, WorkspaceAnalysisResult};
use crate::IndexerError;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Key the snapshot is stored under unless configured otherwise.
pub const DEFAULT_SNAPSHOT_KEY: &str = "lattice-state";

/// Store options.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Backend key for the snapshot
    pub key: String,
    /// Snapshot encoding
    pub format: SnapshotFormat,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            key: DEFAULT_SNAPSHOT_KEY.to_string(),
            format: SnapshotFormat::Json,
        }
    }
}

/// Restart-surviving store of analysis results.
pub struct PersistentStateStore {
    backend: Arc<dyn StateBackend>,
    options: StoreOptions,
    /// `None` until `load()` (or `clear()`) has run
    state: RwLock<Option<PersistedSnapshot>>,
    /// Serializes write-through so snapshots reach the backend in order
    write_lock: Mutex<()>,
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

impl PersistentStateStore {
    pub fn new(backend: Arc<dyn StateBackend>) -> Self {
        Self::with_options(backend, StoreOptions::default())
    }

    pub fn with_options(backend: Arc<dyn StateBackend>, options: StoreOptions) -> Self {
        Self {
            backend,
            options,
            state: RwLock::new(None),
            write_lock: Mutex::new(()),
        }
    }

    /// Whether `load()` has completed.
    pub fn is_loaded(&self) -> bool {
        self.state.read().is_some()
    }

    /// Load the last snapshot from the backend.
    ///
    /// A missing snapshot loads as empty. A snapshot that fails to decode is
    /// an error and leaves the store unloaded.
    pub async fn load(&self) -> Result<(), IndexerError> {
        let _guard = self.write_lock.lock().await;

        let snapshot = match self.backend.get(&self.options.key).await? {
            Some(data) => self.options.format.decode(&data)?,
            None => PersistedSnapshot::default(),
        };

        info!(
            files = snapshot.file_analyses.len(),
            workspaces = snapshot.workspace_analyses.len(),
            "Loaded state snapshot"
        );

        *self.state.write() = Some(snapshot);
        Ok(())
    }

    /// Recover from a snapshot that fails to decode.
    ///
    /// The unreadable bytes are copied to `<key>.corrupt` before an empty
    /// snapshot replaces them, so nothing is destroyed. Returns the key the
    /// bytes were moved to, or `None` if the stored snapshot was readable
    /// after all (it is then loaded as usual).
    pub async fn discard_unreadable(&self) -> Result<Option<String>, IndexerError> {
        let _guard = self.write_lock.lock().await;

        let key = &self.options.key;
        let Some(data) = self.backend.get(key).await? else {
            *self.state.write() = Some(PersistedSnapshot::default());
            return Ok(None);
        };
        if let Ok(snapshot) = self.options.format.decode(&data) {
            *self.state.write() = Some(snapshot);
            return Ok(None);
        }

        let quarantine = format!("{}.corrupt", key);
        self.backend
            .set(&quarantine, data)
            .await
            .map_err(|e| IndexerError::Persistence(e.to_string()))?;

        let empty = PersistedSnapshot::default();
        self.write_through(&empty).await?;
        *self.state.write() = Some(empty);

        warn!(key = %key, moved_to = %quarantine, "Moved unreadable snapshot aside");
        Ok(Some(quarantine))
    }

    /// Reset memory and the durable snapshot to empty.
    pub async fn clear(&self) -> Result<(), IndexerError> {
        let _guard = self.write_lock.lock().await;

        let empty = PersistedSnapshot::default();
        self.write_through(&empty).await?;
        *self.state.write() = Some(empty);

        info!("Cleared state snapshot");
        Ok(())
    }

    pub fn get_file_analysis(&self, path: &Path) -> Option<AnalysisResult> {
        self.state
            .read()
            .as_ref()?
            .file_analyses
            .get(&path_key(path))
            .cloned()
    }

    pub fn get_workspace_analysis(&self, root: &Path) -> Option<WorkspaceAnalysisResult> {
        self.state
            .read()
            .as_ref()?
            .workspace_analyses
            .get(&path_key(root))
            .cloned()
    }

    /// Copy of every persisted file analysis.
    pub fn file_analyses(&self) -> BTreeMap<String, AnalysisResult> {
        self.state
            .read()
            .as_ref()
            .map(|s| s.file_analyses.clone())
            .unwrap_or_default()
    }

    /// Copy of the full snapshot (empty before `load()`).
    pub fn snapshot(&self) -> PersistedSnapshot {
        self.state.read().clone().unwrap_or_default()
    }

    pub async fn set_file_analysis(
        &self,
        path: &Path,
        result: AnalysisResult,
    ) -> Result<(), IndexerError> {
        let key = path_key(path);
        self.mutate(move |snapshot| {
            snapshot.file_analyses.insert(key, result);
            true
        })
        .await
    }

    pub async fn set_workspace_analysis(
        &self,
        root: &Path,
        result: WorkspaceAnalysisResult,
    ) -> Result<(), IndexerError> {
        let key = path_key(root);
        self.mutate(move |snapshot| {
            snapshot.workspace_analyses.insert(key, result);
            true
        })
        .await
    }

    /// Drop the persisted analysis of one file. Absence is not an error.
    pub async fn remove_file_analysis(&self, path: &Path) -> Result<bool, IndexerError> {
        self.remove_file_analyses(&[path.to_path_buf()]).await
    }

    /// Drop several persisted file analyses with a single write.
    ///
    /// Returns whether anything was removed; nothing is written otherwise.
    pub async fn remove_file_analyses(&self, paths: &[PathBuf]) -> Result<bool, IndexerError> {
        let keys: Vec<String> = paths.iter().map(|p| path_key(p)).collect();
        let mut removed = false;
        self.mutate(|snapshot| {
            for key in &keys {
                removed |= snapshot.file_analyses.remove(key).is_some();
            }
            removed
        })
        .await?;
        Ok(removed)
    }

    /// Apply `f` to a copy of the snapshot and write it through. The copy
    /// replaces the in-memory state only once the backend accepted it.
    /// `f` returns whether it changed anything.
    async fn mutate<F>(&self, f: F) -> Result<(), IndexerError>
    where
        F: FnOnce(&mut PersistedSnapshot) -> bool,
    {
        let _guard = self.write_lock.lock().await;

        let mut next = self.state.read().clone().ok_or(IndexerError::NotLoaded)?;
        if !f(&mut next) {
            return Ok(());
        }

        self.write_through(&next).await?;
        *self.state.write() = Some(next);
        Ok(())
    }

    async fn write_through(&self, snapshot: &PersistedSnapshot) -> Result<(), IndexerError> {
        let data = self
            .options
            .format
            .encode(snapshot)
            .map_err(|e| IndexerError::Persistence(e.to_string()))?;
        let size = data.len();

        self.backend
            .set(&self.options.key, data)
            .await
            .map_err(|e| {
                warn!(key = %self.options.key, error = %e, "Snapshot write failed");
                IndexerError::Persistence(e.to_string())
            })?;

        debug!(key = %self.options.key, size, "Snapshot written through");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::tempdir;

    fn analysis(lines: f64) -> AnalysisResult {
        AnalysisResult {
            timestamp: Utc::now(),
            language_id: "plaintext".into(),
            metrics: BTreeMap::from([("lineCount".to_string(), lines)]),
        }
    }

    /// Backend whose writes can be switched to fail.
    #[derive(Default)]
    struct FlakyBackend {
        inner: MemoryBackend,
        fail: AtomicBool,
    }

    #[async_trait]
    impl StateBackend for FlakyBackend {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, IndexerError> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), IndexerError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(IndexerError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "disk full",
                )));
            }
            self.inner.set(key, value).await
        }

    }

    #[tokio::test]
    async fn test_reads_before_load_are_not_found() {
        let backend = Arc::new(MemoryBackend::new());
        let first = PersistentStateStore::new(backend.clone());
        first.load().await.unwrap();
        first
            .set_file_analysis(Path::new("/proj/a.txt"), analysis(1.0))
            .await
            .unwrap();

        let second = PersistentStateStore::new(backend);
        assert!(!second.is_loaded());
        assert!(second.get_file_analysis(Path::new("/proj/a.txt")).is_none());

        second.load().await.unwrap();
        assert!(second.get_file_analysis(Path::new("/proj/a.txt")).is_some());
    }

    #[tokio::test]
    async fn test_mutation_before_load_fails() {
        let store = PersistentStateStore::new(Arc::new(MemoryBackend::new()));
        let result = store
            .set_file_analysis(Path::new("/a"), analysis(1.0))
            .await;
        assert!(matches!(result, Err(IndexerError::NotLoaded)));
    }

    #[tokio::test]
    async fn test_restart_roundtrip_file_backend() {
        let temp_dir = tempdir().unwrap();
        let path = Path::new("/proj/a.txt");
        let result = analysis(10.0);

        for format in [SnapshotFormat::Json, SnapshotFormat::MessagePack] {
            let options = StoreOptions {
                key: format!("state-{:?}", format),
                format,
            };
            let store = PersistentStateStore::with_options(
                Arc::new(FileBackend::new(temp_dir.path())),
                options.clone(),
            );
            store.load().await.unwrap();
            store.set_file_analysis(path, result.clone()).await.unwrap();
            drop(store);

            let restarted = PersistentStateStore::with_options(
                Arc::new(FileBackend::new(temp_dir.path())),
                options,
            );
            restarted.load().await.unwrap();
            assert_eq!(restarted.get_file_analysis(path), Some(result.clone()));
        }
    }

    #[tokio::test]
    async fn test_failed_write_keeps_last_good_state() {
        let backend = Arc::new(FlakyBackend::default());
        let store = PersistentStateStore::new(backend.clone());
        store.load().await.unwrap();

        let path = Path::new("/proj/a.txt");
        store.set_file_analysis(path, analysis(1.0)).await.unwrap();

        backend.fail.store(true, Ordering::SeqCst);
        let result = store.set_file_analysis(path, analysis(2.0)).await;
        assert!(matches!(result, Err(IndexerError::Persistence(_))));
        assert_eq!(
            store.get_file_analysis(path).unwrap().metric("lineCount"),
            Some(1.0)
        );

        // The backend still holds the last good snapshot as well
        let reloaded = PersistentStateStore::new(backend.clone());
        reloaded.load().await.unwrap();
        assert_eq!(
            reloaded.get_file_analysis(path).unwrap().metric("lineCount"),
            Some(1.0)
        );
    }

    #[tokio::test]
    async fn test_remove_and_clear() {
        let backend = Arc::new(MemoryBackend::new());
        let store = PersistentStateStore::new(backend.clone());
        store.load().await.unwrap();

        store
            .set_file_analysis(Path::new("/p/a"), analysis(1.0))
            .await
            .unwrap();
        store
            .set_file_analysis(Path::new("/p/b"), analysis(2.0))
            .await
            .unwrap();

        assert!(store.remove_file_analysis(Path::new("/p/a")).await.unwrap());
        assert!(!store.remove_file_analysis(Path::new("/p/a")).await.unwrap());
        assert_eq!(store.file_analyses().len(), 1);

        store.clear().await.unwrap();
        assert!(store.snapshot().is_empty());

        let reloaded = PersistentStateStore::new(backend);
        reloaded.load().await.unwrap();
        assert!(reloaded.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_fails_load() {
        let backend = Arc::new(MemoryBackend::new());
        backend
            .set(DEFAULT_SNAPSHOT_KEY, b"{broken".to_vec())
            .await
            .unwrap();

        let store = PersistentStateStore::new(backend);
        assert!(store.load().await.is_err());
        assert!(!store.is_loaded());

        store.clear().await.unwrap();
        assert!(store.is_loaded());
    }

    #[tokio::test]
    async fn test_discard_unreadable_keeps_the_bytes() {
        let backend = Arc::new(MemoryBackend::new());
        backend
            .set(DEFAULT_SNAPSHOT_KEY, b"{broken".to_vec())
            .await
            .unwrap();

        let store = PersistentStateStore::new(backend.clone());
        assert!(matches!(
            store.load().await,
            Err(IndexerError::Serialization(_))
        ));

        let moved = store.discard_unreadable().await.unwrap();
        let quarantine = format!("{}.corrupt", DEFAULT_SNAPSHOT_KEY);
        assert_eq!(moved.as_deref(), Some(quarantine.as_str()));
        assert_eq!(
            backend.get(&quarantine).await.unwrap(),
            Some(b"{broken".to_vec())
        );
        assert!(store.is_loaded());
        assert!(store.snapshot().is_empty());

        let reloaded = PersistentStateStore::new(backend);
        reloaded.load().await.unwrap();
        assert!(reloaded.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_discard_unreadable_loads_a_readable_snapshot() {
        let backend = Arc::new(MemoryBackend::new());
        let first = PersistentStateStore::new(backend.clone());
        first.load().await.unwrap();
        first
            .set_file_analysis(Path::new("/p/a"), analysis(3.0))
            .await
            .unwrap();

        let second = PersistentStateStore::new(backend.clone());
        assert_eq!(second.discard_unreadable().await.unwrap(), None);
        assert!(second.get_file_analysis(Path::new("/p/a")).is_some());
        let quarantine = format!("{}.corrupt", DEFAULT_SNAPSHOT_KEY);
        assert!(backend.get(&quarantine).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_non_finite_metric_is_not_persisted() {
        let backend = Arc::new(MemoryBackend::new());
        let store = PersistentStateStore::new(backend.clone());
        store.load().await.unwrap();

        let path = Path::new("/proj/a.txt");
        store.set_file_analysis(path, analysis(1.0)).await.unwrap();

        let result = store.set_file_analysis(path, analysis(f64::NAN)).await;
        assert!(matches!(result, Err(IndexerError::Persistence(_))));
        assert_eq!(
            store.get_file_analysis(path).unwrap().metric("lineCount"),
            Some(1.0)
        );

        // What reached the backend still decodes
        let reloaded = PersistentStateStore::new(backend);
        reloaded.load().await.unwrap();
        assert_eq!(
            reloaded.get_file_analysis(path).unwrap().metric("lineCount"),
            Some(1.0)
        );
    }
}
