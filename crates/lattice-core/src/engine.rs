//! The engine context object.
//!
//! Owns one watcher, index, store and coordinator, plus the processing loop
//! that feeds watcher events to the coordinator. Instances are independent;
//! nothing here is global.

use crate::{CoreError, EngineConfig};
use lattice_indexer::{
    AnalysisCoordinator, Analyzer, ChangeKind, FileBackend, FileOutcome, IndexedFile,
    IndexerError, Notifier, Parser, PathWatcher, PersistentStateStore, RootEntries, StateBackend,
    Status, TextAnalyzer, TextParser, TracingNotifier, WatchEvent, WorkspaceAnalysisResult,
    WorkspaceIndex,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

/// A running indexing engine
pub struct Engine {
    config: EngineConfig,
    index: Arc<WorkspaceIndex>,
    store: Arc<PersistentStateStore>,
    coordinator: Arc<AnalysisCoordinator>,
    watcher: PathWatcher,
    shutdown_tx: broadcast::Sender<()>,
    event_loop: Mutex<Option<JoinHandle<()>>>,
}

impl Engine {
    /// Start an engine with the file-backed store and the text pipeline,
    /// then register every root listed in the config.
    pub async fn start(config: EngineConfig) -> Result<Self, CoreError> {
        config.ensure_dirs()?;

        let backend = Arc::new(FileBackend::new(config.state_dir()));
        let engine = Self::with_components(
            config,
            backend,
            Arc::new(TextParser::new()),
            Arc::new(TextAnalyzer::new()),
            Arc::new(TracingNotifier),
        )
        .await?;

        for root in engine.config.roots.clone() {
            if let Err(e) = engine.register_root(&root).await {
                warn!(root = ?root, error = %e, "Skipping configured root");
            }
        }

        Ok(engine)
    }

    /// Build an engine from explicit components. Loads the snapshot and
    /// starts the processing loop; no roots are registered.
    pub async fn with_components(
        config: EngineConfig,
        backend: Arc<dyn StateBackend>,
        parser: Arc<dyn Parser>,
        analyzer: Arc<dyn Analyzer>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, CoreError> {
        let store = Arc::new(PersistentStateStore::with_options(
            backend,
            config.store_options(),
        ));
        match store.load().await {
            Ok(()) => {}
            // Only undecodable data is replaced; read failures must not
            // wipe a snapshot that may be fine.
            Err(IndexerError::Serialization(message)) => {
                warn!(error = %message, "State snapshot is unreadable");
                store.discard_unreadable().await?;
            }
            Err(e) => return Err(e.into()),
        }

        let index = Arc::new(WorkspaceIndex::new());
        let coordinator = Arc::new(
            AnalysisCoordinator::new(
                index.clone(),
                store.clone(),
                parser,
                analyzer,
                config.coordinator_options(),
            )
            .with_notifier(notifier),
        );

        let (watcher, events) = PathWatcher::new(config.watcher_options());
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let event_loop = tokio::spawn(run_event_loop(coordinator.clone(), events, shutdown_rx));

        info!(data_dir = %config.data_dir.display(), "Engine started");

        Ok(Self {
            config,
            index,
            store,
            coordinator,
            watcher,
            shutdown_tx,
            event_loop: Mutex::new(Some(event_loop)),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Start indexing a root. Idempotent; returns the canonical root path.
    pub async fn register_root(&self, path: &Path) -> Result<PathBuf, CoreError> {
        if self.event_loop.lock().await.is_none() {
            return Err(CoreError::ShutDown);
        }

        let root = path
            .canonicalize()
            .ok()
            .filter(|p| p.is_dir())
            .ok_or_else(|| CoreError::InvalidRoot(path.to_path_buf()))?;

        let added = self.index.register_root(&root);
        if let Err(e) = self.watcher.watch(&root).await {
            if added {
                self.index.unregister_root(&root);
            }
            return Err(e.into());
        }

        if added {
            info!(root = ?root, "Registered root");
        }
        Ok(root)
    }

    /// Stop watching a root and drop its entries. Entries inside a still
    /// registered enclosing root move back to it. Persisted results stay.
    ///
    /// Returns `false` if the root was not registered.
    pub async fn unregister_root(&self, path: &Path) -> Result<bool, CoreError> {
        let root = resolve(path);

        self.watcher.unwatch(&root);
        let removed = self.index.unregister_root(&root);

        if let Some(count) = removed {
            info!(root = ?root, files = count, "Unregistered root");
        }
        Ok(removed.is_some())
    }

    pub fn roots(&self) -> Vec<PathBuf> {
        self.index.roots()
    }

    /// Re-analyze a file now, without waiting for the watcher.
    pub async fn on_file_saved(&self, path: &Path) -> Result<FileOutcome, CoreError> {
        Ok(self.coordinator.on_file_saved(&resolve(path)).await?)
    }

    /// Analyze every file under a registered root.
    pub async fn analyze_workspace(
        &self,
        root: &Path,
    ) -> Result<WorkspaceAnalysisResult, CoreError> {
        Ok(self.coordinator.analyze_workspace(&resolve(root)).await?)
    }

    pub fn query_file(&self, path: &Path) -> Option<IndexedFile> {
        self.index.get(&resolve(path))
    }

    pub fn query_root(&self, root: &Path) -> Option<RootEntries> {
        self.index.get_root(&resolve(root))
    }

    pub fn get_all(&self) -> BTreeMap<PathBuf, RootEntries> {
        self.index.get_all()
    }

    /// Status updates; only the latest value is kept.
    pub fn status(&self) -> watch::Receiver<Status> {
        self.coordinator.subscribe()
    }

    pub fn current_status(&self) -> Status {
        self.coordinator.status()
    }

    pub fn store(&self) -> &Arc<PersistentStateStore> {
        &self.store
    }

    pub fn index(&self) -> &Arc<WorkspaceIndex> {
        &self.index
    }

    /// Stop the processing loop and release every watcher.
    pub async fn shutdown(&self) {
        let Some(handle) = self.event_loop.lock().await.take() else {
            return;
        };

        self.watcher.unwatch_all();
        let _ = self.shutdown_tx.send(());
        if let Err(e) = handle.await {
            error!("Event loop failed: {}", e);
        }

        info!("Engine shut down");
    }
}

/// Canonical form of `path` if it exists, else `path` as given.
fn resolve(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// Consume watcher events until shutdown.
///
/// Deletions run inline and analyses get their version before the next event
/// is read, so per-path ordering follows event order. The analyses
/// themselves run as independent tasks.
async fn run_event_loop(
    coordinator: Arc<AnalysisCoordinator>,
    mut events: mpsc::Receiver<WatchEvent>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut tasks = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            event = events.recv() => match event {
                Some(event) => dispatch(&coordinator, event, &mut tasks).await,
                None => break,
            },
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(e) = joined {
                    if e.is_panic() {
                        error!("Analysis task panicked: {}", e);
                    }
                }
            }
        }
    }

    tasks.shutdown().await;
    debug!("Event loop stopped");
}

async fn dispatch(
    coordinator: &Arc<AnalysisCoordinator>,
    event: WatchEvent,
    tasks: &mut JoinSet<()>,
) {
    let change = match event {
        WatchEvent::Change(change) => change,
        WatchEvent::Error { root, message } => {
            warn!(root = ?root, "Watcher error: {}", message);
            return;
        }
    };

    if change.kind == ChangeKind::Deleted {
        if let Err(e) = coordinator.on_file_event(&change).await {
            warn!(path = ?change.path, error = %e, "Failed to apply deletion");
        }
        return;
    }
    if change.is_dir {
        return;
    }

    match coordinator.begin_analysis(&change.path) {
        Ok(Some(ticket)) => {
            let coordinator = coordinator.clone();
            tasks.spawn(async move {
                // Failures are already reported through status and notifier
                let _ = coordinator.finish_analysis(ticket).await;
            });
        }
        Ok(None) => {}
        Err(e) => debug!(path = ?change.path, error = %e, "Ignoring event"),
    }
}
