//! Turns file events and explicit triggers into index and store updates.
//!
//! A file analysis runs in two halves. [`AnalysisCoordinator::begin_analysis`]
//! is synchronous and allocates the path's next version, so callers that
//! process events in order also allocate versions in order. The async
//! [`AnalysisCoordinator::finish_analysis`] reads the content, runs the
//! parser and analyzer, and commits the record only if its version is still
//! the latest. Index and store are updated under one commit lock, so they
//! always agree on which version won.

use crate::index::{VersionTicket, WorkspaceIndex};
use crate::model::{
    AnalysisResult, FileFailure, IndexedFile, ParseResult, Status, WorkspaceAnalysisResult,
};
use crate::notifier::{MessageLevel, Notifier, TracingNotifier};
use crate::pipeline::{Analyzer, Parser};
use crate::storage::PersistentStateStore;
use crate::walker::{default_excludes, is_excluded, Walker};
use crate::watcher::{ChangeKind, FileChange};
use crate::IndexerError;
use chrono::Utc;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Coordinator options.
#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    /// Maximum concurrent file analyses during a workspace run
    pub workspace_concurrency: usize,
    /// Soft per-file budget for read + parse + analyze
    pub file_timeout: Option<Duration>,
    /// Files larger than this fail with a parse error instead of being read
    pub max_file_size: u64,
    /// Directory names excluded below each root
    pub excludes: Vec<String>,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            workspace_concurrency: 8,
            file_timeout: Some(Duration::from_secs(30)),
            max_file_size: 10 * 1024 * 1024, // 10MB
            excludes: default_excludes(),
        }
    }
}

/// Result of handling one file event.
#[derive(Debug, Clone, PartialEq)]
pub enum FileOutcome {
    /// The record was committed to the index and the store
    Indexed(Box<IndexedFile>),
    /// A newer version won, or the root went away, before this one committed
    Superseded { path: PathBuf, version: u64 },
    /// Deletion removed these entries (possibly none)
    Removed(Vec<PathBuf>),
    /// Directory or excluded path; nothing to do
    Skipped,
}

pub struct AnalysisCoordinator {
    index: Arc<WorkspaceIndex>,
    store: Arc<PersistentStateStore>,
    parser: Arc<dyn Parser>,
    analyzer: Arc<dyn Analyzer>,
    notifier: Arc<dyn Notifier>,
    options: CoordinatorOptions,
    status: watch::Sender<Status>,
    commit_lock: Mutex<()>,
    workspace_runs: AtomicUsize,
}

impl AnalysisCoordinator {
    pub fn new(
        index: Arc<WorkspaceIndex>,
        store: Arc<PersistentStateStore>,
        parser: Arc<dyn Parser>,
        analyzer: Arc<dyn Analyzer>,
        options: CoordinatorOptions,
    ) -> Self {
        let (status, _) = watch::channel(Status::Idle);
        Self {
            index,
            store,
            parser,
            analyzer,
            notifier: Arc::new(TracingNotifier),
            options,
            status,
            commit_lock: Mutex::new(()),
            workspace_runs: AtomicUsize::new(0),
        }
    }

    /// Replace the host notifier.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn index(&self) -> &Arc<WorkspaceIndex> {
        &self.index
    }

    pub fn store(&self) -> &Arc<PersistentStateStore> {
        &self.store
    }

    /// Subscribe to status changes. Intermediate states may be skipped.
    pub fn subscribe(&self) -> watch::Receiver<Status> {
        self.status.subscribe()
    }

    /// Current status.
    pub fn status(&self) -> Status {
        self.status.borrow().clone()
    }

    /// Handle one watcher event end to end.
    pub async fn on_file_event(&self, change: &FileChange) -> Result<FileOutcome, IndexerError> {
        match change.kind {
            ChangeKind::Deleted => self.remove_path(&change.path).await,
            _ if change.is_dir => Ok(FileOutcome::Skipped),
            ChangeKind::Added | ChangeKind::Changed => match self.begin_analysis(&change.path)? {
                Some(pending) => self.finish_analysis(pending).await,
                None => Ok(FileOutcome::Skipped),
            },
        }
    }

    /// Explicit save: re-analyze `path` now, bypassing the event queue.
    pub async fn on_file_saved(&self, path: &Path) -> Result<FileOutcome, IndexerError> {
        self.on_file_event(&FileChange::file(path, ChangeKind::Changed))
            .await
    }

    /// Allocate the next version for `path`.
    ///
    /// Returns `None` for excluded paths.
    pub fn begin_analysis(&self, path: &Path) -> Result<Option<VersionTicket>, IndexerError> {
        let root = self
            .index
            .owning_root(path)
            .ok_or_else(|| IndexerError::UnknownRoot(path.to_path_buf()))?;

        if is_excluded(&root, path, &self.options.excludes) {
            debug!(path = ?path, "Skipping excluded path");
            return Ok(None);
        }

        let ticket = self
            .index
            .begin(path)
            .ok_or_else(|| IndexerError::UnknownRoot(path.to_path_buf()))?;
        Ok(Some(ticket))
    }

    /// Run and commit an analysis whose version was allocated by
    /// [`Self::begin_analysis`], reporting status and failures.
    pub async fn finish_analysis(
        &self,
        ticket: VersionTicket,
    ) -> Result<FileOutcome, IndexerError> {
        self.set_status(Status::AnalyzingFile(ticket.path().to_path_buf()));

        let result = self.analyze_ticket(ticket).await;
        match &result {
            Ok(_) => self.settle(),
            Err(e) => self.report_error(e),
        }
        result
    }

    /// Analyze every file under `root` with bounded concurrency.
    ///
    /// Per-file failures are collected, never propagated. Only a failed
    /// scan or a failed write of the aggregate result fails the run.
    pub async fn analyze_workspace(
        self: &Arc<Self>,
        root: &Path,
    ) -> Result<WorkspaceAnalysisResult, IndexerError> {
        if !self.index.is_registered(root) {
            return Err(IndexerError::UnknownRoot(root.to_path_buf()));
        }

        let run = WorkspaceRun::start(self);
        self.set_status(Status::AnalyzingWorkspace(root.to_path_buf()));

        let result = self.run_workspace(root).await;
        run.finish();

        match &result {
            Ok(summary) => {
                let level = if summary.failed == 0 {
                    MessageLevel::Success
                } else {
                    MessageLevel::Error
                };
                self.notifier.message(
                    level,
                    &format!("{}: {}", root.display(), summary.summary()),
                );
                self.settle();
            }
            Err(e) => self.report_error(e),
        }
        result
    }

    async fn run_workspace(
        self: &Arc<Self>,
        root: &Path,
    ) -> Result<WorkspaceAnalysisResult, IndexerError> {
        let start = Instant::now();

        let walker = Walker::new(root, self.options.excludes.clone());
        let entries = tokio::task::spawn_blocking(move || walker.walk())
            .await
            .map_err(|e| IndexerError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))??;

        info!(root = ?root, files = entries.len(), "Starting workspace analysis");

        let semaphore = Arc::new(Semaphore::new(self.options.workspace_concurrency.max(1)));
        let mut tasks = JoinSet::new();
        let mut failures = Vec::new();

        for entry in entries {
            let ticket = match self.begin_analysis(&entry.path) {
                Ok(Some(ticket)) => ticket,
                Ok(None) => continue,
                Err(e) => {
                    failures.push(FileFailure {
                        path: entry.path,
                        error: e.to_string(),
                    });
                    continue;
                }
            };

            let this = Arc::clone(self);
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let path = ticket.path().to_path_buf();
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => this.analyze_ticket(ticket).await,
                    Err(_) => Err(IndexerError::Analysis {
                        path: path.clone(),
                        message: "worker pool closed".to_string(),
                    }),
                };
                (path, result)
            });
        }

        let mut succeeded = 0;
        let mut superseded = 0;
        let mut metrics: BTreeMap<String, f64> = BTreeMap::new();

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(FileOutcome::Indexed(record)))) => {
                    succeeded += 1;
                    for (name, value) in &record.analysis.metrics {
                        *metrics.entry(name.clone()).or_insert(0.0) += value;
                    }
                }
                Ok((_, Ok(FileOutcome::Superseded { .. }))) => superseded += 1,
                Ok((_, Ok(_))) => {}
                Ok((path, Err(e))) => {
                    debug!(path = ?path, error = %e, "File failed during workspace analysis");
                    failures.push(FileFailure {
                        path,
                        error: e.to_string(),
                    });
                }
                Err(e) => {
                    warn!(root = ?root, error = %e, "Analysis task aborted");
                    failures.push(FileFailure {
                        path: root.to_path_buf(),
                        error: format!("analysis task aborted: {}", e),
                    });
                }
            }
        }

        failures.sort_by(|a, b| a.path.cmp(&b.path));
        let failed = failures.len();

        let result = WorkspaceAnalysisResult {
            root: root.to_path_buf(),
            timestamp: Utc::now(),
            total_files: succeeded + superseded + failed,
            succeeded,
            failed,
            superseded,
            failures,
            metrics,
            duration_ms: start.elapsed().as_millis() as u64,
        };

        self.store
            .set_workspace_analysis(root, result.clone())
            .await?;

        info!(
            root = ?root,
            succeeded = result.succeeded,
            failed = result.failed,
            superseded = result.superseded,
            duration_ms = result.duration_ms,
            "Workspace analysis complete"
        );

        Ok(result)
    }

    /// Remove a deleted path (or everything beneath a deleted directory)
    /// from the index and, eagerly, from the persisted snapshot.
    async fn remove_path(&self, path: &Path) -> Result<FileOutcome, IndexerError> {
        let _guard = self.commit_lock.lock().await;

        let removed = match self.index.remove(path) {
            Some(_) => vec![path.to_path_buf()],
            None => self.index.remove_under(path),
        };

        let persisted: Vec<PathBuf> = self
            .store
            .file_analyses()
            .into_keys()
            .map(PathBuf::from)
            .filter(|p| p.starts_with(path))
            .collect();
        if !persisted.is_empty() {
            self.store.remove_file_analyses(&persisted).await?;
        }

        debug!(path = ?path, removed = removed.len(), "Removed deleted path");
        Ok(FileOutcome::Removed(removed))
    }

    async fn analyze_ticket(&self, ticket: VersionTicket) -> Result<FileOutcome, IndexerError> {
        let path = ticket.path();

        let pipeline = self.run_pipeline(path);
        let outcome = match self.options.file_timeout {
            Some(limit) => tokio::time::timeout(limit, pipeline)
                .await
                .map_err(|_| IndexerError::Timeout {
                    path: path.to_path_buf(),
                })?,
            None => pipeline.await,
        }?;

        let Some((parse, analysis)) = outcome else {
            return Ok(FileOutcome::Skipped);
        };

        self.commit(IndexedFile {
            path: path.to_path_buf(),
            root: ticket.root().to_path_buf(),
            version: ticket.version(),
            parse,
            analysis,
            last_updated: Utc::now(),
        })
        .await
    }

    /// Read, parse, analyze. `None` if the path turned out to be a directory.
    async fn run_pipeline(
        &self,
        path: &Path,
    ) -> Result<Option<(ParseResult, AnalysisResult)>, IndexerError> {
        let read_error = |source| IndexerError::Read {
            path: path.to_path_buf(),
            source,
        };

        let metadata = tokio::fs::metadata(path).await.map_err(read_error)?;
        if metadata.is_dir() {
            return Ok(None);
        }
        if metadata.len() > self.options.max_file_size {
            return Err(IndexerError::Parse {
                path: path.to_path_buf(),
                message: format!(
                    "file is {} bytes, limit is {}",
                    metadata.len(),
                    self.options.max_file_size
                ),
            });
        }

        let bytes = tokio::fs::read(path).await.map_err(read_error)?;
        let content = String::from_utf8(bytes).map_err(|_| IndexerError::Parse {
            path: path.to_path_buf(),
            message: "content is not valid UTF-8".to_string(),
        })?;

        let parse = self
            .parser
            .parse_file(path, &content)
            .await
            .map_err(|e| match e {
                IndexerError::Parse { .. } => e,
                other => IndexerError::Parse {
                    path: path.to_path_buf(),
                    message: other.to_string(),
                },
            })?;

        let analysis = self
            .analyzer
            .analyze_file(path, &parse)
            .await
            .map_err(|e| match e {
                IndexerError::Analysis { .. } => e,
                other => IndexerError::Analysis {
                    path: path.to_path_buf(),
                    message: other.to_string(),
                },
            })?;

        // JSON has no representation for NaN or infinity.
        if let Some((name, value)) = analysis.metrics.iter().find(|(_, v)| !v.is_finite()) {
            return Err(IndexerError::Analysis {
                path: path.to_path_buf(),
                message: format!("metric {} is not finite ({})", name, value),
            });
        }

        Ok(Some((parse, analysis)))
    }

    /// Compare-and-swap commit into the index, then write-through to the store.
    async fn commit(&self, record: IndexedFile) -> Result<FileOutcome, IndexerError> {
        let _guard = self.commit_lock.lock().await;

        let path = record.path.clone();
        let version = record.version;

        match self.index.upsert(record) {
            Ok(()) => {}
            Err(IndexerError::StaleWrite { latest, .. }) => {
                debug!(path = ?path, version, latest, "Discarding superseded analysis");
                return Ok(FileOutcome::Superseded { path, version });
            }
            Err(IndexerError::UnknownRoot(_)) => {
                debug!(path = ?path, version, "Root unregistered during analysis");
                return Ok(FileOutcome::Superseded { path, version });
            }
            Err(e) => return Err(e),
        }

        // The index stamps the owning root, so read the stored record back.
        let stored = self
            .index
            .get(&path)
            .ok_or_else(|| IndexerError::UnknownRoot(path.clone()))?;
        self.store
            .set_file_analysis(&path, stored.analysis.clone())
            .await?;

        debug!(path = ?path, version, "Committed analysis");
        Ok(FileOutcome::Indexed(Box::new(stored)))
    }

    fn set_status(&self, status: Status) {
        self.notifier.status(&status.text());
        self.status.send_replace(status);
    }

    /// Return to idle unless a workspace run is still going.
    fn settle(&self) {
        if self.workspace_runs.load(Ordering::SeqCst) == 0 {
            self.set_status(Status::Idle);
        }
    }

    fn report_error(&self, error: &IndexerError) {
        warn!(error = %error, "Analysis failed");
        self.notifier.message(MessageLevel::Error, &error.to_string());
        self.set_status(Status::Error(error.to_string()));
    }
}

/// Counts one workspace run for as long as it is alive.
///
/// A run whose future is dropped part way through is never finished, so the
/// guard also returns the status to idle on its behalf.
struct WorkspaceRun<'a> {
    coordinator: &'a AnalysisCoordinator,
    cancelled: bool,
}

impl<'a> WorkspaceRun<'a> {
    fn start(coordinator: &'a AnalysisCoordinator) -> Self {
        coordinator.workspace_runs.fetch_add(1, Ordering::SeqCst);
        Self {
            coordinator,
            cancelled: true,
        }
    }

    fn finish(mut self) {
        self.cancelled = false;
    }
}

impl Drop for WorkspaceRun<'_> {
    fn drop(&mut self) {
        self.coordinator.workspace_runs.fetch_sub(1, Ordering::SeqCst);
        if self.cancelled {
            debug!("Workspace analysis cancelled");
            self.coordinator.settle();
        }
    }
}
