//! File system watcher for registered roots.
//!
//! Each root gets its own notify watcher. Raw notify events are converted
//! into [`FileChange`]s and pushed, undeduplicated, into a bounded channel
//! consumed by the engine's processing loop. Watching a root also walks it
//! once and synthesizes an `Added` event for every pre-existing file.

use crate::walker::{default_excludes, is_excluded, Walker};
use crate::IndexerError;
use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// File change type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Added,
    Changed,
    Deleted,
}

/// A file system change event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    /// Path to the changed file or directory
    pub path: PathBuf,
    /// Kind of change
    pub kind: ChangeKind,
    /// Whether the path is (or was) a directory
    pub is_dir: bool,
}

impl FileChange {
    pub fn file(path: impl Into<PathBuf>, kind: ChangeKind) -> Self {
        Self {
            path: path.into(),
            kind,
            is_dir: false,
        }
    }
}

/// What the watcher delivers on its channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Change(FileChange),
    /// A root could not be watched, or its OS watcher failed
    Error { root: PathBuf, message: String },
}

/// Options for the path watcher.
#[derive(Debug, Clone)]
pub struct WatcherOptions {
    /// Directory names excluded below each root (dotfiles always are)
    pub excludes: Vec<String>,
    /// Whether to watch recursively
    pub recursive: bool,
    /// Whether to synthesize `Added` events for existing files on watch
    pub initial_scan: bool,
    /// Capacity of the event channel
    pub channel_capacity: usize,
}

impl Default for WatcherOptions {
    fn default() -> Self {
        Self {
            excludes: default_excludes(),
            recursive: true,
            initial_scan: true,
            channel_capacity: 1024,
        }
    }
}

/// Watches any number of roots and feeds one event channel.
pub struct PathWatcher {
    options: WatcherOptions,
    tx: mpsc::Sender<WatchEvent>,
    watchers: Mutex<HashMap<PathBuf, RecommendedWatcher>>,
}

impl PathWatcher {
    /// Create a watcher and the receiving end of its event channel.
    pub fn new(options: WatcherOptions) -> (Self, mpsc::Receiver<WatchEvent>) {
        let (tx, rx) = mpsc::channel(options.channel_capacity.max(1));
        let watcher = Self {
            options,
            tx,
            watchers: Mutex::new(HashMap::new()),
        };
        (watcher, rx)
    }

    /// Exclude list applied to events and scans.
    pub fn excludes(&self) -> &[String] {
        &self.options.excludes
    }

    /// Start watching a root.
    ///
    /// Returns `Ok(false)` if the root was already watched. On failure a
    /// single [`WatchEvent::Error`] is emitted and the root stays unwatched.
    pub async fn watch(&self, root: &Path) -> Result<bool, IndexerError> {
        let root = match root.canonicalize() {
            Ok(root) if root.is_dir() => root,
            Ok(root) => return Err(self.report(&root, "not a directory".to_string())),
            Err(e) => return Err(self.report(root, e.to_string())),
        };

        {
            let mut watchers = self.watchers.lock();
            if watchers.contains_key(&root) {
                debug!(root = ?root, "Root already watched");
                return Ok(false);
            }

            let watcher = self
                .create_watcher(&root)
                .map_err(|message| self.report(&root, message))?;
            watchers.insert(root.clone(), watcher);
        }

        info!(root = ?root, recursive = self.options.recursive, "Started watching");

        if self.options.initial_scan {
            self.initial_scan(&root).await?;
        }

        Ok(true)
    }

    /// Stop watching a root. Index entries are left untouched.
    pub fn unwatch(&self, root: &Path) -> bool {
        let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
        let removed = self.watchers.lock().remove(&root).is_some();
        if removed {
            info!(root = ?root, "Stopped watching");
        }
        removed
    }

    /// Stop watching every root.
    pub fn unwatch_all(&self) {
        let mut watchers = self.watchers.lock();
        let count = watchers.len();
        watchers.clear();
        if count > 0 {
            info!(roots = count, "Stopped all watchers");
        }
    }

    /// Check whether a root is currently watched.
    pub fn is_watching(&self, root: &Path) -> bool {
        let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
        self.watchers.lock().contains_key(&root)
    }

    /// All currently watched roots, sorted.
    pub fn watched_roots(&self) -> Vec<PathBuf> {
        let mut roots: Vec<_> = self.watchers.lock().keys().cloned().collect();
        roots.sort();
        roots
    }

    fn create_watcher(&self, root: &Path) -> Result<RecommendedWatcher, String> {
        let tx = self.tx.clone();
        let cb_root = root.to_path_buf();
        let excludes = self.options.excludes.clone();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for change in convert_event(&event) {
                    if is_excluded(&cb_root, &change.path, &excludes) {
                        continue;
                    }
                    debug!(path = ?change.path, kind = ?change.kind, "File change detected");
                    if tx.blocking_send(WatchEvent::Change(change)).is_err() {
                        debug!("Event channel closed, dropping change");
                        return;
                    }
                }
            }
            Err(e) => {
                warn!(root = ?cb_root, error = %e, "Watcher error");
                let _ = tx.try_send(WatchEvent::Error {
                    root: cb_root.clone(),
                    message: e.to_string(),
                });
            }
        })
        .map_err(|e| e.to_string())?;

        let mode = if self.options.recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        watcher.watch(root, mode).map_err(|e| e.to_string())?;

        Ok(watcher)
    }

    async fn initial_scan(&self, root: &Path) -> Result<(), IndexerError> {
        let walker = Walker::new(root, self.options.excludes.clone());
        let entries = tokio::task::spawn_blocking(move || walker.walk())
            .await
            .map_err(|e| IndexerError::Watch {
                root: root.to_path_buf(),
                message: format!("initial scan panicked: {}", e),
            })??;

        debug!(root = ?root, files = entries.len(), "Initial scan complete");

        for entry in entries {
            let event = WatchEvent::Change(FileChange::file(entry.path, ChangeKind::Added));
            if self.tx.send(event).await.is_err() {
                debug!(root = ?root, "Event channel closed during initial scan");
                break;
            }
        }

        Ok(())
    }

    fn report(&self, root: &Path, message: String) -> IndexerError {
        warn!(root = ?root, error = %message, "Cannot watch root");
        let _ = self.tx.try_send(WatchEvent::Error {
            root: root.to_path_buf(),
            message: message.clone(),
        });
        IndexerError::Watch {
            root: root.to_path_buf(),
            message,
        }
    }
}

/// Convert a notify event into zero or more changes.
fn convert_event(event: &Event) -> Vec<FileChange> {
    let change = |path: &PathBuf, kind: ChangeKind, is_dir: bool| FileChange {
        path: path.clone(),
        kind,
        is_dir,
    };

    match &event.kind {
        EventKind::Create(kind) => event
            .paths
            .iter()
            .map(|p| {
                let is_dir = matches!(kind, CreateKind::Folder) || p.is_dir();
                change(p, ChangeKind::Added, is_dir)
            })
            .collect(),
        EventKind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::From => event
                .paths
                .iter()
                .map(|p| change(p, ChangeKind::Deleted, false))
                .collect(),
            RenameMode::To => event
                .paths
                .iter()
                .map(|p| change(p, ChangeKind::Added, p.is_dir()))
                .collect(),
            RenameMode::Both if event.paths.len() >= 2 => vec![
                change(&event.paths[0], ChangeKind::Deleted, false),
                change(&event.paths[1], ChangeKind::Added, event.paths[1].is_dir()),
            ],
            _ => event
                .paths
                .iter()
                .map(|p| {
                    if p.exists() {
                        change(p, ChangeKind::Added, p.is_dir())
                    } else {
                        change(p, ChangeKind::Deleted, false)
                    }
                })
                .collect(),
        },
        EventKind::Modify(ModifyKind::Metadata(_)) => Vec::new(),
        EventKind::Modify(_) => event
            .paths
            .iter()
            .map(|p| change(p, ChangeKind::Changed, p.is_dir()))
            .collect(),
        EventKind::Remove(kind) => event
            .paths
            .iter()
            .map(|p| change(p, ChangeKind::Deleted, matches!(kind, RemoveKind::Folder)))
            .collect(),
        EventKind::Any | EventKind::Access(_) | EventKind::Other => Vec::new(),
    }
}
