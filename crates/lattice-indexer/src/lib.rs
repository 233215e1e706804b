//! Lattice Indexer
//!
//! This crate provides the indexing engine for Lattice, including:
//! - Recursive path watching with an initial scan of each root
//! - A versioned in-memory index of per-file parse and analysis results
//! - Pluggable parser and analyzer stages
//! - Write-through persistence of analysis results across restarts
//! - Whole-workspace analysis with bounded concurrency

mod error;
pub mod coordinator;
pub mod index;
pub mod model;
pub mod notifier;
pub mod pipeline;
pub mod storage;
pub mod walker;
pub mod watcher;

pub use coordinator::{AnalysisCoordinator, CoordinatorOptions, FileOutcome};
pub use error::IndexerError;
pub use index::{RootEntries, VersionTicket, WorkspaceIndex};
pub use model::{
    AnalysisResult, FileFailure, IndexedFile, ParseResult, Status, WorkspaceAnalysisResult,
};
pub use notifier::{MessageLevel, Notifier, TracingNotifier};
pub use pipeline::{Analyzer, Language, Parser, TextAnalyzer, TextParser};
pub use storage::{
    FileBackend, MemoryBackend, PersistedSnapshot, PersistentStateStore, SnapshotFormat,
    StateBackend, StoreOptions,
};
pub use walker::{FileEntry, Walker};
pub use watcher::{ChangeKind, FileChange, PathWatcher, WatchEvent, WatcherOptions};
