//! Configuration for the Lattice engine.

use crate::CoreError;
use lattice_indexer::storage::DEFAULT_SNAPSHOT_KEY;
use lattice_indexer::walker::default_excludes;
use lattice_indexer::{CoordinatorOptions, SnapshotFormat, StoreOptions, WatcherOptions};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Data directory holding the snapshot and config file
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Snapshot encoding (json or msgpack)
    #[serde(default)]
    pub snapshot_format: SnapshotFormat,

    /// Directory names skipped below every root
    #[serde(default = "default_excludes")]
    pub exclude_patterns: Vec<String>,

    /// Maximum concurrent file analyses in a workspace run
    #[serde(default = "default_workspace_concurrency")]
    pub workspace_concurrency: usize,

    /// Per-file analysis timeout in milliseconds (0 disables it)
    #[serde(default = "default_file_timeout_ms")]
    pub file_timeout_ms: u64,

    /// Files above this size are reported as failures (default: 10MB)
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Analyze existing files when a root is registered
    #[serde(default = "default_initial_scan")]
    pub initial_scan: bool,

    /// Capacity of the watcher event channel
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Roots registered at startup
    #[serde(default)]
    pub roots: Vec<PathBuf>,
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("lattice")
}

fn default_workspace_concurrency() -> usize {
    8
}

fn default_file_timeout_ms() -> u64 {
    30_000
}

fn default_max_file_size() -> u64 {
    10 * 1024 * 1024 // 10MB
}

fn default_initial_scan() -> bool {
    true
}

fn default_channel_capacity() -> usize {
    1024
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            snapshot_format: SnapshotFormat::default(),
            exclude_patterns: default_excludes(),
            workspace_concurrency: default_workspace_concurrency(),
            file_timeout_ms: default_file_timeout_ms(),
            max_file_size: default_max_file_size(),
            initial_scan: default_initial_scan(),
            channel_capacity: default_channel_capacity(),
            log_level: default_log_level(),
            roots: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from the default location, falling back to defaults
    pub fn load() -> Self {
        let config_path = default_data_dir().join("config.yaml");

        if config_path.exists() {
            match Self::load_from(&config_path) {
                Ok(config) => return config,
                Err(e) => tracing::warn!("Failed to load config file: {}", e),
            }
        }

        Self::default()
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&content).map_err(|e| CoreError::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Directory holding the persisted snapshot
    pub fn state_dir(&self) -> PathBuf {
        self.data_dir.join("state")
    }

    /// Ensure data directories exist
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        std::fs::create_dir_all(self.state_dir())?;
        Ok(())
    }

    pub fn file_timeout(&self) -> Option<Duration> {
        (self.file_timeout_ms > 0).then(|| Duration::from_millis(self.file_timeout_ms))
    }

    pub fn watcher_options(&self) -> WatcherOptions {
        WatcherOptions {
            excludes: self.exclude_patterns.clone(),
            initial_scan: self.initial_scan,
            channel_capacity: self.channel_capacity,
            ..Default::default()
        }
    }

    pub fn coordinator_options(&self) -> CoordinatorOptions {
        CoordinatorOptions {
            workspace_concurrency: self.workspace_concurrency,
            file_timeout: self.file_timeout(),
            max_file_size: self.max_file_size,
            excludes: self.exclude_patterns.clone(),
        }
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            key: DEFAULT_SNAPSHOT_KEY.to_string(),
            format: self.snapshot_format,
        }
    }
}
