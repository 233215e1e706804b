//! Records held by the workspace index and the persisted snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Output of the parse stage for one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseResult {
    /// Language identifier (e.g. "rust", "plaintext")
    pub language_id: String,
    /// SHA-256 of the content that was parsed
    pub content_hash: String,
    /// Number of lines in the content
    pub line_count: usize,
    /// Content length in bytes
    pub byte_len: usize,
    /// Parser-specific payload
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Output of the analyze stage for one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    /// When the analysis ran
    pub timestamp: DateTime<Utc>,
    /// Language identifier carried over from the parse stage
    pub language_id: String,
    /// Metric name to value
    pub metrics: BTreeMap<String, f64>,
}

impl AnalysisResult {
    /// Look up a single metric.
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }
}

/// One indexed file.
///
/// `parse` and `analysis` always come from the same pipeline run, i.e. from
/// the content observed at `version`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexedFile {
    /// Absolute path of the file
    pub path: PathBuf,
    /// Owning root. Lookup key only; the index owns the entry.
    pub root: PathBuf,
    /// Per-path version this record was produced at
    pub version: u64,
    /// Parse stage output
    pub parse: ParseResult,
    /// Analyze stage output
    pub analysis: AnalysisResult,
    /// When the record was committed
    pub last_updated: DateTime<Utc>,
}

/// A file that failed during a workspace-wide run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileFailure {
    pub path: PathBuf,
    pub error: String,
}

/// Aggregate result of analyzing every file under a root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceAnalysisResult {
    pub root: PathBuf,
    pub timestamp: DateTime<Utc>,
    pub total_files: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Files whose result was discarded because a newer version won
    #[serde(default)]
    pub superseded: usize,
    #[serde(default)]
    pub failures: Vec<FileFailure>,
    /// Per-metric sum over the files that succeeded
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    #[serde(default)]
    pub duration_ms: u64,
}

impl WorkspaceAnalysisResult {
    /// One-line human summary, e.g. "12 files succeeded, 1 failed".
    pub fn summary(&self) -> String {
        format!(
            "{} files succeeded, {} failed",
            self.succeeded + self.superseded,
            self.failed
        )
    }
}

/// Coordinator status. A single value; consumers may miss intermediate states.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", content = "detail", rename_all = "camelCase")]
pub enum Status {
    #[default]
    Idle,
    AnalyzingFile(PathBuf),
    AnalyzingWorkspace(PathBuf),
    Error(String),
}

impl Status {
    /// Single-line status text for the host.
    pub fn text(&self) -> String {
        match self {
            Status::Idle => "Idle".to_string(),
            Status::AnalyzingFile(path) => format!("Analyzing {}", path.display()),
            Status::AnalyzingWorkspace(root) => {
                format!("Analyzing workspace {}", root.display())
            }
            Status::Error(message) => format!("Error: {}", message),
        }
    }
}
