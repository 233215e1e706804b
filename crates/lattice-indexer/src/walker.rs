//! Root enumeration with gitignore support and exclude patterns.

use crate::IndexerError;
use ignore::WalkBuilder;
use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Directory names excluded unless the caller supplies its own list.
pub const DEFAULT_EXCLUDES: &[&str] = &[
    "node_modules",
    "target",
    "vendor",
    "__pycache__",
    "dist",
    "build",
];

/// Default exclude list as owned strings.
pub fn default_excludes() -> Vec<String> {
    DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect()
}

/// Whether a single path component is excluded: dotfiles and any
/// configured dependency/output directory name.
pub fn is_excluded_name(name: &OsStr, excludes: &[String]) -> bool {
    match name.to_str() {
        Some(s) => s.starts_with('.') || excludes.iter().any(|e| e == s),
        None => false,
    }
}

/// Whether `path` is excluded relative to `root`.
///
/// Only components below the root are checked, so a root that itself lives
/// under a dot directory is still indexed.
pub fn is_excluded(root: &Path, path: &Path, excludes: &[String]) -> bool {
    let Ok(relative) = path.strip_prefix(root) else {
        return true;
    };
    relative.components().any(|c| match c {
        Component::Normal(name) => is_excluded_name(name, excludes),
        _ => false,
    })
}

/// A file found under a root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: PathBuf,
    pub size: u64,
}

/// Enumerates the files of one root, honouring ignore files and excludes.
pub struct Walker {
    root: PathBuf,
    excludes: Vec<String>,
}

impl Walker {
    pub fn new(root: &Path, excludes: Vec<String>) -> Self {
        Self {
            root: root.to_path_buf(),
            excludes,
        }
    }

    /// Every regular file under the root, sorted by path.
    ///
    /// Blocking; run it on a blocking thread from async code. Unreadable
    /// entries are skipped, only a missing root is an error.
    pub fn walk(&self) -> Result<Vec<FileEntry>, IndexerError> {
        if !self.root.is_dir() {
            return Err(IndexerError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} is not a directory", self.root.display()),
            )));
        }

        let excludes = self.excludes.clone();
        let walk = WalkBuilder::new(&self.root)
            .follow_links(false)
            .standard_filters(true)
            .filter_entry(move |entry| {
                entry.depth() == 0 || !is_excluded_name(entry.file_name(), &excludes)
            })
            .build();

        let mut entries = Vec::new();
        let mut skipped = 0usize;
        for result in walk {
            let entry = match result {
                Ok(entry) => entry,
                Err(e) => {
                    skipped += 1;
                    debug!(root = ?self.root, error = %e, "Skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                continue;
            }
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            entries.push(FileEntry {
                path: entry.into_path(),
                size,
            });
        }

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        debug!(root = ?self.root, files = entries.len(), skipped, "Walk complete");
        Ok(entries)
    }
}
