//! In-memory workspace index.
//!
//! Maps registered root → file path → [`IndexedFile`]. Every path with a
//! record or an analysis in flight also has a version counter. Removing a
//! file or a root bumps the counters of paths still being analyzed, so those
//! analyses are rejected when they try to commit; idle counters are dropped.

use crate::model::IndexedFile;
use crate::IndexerError;
use parking_lot::RwLock;
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use tracing::debug;

/// Root → path → record.
pub type RootEntries = HashMap<PathBuf, IndexedFile>;

/// Version counter of one path.
#[derive(Debug, Default)]
struct PathClock {
    latest: u64,
    /// Live tickets for this path
    in_flight: usize,
}

#[derive(Default)]
struct IndexState {
    roots: BTreeMap<PathBuf, RootEntries>,
    /// Present only while the path has a record or an analysis in flight
    clocks: HashMap<PathBuf, PathClock>,
}

impl IndexState {
    /// Longest registered root that contains `path`.
    fn owning_root(&self, path: &Path) -> Option<&PathBuf> {
        path.ancestors()
            .find_map(|ancestor| self.roots.get_key_value(ancestor).map(|(root, _)| root))
    }

    fn has_record(&self, path: &Path) -> bool {
        self.owning_root(path)
            .and_then(|root| self.roots.get(root))
            .is_some_and(|entries| entries.contains_key(path))
    }

    fn latest_version(&self, path: &Path) -> u64 {
        self.clocks.get(path).map_or(0, |clock| clock.latest)
    }

    /// Forget a path whose record is gone. A path with analyses still in
    /// flight keeps its clock, bumped so those analyses cannot commit.
    fn retire(&mut self, path: &Path) {
        if let Entry::Occupied(mut clock) = self.clocks.entry(path.to_path_buf()) {
            if clock.get().in_flight == 0 {
                clock.remove();
            } else {
                clock.get_mut().latest += 1;
            }
        }
    }

    fn release(&mut self, path: &Path) {
        let Some(clock) = self.clocks.get_mut(path) else {
            return;
        };
        clock.in_flight = clock.in_flight.saturating_sub(1);
        if clock.in_flight == 0 && !self.has_record(path) {
            self.clocks.remove(path);
        }
    }
}

/// A version allocated to one analysis of a path.
///
/// Holding the ticket keeps the path's counter alive; dropping it (after a
/// commit, a failure, or cancellation) releases that claim.
pub struct VersionTicket {
    path: PathBuf,
    root: PathBuf,
    version: u64,
    state: Weak<RwLock<IndexState>>,
}

impl VersionTicket {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Owning root when the version was allocated.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn version(&self) -> u64 {
        self.version
    }
}

impl fmt::Debug for VersionTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VersionTicket")
            .field("path", &self.path)
            .field("root", &self.root)
            .field("version", &self.version)
            .finish()
    }
}

impl Drop for VersionTicket {
    fn drop(&mut self) {
        if let Some(state) = self.state.upgrade() {
            state.write().release(&self.path);
        }
    }
}

/// The authoritative in-memory index.
#[derive(Default)]
pub struct WorkspaceIndex {
    state: Arc<RwLock<IndexState>>,
}

impl WorkspaceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a root. Returns `false` if it was already registered.
    ///
    /// Entries of an enclosing root that fall under the new root move to it.
    pub fn register_root(&self, root: &Path) -> bool {
        let mut state = self.state.write();
        if state.roots.contains_key(root) {
            return false;
        }

        let mut adopted = RootEntries::new();
        if let Some(parent) = state.owning_root(root).cloned() {
            if let Some(entries) = state.roots.get_mut(&parent) {
                let moved: Vec<PathBuf> = entries
                    .keys()
                    .filter(|p| p.starts_with(root))
                    .cloned()
                    .collect();
                for path in moved {
                    if let Some(mut record) = entries.remove(&path) {
                        record.root = root.to_path_buf();
                        adopted.insert(path, record);
                    }
                }
            }
        }

        debug!(root = ?root, adopted = adopted.len(), "Registered root");
        state.roots.insert(root.to_path_buf(), adopted);
        true
    }

    /// Unregister a root in one step.
    ///
    /// Inside an enclosing root the entries are handed back to it, since its
    /// watcher still covers them. Otherwise the entries are dropped and
    /// analyses in flight for paths this root owned are invalidated; paths
    /// of nested roots that stay registered are untouched.
    ///
    /// Returns the number of entries the root held, or `None` if it was not
    /// registered.
    pub fn unregister_root(&self, root: &Path) -> Option<usize> {
        let mut state = self.state.write();
        let entries = state.roots.remove(root)?;
        let count = entries.len();

        if let Some(parent) = state.owning_root(root).cloned() {
            let target = state.roots.entry(parent.clone()).or_default();
            for (path, mut record) in entries {
                record.root = parent.clone();
                target.insert(path, record);
            }
            debug!(root = ?root, parent = ?parent, moved = count, "Unregistered nested root");
            return Some(count);
        }

        let orphaned: Vec<PathBuf> = state
            .clocks
            .keys()
            .filter(|p| p.starts_with(root) && state.owning_root(p).is_none())
            .cloned()
            .collect();
        for path in &orphaned {
            state.retire(path);
        }

        debug!(root = ?root, removed = count, "Unregistered root");
        Some(count)
    }

    /// Whether `root` is registered.
    pub fn is_registered(&self, root: &Path) -> bool {
        self.state.read().roots.contains_key(root)
    }

    /// Registered roots in sorted order.
    pub fn roots(&self) -> Vec<PathBuf> {
        self.state.read().roots.keys().cloned().collect()
    }

    /// Resolve the owning root of a path (longest match).
    pub fn owning_root(&self, path: &Path) -> Option<PathBuf> {
        self.state.read().owning_root(path).cloned()
    }

    /// Allocate a version strictly greater than any live one for `path`.
    ///
    /// `None` if no registered root contains the path.
    pub fn begin(&self, path: &Path) -> Option<VersionTicket> {
        let mut state = self.state.write();
        let root = state.owning_root(path)?.clone();

        let clock = state.clocks.entry(path.to_path_buf()).or_default();
        clock.latest += 1;
        clock.in_flight += 1;

        Some(VersionTicket {
            path: path.to_path_buf(),
            root,
            version: clock.latest,
            state: Arc::downgrade(&self.state),
        })
    }

    /// Highest live version for `path` (0 if untracked).
    pub fn latest_version(&self, path: &Path) -> u64 {
        self.state.read().latest_version(path)
    }

    /// Insert or overwrite a record.
    ///
    /// The write is accepted only if the record's version is still the
    /// latest known for its path and the path is under a registered root.
    /// The record's `root` is set to the resolved owning root.
    pub fn upsert(&self, mut record: IndexedFile) -> Result<(), IndexerError> {
        let mut state = self.state.write();

        let latest = state.latest_version(&record.path);
        if record.version < latest {
            return Err(IndexerError::StaleWrite {
                path: record.path,
                version: record.version,
                latest,
            });
        }

        let root = state
            .owning_root(&record.path)
            .cloned()
            .ok_or_else(|| IndexerError::UnknownRoot(record.path.clone()))?;

        state
            .clocks
            .entry(record.path.clone())
            .or_default()
            .latest = record.version;
        record.root = root.clone();
        state
            .roots
            .entry(root)
            .or_default()
            .insert(record.path.clone(), record);
        Ok(())
    }

    /// Remove the record for `path`, if any.
    ///
    /// Analyses still in flight for the path are invalidated, so a slower
    /// analysis of the removed content cannot resurrect it. Paths outside
    /// every root are ignored.
    pub fn remove(&self, path: &Path) -> Option<IndexedFile> {
        let mut state = self.state.write();
        let root = state.owning_root(path)?.clone();
        let removed = state
            .roots
            .get_mut(&root)
            .and_then(|entries| entries.remove(path));
        state.retire(path);
        removed
    }

    /// Remove every record strictly beneath `prefix` (a deleted directory).
    pub fn remove_under(&self, prefix: &Path) -> Vec<PathBuf> {
        let mut state = self.state.write();
        let beneath = |p: &Path| p.starts_with(prefix) && p != prefix;

        let mut removed = Vec::new();
        for entries in state.roots.values_mut() {
            let doomed: Vec<PathBuf> = entries
                .keys()
                .filter(|p| beneath(p.as_path()))
                .cloned()
                .collect();
            for path in doomed {
                entries.remove(&path);
                removed.push(path);
            }
        }

        let tracked: Vec<PathBuf> = state
            .clocks
            .keys()
            .filter(|p| beneath(p.as_path()))
            .cloned()
            .collect();
        for path in &tracked {
            state.retire(path);
        }
        removed
    }

    /// Look up one record.
    pub fn get(&self, path: &Path) -> Option<IndexedFile> {
        let state = self.state.read();
        let root = state.owning_root(path)?;
        state.roots.get(root)?.get(path).cloned()
    }

    /// Snapshot of every record under a registered root.
    pub fn get_root(&self, root: &Path) -> Option<RootEntries> {
        self.state.read().roots.get(root).cloned()
    }

    /// Frozen snapshot of the whole index.
    pub fn get_all(&self) -> BTreeMap<PathBuf, RootEntries> {
        self.state.read().roots.clone()
    }

    /// Total number of records across all roots.
    pub fn len(&self) -> usize {
        self.state.read().roots.values().map(|e| e.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AnalysisResult, ParseResult};
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn record(path: &str, version: u64) -> IndexedFile {
        IndexedFile {
            path: PathBuf::from(path),
            root: PathBuf::new(),
            version,
            parse: ParseResult {
                language_id: "plaintext".into(),
                content_hash: String::new(),
                line_count: version as usize,
                byte_len: 0,
                data: serde_json::Value::Null,
            },
            analysis: AnalysisResult {
                timestamp: Utc::now(),
                language_id: "plaintext".into(),
                metrics: BTreeMap::new(),
            },
            last_updated: Utc::now(),
        }
    }

    #[test]
    fn test_register_is_idempotent() {
        let index = WorkspaceIndex::new();
        assert!(index.register_root(Path::new("/proj")));
        assert!(!index.register_root(Path::new("/proj")));
        assert_eq!(index.roots(), vec![PathBuf::from("/proj")]);
    }

    #[test]
    fn test_owning_root_longest_match() {
        let index = WorkspaceIndex::new();
        index.register_root(Path::new("/a"));
        index.register_root(Path::new("/a/b"));
        index.register_root(Path::new("/ab"));

        assert_eq!(
            index.owning_root(Path::new("/a/b/c.txt")),
            Some(PathBuf::from("/a/b"))
        );
        assert_eq!(
            index.owning_root(Path::new("/a/x.txt")),
            Some(PathBuf::from("/a"))
        );
        assert_eq!(
            index.owning_root(Path::new("/ab/x.txt")),
            Some(PathBuf::from("/ab"))
        );
        assert_eq!(index.owning_root(Path::new("/other/x.txt")), None);
    }

    fn commit(index: &WorkspaceIndex, path: &str) {
        let ticket = index.begin(Path::new(path)).unwrap();
        index.upsert(record(path, ticket.version())).unwrap();
    }

    fn paths_of(index: &WorkspaceIndex, root: &str) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = index
            .get_root(Path::new(root))
            .unwrap_or_default()
            .into_keys()
            .collect();
        paths.sort();
        paths
    }

    fn clock_count(index: &WorkspaceIndex) -> usize {
        index.state.read().clocks.len()
    }

    #[test]
    fn test_upsert_and_get() {
        let index = WorkspaceIndex::new();
        index.register_root(Path::new("/proj"));

        commit(&index, "/proj/a.txt");

        let stored = index.get(Path::new("/proj/a.txt")).unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(stored.root, PathBuf::from("/proj"));
        assert_eq!(index.get_root(Path::new("/proj")).unwrap().len(), 1);
    }

    #[test]
    fn test_upsert_outside_roots_rejected() {
        let index = WorkspaceIndex::new();
        assert!(index.begin(Path::new("/nowhere/a.txt")).is_none());
        let result = index.upsert(record("/nowhere/a.txt", 1));
        assert!(matches!(result, Err(IndexerError::UnknownRoot(_))));
    }

    #[test]
    fn test_stale_write_rejected() {
        let index = WorkspaceIndex::new();
        index.register_root(Path::new("/proj"));
        let path = Path::new("/proj/a.txt");

        let v1 = index.begin(path).unwrap();
        let v2 = index.begin(path).unwrap();
        assert_eq!(v2.root(), Path::new("/proj"));

        index.upsert(record("/proj/a.txt", v2.version())).unwrap();
        let result = index.upsert(record("/proj/a.txt", v1.version()));
        assert!(matches!(
            result,
            Err(IndexerError::StaleWrite {
                version: 1,
                latest: 2,
                ..
            })
        ));
        assert_eq!(index.get(path).unwrap().version, 2);
    }

    #[test]
    fn test_remove_invalidates_in_flight() {
        let index = WorkspaceIndex::new();
        index.register_root(Path::new("/proj"));
        let path = Path::new("/proj/a.txt");

        commit(&index, "/proj/a.txt");
        let in_flight = index.begin(path).unwrap();

        assert!(index.remove(path).is_some());
        assert!(index.get(path).is_none());
        assert!(index.upsert(record("/proj/a.txt", in_flight.version())).is_err());
        assert!(index.remove(path).is_none());
    }

    #[test]
    fn test_remove_outside_roots_is_ignored() {
        let index = WorkspaceIndex::new();
        index.register_root(Path::new("/proj"));

        for i in 0..100 {
            assert!(index.remove(&PathBuf::from(format!("/elsewhere/{i}.txt"))).is_none());
        }
        assert_eq!(clock_count(&index), 0);
    }

    #[test]
    fn test_remove_under_directory() {
        let index = WorkspaceIndex::new();
        index.register_root(Path::new("/proj"));
        for path in ["/proj/dir/a.txt", "/proj/dir/sub/b.txt", "/proj/c.txt"] {
            commit(&index, path);
        }
        let in_flight = index.begin(Path::new("/proj/dir/new.txt")).unwrap();

        let mut removed = index.remove_under(Path::new("/proj/dir"));
        removed.sort();
        assert_eq!(
            removed,
            vec![
                PathBuf::from("/proj/dir/a.txt"),
                PathBuf::from("/proj/dir/sub/b.txt")
            ]
        );
        assert_eq!(paths_of(&index, "/proj"), vec![PathBuf::from("/proj/c.txt")]);
        assert!(index.upsert(record("/proj/dir/new.txt", in_flight.version())).is_err());

        drop(in_flight);
        assert_eq!(clock_count(&index), 1);
    }

    #[test]
    fn test_unregister_removes_everything_under_root() {
        let index = WorkspaceIndex::new();
        index.register_root(Path::new("/proj"));
        index.register_root(Path::new("/other"));
        let in_flight = index.begin(Path::new("/proj/b.txt")).unwrap();
        for path in ["/proj/a.txt", "/other/x.txt"] {
            commit(&index, path);
        }

        assert_eq!(index.unregister_root(Path::new("/proj")), Some(1));
        assert_eq!(index.unregister_root(Path::new("/proj")), None);
        assert!(index.get(Path::new("/proj/a.txt")).is_none());
        assert!(index.get_root(Path::new("/proj")).is_none());
        assert!(!index.get_all().contains_key(Path::new("/proj")));
        assert_eq!(index.len(), 1);

        // Re-registering does not let the earlier in-flight write land.
        index.register_root(Path::new("/proj"));
        assert!(index.upsert(record("/proj/b.txt", in_flight.version())).is_err());
    }

    #[test]
    fn test_clocks_bounded_after_churn() {
        let index = WorkspaceIndex::new();
        index.register_root(Path::new("/proj"));

        for round in 0..5 {
            for i in 0..50 {
                let path = format!("/proj/gen{round}/{i}.txt");
                commit(&index, &path);
                index.remove(Path::new(&path));
            }
        }
        // Failed or cancelled analyses release their claim too.
        for i in 0..50 {
            drop(index.begin(&PathBuf::from(format!("/proj/tmp/{i}.txt"))));
        }
        assert_eq!(clock_count(&index), 0);

        for i in 0..20 {
            commit(&index, &format!("/proj/live/{i}.txt"));
        }
        assert_eq!(clock_count(&index), 20);

        index.unregister_root(Path::new("/proj"));
        assert_eq!(clock_count(&index), 0);
    }

    #[test]
    fn test_unregister_outer_root_spares_nested_root() {
        let index = WorkspaceIndex::new();
        index.register_root(Path::new("/a"));
        index.register_root(Path::new("/a/b"));
        commit(&index, "/a/y.txt");
        commit(&index, "/a/b/x.txt");
        let nested = index.begin(Path::new("/a/b/x.txt")).unwrap();
        let outer = index.begin(Path::new("/a/z.txt")).unwrap();

        assert_eq!(index.unregister_root(Path::new("/a")), Some(1));

        assert_eq!(index.roots(), vec![PathBuf::from("/a/b")]);
        assert_eq!(index.latest_version(Path::new("/a/b/x.txt")), nested.version());
        index.upsert(record("/a/b/x.txt", nested.version())).unwrap();
        assert_eq!(index.get(Path::new("/a/b/x.txt")).unwrap().version, 2);
        assert!(index.upsert(record("/a/z.txt", outer.version())).is_err());
    }

    #[test]
    fn test_unregister_nested_root_hands_entries_back() {
        let index = WorkspaceIndex::new();
        index.register_root(Path::new("/a"));
        index.register_root(Path::new("/a/b"));
        commit(&index, "/a/y.txt");
        commit(&index, "/a/b/x.txt");
        let in_flight = index.begin(Path::new("/a/b/w.txt")).unwrap();

        assert_eq!(index.unregister_root(Path::new("/a/b")), Some(1));

        assert_eq!(index.roots(), vec![PathBuf::from("/a")]);
        assert_eq!(
            paths_of(&index, "/a"),
            vec![PathBuf::from("/a/b/x.txt"), PathBuf::from("/a/y.txt")]
        );
        assert_eq!(index.get(Path::new("/a/b/x.txt")).unwrap().root, PathBuf::from("/a"));
        assert_eq!(index.get(Path::new("/a/b/x.txt")).unwrap().version, 1);

        index.upsert(record("/a/b/w.txt", in_flight.version())).unwrap();
        assert_eq!(index.get(Path::new("/a/b/w.txt")).unwrap().root, PathBuf::from("/a"));
    }

    #[test]
    fn test_nested_root_adopts_entries() {
        let index = WorkspaceIndex::new();
        index.register_root(Path::new("/a"));
        for path in ["/a/b/x.txt", "/a/y.txt"] {
            commit(&index, path);
        }

        index.register_root(Path::new("/a/b"));

        assert_eq!(paths_of(&index, "/a"), vec![PathBuf::from("/a/y.txt")]);
        let adopted = index.get(Path::new("/a/b/x.txt")).unwrap();
        assert_eq!(adopted.root, PathBuf::from("/a/b"));
    }
}
