//! The directory index: the naming server's in-memory tree.
//!
//! Three mappings, all keyed by path, model the filesystem:
//!
//! - `files`: file path → replica list (storage stubs holding the bytes)
//! - `dirs`: directory path → set of immediate children (root is always
//!   present)
//! - `locks`: every known path and ancestor → its [`PathLock`]
//!
//! A path is a file XOR a directory, every non-root path's parent is a
//! directory listing it among its children, and `files` entries are never
//! empty. All three maps live behind one mutex; entry mutations are short
//! critical sections, and cross-map consistency over longer operations is
//! the caller's job via path locks. Replica lists are ordered: the first
//! element is the replica kept by the invalidation pass.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use alder_core::DfsError;
use alder_core::DfsPath;
use alder_core::PathLock;
use alder_wire::StorageStub;
use parking_lot::Mutex;

#[derive(Default)]
struct IndexState {
    files: HashMap<DfsPath, Vec<StorageStub>>,
    dirs: HashMap<DfsPath, HashSet<DfsPath>>,
    locks: HashMap<DfsPath, Arc<PathLock>>,
}

/// Single owner of the naming server's tree state.
pub(crate) struct DirectoryIndex {
    state: Mutex<IndexState>,
}

impl DirectoryIndex {
    pub fn new() -> Self {
        let mut state = IndexState::default();
        state.dirs.insert(DfsPath::root(), HashSet::new());
        state.locks.insert(DfsPath::root(), Arc::new(PathLock::new()));
        Self { state: Mutex::new(state) }
    }

    /// Whether the path names a known file or directory.
    pub fn contains(&self, path: &DfsPath) -> bool {
        let state = self.state.lock();
        state.files.contains_key(path) || state.dirs.contains_key(path)
    }

    pub fn is_file(&self, path: &DfsPath) -> bool {
        self.state.lock().files.contains_key(path)
    }

    pub fn is_directory(&self, path: &DfsPath) -> bool {
        self.state.lock().dirs.contains_key(path)
    }

    /// The lock guarding one path, if the path is known to the lock table.
    pub fn lock_handle(&self, path: &DfsPath) -> Option<Arc<PathLock>> {
        self.state.lock().locks.get(path).cloned()
    }

    /// The locks along `path.subpaths()`, root first.
    ///
    /// Fails `NotFound` for unknown paths. A known path missing an
    /// ancestor lock would violate the index invariants and is reported
    /// as an internal error.
    pub fn chain_locks(&self, path: &DfsPath) -> Result<Vec<Arc<PathLock>>, DfsError> {
        let state = self.state.lock();
        if !state.files.contains_key(path) && !state.dirs.contains_key(path) {
            return Err(DfsError::NotFound { path: path.to_string() });
        }
        path.subpaths()
            .iter()
            .map(|subpath| {
                state.locks.get(subpath).cloned().ok_or_else(|| DfsError::Internal {
                    reason: format!("no lock for ancestor {subpath} of known path {path}"),
                })
            })
            .collect()
    }

    /// Immediate children of a directory, or `None` if `path` is not a
    /// known directory.
    pub fn children(&self, path: &DfsPath) -> Option<Vec<DfsPath>> {
        self.state.lock().dirs.get(path).map(|children| children.iter().cloned().collect())
    }

    /// Snapshot of a file's replica list, or `None` for non-files.
    pub fn replicas(&self, path: &DfsPath) -> Option<Vec<StorageStub>> {
        self.state.lock().files.get(path).cloned()
    }

    /// Record a new replica after a successful copy. Returns whether the
    /// file was still present (a concurrent delete loses the race).
    pub fn add_replica(&self, path: &DfsPath, stub: StorageStub) -> bool {
        let mut state = self.state.lock();
        match state.files.get_mut(path) {
            Some(replicas) => {
                if !replicas.contains(&stub) {
                    replicas.push(stub);
                }
                true
            }
            None => false,
        }
    }

    /// Drop the given replicas from a file's replica list.
    pub fn remove_replicas(&self, path: &DfsPath, stale: &[StorageStub]) {
        let mut state = self.state.lock();
        if let Some(replicas) = state.files.get_mut(path) {
            replicas.retain(|replica| !stale.contains(replica));
        }
    }

    /// Record a newly created file, synthesizing ancestor directory
    /// entries and locks as needed.
    pub fn insert_file(&self, path: &DfsPath, stub: StorageStub) {
        let mut state = self.state.lock();
        insert_file_entry(&mut state, path, stub);
    }

    /// Record a newly created directory, synthesizing ancestors as
    /// needed.
    pub fn insert_directory(&self, path: &DfsPath) {
        let mut state = self.state.lock();
        ensure_ancestors(&mut state, path);
        state.dirs.entry(path.clone()).or_default();
    }

    /// Splice a storage server's announced files into the tree.
    ///
    /// Root paths are ignored; already-known paths are collected as
    /// duplicates for the storage server to delete locally; the rest are
    /// recorded with the announcing server as their only replica. The
    /// whole batch runs as one critical section; the caller serializes
    /// against concurrent facade mutations by holding the root write
    /// lock.
    pub fn register_paths(&self, storage: &StorageStub, paths: &[DfsPath]) -> Vec<DfsPath> {
        let mut state = self.state.lock();
        let mut duplicates = Vec::new();
        for path in paths {
            if path.is_root() {
                continue;
            }
            // A path already known, or shadowed by an existing file
            // along its ancestry, cannot be served by the late-comer.
            let shadowed = path
                .subpaths()
                .iter()
                .take(path.component_count())
                .any(|ancestor| state.files.contains_key(ancestor));
            if shadowed || state.files.contains_key(path) || state.dirs.contains_key(path) {
                duplicates.push(path.clone());
            } else {
                insert_file_entry(&mut state, path, storage.clone());
            }
        }
        duplicates
    }

    /// Remove a path and everything under it from all three maps, and
    /// unlink it from its parent's children.
    pub fn remove_subtree(&self, path: &DfsPath) {
        let mut state = self.state.lock();
        let doomed: Vec<DfsPath> = state
            .files
            .keys()
            .chain(state.dirs.keys())
            .filter(|known| known.is_subpath(path))
            .cloned()
            .collect();
        for gone in &doomed {
            state.files.remove(gone);
            state.dirs.remove(gone);
            state.locks.remove(gone);
        }
        if let Ok(parent) = path.parent() {
            if let Some(children) = state.dirs.get_mut(&parent) {
                children.remove(path);
            }
        }
    }

    /// Every lock in the table. Used by shutdown to interrupt all
    /// waiting operations.
    pub fn all_locks(&self) -> Vec<Arc<PathLock>> {
        self.state.lock().locks.values().cloned().collect()
    }
}

/// Ensure directory entries, child links, and locks exist for every
/// strict ancestor of `path`, and a lock for `path` itself.
fn ensure_ancestors(state: &mut IndexState, path: &DfsPath) {
    let chain = path.subpaths();
    for pair in chain.windows(2) {
        let (parent, child) = (&pair[0], &pair[1]);
        state.locks.entry(parent.clone()).or_insert_with(|| Arc::new(PathLock::new()));
        state.dirs.entry(parent.clone()).or_default().insert(child.clone());
    }
    state.locks.entry(path.clone()).or_insert_with(|| Arc::new(PathLock::new()));
}

fn insert_file_entry(state: &mut IndexState, path: &DfsPath, stub: StorageStub) {
    ensure_ancestors(state, path);
    state.files.insert(path.clone(), vec![stub]);
}
