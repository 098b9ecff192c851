//! Memoized fingerprint test results.
//!
//! Repeated tests for one path during a pass would redo metadata reads and
//! content hashing; this cache remembers the last result per path. Entries
//! are evicted when a path is marked dirty and the whole cache is cleared at
//! the start of every rescan.

use std::path::{Path, PathBuf};

use fnv::FnvHashMap;
use parking_lot::Mutex;

use crate::fingerprint::FingerprintTestResult;

#[derive(Debug, Default)]
pub struct FileStateCache {
    states: Mutex<FnvHashMap<PathBuf, FingerprintTestResult>>,
}

impl FileStateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &Path) -> Option<FingerprintTestResult> {
        self.states.lock().get(path).cloned()
    }

    pub fn insert(&self, path: &Path, result: FingerprintTestResult) {
        self.states.lock().insert(path.to_path_buf(), result);
    }

    /// Invalidates one path. Called when the path is marked dirty and after
    /// indexing it (the act of indexing may change its up-to-date status).
    pub fn remove(&self, path: &Path) {
        self.states.lock().remove(path);
    }

    pub fn clear(&self) {
        self.states.lock().clear();
    }
}
