//! Per-partition write locks
//!
//! Writers to the same partition file are serialized; the guard releases the
//! lock when dropped. Locks are process-local, and a path's entry is removed
//! once no writer holds or awaits it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockTable = DashMap<PathBuf, Arc<Mutex<()>>>;

/// Lock table keyed by partition file path
#[derive(Debug, Default)]
pub struct PartitionLocks {
    locks: Arc<LockTable>,
}

/// Held while a partition file is being rewritten
#[derive(Debug)]
pub struct PartitionGuard {
    path: PathBuf,
    guard: Option<OwnedMutexGuard<()>>,
    table: Arc<LockTable>,
}

impl PartitionGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PartitionGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // only the table still refers to the mutex
        self.table
            .remove_if(&self.path, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

impl PartitionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `path`
    pub async fn lock(&self, path: &Path) -> PartitionGuard {
        let mutex = self
            .locks
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        PartitionGuard {
            path: path.to_path_buf(),
            guard: Some(mutex.lock_owned().await),
            table: Arc::clone(&self.locks),
        }
    }

    /// Number of paths currently locked or awaited
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
