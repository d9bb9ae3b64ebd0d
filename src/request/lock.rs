//! One sync/fetch cycle per folder at a time.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Default)]
pub struct FolderLocks {
    locked: Arc<Mutex<HashSet<String>>>,
}

impl FolderLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock for `folder`, or `None` if a cycle already holds it.
    /// The lock is released when the guard drops, also on error paths.
    pub fn try_lock(&self, folder: &str) -> Option<FolderLockGuard> {
        let mut locked = self.locked.lock().unwrap_or_else(|e| e.into_inner());
        if !locked.insert(folder.to_string()) {
            return None;
        }
        Some(FolderLockGuard {
            locks: self.clone(),
            folder: folder.to_string(),
        })
    }

    pub fn is_locked(&self, folder: &str) -> bool {
        self.locked
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(folder)
    }
}

#[derive(Debug)]
pub struct FolderLockGuard {
    locks: FolderLocks,
    folder: String,
}

impl FolderLockGuard {
    pub fn folder(&self) -> &str {
        &self.folder
    }
}

impl Drop for FolderLockGuard {
    fn drop(&mut self) {
        self.locks
            .locked
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.folder);
    }
}
