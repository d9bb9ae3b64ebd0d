//! Per-folder column state published to subscribers.
//!
//! Each column owns two `watch` channels: one carrying the visible thread
//! list, one carrying loading/sync status and per-account counts. Threads are
//! only republished when `ColumnStore::set_threads` detects a change that a
//! subscriber could see.

use std::collections::{BTreeMap, HashSet};

use indexmap::IndexMap;
use tokio::sync::watch;

use crate::constants::INBOX;
use crate::mail::types::FolderMeta;
use crate::mailbox::projection::Thread;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnSnapshot {
    pub folder: String,
    /// Threads newest first, hidden ones excluded
    pub threads: Vec<Thread>,
    pub unread_threads: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnStatus {
    /// Account -> message count in this folder, for folders that exist
    pub counts: BTreeMap<String, u32>,
    pub loading: bool,
    pub syncing: bool,
}

#[derive(Debug)]
pub struct ColumnStore {
    folder: String,
    /// `None` until the first projection lands
    threads: Option<Vec<Thread>>,
    hidden: HashSet<String>,
    load_count: usize,
    sync_count: usize,
    status: ColumnStatus,
    threads_tx: watch::Sender<ColumnSnapshot>,
    status_tx: watch::Sender<ColumnStatus>,
}

impl ColumnStore {
    pub fn new(folder: impl Into<String>) -> Self {
        let folder = folder.into();
        let (threads_tx, _) = watch::channel(ColumnSnapshot {
            folder: folder.clone(),
            ..Default::default()
        });
        let (status_tx, _) = watch::channel(ColumnStatus::default());

        Self {
            folder,
            threads: None,
            hidden: HashSet::new(),
            load_count: 0,
            sync_count: 0,
            status: ColumnStatus::default(),
            threads_tx,
            status_tx,
        }
    }

    pub fn folder(&self) -> &str {
        &self.folder
    }

    pub fn subscribe(&self) -> watch::Receiver<ColumnSnapshot> {
        self.threads_tx.subscribe()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ColumnStatus> {
        self.status_tx.subscribe()
    }

    /// Replace the thread list if it differs from the current one in a way
    /// subscribers can see, or if `force` is set. Returns whether subscribers
    /// were notified.
    pub fn set_threads(&mut self, threads: Vec<Thread>, force: bool) -> bool {
        let changed = force
            || match &self.threads {
                None => true,
                Some(previous) => threads_differ(previous, &threads),
            };

        if !changed {
            tracing::debug!("Skipping update for {} as no changes detected", self.folder);
            return false;
        }

        self.threads = Some(threads);
        self.publish();
        true
    }

    pub fn threads(&self) -> &[Thread] {
        self.threads.as_deref().unwrap_or_default()
    }

    pub fn is_hidden(&self, hash: &str) -> bool {
        self.hidden.contains(hash)
    }

    pub fn hide_thread(&mut self, hash: &str) {
        if self.hidden.insert(hash.to_string()) {
            self.publish();
        }
    }

    pub fn show_thread(&mut self, hash: &str) {
        if self.hidden.remove(hash) {
            self.publish();
        }
    }

    pub fn set_account_meta(&mut self, account: &str, meta: FolderMeta) {
        if !meta.exists {
            return;
        }
        let previous = self.status.counts.insert(account.to_string(), meta.count);
        if previous != Some(meta.count) {
            self.publish_status();
        }
    }

    /// Nested: the column is loading while any caller still is.
    pub fn set_loading(&mut self, loading: bool) {
        self.load_count = adjust(self.load_count, loading);
        let loading = self.load_count > 0;
        if self.status.loading != loading {
            self.status.loading = loading;
            self.publish_status();
        }
    }

    /// Nested like `set_loading`.
    pub fn set_syncing(&mut self, syncing: bool) {
        self.sync_count = adjust(self.sync_count, syncing);
        let syncing = self.sync_count > 0;
        if self.status.syncing != syncing {
            self.status.syncing = syncing;
            self.publish_status();
        }
    }

    pub fn status(&self) -> &ColumnStatus {
        &self.status
    }

    pub fn snapshot(&self) -> ColumnSnapshot {
        let threads: Vec<Thread> = self
            .threads()
            .iter()
            .filter(|thread| !self.hidden.contains(&thread.hash))
            .cloned()
            .collect();
        let unread_threads = threads.iter().filter(|thread| thread.unread).count();

        ColumnSnapshot {
            folder: self.folder.clone(),
            threads,
            unread_threads,
        }
    }

    fn publish(&self) {
        let snapshot = self.snapshot();
        if self.folder == INBOX {
            tracing::debug!("Inbox has {} unread threads", snapshot.unread_threads);
        }
        self.threads_tx.send_replace(snapshot);
    }

    fn publish_status(&self) {
        self.status_tx.send_replace(self.status.clone());
    }
}

fn adjust(count: usize, up: bool) -> usize {
    if up {
        count + 1
    } else {
        count.saturating_sub(1)
    }
}

/// Positional comparison of what a column shows for each thread.
fn threads_differ(previous: &[Thread], next: &[Thread]) -> bool {
    if previous.is_empty() || previous.len() != next.len() {
        return true;
    }

    previous.iter().zip(next).any(|(old, new)| {
        old.hash != new.hash
            || old.newest().account_message_id != new.newest().account_message_id
            || old.archived != new.archived
            || old.unread != new.unread
            || old.starred != new.starred
            || old.deleted != new.deleted
    })
}

/// Every column, in creation order.
#[derive(Debug, Default)]
pub struct Columns {
    stores: IndexMap<String, ColumnStore>,
}

impl Columns {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_folders<I, S>(folders: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut columns = Self::new();
        for folder in folders {
            columns.ensure(folder.as_ref());
        }
        columns
    }

    /// The column for `folder`, created on first use.
    pub fn ensure(&mut self, folder: &str) -> &mut ColumnStore {
        if !self.stores.contains_key(folder) {
            tracing::debug!("Creating new column store: {}", folder);
        }
        self.stores
            .entry(folder.to_string())
            .or_insert_with(|| ColumnStore::new(folder))
    }

    pub fn get(&self, folder: &str) -> Option<&ColumnStore> {
        self.stores.get(folder)
    }

    pub fn subscribe(&mut self, folder: &str) -> watch::Receiver<ColumnSnapshot> {
        self.ensure(folder).subscribe()
    }

    pub fn subscribe_status(&mut self, folder: &str) -> watch::Receiver<ColumnStatus> {
        self.ensure(folder).subscribe_status()
    }

    pub fn folder_names(&self) -> Vec<String> {
        self.stores.keys().cloned().collect()
    }

    pub fn hide_thread(&mut self, folder: &str, hash: &str) {
        self.ensure(folder).hide_thread(hash);
    }

    pub fn show_thread(&mut self, folder: &str, hash: &str) {
        self.ensure(folder).show_thread(hash);
    }

    pub fn set_threads(&mut self, folder: &str, threads: Vec<Thread>, force: bool) -> bool {
        self.ensure(folder).set_threads(threads, force)
    }

    pub fn set_account_meta(&mut self, folder: &str, account: &str, meta: FolderMeta) {
        self.ensure(folder).set_account_meta(account, meta);
    }

    pub fn set_loading(&mut self, folder: &str, loading: bool) {
        self.ensure(folder).set_loading(loading);
    }

    pub fn set_syncing(&mut self, folder: &str, syncing: bool) {
        self.ensure(folder).set_syncing(syncing);
    }

    pub fn snapshot(&self, folder: &str) -> Option<ColumnSnapshot> {
        self.stores.get(folder).map(ColumnStore::snapshot)
    }
}
