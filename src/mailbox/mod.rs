//! A mailbox: the canonical store plus what is needed to project it into
//! columns. The engine keeps two, one for the live view and one for search
//! results, and only the active one projects.

pub mod projection;
pub mod store;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Instant;

pub use projection::{ProjectionSettings, Thread, build_folder_threads, trash_view};
pub use store::MailboxStore;

use crate::columns::Columns;
use crate::config::Config;
use crate::constants::TRASH;
use crate::mail::types::FolderMeta;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxMode {
    Live,
    Search,
}

impl MailboxMode {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Search => "search",
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessOptions {
    /// Publish every column even when its threads did not change
    pub force: bool,
}

impl ProcessOptions {
    pub fn forced() -> Self {
        Self { force: true }
    }
}

#[derive(Debug)]
pub struct Mailbox {
    mode: MailboxMode,
    active: bool,
    pub store: MailboxStore,
    /// folder -> account -> meta
    meta: HashMap<String, BTreeMap<String, FolderMeta>>,
    initialized_folders: HashSet<String>,
    search_value: Option<String>,
}

impl Mailbox {
    pub fn new(mode: MailboxMode, active: bool) -> Self {
        Self {
            mode,
            active,
            store: MailboxStore::new(),
            meta: HashMap::new(),
            initialized_folders: HashSet::new(),
            search_value: None,
        }
    }

    pub fn mode(&self) -> MailboxMode {
        self.mode
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    /// Forget every message and folder state. The active flag is kept.
    pub fn reset(&mut self) {
        self.store.reset();
        self.meta.clear();
        self.initialized_folders.clear();
    }

    pub fn search_value(&self) -> Option<&str> {
        self.search_value.as_deref()
    }

    pub fn set_search_value(&mut self, value: Option<String>) {
        self.search_value = value;
    }

    pub fn set_meta(&mut self, account: &str, folder: &str, meta: FolderMeta) {
        self.meta
            .entry(folder.to_string())
            .or_default()
            .insert(account.to_string(), meta);
    }

    pub fn meta(&self, folder: &str) -> Option<&BTreeMap<String, FolderMeta>> {
        self.meta.get(folder)
    }

    pub fn is_initialized(&self, folder: &str) -> bool {
        self.initialized_folders.contains(folder)
    }

    /// Record the first load of a folder. Returns false if it was already
    /// loaded.
    pub fn mark_initialized(&mut self, folder: &str) -> bool {
        self.initialized_folders.insert(folder.to_string())
    }

    /// Re-thread every message and push the result to each column. Does
    /// nothing while the mailbox is inactive. Returns the number of columns
    /// whose subscribers were notified.
    pub fn process_email_changes(
        &self,
        columns: &mut Columns,
        settings: &ProjectionSettings,
        options: ProcessOptions,
    ) -> usize {
        if !self.active {
            return 0;
        }

        let messages: Vec<_> = self.store.messages().collect();
        tracing::debug!(
            "(re)Processing {} {} emails...",
            messages.len(),
            self.mode.name()
        );
        let started = Instant::now();

        let mut folder_threads = match build_folder_threads(&messages, settings) {
            Ok(folder_threads) => folder_threads,
            Err(e) => {
                tracing::error!("Threading failed, keeping previous columns: {}", e);
                return 0;
            }
        };

        let mut updated = 0;
        for folder in columns.folder_names() {
            let mut threads = folder_threads.remove(&folder).unwrap_or_default();
            if folder == TRASH {
                threads = trash_view(threads);
            }

            let force = options.force || Config::is_always_visible(&folder);
            if columns.set_threads(&folder, threads, force) {
                updated += 1;
            }

            if let Some(meta) = self.meta.get(&folder) {
                for (account, meta) in meta {
                    columns.set_account_meta(&folder, account, *meta);
                }
            }
        }

        tracing::debug!(
            "Processed {} emails into {} columns in {:?}",
            messages.len(),
            updated,
            started.elapsed()
        );
        updated
    }
}
