//! Fetch/sync orchestration over the live and search mailboxes.
//!
//! `Engine` is a cheap handle: clones share the same state. All mailbox and
//! column state sits behind one async mutex that is never held while a
//! transport call is in flight, so every mutation happens between I/O
//! suspension points and each batch projects once, after all of its accounts
//! settled.

mod actions;
mod sync_loop;

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{Mutex, watch};

pub use sync_loop::spawn_sync_loop;

use crate::columns::{ColumnSnapshot, ColumnStatus, Columns};
use crate::config::Config;
use crate::constants::SEARCH_TRAILING_FOLDERS;
use crate::mail::transport::MailTransport;
use crate::mail::types::{FolderQuery, SEEN};
use crate::mailbox::{Mailbox, MailboxMode, ProcessOptions, ProjectionSettings};
use crate::request::{FolderLocks, RequestCategory, RequestError, RequestScheduler, UndoQueue};

/// How a fetch or sync cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Another cycle for the same folder was still running
    Skipped,
    Completed {
        /// Accounts whose transport call failed; their errors are in the log
        failed_accounts: Vec<String>,
        /// Whether the store changed
        changed: bool,
    },
}

impl SyncOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped)
    }

    pub fn failed_accounts(&self) -> &[String] {
        match self {
            Self::Skipped => &[],
            Self::Completed {
                failed_accounts, ..
            } => failed_accounts,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FetchOptions {
    /// Start again from the newest emails
    pub reset: bool,
    pub batch_size: Option<u32>,
}

#[derive(Debug)]
struct EngineState {
    main: Mailbox,
    search: Mailbox,
    columns: Columns,
}

impl EngineState {
    fn active_mode(&self) -> MailboxMode {
        if self.search.is_active() {
            MailboxMode::Search
        } else {
            MailboxMode::Live
        }
    }

    fn mailbox(&self, mode: MailboxMode) -> &Mailbox {
        match mode {
            MailboxMode::Live => &self.main,
            MailboxMode::Search => &self.search,
        }
    }

    fn parts(&mut self, mode: MailboxMode) -> (&mut Mailbox, &mut Columns) {
        match mode {
            MailboxMode::Live => (&mut self.main, &mut self.columns),
            MailboxMode::Search => (&mut self.search, &mut self.columns),
        }
    }

    /// Exactly one mailbox is active afterwards.
    fn activate(&mut self, mode: MailboxMode) {
        self.main.set_active(mode == MailboxMode::Live);
        self.search.set_active(mode == MailboxMode::Search);
    }

    fn process(&mut self, mode: MailboxMode, settings: &ProjectionSettings, options: ProcessOptions) -> usize {
        let (mailbox, columns) = self.parts(mode);
        mailbox.process_email_changes(columns, settings, options)
    }
}

#[derive(Debug, Clone, Copy)]
enum Indicator {
    Loading,
    Syncing,
}

impl Indicator {
    fn set(self, columns: &mut Columns, folder: &str, on: bool) {
        match self {
            Self::Loading => columns.set_loading(folder, on),
            Self::Syncing => columns.set_syncing(folder, on),
        }
    }
}

/// Holds a column's loading or syncing indicator up. Released through
/// `finish` on the normal path; dropping the guard unfinished (the cycle was
/// cancelled mid-flight) releases it as well.
struct IndicatorGuard {
    state: Arc<Mutex<EngineState>>,
    folder: String,
    indicator: Indicator,
    active: bool,
}

impl IndicatorGuard {
    fn start(
        state: &Arc<Mutex<EngineState>>,
        columns: &mut Columns,
        folder: &str,
        indicator: Indicator,
    ) -> Self {
        indicator.set(columns, folder, true);
        Self {
            state: Arc::clone(state),
            folder: folder.to_string(),
            indicator,
            active: true,
        }
    }

    fn finish(mut self, columns: &mut Columns) {
        self.active = false;
        self.indicator.set(columns, &self.folder, false);
    }
}

impl Drop for IndicatorGuard {
    fn drop(&mut self) {
        if !self.active {
            return;
        }

        if let Ok(mut state) = self.state.try_lock() {
            self.indicator.set(&mut state.columns, &self.folder, false);
            return;
        }

        // State is busy: release from a task instead of blocking in drop
        let state = Arc::clone(&self.state);
        let folder = std::mem::take(&mut self.folder);
        let indicator = self.indicator;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    indicator.set(&mut state.lock().await.columns, &folder, false);
                });
            }
            Err(_) => tracing::warn!("No runtime to clear {:?} of {}", indicator, folder),
        }
    }
}

#[derive(Clone)]
pub struct Engine {
    config: Arc<Config>,
    settings: Arc<ProjectionSettings>,
    transport: Arc<dyn MailTransport>,
    scheduler: Arc<RequestScheduler>,
    undo: UndoQueue,
    state: Arc<Mutex<EngineState>>,
    live_locks: FolderLocks,
    search_locks: FolderLocks,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("accounts", &self.config.account_keys())
            .field("undo", &self.undo)
            .finish_non_exhaustive()
    }
}

impl Engine {
    pub fn new(config: Config, transport: Arc<dyn MailTransport>) -> Self {
        let settings = ProjectionSettings::from_config(&config);
        let columns = Columns::with_folders(config.visible_folders());
        let scheduler = RequestScheduler::new(config.system.max_concurrent_requests);

        Self {
            settings: Arc::new(settings),
            transport,
            scheduler: Arc::new(scheduler),
            undo: UndoQueue::new(),
            state: Arc::new(Mutex::new(EngineState {
                main: Mailbox::new(MailboxMode::Live, true),
                search: Mailbox::new(MailboxMode::Search, false),
                columns,
            })),
            live_locks: FolderLocks::new(),
            search_locks: FolderLocks::new(),
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn scheduler(&self) -> &RequestScheduler {
        &self.scheduler
    }

    pub async fn subscribe(&self, folder: &str) -> watch::Receiver<ColumnSnapshot> {
        self.state.lock().await.columns.subscribe(folder)
    }

    pub async fn subscribe_status(&self, folder: &str) -> watch::Receiver<ColumnStatus> {
        self.state.lock().await.columns.subscribe_status(folder)
    }

    pub async fn snapshot(&self, folder: &str) -> Option<ColumnSnapshot> {
        self.state.lock().await.columns.snapshot(folder)
    }

    pub async fn is_searching(&self) -> bool {
        self.state.lock().await.active_mode() == MailboxMode::Search
    }

    /// Failures recorded so far, oldest first.
    pub fn errors(&self) -> Vec<RequestError> {
        self.scheduler.errors()
    }

    /// Re-project the active mailbox.
    pub async fn process_changes(&self, options: ProcessOptions) -> usize {
        let mut state = self.state.lock().await;
        let mode = state.active_mode();
        state.process(mode, &self.settings, options)
    }

    fn locks(&self, mode: MailboxMode) -> &FolderLocks {
        match mode {
            MailboxMode::Live => &self.live_locks,
            MailboxMode::Search => &self.search_locks,
        }
    }

    /// Load a folder the first time it is shown, sync it afterwards.
    pub async fn initialize_or_sync_folder(&self, folder: &str) -> SyncOutcome {
        let (mode, first_load) = {
            let mut state = self.state.lock().await;
            state.columns.ensure(folder);
            let mode = state.active_mode();
            let (mailbox, _) = state.parts(mode);
            (mode, mailbox.mark_initialized(folder))
        };

        if !first_load {
            return self.sync_folder(folder).await;
        }

        let outcome = self
            .fetch_folder(
                folder,
                FetchOptions {
                    reset: true,
                    batch_size: Some(self.config.initial_batch_size()),
                },
            )
            .await;

        if mode == MailboxMode::Search || outcome.is_skipped() {
            return outcome;
        }
        self.sync_folder(folder).await
    }

    /// Fetch (more of) a folder for every account, then project once.
    pub async fn fetch_folder(&self, folder: &str, options: FetchOptions) -> SyncOutcome {
        let (mode, search_value) = {
            let state = self.state.lock().await;
            let mode = state.active_mode();
            (mode, state.mailbox(mode).search_value().map(str::to_string))
        };

        // Each search term gets its own lock so a new search is never
        // blocked by the previous one
        let lock_key = match &search_value {
            Some(value) => format!("{}?{}", folder, value),
            None => folder.to_string(),
        };
        let Some(_lock) = self.locks(mode).try_lock(&lock_key) else {
            tracing::debug!("Fetch of {} already in progress, skipping", folder);
            return SyncOutcome::Skipped;
        };

        let loading = {
            let mut state = self.state.lock().await;
            IndicatorGuard::start(&self.state, &mut state.columns, folder, Indicator::Loading)
        };

        let accounts = self.config.account_keys();
        let query = FolderQuery {
            reset: options.reset,
            batch_size: options.batch_size,
            unread_uids: Vec::new(),
            query: search_value.clone(),
        };
        let results = join_all(accounts.iter().map(|account| {
            self.scheduler.run_tracked(
                RequestCategory::Fetch,
                format!("Get emails in {}/{}", account, folder),
                self.transport.fetch_folder(account, folder, &query),
            )
        }))
        .await;

        let mut state = self.state.lock().await;
        let (mailbox, columns) = state.parts(mode);
        let mut failed_accounts = Vec::new();
        let mut changed = false;

        if mailbox.search_value() != search_value.as_deref() {
            tracing::debug!("Dropping results of stale search in {}", folder);
        } else {
            for (account, result) in accounts.iter().zip(results) {
                match result {
                    Ok(fetched) => {
                        mailbox.set_meta(account, folder, fetched.meta);
                        changed |= !fetched.emails.is_empty();
                        mailbox.store.add_messages(account, folder, fetched.emails);
                    }
                    Err(e) => {
                        self.scheduler.record_error(
                            RequestError::new(format!("Get emails in {}/{}", account, folder), e)
                                .with_location(account, folder),
                        );
                        failed_accounts.push(account.clone());
                    }
                }
            }
            mailbox.process_email_changes(columns, &self.settings, ProcessOptions::default());
        }

        loading.finish(columns);
        SyncOutcome::Completed {
            failed_accounts,
            changed,
        }
    }

    /// Apply what changed on the server since the last fetch/sync. In search
    /// mode this is a fetch of the search results.
    pub async fn sync_folder(&self, folder: &str) -> SyncOutcome {
        if self.is_searching().await {
            return self.fetch_folder(folder, FetchOptions::default()).await;
        }

        let Some(_lock) = self.live_locks.try_lock(folder) else {
            tracing::debug!("Sync of {} already in progress, skipping", folder);
            return SyncOutcome::Skipped;
        };

        let (queries, syncing) = {
            let mut state = self.state.lock().await;
            let syncing =
                IndicatorGuard::start(&self.state, &mut state.columns, folder, Indicator::Syncing);
            let queries: Vec<(String, FolderQuery)> = self
                .config
                .account_keys()
                .into_iter()
                .map(|account| {
                    let query = FolderQuery {
                        unread_uids: state.main.store.unread_uids(&account, folder),
                        ..Default::default()
                    };
                    (account, query)
                })
                .collect();
            (queries, syncing)
        };

        let results = join_all(queries.iter().map(|(account, query)| {
            self.scheduler.run_tracked(
                RequestCategory::Fetch,
                format!("Sync emails in {}/{}", account, folder),
                self.transport.sync_folder(account, folder, query),
            )
        }))
        .await;

        let mut state = self.state.lock().await;
        let (mailbox, columns) = state.parts(MailboxMode::Live);
        let mut failed_accounts = Vec::new();
        let mut changed = false;

        for ((account, _), result) in queries.iter().zip(results) {
            let sync = match result {
                Ok(sync) => sync,
                Err(e) => {
                    self.scheduler.record_error(
                        RequestError::new(format!("Sync emails in {}/{}", account, folder), e)
                            .with_location(account, folder),
                    );
                    failed_accounts.push(account.clone());
                    continue;
                }
            };

            mailbox.set_meta(account, folder, sync.meta);
            columns.set_account_meta(folder, account, sync.meta);

            if !sync.read_uids.is_empty() {
                mailbox
                    .store
                    .set_flags_for_uids(account, folder, &sync.read_uids, SEEN, true);
                changed = true;
            }
            if !sync.deleted_uids.is_empty() {
                mailbox.store.delete_messages(account, folder, &sync.deleted_uids);
                changed = true;
            }
            if !sync.new_emails.is_empty() {
                mailbox.store.add_messages(account, folder, sync.new_emails);
                changed = true;
            }
        }

        if changed {
            mailbox.process_email_changes(columns, &self.settings, ProcessOptions::default());
        }

        syncing.finish(columns);
        SyncOutcome::Completed {
            failed_accounts,
            changed,
        }
    }

    /// Switch to the (empty) search mailbox.
    pub async fn start_search(&self) {
        let mut state = self.state.lock().await;
        if state.active_mode() == MailboxMode::Search {
            return;
        }
        tracing::debug!("Starting search");
        state.search.reset();
        state.search.set_search_value(None);
        state.activate(MailboxMode::Search);
        state.process(MailboxMode::Search, &self.settings, ProcessOptions::forced());
    }

    /// Run a search over every column, then the inbox and archive. A value
    /// equal to the current one is ignored. Returns the outcome per folder.
    pub async fn search(&self, value: &str) -> Vec<(String, SyncOutcome)> {
        {
            let mut state = self.state.lock().await;
            if state.active_mode() != MailboxMode::Search {
                state.activate(MailboxMode::Search);
            } else if state.search.search_value() == Some(value) {
                tracing::debug!("Search value unchanged, not searching again");
                return Vec::new();
            }

            tracing::info!("Searching for {:?}", value);
            state.search.reset();
            state.search.set_search_value(Some(value.to_string()));
            state.process(MailboxMode::Search, &self.settings, ProcessOptions::forced());
        }

        // A new term starts from the newest results
        let options = FetchOptions {
            reset: true,
            batch_size: None,
        };
        let mut outcomes = Vec::new();
        for folders in self.search_phases() {
            let results = join_all(
                folders
                    .iter()
                    .map(|folder| self.fetch_folder(folder, options)),
            )
            .await;
            outcomes.extend(folders.into_iter().zip(results));
        }
        outcomes
    }

    /// The configured columns, then the inbox and archive unless they are
    /// columns already.
    fn search_phases(&self) -> [Vec<String>; 2] {
        let columns: Vec<String> = self.config.columns.iter().cloned().collect();
        let trailing = SEARCH_TRAILING_FOLDERS
            .iter()
            .filter(|folder| !columns.iter().any(|f| f == *folder))
            .map(|folder| folder.to_string())
            .collect();
        [columns, trailing]
    }

    /// Drop the search results and go back to the live mailbox.
    pub async fn stop_search(&self) {
        let mut state = self.state.lock().await;
        if state.active_mode() == MailboxMode::Live {
            return;
        }
        tracing::debug!("Stopping search");
        state.activate(MailboxMode::Live);
        state.search.reset();
        state.search.set_search_value(None);
        state.process(MailboxMode::Live, &self.settings, ProcessOptions::forced());
    }
}
