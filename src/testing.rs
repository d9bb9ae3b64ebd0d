//! Builders and a scripted transport shared by the unit tests.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::watch;

use crate::error::{TransportError, TransportErrorKind};
use crate::mail::transport::{MailTransport, TransferKind};
use crate::mail::types::{
    FetchResult, FetchedEmail, FolderQuery, Message, SyncResult, account_message_id,
};

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap()
}

/// A transport record as a server would return it.
pub fn fetched(uid: u32, message_id: &str, secs: i64) -> FetchedEmail {
    FetchedEmail {
        uid,
        message_id: Some(message_id.to_string()),
        in_reply_to: None,
        references: Vec::new(),
        flags: Default::default(),
        date: at(secs),
        subject: format!("Subject of {}", message_id),
        from: Vec::new(),
        to: Vec::new(),
        cc: Vec::new(),
        excerpt: None,
    }
}

/// A canonical message in `account`'s inbox with account-scoped references.
pub fn message(account: &str, id: &str, references: &[&str], secs: i64) -> Message {
    Message {
        account_key: account.to_string(),
        message_id: id.to_string(),
        account_message_id: account_message_id(account, id),
        folder_uids: BTreeMap::from([("inbox".to_string(), (secs % 100_000) as u32)]),
        references: references
            .iter()
            .map(|reference| account_message_id(account, reference))
            .collect(),
        original_references: references.iter().map(|r| r.to_string()).collect(),
        in_reply_to: None,
        flags: Default::default(),
        date: at(secs),
        subject: format!("Subject of {}", id),
        from: Vec::new(),
        to: Vec::new(),
        cc: Vec::new(),
        excerpt: None,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportCall {
    Fetch {
        account: String,
        folder: String,
        query: FolderQuery,
    },
    Sync {
        account: String,
        folder: String,
        query: FolderQuery,
    },
    MoveOrCopy {
        account: String,
        uids: Vec<u32>,
        from: String,
        to: String,
        kind: TransferKind,
    },
    SetFlag {
        account: String,
        folder: String,
        uids: Vec<u32>,
        flag: String,
        on: bool,
    },
}

/// In-memory transport. Fetches return whatever was scripted for the
/// account/folder, syncs pop scripted results in order, pushes succeed unless
/// told otherwise. Every call is recorded.
pub struct MockTransport {
    fetches: Mutex<HashMap<(String, String), FetchResult>>,
    searches: Mutex<HashMap<(String, String, String), FetchResult>>,
    syncs: Mutex<HashMap<(String, String), VecDeque<SyncResult>>>,
    failing_accounts: Mutex<HashSet<String>>,
    fail_pushes: Mutex<bool>,
    calls: Mutex<Vec<TransportCall>>,
    latency: Mutex<Duration>,
    open: watch::Sender<bool>,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            fetches: Mutex::new(HashMap::new()),
            searches: Mutex::new(HashMap::new()),
            syncs: Mutex::new(HashMap::new()),
            failing_accounts: Mutex::new(HashSet::new()),
            fail_pushes: Mutex::new(false),
            calls: Mutex::new(Vec::new()),
            latency: Mutex::new(Duration::ZERO),
            open: watch::channel(true).0,
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn set_fetch(&self, account: &str, folder: &str, emails: Vec<FetchedEmail>) {
        let result = FetchResult {
            meta: crate::mail::types::FolderMeta {
                count: emails.len() as u32,
                exists: true,
            },
            emails,
        };
        self.fetches
            .lock()
            .unwrap()
            .insert((account.to_string(), folder.to_string()), result);
    }

    /// Results for fetches carrying `term`. Searches without a scripted
    /// result fall back to the plain fetch result.
    pub fn set_search(&self, account: &str, folder: &str, term: &str, emails: Vec<FetchedEmail>) {
        let result = FetchResult {
            meta: crate::mail::types::FolderMeta {
                count: emails.len() as u32,
                exists: true,
            },
            emails,
        };
        self.searches.lock().unwrap().insert(
            (account.to_string(), folder.to_string(), term.to_string()),
            result,
        );
    }

    pub fn push_sync(&self, account: &str, folder: &str, result: SyncResult) {
        self.syncs
            .lock()
            .unwrap()
            .entry((account.to_string(), folder.to_string()))
            .or_default()
            .push_back(result);
    }

    pub fn fail_account(&self, account: &str) {
        self.failing_accounts.lock().unwrap().insert(account.to_string());
    }

    pub fn fail_pushes(&self, fail: bool) {
        *self.fail_pushes.lock().unwrap() = fail;
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    /// Block every call until `release`.
    pub fn hold(&self) {
        self.open.send_replace(false);
    }

    pub fn release(&self) {
        self.open.send_replace(true);
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn sync_calls(&self) -> Vec<(String, String, FolderQuery)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                TransportCall::Sync {
                    account,
                    folder,
                    query,
                } => Some((account, folder, query)),
                _ => None,
            })
            .collect()
    }

    pub fn fetch_calls(&self) -> Vec<(String, String, FolderQuery)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                TransportCall::Fetch {
                    account,
                    folder,
                    query,
                } => Some((account, folder, query)),
                _ => None,
            })
            .collect()
    }

    pub fn push_calls(&self) -> Vec<TransportCall> {
        self.calls()
            .into_iter()
            .filter(|call| {
                matches!(
                    call,
                    TransportCall::MoveOrCopy { .. } | TransportCall::SetFlag { .. }
                )
            })
            .collect()
    }

    /// Highest number of calls that were running at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    async fn enter(&self, call: TransportCall) {
        self.calls.lock().unwrap().push(call);
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let mut open = self.open.subscribe();
        loop {
            let is_open = *open.borrow_and_update();
            if is_open || open.changed().await.is_err() {
                break;
            }
        }

        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.running.fetch_sub(1, Ordering::SeqCst);
    }

    fn check_account(&self, account: &str) -> Result<(), TransportError> {
        if self.failing_accounts.lock().unwrap().contains(account) {
            return Err(TransportError::network(format!("{} is unreachable", account)));
        }
        Ok(())
    }

    fn check_push(&self, account: &str) -> Result<(), TransportError> {
        self.check_account(account)?;
        if *self.fail_pushes.lock().unwrap() {
            return Err(TransportError::new(
                TransportErrorKind::Rejected,
                "server refused the change",
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl MailTransport for MockTransport {
    async fn fetch_folder(
        &self,
        account: &str,
        folder: &str,
        query: &FolderQuery,
    ) -> Result<FetchResult, TransportError> {
        self.enter(TransportCall::Fetch {
            account: account.to_string(),
            folder: folder.to_string(),
            query: query.clone(),
        })
        .await;
        self.check_account(account)?;

        if let Some(term) = &query.query {
            let key = (account.to_string(), folder.to_string(), term.clone());
            if let Some(result) = self.searches.lock().unwrap().get(&key) {
                return Ok(result.clone());
            }
        }

        Ok(self
            .fetches
            .lock()
            .unwrap()
            .get(&(account.to_string(), folder.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn sync_folder(
        &self,
        account: &str,
        folder: &str,
        query: &FolderQuery,
    ) -> Result<SyncResult, TransportError> {
        self.enter(TransportCall::Sync {
            account: account.to_string(),
            folder: folder.to_string(),
            query: query.clone(),
        })
        .await;
        self.check_account(account)?;

        Ok(self
            .syncs
            .lock()
            .unwrap()
            .get_mut(&(account.to_string(), folder.to_string()))
            .and_then(VecDeque::pop_front)
            .unwrap_or_default())
    }

    async fn move_or_copy(
        &self,
        account: &str,
        uids: &[u32],
        from_folder: &str,
        to_folder: &str,
        kind: TransferKind,
    ) -> Result<(), TransportError> {
        self.enter(TransportCall::MoveOrCopy {
            account: account.to_string(),
            uids: uids.to_vec(),
            from: from_folder.to_string(),
            to: to_folder.to_string(),
            kind,
        })
        .await;
        self.check_push(account)
    }

    async fn set_flag(
        &self,
        account: &str,
        folder: &str,
        uids: &[u32],
        flag: &str,
        on: bool,
    ) -> Result<(), TransportError> {
        self.enter(TransportCall::SetFlag {
            account: account.to_string(),
            folder: folder.to_string(),
            uids: uids.to_vec(),
            flag: flag.to_string(),
            on,
        })
        .await;
        self.check_push(account)
    }
}
