use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// IMAP system flags the engine reasons about. Any other flag is carried
/// through untouched.
pub const SEEN: &str = "\\Seen";
pub const FLAGGED: &str = "\\Flagged";
pub const DELETED: &str = "\\Deleted";

pub type Flags = BTreeSet<String>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    #[serde(default)]
    pub name: Option<String>,
    pub email: String,
}

/// One email as returned by the transport for a single (account, folder).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchedEmail {
    pub uid: u32,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub in_reply_to: Option<String>,
    #[serde(default)]
    pub references: Vec<String>,
    #[serde(default)]
    pub flags: Flags,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub from: Vec<Address>,
    #[serde(default)]
    pub to: Vec<Address>,
    #[serde(default)]
    pub cc: Vec<Address>,
    #[serde(default)]
    pub excerpt: Option<String>,
}

/// Canonical message: one entry per `account_message_id`, however many
/// folders (labels) it appears in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub account_key: String,
    pub message_id: String,
    /// `<account_key>-<message_id>`, the dedup key
    pub account_message_id: String,
    /// Folder name -> UID in that folder. Never empty while stored.
    pub folder_uids: BTreeMap<String, u32>,
    /// Account-scoped references (same key space as `account_message_id`)
    pub references: Vec<String>,
    /// References exactly as the transport reported them
    pub original_references: Vec<String>,
    pub in_reply_to: Option<String>,
    pub flags: Flags,
    pub date: DateTime<Utc>,
    pub subject: String,
    pub from: Vec<Address>,
    pub to: Vec<Address>,
    pub cc: Vec<Address>,
    pub excerpt: Option<String>,
}

impl Message {
    /// Build the canonical record for an email seen for the first time in
    /// `folder`.
    pub fn from_fetched(account_key: &str, folder: &str, email: FetchedEmail) -> Self {
        let message_id = transport_message_id(folder, &email);
        let canonical_id = account_message_id(account_key, &message_id);
        let references = email
            .references
            .iter()
            .map(|reference| account_message_id(account_key, reference))
            .collect();

        Self {
            account_key: account_key.to_string(),
            message_id,
            account_message_id: canonical_id,
            folder_uids: BTreeMap::from([(folder.to_string(), email.uid)]),
            references,
            original_references: email.references,
            in_reply_to: email.in_reply_to,
            flags: email.flags,
            date: email.date,
            subject: email.subject,
            from: email.from,
            to: email.to,
            cc: email.cc,
            excerpt: email.excerpt,
        }
    }

    pub fn is_seen(&self) -> bool {
        self.flags.contains(SEEN)
    }

    pub fn is_flagged(&self) -> bool {
        self.flags.contains(FLAGGED)
    }

    pub fn is_deleted(&self) -> bool {
        self.flags.contains(DELETED)
    }

    pub fn uid_in(&self, folder: &str) -> Option<u32> {
        self.folder_uids.get(folder).copied()
    }

    /// Add or remove a flag. Returns true if the flag set changed.
    pub fn set_flag(&mut self, flag: &str, on: bool) -> bool {
        if on {
            self.flags.insert(flag.to_string())
        } else {
            self.flags.remove(flag)
        }
    }
}

/// Canonical dedup key for a transport message id within an account.
pub fn account_message_id(account_key: &str, message_id: &str) -> String {
    format!("{}-{}", account_key, message_id)
}

/// Message-ID is optional in IMAP, so fall back to something stable.
fn transport_message_id(folder: &str, email: &FetchedEmail) -> String {
    if let Some(ref mid) = email.message_id
        && !mid.is_empty()
    {
        return mid.clone();
    }

    if let Some(ref reply_to) = email.in_reply_to {
        return format!("in_reply_to-{}", reply_to);
    }

    tracing::warn!("Email with no message ID: {}/{}", folder, email.uid);
    format!("folder-{}-{}", folder, email.uid)
}

/// Per-account folder metadata reported alongside fetch/sync results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderMeta {
    #[serde(default)]
    pub count: u32,
    #[serde(default)]
    pub exists: bool,
}

/// Query parameters for a folder fetch or sync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderQuery {
    /// Start from the newest messages again instead of paging further back
    #[serde(default)]
    pub reset: bool,
    #[serde(default)]
    pub batch_size: Option<u32>,
    /// UIDs the client still believes unread, so the server can report
    /// which of them were read elsewhere
    #[serde(default)]
    pub unread_uids: Vec<u32>,
    /// Search term (search mode only)
    #[serde(default)]
    pub query: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FetchResult {
    pub emails: Vec<FetchedEmail>,
    #[serde(default)]
    pub meta: FolderMeta,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncResult {
    #[serde(default)]
    pub new_emails: Vec<FetchedEmail>,
    #[serde(default)]
    pub deleted_uids: Vec<u32>,
    #[serde(default)]
    pub read_uids: Vec<u32>,
    #[serde(default)]
    pub meta: FolderMeta,
}

impl SyncResult {
    pub fn is_empty(&self) -> bool {
        self.new_emails.is_empty() && self.deleted_uids.is_empty() && self.read_uids.is_empty()
    }
}
