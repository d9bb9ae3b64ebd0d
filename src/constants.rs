//! Engine-wide constants for tuning and folder naming
//!
//! Centralizes magic numbers to make them discoverable and configurable.

/// The primary folder. Threads carrying it are "not archived".
pub const INBOX: &str = "inbox";

pub const ARCHIVE: &str = "archive";

pub const TRASH: &str = "trash";

/// Folder aliases that back primary navigation. They always get a column and
/// are force-updated on every projection pass.
pub const ALWAYS_VISIBLE_FOLDERS: [&str; 6] = [INBOX, "sent", "drafts", ARCHIVE, TRASH, "spam"];

/// Folders searched after the configured columns when a search runs.
pub const SEARCH_TRAILING_FOLDERS: [&str; 2] = [INBOX, ARCHIVE];

/// Maximum number of transport requests in flight at once.
/// Most IMAP servers tolerate a handful of concurrent connections per user.
pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 4;

/// Delay in milliseconds before an undoable action is committed.
/// Allows user to undo within this time window.
pub const DEFAULT_UNDO_MS: u64 = 5000;

/// Interval in milliseconds between periodic folder syncs in live mode.
pub const DEFAULT_SYNC_INTERVAL_MS: u64 = 60_000;

/// Number of emails requested per folder fetch.
pub const DEFAULT_BATCH_SIZE: u32 = 50;

/// Number of batches loaded on the first fetch of a folder.
pub const DEFAULT_INITIAL_BATCHES: u32 = 3;
