pub mod thread;
pub mod transport;
pub mod types;

pub use thread::{ContainerId, MessageThreader, ThreadForest, is_reply_or_forward, normalize_subject};
pub use transport::{MailTransport, TransferKind};
pub use types::{
    Address, DELETED, FLAGGED, FetchResult, FetchedEmail, Flags, FolderMeta, FolderQuery, Message,
    SEEN, SyncResult, account_message_id,
};
