//! Boundary to the fetch/sync transport.
//!
//! The engine never talks to a mail server itself; an embedder supplies an
//! implementation (an IMAP actor, an HTTP API client...) behind this trait.

use async_trait::async_trait;

use super::types::{FetchResult, FolderQuery, SyncResult};
use crate::error::TransportError;

/// Whether a transfer keeps the source copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Move,
    Copy,
}

impl TransferKind {
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Move => "Move",
            Self::Copy => "Copy",
        }
    }
}

#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Fetch (more) emails from a folder, or search it when `query.query` is
    /// set.
    async fn fetch_folder(
        &self,
        account: &str,
        folder: &str,
        query: &FolderQuery,
    ) -> Result<FetchResult, TransportError>;

    /// Report what changed in a folder since the last fetch/sync.
    async fn sync_folder(
        &self,
        account: &str,
        folder: &str,
        query: &FolderQuery,
    ) -> Result<SyncResult, TransportError>;

    async fn move_or_copy(
        &self,
        account: &str,
        uids: &[u32],
        from_folder: &str,
        to_folder: &str,
        kind: TransferKind,
    ) -> Result<(), TransportError>;

    async fn set_flag(
        &self,
        account: &str,
        folder: &str,
        uids: &[u32],
        flag: &str,
        on: bool,
    ) -> Result<(), TransportError>;
}
