//! mailboard: a threaded, multi-account mailbox engine.
//!
//! Per-account, per-folder fetch/sync results are merged into one canonical
//! message set, threaded, and projected into per-folder columns that
//! subscribers watch. User actions are applied locally first and committed
//! after an undo window.

pub mod collection;
pub mod columns;
pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod logging;
pub mod mail;
pub mod mailbox;
pub mod request;

#[cfg(test)]
mod testing;

pub use columns::{ColumnSnapshot, ColumnStatus, Columns};
pub use config::Config;
pub use engine::{Engine, FetchOptions, SyncOutcome, spawn_sync_loop};
pub use error::{ThreadingError, TransportError, TransportErrorKind};
pub use mail::{MailTransport, Message, TransferKind};
pub use mailbox::{Mailbox, MailboxMode, MailboxStore, ProcessOptions, Thread};
pub use request::{RequestError, RequestScheduler, UndoQueue, UndoToken};
