//! Error types shared across the engine.
//!
//! Transport errors are data, not control flow: the orchestrator records them
//! in the request scheduler's error log and keeps going with the rest of the
//! batch.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Machine-readable category of a transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportErrorKind {
    /// Connection dropped, timed out, DNS failure...
    Network,
    /// The server answered with a 5xx-style failure
    Server,
    /// The server refused the request (4xx-style)
    Rejected,
    Auth,
    NotFound,
    Other,
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Network => "network",
            Self::Server => "server",
            Self::Rejected => "rejected",
            Self::Auth => "auth",
            Self::NotFound => "not_found",
            Self::Other => "other",
        };
        f.write_str(name)
    }
}

/// Failure reported by the fetch/sync transport.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind} error: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Network, message)
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Server, message)
    }
}

/// Internal inconsistency detected while threading.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ThreadingError {
    #[error("account message id seen twice in one threading pass: {0}")]
    DuplicateMessageId(String),
}
