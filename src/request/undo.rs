//! Delayed commits for actions that can be taken back.
//!
//! A user action is applied locally right away and its network commit is
//! scheduled after the undo window. Until the timer fires the action can be
//! undone, which cancels the timer and runs the undo instead. Whoever removes
//! an entry from the registry first (timer, `undo`, `cancel` or `flush`)
//! decides its fate, so at most one of commit/undo ever runs.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UndoToken(u64);

struct PendingUndoable {
    token: UndoToken,
    description: String,
    commit: BoxFuture<'static, ()>,
    undo: BoxFuture<'static, ()>,
    timer: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct UndoState {
    next_token: u64,
    /// Oldest first
    entries: Vec<PendingUndoable>,
}

#[derive(Clone, Default)]
pub struct UndoQueue {
    state: Arc<Mutex<UndoState>>,
}

impl std::fmt::Debug for UndoQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UndoQueue")
            .field("pending", &self.pending())
            .finish()
    }
}

impl UndoQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a commit/undo pair. `commit` runs on its own after `delay`
    /// unless the entry is undone, cancelled or flushed first. Must be called
    /// from within a tokio runtime.
    pub fn schedule<C, U>(
        &self,
        description: impl Into<String>,
        commit: C,
        undo: U,
        delay: Duration,
    ) -> UndoToken
    where
        C: Future<Output = ()> + Send + 'static,
        U: Future<Output = ()> + Send + 'static,
    {
        let description = description.into();
        let mut state = self.lock_state();
        let token = UndoToken(state.next_token);
        state.next_token += 1;

        tracing::debug!("Scheduled {} to commit in {:?}", description, delay);

        let queue = self.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(entry) = queue.take(token) {
                tracing::debug!("Committing {}", entry.description);
                entry.commit.await;
            }
        });

        state.entries.push(PendingUndoable {
            token,
            description,
            commit: commit.boxed(),
            undo: undo.boxed(),
            timer: Some(timer),
        });
        token
    }

    /// Undo the most recently scheduled action that has not committed yet.
    /// Returns false if there is nothing to undo.
    pub async fn undo(&self) -> bool {
        let entry = self.lock_state().entries.pop();
        match entry {
            Some(entry) => {
                run_undo(entry).await;
                true
            }
            None => {
                tracing::debug!("Nothing to undo");
                false
            }
        }
    }

    /// Undo one specific action. Returns false if it already committed.
    pub async fn cancel(&self, token: UndoToken) -> bool {
        match self.take(token) {
            Some(entry) => {
                run_undo(entry).await;
                true
            }
            None => false,
        }
    }

    /// Commit everything still pending now, oldest first. Returns how many
    /// commits ran.
    pub async fn flush(&self) -> usize {
        let entries = std::mem::take(&mut self.lock_state().entries);
        let count = entries.len();
        for mut entry in entries {
            if let Some(timer) = entry.timer.take() {
                timer.abort();
            }
            tracing::debug!("Flushing {}", entry.description);
            entry.commit.await;
        }
        count
    }

    pub fn pending(&self) -> usize {
        self.lock_state().entries.len()
    }

    /// Descriptions of pending actions, oldest first.
    pub fn descriptions(&self) -> Vec<String> {
        self.lock_state()
            .entries
            .iter()
            .map(|entry| entry.description.clone())
            .collect()
    }

    fn take(&self, token: UndoToken) -> Option<PendingUndoable> {
        let mut state = self.lock_state();
        let index = state.entries.iter().position(|entry| entry.token == token)?;
        Some(state.entries.remove(index))
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, UndoState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

async fn run_undo(mut entry: PendingUndoable) {
    if let Some(timer) = entry.timer.take() {
        timer.abort();
    }
    tracing::debug!("Undoing {}", entry.description);
    entry.undo.await;
}
