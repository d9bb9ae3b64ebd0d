//! User actions on threads.
//!
//! Star, delete, archive, trash, restore and move are optimistic: the local state changes at
//! once and the transport call is scheduled on the undo queue. Undoing
//! reverts the local change; a failed commit reverts it too and lands in the
//! error log.

use std::collections::BTreeMap;

use super::Engine;
use crate::config::Config;
use crate::constants::{ARCHIVE, INBOX, TRASH};
use crate::error::TransportError;
use crate::mail::transport::TransferKind;
use crate::mail::types::{DELETED, FLAGGED, SEEN};
use crate::mailbox::{MailboxMode, ProcessOptions, Thread};
use crate::request::{RequestCategory, RequestError, UndoToken};

/// (account, folder) -> uids
type FolderUids = BTreeMap<(String, String), Vec<u32>>;

impl Engine {
    /// Move or copy emails on the server. Moving a folder onto itself does
    /// nothing. Failures are recorded and returned; the store is not touched.
    pub async fn move_or_copy(
        &self,
        account: &str,
        uids: &[u32],
        from_folder: &str,
        to_folder: &str,
        kind: TransferKind,
    ) -> Result<(), TransportError> {
        if from_folder == to_folder {
            tracing::debug!("Not {}ing emails to the same folder!", kind.verb().to_lowercase());
            return Ok(());
        }

        let description = format!(
            "{} {} emails {}/{} -> {}/{}",
            kind.verb(),
            uids.len(),
            account,
            from_folder,
            account,
            to_folder
        );
        tracing::debug!("{}", description);

        let result = self
            .scheduler
            .run_tracked(
                RequestCategory::Push,
                description.clone(),
                self.transport
                    .move_or_copy(account, uids, from_folder, to_folder, kind),
            )
            .await;

        if let Err(e) = &result {
            self.scheduler.record_error(
                RequestError::new(description, e.clone()).with_location(account, from_folder),
            );
        }
        result
    }

    async fn push_flag(
        &self,
        account: &str,
        folder: &str,
        uids: &[u32],
        flag: &str,
        on: bool,
    ) -> Result<(), TransportError> {
        let description = format!(
            "{} {} on {} emails in {}/{}",
            if on { "Set" } else { "Clear" },
            flag,
            uids.len(),
            account,
            folder
        );

        let result = self
            .scheduler
            .run_tracked(
                RequestCategory::Push,
                description.clone(),
                self.transport.set_flag(account, folder, uids, flag, on),
            )
            .await;

        if let Err(e) = &result {
            self.scheduler.record_error(
                RequestError::new(description, e.clone()).with_location(account, folder),
            );
        }
        result
    }

    /// Set a flag locally on the given messages in whichever mailbox holds
    /// them, then re-project.
    async fn set_local_flag(&self, ids: &[String], flag: &str, on: bool) {
        let mut state = self.state.lock().await;
        state.main.store.set_flags_by_canonical_id(ids, flag, on);
        state.search.store.set_flags_by_canonical_id(ids, flag, on);
        let mode = state.active_mode();
        state.process(mode, &self.settings, ProcessOptions::default());
    }

    /// Mark every unread member read, locally and on the server. Not
    /// undoable.
    pub async fn mark_thread_read(&self, thread: &Thread) -> Result<(), TransportError> {
        let mut targets = FolderUids::new();
        let mut ids = Vec::new();
        for message in thread.messages.iter().filter(|m| !m.is_seen()) {
            ids.push(message.account_message_id.clone());
            for (folder, &uid) in &message.folder_uids {
                targets
                    .entry((message.account_key.clone(), folder.clone()))
                    .or_default()
                    .push(uid);
            }
        }

        if ids.is_empty() {
            return Ok(());
        }
        self.set_local_flag(&ids, SEEN, true).await;

        let mut first_error = None;
        for ((account, folder), uids) in &targets {
            if let Err(e) = self.push_flag(account, folder, uids, SEEN, true).await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Star or unstar the copies of a thread shown in `column`. The change
    /// shows at once and is pushed after the undo window.
    pub async fn star_thread(&self, thread: &Thread, column: &str, starred: bool) -> Option<UndoToken> {
        let verb = if starred { "Star" } else { "Unstar" };
        self.flag_thread_messages(thread, column, FLAGGED, starred, verb)
            .await
    }

    /// Flag the copies of a thread in `column` deleted, e.g. to empty them
    /// out of the trash. Undoable like starring.
    pub async fn delete_thread(&self, thread: &Thread, column: &str) -> Option<UndoToken> {
        self.flag_thread_messages(thread, column, DELETED, true, "Delete")
            .await
    }

    /// Set `flag` locally on the members present in `column` and push it to
    /// their `column` uids after the undo window. Only members whose flag
    /// actually changes are touched and reverted; a failed push reverts too.
    async fn flag_thread_messages(
        &self,
        thread: &Thread,
        column: &str,
        flag: &'static str,
        on: bool,
        verb: &str,
    ) -> Option<UndoToken> {
        let mut targets = FolderUids::new();
        let mut ids = Vec::new();
        for message in &thread.messages {
            if message.flags.contains(flag) == on {
                continue;
            }
            let Some(uid) = message.uid_in(column) else {
                continue;
            };
            ids.push(message.account_message_id.clone());
            targets
                .entry((message.account_key.clone(), column.to_string()))
                .or_default()
                .push(uid);
        }

        if ids.is_empty() {
            tracing::debug!("Thread {} in {} already has {}={}", thread.hash, column, flag, on);
            return None;
        }

        self.set_local_flag(&ids, flag, on).await;

        let commit = {
            let engine = self.clone();
            let ids = ids.clone();
            async move {
                let mut failed = false;
                for ((account, folder), uids) in &targets {
                    failed |= engine
                        .push_flag(account, folder, uids, flag, on)
                        .await
                        .is_err();
                }
                if failed {
                    engine.set_local_flag(&ids, flag, !on).await;
                }
            }
        };
        let undo = {
            let engine = self.clone();
            async move {
                engine.set_local_flag(&ids, flag, !on).await;
            }
        };

        Some(self.undo.schedule(
            format!("{} thread {} in {}", verb, thread.hash, column),
            commit,
            undo,
            self.config.undo_delay(),
        ))
    }

    /// Archive the copies in the inbox and in custom columns. Sent, drafts,
    /// trash and spam copies stay where they are.
    pub async fn archive_thread(&self, thread: &Thread, column: &str) -> Option<UndoToken> {
        self.move_thread_messages(thread, column, ARCHIVE, |folder| {
            folder == INBOX || !Config::is_always_visible(folder)
        })
        .await
    }

    pub async fn trash_thread(&self, thread: &Thread, column: &str) -> Option<UndoToken> {
        self.move_thread_messages(thread, column, TRASH, |folder| folder != TRASH)
            .await
    }

    /// Move the copies in `column` back to the inbox, e.g. out of the trash
    /// or spam.
    pub async fn restore_thread(&self, thread: &Thread, column: &str) -> Option<UndoToken> {
        self.move_thread_messages(thread, column, INBOX, |folder| folder == column)
            .await
    }

    /// Move every member of the thread, from whatever folder, to `target`.
    pub async fn move_thread(&self, thread: &Thread, column: &str, target: &str) -> Option<UndoToken> {
        self.move_thread_messages(thread, column, target, |_| true)
            .await
    }

    /// Hide the thread in `column` now and move the matching members after
    /// the undo window. Moved uids leave the store once the server accepted
    /// them.
    async fn move_thread_messages<F>(
        &self,
        thread: &Thread,
        column: &str,
        target: &str,
        folder_filter: F,
    ) -> Option<UndoToken>
    where
        F: Fn(&str) -> bool,
    {
        let moves: FolderUids = thread
            .folder_message_uids()
            .into_iter()
            .filter(|((_, folder), _)| folder != target && folder_filter(folder.as_str()))
            .collect();

        if moves.is_empty() {
            tracing::debug!("Nothing in thread {} to move to {}", thread.hash, target);
            return None;
        }

        self.state.lock().await.columns.hide_thread(column, &thread.hash);

        let hash = thread.hash.clone();
        let column = column.to_string();
        let target = target.to_string();

        let commit = {
            let engine = self.clone();
            let hash = hash.clone();
            let column = column.clone();
            let target = target.clone();
            async move {
                let mut moved = FolderUids::new();
                for ((account, folder), uids) in moves {
                    if engine
                        .move_or_copy(&account, &uids, &folder, &target, TransferKind::Move)
                        .await
                        .is_ok()
                    {
                        moved.insert((account, folder), uids);
                    }
                }
                engine.forget_moved(&moved).await;
                engine.show_thread(&column, &hash).await;
            }
        };
        let undo = {
            let engine = self.clone();
            let hash = hash.clone();
            let column = column.clone();
            async move {
                engine.show_thread(&column, &hash).await;
            }
        };

        Some(self.undo.schedule(
            format!("Move thread {} from {} to {}", hash, column, target),
            commit,
            undo,
            self.config.undo_delay(),
        ))
    }

    async fn show_thread(&self, column: &str, hash: &str) {
        self.state.lock().await.columns.show_thread(column, hash);
    }

    /// Drop moved uids from their source folders in every mailbox that holds
    /// them. The target folder picks them up on its next sync.
    async fn forget_moved(&self, moved: &FolderUids) {
        if moved.is_empty() {
            return;
        }

        let mut state = self.state.lock().await;
        for mode in [MailboxMode::Live, MailboxMode::Search] {
            let (mailbox, _) = state.parts(mode);
            for ((account, folder), uids) in moved {
                let present: Vec<u32> = uids
                    .iter()
                    .copied()
                    .filter(|&uid| mailbox.store.get_by_uid(account, folder, uid).is_some())
                    .collect();
                if !present.is_empty() {
                    mailbox.store.delete_messages(account, folder, &present);
                }
            }
        }

        let mode = state.active_mode();
        state.process(mode, &self.settings, ProcessOptions::default());
    }

    /// Take back the most recent pending action.
    pub async fn undo(&self) -> bool {
        self.undo.undo().await
    }

    /// Take back one specific pending action.
    pub async fn cancel(&self, token: UndoToken) -> bool {
        self.undo.cancel(token).await
    }

    /// Commit every pending action now, e.g. before shutting down.
    pub async fn flush_pending(&self) -> usize {
        let flushed = self.undo.flush().await;
        if flushed > 0 {
            tracing::info!("Committed {} pending actions", flushed);
        }
        flushed
    }

    pub fn pending_actions(&self) -> usize {
        self.undo.pending()
    }
}
