//! Canonical, account-merged message set.
//!
//! One `Message` per `account_message_id`, plus an `(account, folder) -> uid`
//! index used to translate server UIDs back into canonical messages. Every
//! method here is synchronous and only touches these two maps.

use std::collections::{BTreeMap, HashMap};

use indexmap::IndexMap;

use crate::mail::types::{FetchedEmail, Message, SEEN, account_message_id};

type UidIndex = BTreeMap<u32, String>;

#[derive(Debug, Default)]
pub struct MailboxStore {
    /// account_message_id -> message
    emails: IndexMap<String, Message>,
    /// account -> folder -> uid -> account_message_id
    folder_index: HashMap<String, HashMap<String, UidIndex>>,
}

impl MailboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.emails.clear();
        self.folder_index.clear();
    }

    pub fn len(&self) -> usize {
        self.emails.len()
    }

    pub fn is_empty(&self) -> bool {
        self.emails.is_empty()
    }

    pub fn get(&self, account_message_id: &str) -> Option<&Message> {
        self.emails.get(account_message_id)
    }

    pub fn get_by_uid(&self, account: &str, folder: &str, uid: u32) -> Option<&Message> {
        let id = self.uid_index(account, folder)?.get(&uid)?;
        self.emails.get(id)
    }

    /// All canonical messages, in first-seen order.
    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.emails.values()
    }

    /// UIDs in a folder whose message is not marked seen.
    pub fn unread_uids(&self, account: &str, folder: &str) -> Vec<u32> {
        let Some(index) = self.uid_index(account, folder) else {
            return Vec::new();
        };
        index
            .iter()
            .filter(|(_, id)| self.emails.get(*id).is_some_and(|m| !m.is_seen()))
            .map(|(&uid, _)| uid)
            .collect()
    }

    fn uid_index(&self, account: &str, folder: &str) -> Option<&UidIndex> {
        self.folder_index.get(account)?.get(folder)
    }

    fn uid_index_mut(&mut self, account: &str, folder: &str) -> &mut UidIndex {
        self.folder_index
            .entry(account.to_string())
            .or_default()
            .entry(folder.to_string())
            .or_default()
    }

    /// Merge a batch fetched from one account/folder. Emails already known
    /// (by account-scoped message id) only gain the folder's UID; their other
    /// folders and any local flag changes are kept. Returns the number of new
    /// canonical messages.
    pub fn add_messages(&mut self, account: &str, folder: &str, emails: Vec<FetchedEmail>) -> usize {
        tracing::debug!("Adding {} emails to {}/{}", emails.len(), account, folder);

        let mut added = 0;
        for email in emails {
            let uid = email.uid;
            let incoming = Message::from_fetched(account, folder, email);
            let id = incoming.account_message_id.clone();

            // A UID reused for a different message means the old mapping is stale
            if let Some(previous) = self.uid_index(account, folder).and_then(|i| i.get(&uid))
                && *previous != id
            {
                let previous = previous.clone();
                self.detach_folder(&previous, folder);
            }

            match self.emails.get_mut(&id) {
                Some(existing) => {
                    let stale_uid = existing
                        .folder_uids
                        .insert(folder.to_string(), uid)
                        .filter(|&old| old != uid);
                    if let Some(old) = stale_uid {
                        let index = self.uid_index_mut(account, folder);
                        if index.get(&old) == Some(&id) {
                            index.remove(&old);
                        }
                    }
                }
                None => {
                    self.emails.insert(id.clone(), incoming);
                    added += 1;
                }
            }

            self.uid_index_mut(account, folder).insert(uid, id);
        }
        added
    }

    /// Remove UIDs from one account/folder. A message that ends up in no
    /// folder at all leaves the store. Unknown UIDs are logged and skipped:
    /// sync results can race with local deletes. Returns the number of UIDs
    /// that were found.
    pub fn delete_messages(&mut self, account: &str, folder: &str, uids: &[u32]) -> usize {
        tracing::debug!("Deleting {} emails from {}/{}", uids.len(), account, folder);

        let mut deleted = 0;
        for &uid in uids {
            let removed = self
                .folder_index
                .get_mut(account)
                .and_then(|folders| folders.get_mut(folder))
                .and_then(|index| index.remove(&uid));

            let Some(id) = removed else {
                tracing::warn!(
                    "Email not found - already deleted?: {}/{}/{}",
                    account,
                    folder,
                    uid
                );
                continue;
            };

            self.detach_folder(&id, folder);
            deleted += 1;
        }
        deleted
    }

    /// Drop `folder` from a message's memberships, removing the message once
    /// it is in no folder.
    fn detach_folder(&mut self, account_message_id: &str, folder: &str) {
        let Some(message) = self.emails.get_mut(account_message_id) else {
            return;
        };
        message.folder_uids.remove(folder);
        if message.folder_uids.is_empty() {
            self.emails.swap_remove(account_message_id);
        }
    }

    /// Set or clear a flag on messages addressed by folder UID. Returns how
    /// many messages changed.
    pub fn set_flags_for_uids(
        &mut self,
        account: &str,
        folder: &str,
        uids: &[u32],
        flag: &str,
        on: bool,
    ) -> usize {
        let ids: Vec<String> = match self.uid_index(account, folder) {
            Some(index) => uids.iter().filter_map(|uid| index.get(uid).cloned()).collect(),
            None => Vec::new(),
        };
        if ids.len() != uids.len() {
            tracing::warn!(
                "{} of {} uids unknown in {}/{}",
                uids.len() - ids.len(),
                uids.len(),
                account,
                folder
            );
        }
        self.set_flags_by_canonical_id(&ids, flag, on)
    }

    /// Set or clear a flag on messages addressed by canonical id.
    pub fn set_flags_by_canonical_id<S: AsRef<str>>(&mut self, ids: &[S], flag: &str, on: bool) -> usize {
        let mut changed = 0;
        for id in ids {
            match self.emails.get_mut(id.as_ref()) {
                Some(message) => {
                    if message.set_flag(flag, on) {
                        changed += 1;
                    }
                }
                None => tracing::debug!("Cannot flag unknown message {}", id.as_ref()),
            }
        }
        changed
    }

    /// Mark messages read locally. Returns how many changed.
    pub fn mark_read_by_uids(&mut self, account: &str, folder: &str, uids: &[u32]) -> usize {
        self.set_flags_for_uids(account, folder, uids, SEEN, true)
    }

    /// Whether a transport message id is known for `account`.
    pub fn contains(&self, account: &str, message_id: &str) -> bool {
        self.emails
            .contains_key(&account_message_id(account, message_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::types::FLAGGED;
    use crate::testing::fetched;

    fn assert_invariants(store: &MailboxStore) {
        for message in store.messages() {
            assert!(
                !message.folder_uids.is_empty(),
                "{} has no folders",
                message.account_message_id
            );
        }
        let mut ids: Vec<&str> = store
            .messages()
            .map(|m| m.account_message_id.as_str())
            .collect();
        let total = ids.len();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), total, "duplicate canonical ids");
    }

    #[test]
    fn test_same_message_in_two_folders_is_merged() {
        let mut store = MailboxStore::new();
        store.add_messages("acct1", "inbox", vec![fetched(5, "m@x", 1000)]);
        store.add_messages("acct1", "archive", vec![fetched(5, "m@x", 1000)]);

        assert_eq!(store.len(), 1);
        let message = store.get("acct1-m@x").unwrap();
        assert_eq!(
            message.folder_uids,
            BTreeMap::from([("archive".to_string(), 5), ("inbox".to_string(), 5)])
        );
    }

    #[test]
    fn test_delete_from_each_folder_removes_message() {
        let mut store = MailboxStore::new();
        store.add_messages("acct1", "inbox", vec![fetched(5, "m@x", 1000)]);
        store.add_messages("acct1", "archive", vec![fetched(5, "m@x", 1000)]);

        assert_eq!(store.delete_messages("acct1", "inbox", &[5]), 1);
        let message = store.get("acct1-m@x").unwrap();
        assert_eq!(message.folder_uids.keys().collect::<Vec<_>>(), vec!["archive"]);
        assert!(store.get_by_uid("acct1", "inbox", 5).is_none());

        assert_eq!(store.delete_messages("acct1", "archive", &[5]), 1);
        assert!(store.get("acct1-m@x").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_delete_unknown_uid_is_tolerated() {
        let mut store = MailboxStore::new();
        store.add_messages("acct1", "inbox", vec![fetched(5, "m@x", 1000)]);
        assert_eq!(store.delete_messages("acct1", "inbox", &[99]), 0);
        assert_eq!(store.delete_messages("other", "inbox", &[5]), 0);
        assert_eq!(store.len(), 1);

        store.delete_messages("acct1", "inbox", &[5]);
        // Second delete of the same uid races harmlessly
        assert_eq!(store.delete_messages("acct1", "inbox", &[5]), 0);
    }

    #[test]
    fn test_merge_preserves_local_flags() {
        let mut store = MailboxStore::new();
        store.add_messages("acct1", "inbox", vec![fetched(5, "m@x", 1000)]);
        store.set_flags_for_uids("acct1", "inbox", &[5], FLAGGED, true);

        // The archive copy arrives without the flag
        store.add_messages("acct1", "archive", vec![fetched(9, "m@x", 1000)]);
        let message = store.get("acct1-m@x").unwrap();
        assert!(message.is_flagged());
        assert_eq!(message.uid_in("archive"), Some(9));
        assert_eq!(store.get_by_uid("acct1", "archive", 9).unwrap().account_message_id, "acct1-m@x");
    }

    #[test]
    fn test_same_message_id_in_two_accounts_is_two_messages() {
        let mut store = MailboxStore::new();
        store.add_messages("acct1", "inbox", vec![fetched(5, "m@x", 1000)]);
        store.add_messages("acct2", "inbox", vec![fetched(5, "m@x", 1000)]);
        assert_eq!(store.len(), 2);
        assert!(store.contains("acct2", "m@x"));
    }

    #[test]
    fn test_flag_mutation_is_idempotent() {
        let mut store = MailboxStore::new();
        store.add_messages("acct1", "inbox", vec![fetched(1, "a@x", 1000), fetched(2, "b@x", 2000)]);

        assert_eq!(store.mark_read_by_uids("acct1", "inbox", &[1, 2]), 2);
        assert_eq!(store.mark_read_by_uids("acct1", "inbox", &[1, 2]), 0);
        assert!(store.unread_uids("acct1", "inbox").is_empty());

        assert_eq!(store.set_flags_by_canonical_id(&["acct1-a@x"], SEEN, false), 1);
        assert_eq!(store.unread_uids("acct1", "inbox"), vec![1]);
    }

    #[test]
    fn test_uid_change_replaces_stale_index_entry() {
        let mut store = MailboxStore::new();
        store.add_messages("acct1", "inbox", vec![fetched(5, "m@x", 1000)]);
        store.add_messages("acct1", "inbox", vec![fetched(6, "m@x", 1000)]);

        assert!(store.get_by_uid("acct1", "inbox", 5).is_none());
        assert_eq!(store.get("acct1-m@x").unwrap().uid_in("inbox"), Some(6));
        store.delete_messages("acct1", "inbox", &[6]);
        assert!(store.is_empty());
    }

    #[test]
    fn test_reused_uid_detaches_previous_message() {
        let mut store = MailboxStore::new();
        store.add_messages("acct1", "inbox", vec![fetched(5, "old@x", 1000)]);
        store.add_messages("acct1", "inbox", vec![fetched(5, "new@x", 2000)]);

        assert!(store.get("acct1-old@x").is_none());
        assert_eq!(store.get_by_uid("acct1", "inbox", 5).unwrap().message_id, "new@x");
        assert_invariants(&store);
    }

    #[test]
    fn test_invariants_hold_over_mixed_operations() {
        let folders = ["inbox", "archive", "todo"];
        let mut store = MailboxStore::new();
        // Deterministic pseudo-random walk over adds and deletes
        let mut seed: u64 = 0x2545_f491;
        for step in 0..500 {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let folder = folders[(seed >> 33) as usize % folders.len()];
            let uid = ((seed >> 40) % 12) as u32;
            let message_id = format!("m{}@x", (seed >> 20) % 8);

            if step % 3 == 0 {
                store.delete_messages("acct1", folder, &[uid]);
            } else {
                store.add_messages("acct1", folder, vec![fetched(uid, &message_id, 1000)]);
            }
            assert_invariants(&store);
        }
    }
}
