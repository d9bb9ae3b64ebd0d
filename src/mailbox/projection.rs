//! Threads to per-folder lists.

use std::collections::{BTreeMap, BTreeSet};

use crate::config::Config;
use crate::constants::{INBOX, TRASH};
use crate::error::ThreadingError;
use crate::mail::thread::MessageThreader;
use crate::mail::types::{Flags, Message};

/// One conversation as shown in a column: its messages newest first plus
/// attributes derived from all of them.
#[derive(Debug, Clone, PartialEq)]
pub struct Thread {
    /// Identity of the thread in a column: the canonical id of its most
    /// recent message
    pub hash: String,
    pub messages: Vec<Message>,
    /// No member is in the inbox
    pub archived: bool,
    pub starred: bool,
    pub unread: bool,
    /// Every member is flagged deleted
    pub deleted: bool,
    pub all_folder_names: BTreeSet<String>,
    pub all_flags: Flags,
}

impl Thread {
    /// Order `messages` newest first and derive the thread attributes.
    /// Returns `None` for an empty list.
    pub fn from_messages(mut messages: Vec<Message>) -> Option<Self> {
        messages.sort_by(|a, b| {
            b.date
                .cmp(&a.date)
                .then_with(|| a.account_message_id.cmp(&b.account_message_id))
        });

        let hash = messages.first()?.account_message_id.clone();

        let mut all_folder_names = BTreeSet::new();
        let mut all_flags = Flags::new();
        for message in &messages {
            all_folder_names.extend(message.folder_uids.keys().cloned());
            all_flags.extend(message.flags.iter().cloned());
        }

        Some(Self {
            hash,
            archived: !all_folder_names.contains(INBOX),
            starred: messages.iter().any(Message::is_flagged),
            unread: messages.iter().any(|m| !m.is_seen()),
            deleted: messages.iter().all(Message::is_deleted),
            all_folder_names,
            all_flags,
            messages,
        })
    }

    pub fn newest(&self) -> &Message {
        &self.messages[0]
    }

    pub fn account_key(&self) -> &str {
        &self.newest().account_key
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// UIDs of the members present in `folder`.
    pub fn uids_in(&self, folder: &str) -> Vec<u32> {
        self.messages
            .iter()
            .filter_map(|message| message.uid_in(folder))
            .collect()
    }

    /// Folder -> UIDs for every member, grouped by account.
    pub fn folder_message_uids(&self) -> BTreeMap<(String, String), Vec<u32>> {
        let mut grouped: BTreeMap<(String, String), Vec<u32>> = BTreeMap::new();
        for message in &self.messages {
            for (folder, &uid) in &message.folder_uids {
                grouped
                    .entry((message.account_key.clone(), folder.clone()))
                    .or_default()
                    .push(uid);
            }
        }
        grouped
    }

    /// Canonical ids of every member.
    pub fn message_ids(&self) -> Vec<String> {
        self.messages
            .iter()
            .map(|message| message.account_message_id.clone())
            .collect()
    }
}

/// Inputs to a projection pass that come from configuration.
#[derive(Debug, Clone, Default)]
pub struct ProjectionSettings {
    /// Folders shown as columns. Inbox threads only go to these.
    pub visible_folders: BTreeSet<String>,
    pub group_by_subject: bool,
}

impl ProjectionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            visible_folders: config.visible_folders().into_iter().collect(),
            group_by_subject: config.system.group_threads_by_subject,
        }
    }

    /// Folders a thread is listed under. A thread in the inbox is kept out
    /// of labels that have no column; if that leaves nothing, every folder
    /// it is in is used.
    pub fn target_folders<'t>(&self, thread: &'t Thread) -> Vec<&'t str> {
        let all = thread.all_folder_names.iter().map(String::as_str);

        if thread.all_folder_names.contains(INBOX) {
            let visible: Vec<&str> = all
                .clone()
                .filter(|folder| self.visible_folders.contains(*folder))
                .collect();
            if !visible.is_empty() {
                return visible;
            }
        }

        all.collect()
    }
}

/// Thread every message and assign the threads to folders. Each folder's
/// list is ordered by its threads' newest message, most recent first.
pub fn build_folder_threads(
    messages: &[&Message],
    settings: &ProjectionSettings,
) -> Result<BTreeMap<String, Vec<Thread>>, ThreadingError> {
    let threader = MessageThreader::new();
    let mut forest = threader.thread(messages)?;
    if settings.group_by_subject {
        threader.group_by_subject(&mut forest);
    }

    let mut folder_threads: BTreeMap<String, Vec<Thread>> = BTreeMap::new();
    for &container in forest.roots() {
        let members = forest
            .thread_messages(container)
            .into_iter()
            .cloned()
            .collect();
        let Some(thread) = Thread::from_messages(members) else {
            continue;
        };

        for folder in settings.target_folders(&thread) {
            folder_threads
                .entry(folder.to_string())
                .or_default()
                .push(thread.clone());
        }
    }

    for threads in folder_threads.values_mut() {
        sort_threads(threads);
    }

    Ok(folder_threads)
}

fn sort_threads(threads: &mut [Thread]) {
    threads.sort_by(|a, b| {
        b.newest()
            .date
            .cmp(&a.newest().date)
            .then_with(|| a.hash.cmp(&b.hash))
    });
}

/// The trash column only shows the members that are actually in the trash,
/// in the context of their thread.
pub fn trash_view(threads: Vec<Thread>) -> Vec<Thread> {
    threads
        .into_iter()
        .filter_map(|thread| {
            let trashed = thread
                .messages
                .into_iter()
                .filter(|message| message.folder_uids.contains_key(TRASH))
                .collect();
            Thread::from_messages(trashed)
        })
        .collect()
}
