//! Reference-based (JWZ style) message threading.
//!
//! Containers live in an arena and refer to each other by index: a parent
//! owns the ordered list of its children and every child stores the index of
//! its single parent. Containers without a message are placeholders for
//! ancestors that were referenced but never fetched.

use std::collections::HashMap;

use indexmap::IndexMap;

use super::types::Message;
use crate::error::ThreadingError;

pub type ContainerId = usize;

#[derive(Debug, Clone, Default)]
struct Container {
    /// Index into `ThreadForest::messages`
    message: Option<usize>,
    parent: Option<ContainerId>,
    children: Vec<ContainerId>,
}

/// Result of one threading pass. `roots()` are the top-level threads.
#[derive(Debug, Clone)]
pub struct ThreadForest<'a> {
    messages: Vec<&'a Message>,
    containers: Vec<Container>,
    root: ContainerId,
}

impl<'a> ThreadForest<'a> {
    fn new() -> Self {
        Self {
            messages: Vec::new(),
            containers: vec![Container::default()],
            root: 0,
        }
    }

    fn create_container(&mut self) -> ContainerId {
        self.containers.push(Container::default());
        self.containers.len() - 1
    }

    /// The synthetic root. It never carries a message.
    pub fn root(&self) -> ContainerId {
        self.root
    }

    /// Top-level containers, one per thread.
    pub fn roots(&self) -> &[ContainerId] {
        &self.containers[self.root].children
    }

    pub fn children(&self, id: ContainerId) -> &[ContainerId] {
        &self.containers[id].children
    }

    pub fn parent(&self, id: ContainerId) -> Option<ContainerId> {
        self.containers[id].parent
    }

    pub fn message(&self, id: ContainerId) -> Option<&'a Message> {
        self.containers[id].message.map(|idx| self.messages[idx])
    }

    pub fn is_placeholder(&self, id: ContainerId) -> bool {
        self.containers[id].message.is_none()
    }

    /// True if `other` is `id` or sits anywhere below it.
    pub fn has_descendant(&self, id: ContainerId, other: ContainerId) -> bool {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if current == other {
                return true;
            }
            stack.extend_from_slice(&self.containers[current].children);
        }
        false
    }

    /// All messages below `id` in pre-order, excluding `id` itself.
    pub fn flatten_children(&self, id: ContainerId) -> Vec<&'a Message> {
        let mut messages = Vec::new();
        let mut stack: Vec<ContainerId> = self.containers[id].children.iter().rev().copied().collect();
        while let Some(current) = stack.pop() {
            if let Some(message) = self.message(current) {
                messages.push(message);
            }
            stack.extend(self.containers[current].children.iter().rev());
        }
        messages
    }

    /// The container's own message (if any) followed by its descendants.
    pub fn thread_messages(&self, id: ContainerId) -> Vec<&'a Message> {
        let mut messages: Vec<&'a Message> = self.message(id).into_iter().collect();
        messages.extend(self.flatten_children(id));
        messages
    }

    /// Re-parent `child` under `parent`. Callers must rule out cycles first.
    fn add_child(&mut self, parent: ContainerId, child: ContainerId) {
        if let Some(old_parent) = self.containers[child].parent {
            self.remove_child(old_parent, child);
        }
        self.containers[parent].children.push(child);
        self.containers[child].parent = Some(parent);
    }

    fn remove_child(&mut self, parent: ContainerId, child: ContainerId) {
        self.containers[parent].children.retain(|&c| c != child);
        self.containers[child].parent = None;
    }

    /// Like `add_child` but refuses links that would make a container its
    /// own ancestor.
    fn try_add_child(&mut self, parent: ContainerId, child: ContainerId) -> bool {
        if self.has_descendant(child, parent) {
            tracing::debug!("Refusing to link container {} under its descendant {}", child, parent);
            return false;
        }
        self.add_child(parent, child);
        true
    }

    fn promote_children(&mut self, parent: ContainerId, container: ContainerId) {
        let children = self.containers[container].children.clone();
        for &child in children.iter().rev() {
            self.add_child(parent, child);
        }
        self.remove_child(parent, container);
    }

    /// Drop empty placeholders and hoist the children of non-empty ones,
    /// post-order. Placeholders directly under the root with several children
    /// stand for a missing common ancestor and are kept.
    fn prune_empties(&mut self, parent: ContainerId) {
        let mut i = self.containers[parent].children.len();
        while i > 0 {
            i -= 1;
            let Some(&container) = self.containers[parent].children.get(i) else {
                continue;
            };
            self.prune_empties(container);

            if self.containers[container].message.is_some() {
                continue;
            }

            let child_count = self.containers[container].children.len();
            if child_count == 0 {
                self.remove_child(parent, container);
            } else if parent == self.root && child_count > 1 {
                // keep
            } else {
                self.promote_children(parent, container);
            }
        }
    }

    /// Message representing a top-level container: its own, or its first
    /// child's when it is a placeholder.
    fn representative(&self, id: ContainerId) -> Option<(ContainerId, &'a Message)> {
        if let Some(message) = self.message(id) {
            return Some((id, message));
        }
        let first = *self.containers[id].children.first()?;
        self.message(first).map(|message| (first, message))
    }
}

/// Builds a `ThreadForest` from a flat message list. Pure: the input is only
/// read.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageThreader;

impl MessageThreader {
    pub fn new() -> Self {
        Self
    }

    pub fn thread<'a>(&self, messages: &[&'a Message]) -> Result<ThreadForest<'a>, ThreadingError> {
        let mut forest = ThreadForest::new();
        // Insertion ordered so repeated passes over the same input produce
        // the same forest.
        let mut id_table: IndexMap<&'a str, ContainerId> = IndexMap::new();

        for &message in messages {
            let own = container_for(&mut forest, &mut id_table, &message.account_message_id);

            if forest.containers[own].message.is_some() {
                return Err(ThreadingError::DuplicateMessageId(
                    message.account_message_id.clone(),
                ));
            }
            forest.containers[own].message = Some(forest.messages.len());
            forest.messages.push(message);

            let mut prev: Option<ContainerId> = None;
            for reference in &message.references {
                let container = container_for(&mut forest, &mut id_table, reference);

                if let Some(parent) = prev {
                    if forest.containers[container].parent.is_none()
                        && !forest.has_descendant(container, parent)
                    {
                        forest.add_child(parent, container);
                    } else {
                        tracing::trace!(
                            "Skipping reference link {} in {}",
                            reference,
                            message.account_message_id
                        );
                    }
                }

                prev = Some(container);
            }

            // A message's own references decide its parent, replacing any
            // link made earlier through another message's chain.
            if let Some(parent) = prev
                && !forest.try_add_child(parent, own)
            {
                tracing::debug!(
                    "Ignoring cyclic references on {}",
                    message.account_message_id
                );
            }
        }

        let root = forest.root;
        for &container in id_table.values() {
            if forest.containers[container].parent.is_none() {
                forest.add_child(root, container);
            }
        }

        forest.prune_empties(root);
        Ok(forest)
    }

    /// Merge top-level threads that share a normalized subject within one
    /// account. Originals win over replies and real messages over
    /// placeholders; when neither side wins both go under a new placeholder.
    pub fn group_by_subject(&self, forest: &mut ThreadForest<'_>) {
        let root = forest.root;
        let top_level: Vec<ContainerId> = forest.roots().to_vec();
        let mut subject_table: HashMap<String, ContainerId> = HashMap::new();

        for &container in &top_level {
            let Some((candidate, message)) = forest.representative(container) else {
                continue;
            };
            let Some(subject) = normalize_subject(&message.account_key, &message.subject) else {
                continue;
            };

            match subject_table.get(&subject).copied() {
                None => {
                    subject_table.insert(subject, candidate);
                }
                Some(existing) => {
                    let replace = match (forest.message(existing), forest.message(candidate)) {
                        (Some(_), None) => true,
                        (Some(existing_msg), Some(candidate_msg)) => {
                            is_reply_or_forward(&existing_msg.subject)
                                && !is_reply_or_forward(&candidate_msg.subject)
                        }
                        _ => false,
                    };
                    if replace {
                        subject_table.insert(subject, candidate);
                    }
                }
            }
        }

        for &container in &top_level {
            let Some((_, message)) = forest.representative(container) else {
                continue;
            };
            let Some(subject) = normalize_subject(&message.account_key, &message.subject) else {
                continue;
            };
            let Some(&matched) = subject_table.get(&subject) else {
                continue;
            };
            if matched == container
                || forest.has_descendant(container, matched)
                || forest.has_descendant(matched, container)
            {
                continue;
            }

            match (forest.message(matched), forest.message(container)) {
                (None, None) => {
                    let children = forest.containers[container].children.clone();
                    for child in children {
                        forest.add_child(matched, child);
                    }
                    if let Some(parent) = forest.containers[container].parent {
                        forest.remove_child(parent, container);
                    }
                }
                (None, Some(_)) => {
                    forest.add_child(matched, container);
                }
                (Some(matched_msg), Some(container_msg))
                    if !is_reply_or_forward(&matched_msg.subject)
                        && is_reply_or_forward(&container_msg.subject) =>
                {
                    forest.add_child(matched, container);
                }
                _ => {
                    let placeholder = forest.create_container();
                    forest.add_child(placeholder, matched);
                    forest.add_child(placeholder, container);
                    forest.add_child(root, placeholder);
                    subject_table.insert(subject, placeholder);
                }
            }
        }
    }
}

fn container_for<'a>(
    forest: &mut ThreadForest<'a>,
    id_table: &mut IndexMap<&'a str, ContainerId>,
    id: &'a str,
) -> ContainerId {
    if let Some(&container) = id_table.get(id) {
        return container;
    }
    let container = forest.create_container();
    id_table.insert(id, container);
    container
}

/// Reply/forward prefixes, longest first so "fwd" wins over "fw".
/// "aw" (German) and "sv" (Swedish) are common localized replies.
const REPLY_PREFIXES: [&str; 5] = ["fwd", "fw", "re", "aw", "sv"];

/// Strip one leading `Re:`/`Fwd:` style token, including counted forms like
/// `Re[2]:`.
fn strip_reply_token(s: &str) -> Option<&str> {
    for prefix in REPLY_PREFIXES {
        let matches_prefix = s
            .get(..prefix.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(prefix));
        if !matches_prefix {
            continue;
        }

        let mut rest = &s[prefix.len()..];
        if let Some(counted) = rest.strip_prefix('[') {
            let Some(end) = counted.find(']') else {
                continue;
            };
            if !counted[..end].chars().all(|c| c.is_ascii_digit()) {
                continue;
            }
            rest = &counted[end + 1..];
        }

        if let Some(rest) = rest.strip_prefix(':') {
            return Some(rest);
        }
    }
    None
}

pub fn is_reply_or_forward(subject: &str) -> bool {
    strip_reply_token(subject.trim_start()).is_some()
}

/// Subject grouping key: account plus the lowercased subject without any
/// leading reply/forward tokens. `None` for subjects that are empty once
/// stripped.
pub fn normalize_subject(account_key: &str, subject: &str) -> Option<String> {
    let mut s = subject.trim();
    while let Some(rest) = strip_reply_token(s) {
        s = rest.trim_start();
    }
    let s = s.trim_end();
    if s.is_empty() {
        return None;
    }
    Some(format!("{}-{}", account_key, s.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::message;

    fn ids(messages: &[&Message]) -> Vec<String> {
        let mut ids: Vec<String> = messages
            .iter()
            .map(|m| m.account_message_id.clone())
            .collect();
        ids.sort();
        ids
    }

    fn groups(forest: &ThreadForest<'_>) -> Vec<Vec<String>> {
        let mut groups: Vec<Vec<String>> = forest
            .roots()
            .iter()
            .map(|&root| ids(&forest.thread_messages(root)))
            .collect();
        groups.sort();
        groups
    }

    fn assert_acyclic(forest: &ThreadForest<'_>) {
        for id in 0..forest.containers.len() {
            let mut seen = vec![id];
            let mut current = forest.parent(id);
            while let Some(parent) = current {
                assert!(!seen.contains(&parent), "container {} is its own ancestor", id);
                seen.push(parent);
                current = forest.parent(parent);
            }
        }
    }

    #[test]
    fn test_normalize_subject() {
        assert_eq!(normalize_subject("x", "Hello").as_deref(), Some("x-hello"));
        assert_eq!(normalize_subject("x", "Re: Hello").as_deref(), Some("x-hello"));
        assert_eq!(normalize_subject("x", "RE: Hello").as_deref(), Some("x-hello"));
        assert_eq!(normalize_subject("x", "Fwd: Hello").as_deref(), Some("x-hello"));
        assert_eq!(normalize_subject("x", "Re: Re: Hello").as_deref(), Some("x-hello"));
        assert_eq!(normalize_subject("x", "Re[2]: Fwd: Hello").as_deref(), Some("x-hello"));
        assert_eq!(normalize_subject("x", "  Re:  Hello  ").as_deref(), Some("x-hello"));
        assert_eq!(normalize_subject("x", "Re:").as_deref(), None);
        // Words that merely start with "re" are not reply tokens
        assert_eq!(normalize_subject("x", "Report").as_deref(), Some("x-report"));
    }

    #[test]
    fn test_is_reply_or_forward() {
        assert!(is_reply_or_forward("Re: hi"));
        assert!(is_reply_or_forward("FW: hi"));
        assert!(is_reply_or_forward("re[3]: hi"));
        assert!(!is_reply_or_forward("Reminder: hi"));
        assert!(!is_reply_or_forward("hi"));
    }

    #[test]
    fn test_reference_chain_forms_one_thread() {
        let a = message("x", "a", &[], 1000);
        let b = message("x", "b", &["a"], 2000);
        let c = message("x", "c", &["a", "b"], 3000);

        let forest = MessageThreader::new().thread(&[&c, &a, &b]).unwrap();
        assert_eq!(groups(&forest), vec![vec!["x-a", "x-b", "x-c"]]);

        let top = forest.roots()[0];
        assert_eq!(forest.message(top).unwrap().account_message_id, "x-a");
        let child = forest.children(top)[0];
        assert_eq!(forest.message(child).unwrap().account_message_id, "x-b");
        assert_eq!(
            forest.message(forest.children(child)[0]).unwrap().account_message_id,
            "x-c"
        );
    }

    #[test]
    fn test_unrelated_messages_stay_separate() {
        let a = message("x", "a", &[], 1000);
        let b = message("x", "b", &[], 2000);
        let forest = MessageThreader::new().thread(&[&a, &b]).unwrap();
        assert_eq!(forest.roots().len(), 2);
    }

    #[test]
    fn test_references_are_account_scoped() {
        let a = message("x", "a", &[], 1000);
        let b = message("y", "b", &["a"], 2000);
        let forest = MessageThreader::new().thread(&[&a, &b]).unwrap();
        assert_eq!(forest.roots().len(), 2);
    }

    #[test]
    fn test_duplicate_id_is_an_error() {
        let a = message("x", "a", &[], 1000);
        let err = MessageThreader::new().thread(&[&a, &a]).unwrap_err();
        assert_eq!(err, ThreadingError::DuplicateMessageId("x-a".to_string()));
    }

    #[test]
    fn test_self_reference_is_ignored() {
        let a = message("x", "a", &["a"], 1000);
        let forest = MessageThreader::new().thread(&[&a]).unwrap();
        assert_eq!(groups(&forest), vec![vec!["x-a"]]);
        assert_acyclic(&forest);
    }

    #[test]
    fn test_mutual_references_do_not_cycle() {
        let a = message("x", "a", &["b"], 1000);
        let b = message("x", "b", &["a"], 2000);
        let forest = MessageThreader::new().thread(&[&a, &b]).unwrap();
        assert_eq!(groups(&forest), vec![vec!["x-a", "x-b"]]);
        assert_acyclic(&forest);
    }

    #[test]
    fn test_adversarial_chains_stay_acyclic() {
        let a = message("x", "a", &["c", "b", "a"], 1000);
        let b = message("x", "b", &["a", "c"], 2000);
        let c = message("x", "c", &["b", "a", "c", "b"], 3000);
        let forest = MessageThreader::new().thread(&[&a, &b, &c]).unwrap();
        assert_acyclic(&forest);
        assert_eq!(groups(&forest), vec![vec!["x-a", "x-b", "x-c"]]);
    }

    #[test]
    fn test_missing_common_ancestor_is_kept_at_root() {
        let a = message("x", "a", &["missing"], 1000);
        let b = message("x", "b", &["missing"], 2000);
        let forest = MessageThreader::new().thread(&[&a, &b]).unwrap();

        assert_eq!(forest.roots().len(), 1);
        let top = forest.roots()[0];
        assert!(forest.is_placeholder(top));
        assert_eq!(forest.children(top).len(), 2);
        assert_eq!(groups(&forest), vec![vec!["x-a", "x-b"]]);
    }

    #[test]
    fn test_single_child_placeholder_is_promoted() {
        let a = message("x", "a", &["missing"], 1000);
        let forest = MessageThreader::new().thread(&[&a]).unwrap();
        assert_eq!(forest.roots().len(), 1);
        assert!(!forest.is_placeholder(forest.roots()[0]));
    }

    #[test]
    fn test_nested_placeholder_is_promoted() {
        // a -> (missing) -> b,c : the placeholder is not at the root, so its
        // children move up under a
        let a = message("x", "a", &[], 1000);
        let b = message("x", "b", &["a", "missing"], 2000);
        let c = message("x", "c", &["a", "missing"], 3000);
        let forest = MessageThreader::new().thread(&[&a, &b, &c]).unwrap();

        let top = forest.roots()[0];
        assert_eq!(forest.roots().len(), 1);
        assert_eq!(forest.children(top).len(), 2);
        assert!(forest.children(top).iter().all(|&c| !forest.is_placeholder(c)));
    }

    #[test]
    fn test_threading_is_idempotent() {
        let a = message("x", "a", &[], 1000);
        let b = message("x", "b", &["a"], 2000);
        let c = message("x", "c", &["missing"], 3000);
        let d = message("x", "d", &["missing"], 4000);
        let input = [&a, &b, &c, &d];

        let first = MessageThreader::new().thread(&input).unwrap();
        let second = MessageThreader::new().thread(&input).unwrap();
        assert_eq!(groups(&first), groups(&second));
    }

    #[test]
    fn test_group_by_subject_prefers_original() {
        let mut original = message("x", "a", &[], 1000);
        original.subject = "Lunch".to_string();
        let mut reply = message("x", "b", &[], 2000);
        reply.subject = "Re: lunch".to_string();
        let mut other = message("x", "c", &[], 3000);
        other.subject = "Something else".to_string();

        let threader = MessageThreader::new();
        let mut forest = threader.thread(&[&reply, &original, &other]).unwrap();
        threader.group_by_subject(&mut forest);

        assert_eq!(groups(&forest), vec![vec!["x-a", "x-b"], vec!["x-c"]]);
        let lunch = forest
            .roots()
            .iter()
            .copied()
            .find(|&r| forest.thread_messages(r).len() == 2)
            .unwrap();
        assert_eq!(forest.message(lunch).unwrap().account_message_id, "x-a");
        assert_acyclic(&forest);
    }

    #[test]
    fn test_group_by_subject_without_winner_creates_placeholder() {
        let mut first = message("x", "a", &[], 1000);
        first.subject = "Status".to_string();
        let mut second = message("x", "b", &[], 2000);
        second.subject = "status".to_string();

        let threader = MessageThreader::new();
        let mut forest = threader.thread(&[&first, &second]).unwrap();
        threader.group_by_subject(&mut forest);

        assert_eq!(forest.roots().len(), 1);
        assert!(forest.is_placeholder(forest.roots()[0]));
        assert_eq!(groups(&forest), vec![vec!["x-a", "x-b"]]);
    }

    #[test]
    fn test_group_by_subject_keeps_accounts_apart() {
        let mut first = message("x", "a", &[], 1000);
        first.subject = "Status".to_string();
        let mut second = message("y", "b", &[], 2000);
        second.subject = "Status".to_string();

        let threader = MessageThreader::new();
        let mut forest = threader.thread(&[&first, &second]).unwrap();
        threader.group_by_subject(&mut forest);
        assert_eq!(forest.roots().len(), 2);
    }
}
