//! Pure merge and reconciliation over an in-memory message list.
//!
//! Nothing here touches the network or locks; [`super::ConversationStore`]
//! calls these with its state already held.

use std::collections::HashSet;
use std::time::Duration;

use pollchat_proto::ids::MessageId;
use pollchat_proto::message::Message;

/// Result of [`merge_messages`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Messages added that matched nothing already held.
    pub inserted: usize,
    /// Pending messages replaced by their server copy, as
    /// `(synthetic id, server id)`.
    pub collapsed: Vec<(MessageId, MessageId)>,
    /// Incoming entries skipped because they did not carry a server id.
    pub ignored: usize,
}

impl MergeOutcome {
    /// `true` if the list was modified.
    #[must_use]
    pub fn changed(&self) -> bool {
        self.inserted > 0 || !self.collapsed.is_empty()
    }
}

/// Result of [`confirm_pending`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    /// The pending entry now carries the server id.
    Rewritten,
    /// The server copy was already held; the pending entry was dropped.
    AlreadyPresent,
    /// No pending entry with that id exists.
    Missing,
}

/// Display order: `created_at`, then id.
pub fn sort_messages(messages: &mut [Message]) {
    messages.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Merge `incoming` into `current`.
///
/// Incoming messages whose id is already held are skipped. A new server
/// message that matches a pending entry replaces it: by echoed client token
/// when the server provides one, otherwise by sender, receiver, body and a
/// creation time within `tolerance`. Everything else is inserted, and the
/// list is re-sorted if it changed.
pub fn merge_messages(
    current: &mut Vec<Message>,
    incoming: &[Message],
    tolerance: Duration,
) -> MergeOutcome {
    let mut outcome = MergeOutcome::default();
    let mut seen: HashSet<MessageId> = current.iter().map(|m| m.id).collect();

    for message in incoming {
        if !message.id.is_confirmed() {
            outcome.ignored += 1;
            continue;
        }
        if !seen.insert(message.id) {
            continue;
        }

        match find_pending_match(current, message, tolerance) {
            Some(index) => {
                let synthetic = current[index].id;
                current[index] = message.clone();
                outcome.collapsed.push((synthetic, message.id));
            }
            None => {
                current.push(message.clone());
                outcome.inserted += 1;
            }
        }
    }

    if outcome.changed() {
        sort_messages(current);
    }
    outcome
}

fn find_pending_match(current: &[Message], incoming: &Message, tolerance: Duration) -> Option<usize> {
    let mut pending = current
        .iter()
        .enumerate()
        .filter(|(_, m)| m.id.is_synthetic());

    if let Some(token) = &incoming.client_token {
        return pending
            .find(|(_, m)| m.client_token.as_ref() == Some(token))
            .map(|(i, _)| i);
    }

    pending
        .filter(|(_, m)| {
            m.sender_id == incoming.sender_id
                && m.receiver_id == incoming.receiver_id
                && m.body == incoming.body
                && m.created_at.abs_diff(&incoming.created_at) <= tolerance
        })
        .min_by_key(|(_, m)| m.created_at.abs_diff(&incoming.created_at))
        .map(|(i, _)| i)
}

/// Give the pending message `synthetic` its server id.
pub fn confirm_pending(
    current: &mut Vec<Message>,
    synthetic: MessageId,
    id: MessageId,
) -> Confirmation {
    let Some(index) = current.iter().position(|m| m.id == synthetic) else {
        return Confirmation::Missing;
    };

    if current.iter().any(|m| m.id == id) {
        current.remove(index);
        return Confirmation::AlreadyPresent;
    }

    current[index].id = id;
    sort_messages(current);
    Confirmation::Rewritten
}

/// Remove and return the pending message `synthetic`.
pub fn remove_pending(current: &mut Vec<Message>, synthetic: MessageId) -> Option<Message> {
    let index = current
        .iter()
        .position(|m| m.id == synthetic && m.id.is_synthetic())?;
    Some(current.remove(index))
}
