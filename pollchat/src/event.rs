//! Notifications emitted by the sync core for the host application.

use pollchat_proto::ids::{MessageId, UserId};
use tokio::sync::mpsc;

use crate::error::SyncError;
use crate::pagination::LoadMode;

/// Something observable changed in the synchronized state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// A page of the active conversation was loaded.
    ConversationLoaded {
        /// Conversation peer.
        peer: UserId,
        /// How the page was combined.
        mode: LoadMode,
        /// Messages in the page.
        fetched: usize,
    },
    /// A poll or page merge changed the conversation.
    MessagesMerged {
        /// Conversation peer.
        peer: UserId,
        /// Newly inserted messages.
        inserted: usize,
        /// Pending messages replaced by their server copy.
        collapsed: usize,
    },
    /// An optimistic message received its server id.
    MessageConfirmed {
        /// The placeholder id it carried.
        synthetic: MessageId,
        /// The authoritative id.
        id: MessageId,
    },
    /// An optimistic message was withdrawn after a failed send.
    MessageRolledBack {
        /// The placeholder id it carried.
        synthetic: MessageId,
        /// Text restored to the composer.
        draft: String,
    },
    /// The contact list changed.
    ContactsUpdated {
        /// Entries now listed.
        count: usize,
    },
    /// A background poll failed; the next tick retries.
    PollFailed {
        /// What went wrong.
        error: SyncError,
    },
    /// The backend rejected the session credential.
    SessionInvalidated,
}

/// Send `event` without waiting. A full or closed channel drops it.
pub(crate) fn emit(tx: &mpsc::Sender<SyncEvent>, event: SyncEvent) {
    if let Err(e) = tx.try_send(event) {
        tracing::trace!(error = %e, "sync event dropped");
    }
}
