//! The active conversation: a deduplicated, time-ordered message list.
//!
//! [`ConversationStore`] owns the message set for the selected peer. Page
//! loads, poll merges, optimistic inserts and reconciliation all go through
//! one mutex, which is never held across a request. Every fetch is tagged
//! with the conversation generation it was issued under, and results that
//! come back after a peer switch or reset are dropped.

pub mod merge;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use pollchat_proto::api::MessageQuery;
use pollchat_proto::ids::{MessageId, UserId};
use pollchat_proto::message::{DeliveryState, Message};
use tokio::sync::mpsc;

use crate::api::Api;
use crate::error::{PreconditionError, SyncError};
use crate::event::{self, SyncEvent};
use crate::pagination::{LoadMode, PaginationCursor};
use crate::session::SessionHandle;
use crate::transport::Transport;

pub use merge::{Confirmation, MergeOutcome};

/// Tuning for [`ConversationStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversationConfig {
    /// Page size for history loads.
    pub page_size: usize,
    /// Largest creation-time gap at which a server message without a client
    /// token may still be matched to a pending message.
    pub dedup_tolerance: Duration,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            page_size: 30,
            dedup_tolerance: Duration::from_secs(60),
        }
    }
}

/// The conversation a background fetch was issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConversationTarget {
    /// Conversation peer.
    pub peer: UserId,
    /// Generation at issue time.
    pub generation: u64,
}

/// What happened to a pending message when its send failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rollback {
    /// The pending message was removed.
    Removed(Message),
    /// A poll had already replaced it with this server copy.
    AlreadyConfirmed(MessageId),
    /// It is no longer held (peer switch or reload).
    Missing,
}

#[derive(Debug)]
struct ConversationState {
    peer: Option<UserId>,
    generation: u64,
    messages: Vec<Message>,
    cursor: PaginationCursor,
    /// Pending ids a poll collapsed into their server copy.
    reconciled: HashMap<MessageId, MessageId>,
}

impl ConversationState {
    fn is_current(&self, target: ConversationTarget) -> bool {
        self.generation == target.generation && self.peer == Some(target.peer)
    }

    fn target(&self) -> Option<ConversationTarget> {
        self.peer.map(|peer| ConversationTarget {
            peer,
            generation: self.generation,
        })
    }
}

/// Owner of the active conversation's message set.
pub struct ConversationStore<T: Transport> {
    api: Arc<Api<T>>,
    session: Arc<SessionHandle>,
    config: ConversationConfig,
    state: Mutex<ConversationState>,
    event_tx: mpsc::Sender<SyncEvent>,
}

impl<T: Transport> ConversationStore<T> {
    /// Create an empty store with no active peer.
    pub fn new(
        api: Arc<Api<T>>,
        session: Arc<SessionHandle>,
        config: ConversationConfig,
        event_tx: mpsc::Sender<SyncEvent>,
    ) -> Self {
        Self {
            api,
            session,
            config,
            state: Mutex::new(ConversationState {
                peer: None,
                generation: 0,
                messages: Vec::new(),
                cursor: PaginationCursor::new(config.page_size),
                reconciled: HashMap::new(),
            }),
            event_tx,
        }
    }

    /// Load one page of the conversation with `peer`.
    ///
    /// `Replace` makes `peer` active, clears the set and starts a new
    /// generation before fetching. `Append` fetches an older page of the
    /// already active conversation and merges it. Returns the number of
    /// messages fetched, or zero if the result went stale in flight.
    ///
    /// # Errors
    ///
    /// [`PreconditionError::NoSession`] without a credential,
    /// [`PreconditionError::NoActivePeer`] when appending to a conversation
    /// that is not active, or the fetch error. A failed load leaves the set
    /// as it was after the optional clear.
    pub async fn load(
        &self,
        peer: UserId,
        offset: usize,
        limit: usize,
        mode: LoadMode,
    ) -> Result<usize, SyncError> {
        let credential = self
            .session
            .credential()
            .ok_or(PreconditionError::NoSession)?;

        let target = {
            let mut state = self.state.lock();
            match mode {
                LoadMode::Replace => {
                    state.peer = Some(peer);
                    state.generation += 1;
                    state.messages.clear();
                    state.reconciled.clear();
                    state.cursor = PaginationCursor::new(limit);
                }
                LoadMode::Append if state.peer != Some(peer) => {
                    return Err(PreconditionError::NoActivePeer.into());
                }
                LoadMode::Append => {}
            }
            ConversationTarget {
                peer,
                generation: state.generation,
            }
        };

        tracing::debug!(peer = %peer, offset, limit, ?mode, "loading conversation page");
        let query = MessageQuery {
            peer_id: peer,
            limit,
            offset,
        };
        let page = self.api.list_messages(&credential, &query).await?;
        let fetched = page.len();

        let outcome = {
            let mut state = self.state.lock();
            if !state.is_current(target) {
                tracing::debug!(peer = %peer, "discarding stale conversation page");
                return Ok(0);
            }
            let outcome = Self::merge_locked(&mut state, &page, self.config.dedup_tolerance);
            state.cursor = PaginationCursor::after_load(offset, limit, mode);
            outcome
        };

        event::emit(
            &self.event_tx,
            SyncEvent::ConversationLoaded {
                peer,
                mode,
                fetched,
            },
        );
        self.report_merge(peer, &outcome);
        Ok(fetched)
    }

    /// Load the next older page of the active conversation.
    ///
    /// # Errors
    ///
    /// As [`load`](Self::load); [`PreconditionError::NoActivePeer`] when no
    /// conversation is active.
    pub async fn load_older(&self) -> Result<usize, SyncError> {
        let (peer, cursor) = {
            let state = self.state.lock();
            (state.peer, state.cursor)
        };
        let peer = peer.ok_or(PreconditionError::NoActivePeer)?;
        self.load(peer, cursor.offset, cursor.limit, LoadMode::Append)
            .await
    }

    /// Merge `incoming` into the active conversation.
    pub fn merge(&self, incoming: &[Message]) -> MergeOutcome {
        let (peer, outcome) = {
            let mut state = self.state.lock();
            let outcome = Self::merge_locked(&mut state, incoming, self.config.dedup_tolerance);
            (state.peer, outcome)
        };
        if let Some(peer) = peer {
            self.report_merge(peer, &outcome);
        }
        outcome
    }

    /// The conversation a poll should refresh, if any.
    pub fn poll_target(&self) -> Option<ConversationTarget> {
        self.state.lock().target()
    }

    /// Fetch the newest `limit` messages for `target` without applying them.
    pub(crate) async fn fetch_window(
        &self,
        target: ConversationTarget,
        limit: usize,
    ) -> Result<Vec<Message>, SyncError> {
        let credential = self
            .session
            .credential()
            .ok_or(PreconditionError::NoSession)?;
        let query = MessageQuery {
            peer_id: target.peer,
            limit,
            offset: 0,
        };
        self.api.list_messages(&credential, &query).await
    }

    /// Merge a fetch result if `target` is still the active conversation.
    /// Returns `None` when the result is stale.
    pub(crate) fn merge_for(
        &self,
        target: ConversationTarget,
        incoming: &[Message],
    ) -> Option<MergeOutcome> {
        let outcome = {
            let mut state = self.state.lock();
            if !state.is_current(target) {
                return None;
            }
            Self::merge_locked(&mut state, incoming, self.config.dedup_tolerance)
        };
        self.report_merge(target.peer, &outcome);
        Some(outcome)
    }

    /// Insert an optimistic message into the active conversation.
    /// Returns the target it was inserted under, or `None` with no peer.
    pub(crate) fn insert_pending(&self, message: Message) -> Option<ConversationTarget> {
        let mut state = self.state.lock();
        let target = state.target()?;
        state.messages.push(message);
        merge::sort_messages(&mut state.messages);
        Some(target)
    }

    /// Attach the server id to a pending message.
    pub(crate) fn confirm_pending(
        &self,
        target: ConversationTarget,
        synthetic: MessageId,
        id: MessageId,
    ) -> Confirmation {
        let confirmation = {
            let mut state = self.state.lock();
            if !state.is_current(target) {
                return Confirmation::Missing;
            }
            if state.reconciled.remove(&synthetic).is_some() {
                // A poll already swapped in the server copy and reported it.
                return Confirmation::AlreadyPresent;
            }
            merge::confirm_pending(&mut state.messages, synthetic, id)
        };

        if confirmation != Confirmation::Missing {
            event::emit(&self.event_tx, SyncEvent::MessageConfirmed { synthetic, id });
        }
        confirmation
    }

    /// Withdraw a pending message after its send failed.
    pub(crate) fn rollback_pending(
        &self,
        target: ConversationTarget,
        synthetic: MessageId,
    ) -> Rollback {
        let mut state = self.state.lock();
        if !state.is_current(target) {
            return Rollback::Missing;
        }
        if let Some(id) = state.reconciled.remove(&synthetic) {
            return Rollback::AlreadyConfirmed(id);
        }
        merge::remove_pending(&mut state.messages, synthetic)
            .map_or(Rollback::Missing, Rollback::Removed)
    }

    /// Drop the active conversation and start a new generation.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.peer = None;
        state.generation += 1;
        state.messages.clear();
        state.reconciled.clear();
        state.cursor = PaginationCursor::new(self.config.page_size);
    }

    /// Snapshot of the conversation in display order.
    pub fn messages(&self) -> Vec<Message> {
        self.state.lock().messages.clone()
    }

    /// Number of messages held.
    pub fn len(&self) -> usize {
        self.state.lock().messages.len()
    }

    /// `true` if no messages are held.
    pub fn is_empty(&self) -> bool {
        self.state.lock().messages.is_empty()
    }

    /// Number of messages still awaiting their server id.
    pub fn pending_count(&self) -> usize {
        self.state
            .lock()
            .messages
            .iter()
            .filter(|m| m.state() == DeliveryState::Pending)
            .count()
    }

    /// The selected peer.
    pub fn active_peer(&self) -> Option<UserId> {
        self.state.lock().peer
    }

    /// Position of the next older page.
    pub fn cursor(&self) -> PaginationCursor {
        self.state.lock().cursor
    }

    /// Current generation.
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    /// Configured page size.
    pub const fn page_size(&self) -> usize {
        self.config.page_size
    }

    fn merge_locked(
        state: &mut ConversationState,
        incoming: &[Message],
        tolerance: Duration,
    ) -> MergeOutcome {
        let outcome = merge::merge_messages(&mut state.messages, incoming, tolerance);
        for (synthetic, id) in &outcome.collapsed {
            state.reconciled.insert(*synthetic, *id);
        }
        outcome
    }

    fn report_merge(&self, peer: UserId, outcome: &MergeOutcome) {
        if !outcome.changed() {
            return;
        }
        tracing::debug!(
            peer = %peer,
            inserted = outcome.inserted,
            collapsed = outcome.collapsed.len(),
            "merged messages"
        );
        for (synthetic, id) in &outcome.collapsed {
            event::emit(
                &self.event_tx,
                SyncEvent::MessageConfirmed {
                    synthetic: *synthetic,
                    id: *id,
                },
            );
        }
        event::emit(
            &self.event_tx,
            SyncEvent::MessagesMerged {
                peer,
                inserted: outcome.inserted,
                collapsed: outcome.collapsed.len(),
            },
        );
    }
}
