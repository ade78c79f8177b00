//! Optimistic send pipeline.
//!
//! A submitted message appears in the conversation at once under a
//! negative placeholder id. The send response either rewrites it to the
//! server id or withdraws it and puts the text back in the composer. A
//! poll that brings back the server copy first collapses the placeholder
//! (see [`crate::conversation::merge`]); a failure reported after that is
//! treated as a confirmation. Dropping a `submit` future before its reply
//! rolls the message back as a failure would.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use parking_lot::Mutex;
use pollchat_proto::api::SendMessageRequest;
use pollchat_proto::ids::{ClientToken, MessageId};
use pollchat_proto::message::{self, Message, SenderSnapshot};
use pollchat_proto::time::Timestamp;
use tokio::sync::mpsc;

use crate::api::Api;
use crate::conversation::{ConversationStore, ConversationTarget, Rollback};
use crate::error::{PreconditionError, SyncError};
use crate::event::{self, SyncEvent};
use crate::session::SessionHandle;
use crate::transport::Transport;

/// A send that failed and was rolled back. Not fatal; the draft is back in
/// the composer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("message not sent: {error}")]
pub struct SendWarning {
    /// Placeholder id the withdrawn message carried.
    pub synthetic: MessageId,
    /// Text restored to the composer.
    pub draft: String,
    /// Why the send failed.
    pub error: SyncError,
}

/// Result of a submitted send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The server stored the message under `id`.
    Confirmed {
        /// Placeholder id used while pending.
        synthetic: MessageId,
        /// Authoritative id.
        id: MessageId,
    },
    /// The send failed and was rolled back.
    Failed(SendWarning),
}

/// Drives submit, reconcile and rollback for outgoing messages.
pub struct OutboundMessageManager<T: Transport> {
    api: Arc<Api<T>>,
    session: Arc<SessionHandle>,
    conversation: Arc<ConversationStore<T>>,
    composer: Mutex<String>,
    last_synthetic: AtomicI64,
    event_tx: mpsc::Sender<SyncEvent>,
}

impl<T: Transport> OutboundMessageManager<T> {
    /// Create a manager sending into `conversation`.
    pub fn new(
        api: Arc<Api<T>>,
        session: Arc<SessionHandle>,
        conversation: Arc<ConversationStore<T>>,
        event_tx: mpsc::Sender<SyncEvent>,
    ) -> Self {
        Self {
            api,
            session,
            conversation,
            composer: Mutex::new(String::new()),
            last_synthetic: AtomicI64::new(0),
            event_tx,
        }
    }

    /// Send `text` to the active peer.
    ///
    /// The trimmed text is echoed into the conversation as a pending
    /// message before the request is issued, and the composer is cleared.
    ///
    /// # Errors
    ///
    /// A [`PreconditionError`] if the text is blank or too large, no peer
    /// is active, or there is no session. Nothing is sent in that case.
    /// Send failures are not errors; they come back as
    /// [`SendOutcome::Failed`].
    pub async fn submit(&self, text: &str) -> Result<SendOutcome, PreconditionError> {
        let body = message::validate_body(text)?.to_owned();
        let peer = self
            .conversation
            .active_peer()
            .ok_or(PreconditionError::NoActivePeer)?;
        let session = self.session.current().ok_or(PreconditionError::NoSession)?;

        let synthetic = self.next_synthetic_id();
        let token = ClientToken::generate();
        let pending = Message {
            id: synthetic,
            sender_id: session.user.id,
            receiver_id: peer,
            body: body.clone(),
            created_at: Timestamp::now(),
            sender: SenderSnapshot::from(&session.user),
            client_token: Some(token.clone()),
        };

        let target = self
            .conversation
            .insert_pending(pending)
            .ok_or(PreconditionError::NoActivePeer)?;
        self.composer.lock().clear();
        tracing::debug!(peer = %peer, synthetic = %synthetic, "message pending");

        let request = SendMessageRequest {
            receiver_id: peer,
            message: body.clone(),
            client_token: Some(token),
        };
        let guard = PendingGuard {
            manager: self,
            target,
            synthetic,
            draft: Some(body),
        };
        let result = self.api.send_message(&session.credential, &request).await;
        let body = guard.settle();
        let outcome = match result {
            Ok(id) => {
                self.conversation.confirm_pending(target, synthetic, id);
                tracing::debug!(synthetic = %synthetic, id = %id, "message confirmed");
                SendOutcome::Confirmed { synthetic, id }
            }
            Err(error) => self.roll_back(target, synthetic, body, error),
        };
        Ok(outcome)
    }

    /// Send whatever is in the composer.
    ///
    /// # Errors
    ///
    /// As [`submit`](Self::submit).
    pub async fn submit_draft(&self) -> Result<SendOutcome, PreconditionError> {
        let text = self.composer.lock().clone();
        self.submit(&text).await
    }

    /// Replace the composer contents.
    pub fn set_draft(&self, text: impl Into<String>) {
        *self.composer.lock() = text.into();
    }

    /// Current composer contents.
    pub fn draft(&self) -> String {
        self.composer.lock().clone()
    }

    /// Withdraw a pending message whose `submit` was dropped before the
    /// send reply came back.
    fn abandon(&self, target: ConversationTarget, synthetic: MessageId, draft: String) {
        match self.conversation.rollback_pending(target, synthetic) {
            Rollback::AlreadyConfirmed(id) => {
                tracing::debug!(synthetic = %synthetic, id = %id, "abandoned send already confirmed");
            }
            Rollback::Removed(_) | Rollback::Missing => {
                tracing::warn!(synthetic = %synthetic, "send abandoned before reply, message rolled back");
                *self.composer.lock() = draft.clone();
                event::emit(&self.event_tx, SyncEvent::MessageRolledBack { synthetic, draft });
            }
        }
    }

    fn roll_back(
        &self,
        target: ConversationTarget,
        synthetic: MessageId,
        draft: String,
        error: SyncError,
    ) -> SendOutcome {
        match self.conversation.rollback_pending(target, synthetic) {
            Rollback::AlreadyConfirmed(id) => {
                tracing::debug!(
                    synthetic = %synthetic,
                    id = %id,
                    error = %error,
                    "send reported failure after server copy arrived"
                );
                SendOutcome::Confirmed { synthetic, id }
            }
            Rollback::Removed(_) | Rollback::Missing => {
                *self.composer.lock() = draft.clone();
                tracing::warn!(synthetic = %synthetic, error = %error, "send failed, message rolled back");
                event::emit(
                    &self.event_tx,
                    SyncEvent::MessageRolledBack {
                        synthetic,
                        draft: draft.clone(),
                    },
                );
                SendOutcome::Failed(SendWarning {
                    synthetic,
                    draft,
                    error,
                })
            }
        }
    }

    /// Next placeholder id: minus the current Unix time in milliseconds,
    /// forced strictly below every id handed out before.
    fn next_synthetic_id(&self) -> MessageId {
        let candidate = Timestamp::now().unix_millis().saturating_neg().min(-1);
        let previous = self
            .last_synthetic
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(candidate.min(last.saturating_sub(1)))
            })
            .unwrap_or_else(|last| last);
        MessageId::new(candidate.min(previous.saturating_sub(1)))
    }
}

/// Rolls a pending message back if the send future is dropped before
/// [`settle`](Self::settle) is reached.
struct PendingGuard<'a, T: Transport> {
    manager: &'a OutboundMessageManager<T>,
    target: ConversationTarget,
    synthetic: MessageId,
    draft: Option<String>,
}

impl<T: Transport> PendingGuard<'_, T> {
    /// Disarm the guard, handing back the message body.
    fn settle(mut self) -> String {
        self.draft.take().unwrap_or_default()
    }
}

impl<T: Transport> Drop for PendingGuard<'_, T> {
    fn drop(&mut self) {
        if let Some(draft) = self.draft.take() {
            self.manager.abandon(self.target, self.synthetic, draft);
        }
    }
}
