//! [`ChatClient`]: one handle over the whole sync core.
//!
//! Wires the session, API, conversation store, contact directory, outbound
//! manager and poller together so they share state, and exposes the user
//! actions a front end needs.

use std::sync::Arc;

use pollchat_proto::ids::UserId;
use pollchat_proto::message::Message;
use pollchat_proto::user::User;
use tokio::sync::mpsc;

use crate::api::Api;
use crate::config::SyncConfig;
use crate::contacts::ContactDirectory;
use crate::conversation::ConversationStore;
use crate::error::{PreconditionError, SyncError};
use crate::event::{self, SyncEvent};
use crate::outbound::{OutboundMessageManager, SendOutcome};
use crate::pagination::LoadMode;
use crate::poller::{Poller, TickReport};
use crate::session::{Session, SessionHandle, SessionStatus};
use crate::transport::Transport;

/// Client-side sync core for one signed-in user.
pub struct ChatClient<T: Transport + 'static> {
    api: Arc<Api<T>>,
    session: Arc<SessionHandle>,
    conversation: Arc<ConversationStore<T>>,
    contacts: Arc<ContactDirectory<T>>,
    outbound: OutboundMessageManager<T>,
    poller: Poller<T>,
    config: SyncConfig,
    event_tx: mpsc::Sender<SyncEvent>,
}

impl<T: Transport + 'static> ChatClient<T> {
    /// Build a signed-out client over `transport`, returning it with the
    /// receiving end of its event channel.
    pub fn new(transport: T, config: SyncConfig) -> (Self, mpsc::Receiver<SyncEvent>) {
        let (event_tx, event_rx) = mpsc::channel(config.event_buffer.max(1));
        let api = Arc::new(Api::new(transport, config.request_timeout));
        let session = Arc::new(SessionHandle::new());
        let conversation = Arc::new(ConversationStore::new(
            Arc::clone(&api),
            Arc::clone(&session),
            config.conversation(),
            event_tx.clone(),
        ));
        let contacts = Arc::new(ContactDirectory::new(
            Arc::clone(&api),
            Arc::clone(&session),
            Arc::clone(&conversation),
            config.directory(),
            event_tx.clone(),
        ));
        let outbound = OutboundMessageManager::new(
            Arc::clone(&api),
            Arc::clone(&session),
            Arc::clone(&conversation),
            event_tx.clone(),
        );
        let poller = Poller::new(
            Arc::clone(&api),
            Arc::clone(&session),
            Arc::clone(&conversation),
            Arc::clone(&contacts),
            config.poller(),
            event_tx.clone(),
        );

        let client = Self {
            api,
            session,
            conversation,
            contacts,
            outbound,
            poller,
            config,
            event_tx,
        };
        (client, event_rx)
    }

    /// Install `session`, check it with the backend, and if it is not
    /// rejected start polling and load the first contact page.
    ///
    /// Any run left from a previous session is stopped first, so the new
    /// session polls on its own timer and presence cadence. A contact load
    /// failure is logged and does not undo the session.
    pub async fn begin_session(&self, session: Session) -> SessionStatus {
        self.poller.stop();
        self.conversation.reset();
        self.contacts.clear();
        self.session.begin(session);

        let status = self.verify_session().await;
        if status == SessionStatus::Expired {
            return status;
        }

        self.poller.start();
        if let Err(e) = self
            .contacts
            .load("", 0, self.config.contact_page_size, LoadMode::Replace)
            .await
        {
            tracing::warn!(error = %e, "initial contact load failed");
        }
        status
    }

    /// Ask the backend whether the session is alive. An expired session
    /// stops polling and clears the conversation.
    pub async fn verify_session(&self) -> SessionStatus {
        let status = self.session.verify(&self.api).await;
        if status == SessionStatus::Expired {
            self.poller.stop();
            self.conversation.reset();
            event::emit(&self.event_tx, SyncEvent::SessionInvalidated);
        }
        status
    }

    /// Sign out: stop polling and drop all synchronized state.
    pub fn end_session(&self) {
        self.poller.stop();
        self.session.end();
        self.conversation.reset();
        self.contacts.clear();
        self.outbound.set_draft(String::new());
    }

    /// Open the conversation with `peer`.
    ///
    /// # Errors
    ///
    /// As [`ContactDirectory::select_peer`].
    pub async fn select_peer(&self, peer: UserId) -> Result<usize, SyncError> {
        self.contacts.select_peer(peer).await
    }

    /// Send `text` to the active peer.
    ///
    /// # Errors
    ///
    /// As [`OutboundMessageManager::submit`].
    pub async fn submit(&self, text: &str) -> Result<SendOutcome, PreconditionError> {
        self.outbound.submit(text).await
    }

    /// Replace the contact list with the first page matching `query`.
    ///
    /// # Errors
    ///
    /// As [`ContactDirectory::load`].
    pub async fn search_contacts(&self, query: &str) -> Result<usize, SyncError> {
        self.contacts
            .load(query, 0, self.config.contact_page_size, LoadMode::Replace)
            .await
    }

    /// Append the next contact page.
    ///
    /// # Errors
    ///
    /// As [`ContactDirectory::load_more`].
    pub async fn load_more_contacts(&self) -> Result<usize, SyncError> {
        self.contacts.load_more().await
    }

    /// Append the next older page of the active conversation.
    ///
    /// # Errors
    ///
    /// As [`ConversationStore::load_older`].
    pub async fn load_older_messages(&self) -> Result<usize, SyncError> {
        self.conversation.load_older().await
    }

    /// Run one poll tick immediately.
    pub async fn poll_now(&self) -> TickReport {
        self.poller.tick_once().await
    }

    /// Start the poll loop. Returns `false` if it was already running.
    pub fn start_polling(&self) -> bool {
        self.poller.start()
    }

    /// Stop the poll loop. Returns `false` if it was not running.
    pub fn stop_polling(&self) -> bool {
        self.poller.stop()
    }

    /// `true` while the poll loop runs.
    pub fn is_polling(&self) -> bool {
        self.poller.is_running()
    }

    /// Stop polling and wait for the loop to exit.
    pub async fn shutdown(&self) {
        self.poller.shutdown().await;
    }

    /// Active conversation in display order.
    pub fn messages(&self) -> Vec<Message> {
        self.conversation.messages()
    }

    /// Listed contacts in server order.
    pub fn contacts(&self) -> Vec<User> {
        self.contacts.users()
    }

    /// The selected peer.
    pub fn active_peer(&self) -> Option<UserId> {
        self.conversation.active_peer()
    }

    /// The current session, if signed in.
    pub fn session(&self) -> Option<Session> {
        self.session.current()
    }

    /// Conversation store.
    pub fn conversation(&self) -> &ConversationStore<T> {
        &self.conversation
    }

    /// Contact directory.
    pub fn directory(&self) -> &ContactDirectory<T> {
        &self.contacts
    }

    /// Outbound manager (composer access).
    pub const fn outbound(&self) -> &OutboundMessageManager<T> {
        &self.outbound
    }

    /// Poller.
    pub const fn poller(&self) -> &Poller<T> {
        &self.poller
    }

    /// The transport requests go through.
    pub fn transport(&self) -> &T {
        self.api.transport()
    }
}
