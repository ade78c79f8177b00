//! Contact directory: the paged, searchable peer list with presence.
//!
//! The directory owns every peer's presence and unread counter. Only a
//! directory load or refresh, and the local clear on selection, change
//! them.

use std::sync::Arc;

use parking_lot::Mutex;
use pollchat_proto::api::PeerQuery;
use pollchat_proto::ids::UserId;
use pollchat_proto::user::User;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::api::Api;
use crate::conversation::ConversationStore;
use crate::error::{PreconditionError, SyncError};
use crate::event::{self, SyncEvent};
use crate::pagination::{LoadMode, PaginationCursor};
use crate::session::SessionHandle;
use crate::transport::Transport;

/// How a presence refresh is applied to the listed peers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceMode {
    /// The refreshed first page replaces the whole list.
    #[default]
    Replace,
    /// Presence, unread and preview fields are updated in place for peers
    /// already listed; order and appended pages are kept.
    Patch,
}

/// Tuning for [`ContactDirectory`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectoryConfig {
    /// Page size for directory loads and presence refreshes.
    pub page_size: usize,
    /// Presence refresh policy.
    pub presence_mode: PresenceMode,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            page_size: 30,
            presence_mode: PresenceMode::Replace,
        }
    }
}

/// A fetched presence snapshot, not yet applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceSnapshot {
    generation: u64,
    users: Vec<User>,
}

#[derive(Debug)]
struct DirectoryState {
    users: Vec<User>,
    query: String,
    cursor: PaginationCursor,
    generation: u64,
}

/// Paged list of chat peers.
pub struct ContactDirectory<T: Transport> {
    api: Arc<Api<T>>,
    session: Arc<SessionHandle>,
    conversation: Arc<ConversationStore<T>>,
    config: DirectoryConfig,
    state: Mutex<DirectoryState>,
    event_tx: mpsc::Sender<SyncEvent>,
}

impl<T: Transport> ContactDirectory<T> {
    /// Create an empty directory.
    pub fn new(
        api: Arc<Api<T>>,
        session: Arc<SessionHandle>,
        conversation: Arc<ConversationStore<T>>,
        config: DirectoryConfig,
        event_tx: mpsc::Sender<SyncEvent>,
    ) -> Self {
        Self {
            api,
            session,
            conversation,
            config,
            state: Mutex::new(DirectoryState {
                users: Vec::new(),
                query: String::new(),
                cursor: PaginationCursor::new(config.page_size),
                generation: 0,
            }),
            event_tx,
        }
    }

    /// Load one page of peers matching `query`.
    ///
    /// `Replace` discards the current list; `Append` adds to it. Server
    /// order is kept. Returns the number of peers fetched, or zero if a
    /// newer load superseded this one while it was in flight.
    ///
    /// # Errors
    ///
    /// [`PreconditionError::NoSession`] or the fetch error; the list is
    /// left unchanged on failure.
    pub async fn load(
        &self,
        query: &str,
        offset: usize,
        limit: usize,
        mode: LoadMode,
    ) -> Result<usize, SyncError> {
        let credential = self
            .session
            .credential()
            .ok_or(PreconditionError::NoSession)?;

        let generation = {
            let mut state = self.state.lock();
            if mode == LoadMode::Replace {
                state.generation += 1;
            }
            state.generation
        };

        let request = PeerQuery {
            search: query.to_owned(),
            limit,
            offset,
        };
        tracing::debug!(query, offset, limit, ?mode, "loading contacts");
        let users = self.api.list_peers(&credential, &request).await?;
        let fetched = users.len();

        let count = {
            let mut state = self.state.lock();
            if state.generation != generation {
                tracing::debug!(query, "discarding superseded contact page");
                return Ok(0);
            }
            match mode {
                LoadMode::Replace => state.users = users,
                LoadMode::Append => state.users.extend(users),
            }
            query.clone_into(&mut state.query);
            state.cursor = PaginationCursor::after_load(offset, limit, mode);
            state.users.len()
        };

        event::emit(&self.event_tx, SyncEvent::ContactsUpdated { count });
        Ok(fetched)
    }

    /// Append the next page for the current query.
    ///
    /// # Errors
    ///
    /// As [`load`](Self::load).
    pub async fn load_more(&self) -> Result<usize, SyncError> {
        let (query, cursor) = {
            let state = self.state.lock();
            (state.query.clone(), state.cursor)
        };
        self.load(&query, cursor.offset, cursor.limit, LoadMode::Append)
            .await
    }

    /// Fetch the first unfiltered page and apply it per [`PresenceMode`].
    ///
    /// # Errors
    ///
    /// [`PreconditionError::NoSession`] or the fetch error.
    pub async fn refresh_presence(&self) -> Result<bool, SyncError> {
        let snapshot = self.fetch_presence().await?;
        Ok(self.apply_presence(snapshot))
    }

    /// Fetch a presence snapshot without applying it.
    pub(crate) async fn fetch_presence(&self) -> Result<PresenceSnapshot, SyncError> {
        let credential = self
            .session
            .credential()
            .ok_or(PreconditionError::NoSession)?;
        let generation = self.state.lock().generation;
        let request = PeerQuery {
            search: String::new(),
            limit: self.config.page_size,
            offset: 0,
        };
        let users = self.api.list_peers(&credential, &request).await?;
        Ok(PresenceSnapshot { generation, users })
    }

    /// Apply a snapshot unless a load superseded it. Returns `true` if it
    /// was applied.
    pub(crate) fn apply_presence(&self, snapshot: PresenceSnapshot) -> bool {
        let count = {
            let mut state = self.state.lock();
            if state.generation != snapshot.generation {
                tracing::debug!("discarding superseded presence snapshot");
                return false;
            }
            match self.config.presence_mode {
                PresenceMode::Replace => {
                    state.users = snapshot.users;
                    state.generation += 1;
                }
                PresenceMode::Patch => patch_presence(&mut state.users, snapshot.users),
            }
            state.users.len()
        };
        tracing::debug!(count, mode = ?self.config.presence_mode, "presence refreshed");
        event::emit(&self.event_tx, SyncEvent::ContactsUpdated { count });
        true
    }

    /// Make `peer` the active conversation.
    ///
    /// Clears the peer's unread counter locally (the directory is not
    /// refetched) and loads the newest page of the conversation.
    ///
    /// # Errors
    ///
    /// The conversation load error. The unread counter stays cleared.
    pub async fn select_peer(&self, peer: UserId) -> Result<usize, SyncError> {
        {
            let mut state = self.state.lock();
            if let Some(user) = state.users.iter_mut().find(|u| u.id == peer) {
                user.unread_count = 0;
            }
        }
        tracing::info!(peer = %peer, "peer selected");
        let limit = self.conversation.page_size();
        self.conversation
            .load(peer, 0, limit, LoadMode::Replace)
            .await
    }

    /// Snapshot of the listed peers in server order.
    pub fn users(&self) -> Vec<User> {
        self.state.lock().users.clone()
    }

    /// The listed peer with `id`.
    pub fn get(&self, id: UserId) -> Option<User> {
        self.state.lock().users.iter().find(|u| u.id == id).cloned()
    }

    /// Position of the next page.
    pub fn cursor(&self) -> PaginationCursor {
        self.state.lock().cursor
    }

    /// Search text of the last load.
    pub fn query(&self) -> String {
        self.state.lock().query.clone()
    }

    /// The peer whose conversation is active.
    pub fn selected(&self) -> Option<UserId> {
        self.conversation.active_peer()
    }

    /// Empty the directory.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.users.clear();
        state.query.clear();
        state.cursor = PaginationCursor::new(self.config.page_size);
        state.generation += 1;
    }
}

fn patch_presence(users: &mut [User], fresh: Vec<User>) {
    for update in fresh {
        if let Some(user) = users.iter_mut().find(|u| u.id == update.id) {
            user.presence = update.presence;
            user.unread_count = update.unread_count;
            user.last_message = update.last_message;
            user.last_message_time = update.last_message_time;
        }
    }
}
