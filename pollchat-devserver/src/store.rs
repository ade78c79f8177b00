//! In-memory users, tokens and messages.
//!
//! [`Backend`] answers the same questions the real backend does: who owns a
//! token, which peers a user can chat with (with unread counts and the
//! latest message), and which window of a conversation sits at a given
//! offset from the newest end. Reading a conversation marks the viewer's
//! incoming messages as read.

use pollchat_proto::ids::{ClientToken, MessageId, UserId};
use pollchat_proto::message::{self, Message, SenderSnapshot, ValidationError};
use pollchat_proto::time::Timestamp;
use pollchat_proto::user::{Presence, User};
use serde::Deserialize;
use tokio::sync::RwLock;

/// A user the backend starts with.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SeedUser {
    /// User id.
    pub id: i64,
    /// Display name.
    pub username: String,
    /// Avatar reference.
    #[serde(default)]
    pub avatar: String,
    /// Session token that authenticates as this user.
    pub token: String,
}

impl SeedUser {
    /// Convenience constructor.
    #[must_use]
    pub fn new(id: i64, username: &str, token: &str) -> Self {
        Self {
            id,
            username: username.to_owned(),
            avatar: String::new(),
            token: token.to_owned(),
        }
    }
}

/// Why the backend refused a send.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendRejection {
    /// No such recipient.
    #[error("Recipient not found")]
    UnknownRecipient,
    /// Sending to yourself.
    #[error("Cannot message yourself")]
    SelfMessage,
    /// Body failed validation.
    #[error("{0}")]
    Invalid(#[from] ValidationError),
}

#[derive(Debug)]
struct StoredUser {
    id: UserId,
    username: String,
    avatar: String,
    token: Option<String>,
    presence: Presence,
}

#[derive(Debug)]
struct StoredMessage {
    message: Message,
    read: bool,
}

#[derive(Debug, Default)]
struct BackendState {
    users: Vec<StoredUser>,
    messages: Vec<StoredMessage>,
    last_id: i64,
}

/// The whole backend state behind one lock.
#[derive(Debug)]
pub struct Backend {
    state: RwLock<BackendState>,
    echo_client_token: bool,
}

impl Backend {
    /// A backend with `users` and no messages. Client tokens are echoed.
    #[must_use]
    pub fn new(users: Vec<SeedUser>) -> Self {
        let users = users
            .into_iter()
            .map(|u| StoredUser {
                id: UserId::new(u.id),
                username: u.username,
                avatar: u.avatar,
                token: Some(u.token),
                presence: Presence::default(),
            })
            .collect();
        Self {
            state: RwLock::new(BackendState {
                users,
                ..BackendState::default()
            }),
            echo_client_token: true,
        }
    }

    /// Whether stored messages carry the sender's client token back.
    #[must_use]
    pub const fn with_echo_client_token(mut self, echo: bool) -> Self {
        self.echo_client_token = echo;
        self
    }

    /// The user a token belongs to.
    pub async fn authenticate(&self, token: &str) -> Option<UserId> {
        if token.is_empty() {
            return None;
        }
        self.state
            .read()
            .await
            .users
            .iter()
            .find(|u| u.token.as_deref() == Some(token))
            .map(|u| u.id)
    }

    /// Invalidate a token. Returns `true` if it existed.
    pub async fn revoke_token(&self, token: &str) -> bool {
        let mut state = self.state.write().await;
        let Some(user) = state
            .users
            .iter_mut()
            .find(|u| u.token.as_deref() == Some(token))
        else {
            return false;
        };
        user.token = None;
        true
    }

    /// Peers of `viewer` whose name contains `search`, by id.
    pub async fn list_peers(
        &self,
        viewer: UserId,
        search: &str,
        limit: usize,
        offset: usize,
    ) -> Vec<User> {
        let state = self.state.read().await;
        let needle = search.trim().to_lowercase();
        let mut peers: Vec<&StoredUser> = state
            .users
            .iter()
            .filter(|u| u.id != viewer)
            .filter(|u| needle.is_empty() || u.username.to_lowercase().contains(&needle))
            .collect();
        peers.sort_by_key(|u| u.id);

        peers
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|u| {
                let conversation = conversation(&state.messages, viewer, u.id);
                let unread = conversation
                    .iter()
                    .filter(|m| m.message.sender_id == u.id && !m.read)
                    .count();
                let latest = conversation.last().map(|m| &m.message);
                User {
                    id: u.id,
                    username: u.username.clone(),
                    avatar: u.avatar.clone(),
                    presence: u.presence.clone(),
                    unread_count: u32::try_from(unread).unwrap_or(u32::MAX),
                    last_message: latest.map(|m| m.body.clone()),
                    last_message_time: latest.map(|m| m.created_at),
                }
            })
            .collect()
    }

    /// The window of the `viewer`/`peer` conversation `offset` messages back
    /// from the newest, oldest first. Marks the returned incoming messages
    /// read.
    pub async fn list_messages(
        &self,
        viewer: UserId,
        peer: UserId,
        limit: usize,
        offset: usize,
    ) -> Vec<Message> {
        let mut state = self.state.write().await;
        let mut indices: Vec<usize> = state
            .messages
            .iter()
            .enumerate()
            .filter(|(_, m)| in_conversation(&m.message, viewer, peer))
            .map(|(i, _)| i)
            .collect();
        // Newest first, skip `offset`, take `limit`.
        indices.sort_by(|a, b| {
            let (a, b) = (&state.messages[*a].message, &state.messages[*b].message);
            b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id))
        });
        let window: Vec<usize> = indices.into_iter().skip(offset).take(limit).collect();

        let mut page = Vec::with_capacity(window.len());
        for index in window.into_iter().rev() {
            let stored = &mut state.messages[index];
            if stored.message.receiver_id == viewer {
                stored.read = true;
            }
            page.push(stored.message.clone());
        }
        page
    }

    /// Store a message and return its id.
    ///
    /// # Errors
    ///
    /// [`SendRejection`] for an unknown recipient, a message to self, or an
    /// invalid body.
    pub async fn send(
        &self,
        sender: UserId,
        receiver: UserId,
        body: &str,
        client_token: Option<ClientToken>,
    ) -> Result<MessageId, SendRejection> {
        let body = message::validate_body(body)?;
        if sender == receiver {
            return Err(SendRejection::SelfMessage);
        }

        let mut state = self.state.write().await;
        if !state.users.iter().any(|u| u.id == receiver) {
            return Err(SendRejection::UnknownRecipient);
        }
        let snapshot = state
            .users
            .iter()
            .find(|u| u.id == sender)
            .map(|u| SenderSnapshot {
                username: u.username.clone(),
                avatar: u.avatar.clone(),
            })
            .unwrap_or_default();

        state.last_id += 1;
        let id = MessageId::new(state.last_id);
        state.messages.push(StoredMessage {
            message: Message {
                id,
                sender_id: sender,
                receiver_id: receiver,
                body: body.to_owned(),
                created_at: Timestamp::now(),
                sender: snapshot,
                client_token: client_token.filter(|_| self.echo_client_token),
            },
            read: false,
        });
        tracing::debug!(%sender, %receiver, %id, "message stored");
        Ok(id)
    }

    /// Record activity for `user`: online, last seen now.
    pub async fn heartbeat(&self, user: UserId) {
        let mut state = self.state.write().await;
        if let Some(u) = state.users.iter_mut().find(|u| u.id == user) {
            u.presence = Presence {
                is_online: true,
                last_seen: Some(Timestamp::now()),
            };
        }
    }

    /// Set a user's online flag.
    pub async fn set_online(&self, user: UserId, online: bool) {
        let mut state = self.state.write().await;
        if let Some(u) = state.users.iter_mut().find(|u| u.id == user) {
            u.presence.is_online = online;
        }
    }

    /// Total stored messages.
    pub async fn message_count(&self) -> usize {
        self.state.read().await.messages.len()
    }
}

fn in_conversation(message: &Message, a: UserId, b: UserId) -> bool {
    (message.sender_id == a && message.receiver_id == b)
        || (message.sender_id == b && message.receiver_id == a)
}

fn conversation(messages: &[StoredMessage], a: UserId, b: UserId) -> Vec<&StoredMessage> {
    let mut found: Vec<&StoredMessage> = messages
        .iter()
        .filter(|m| in_conversation(&m.message, a, b))
        .collect();
    found.sort_by(|x, y| {
        x.message
            .created_at
            .cmp(&y.message.created_at)
            .then_with(|| x.message.id.cmp(&y.message.id))
    });
    found
}
