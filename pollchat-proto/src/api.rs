//! Backend endpoints and their request/response payloads.

use serde::{Deserialize, Serialize};

use crate::ids::{ClientToken, MessageId, UserId};
use crate::message::Message;
use crate::user::User;

/// HTTP method used by an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// Query-string only.
    Get,
    /// JSON body.
    Post,
}

/// The backend endpoints the sync core talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// Paginated, searchable peer list.
    ChatUsers,
    /// Paginated message history with one peer.
    ChatMessages,
    /// Submit a new message.
    SendMessage,
    /// Session liveness check.
    Heartbeat,
}

impl Endpoint {
    /// Script path relative to the API base.
    #[must_use]
    pub const fn script(self) -> &'static str {
        match self {
            Self::ChatUsers | Self::ChatMessages | Self::SendMessage => "api.php",
            Self::Heartbeat => "realtime.php",
        }
    }

    /// Value of the `action` query parameter.
    #[must_use]
    pub const fn action(self) -> &'static str {
        match self {
            Self::ChatUsers => "chat-users",
            Self::ChatMessages => "chat-messages",
            Self::SendMessage => "send-message",
            Self::Heartbeat => "heartbeat",
        }
    }

    /// Inverse of [`action`](Self::action).
    #[must_use]
    pub fn from_action(action: &str) -> Option<Self> {
        match action {
            "chat-users" => Some(Self::ChatUsers),
            "chat-messages" => Some(Self::ChatMessages),
            "send-message" => Some(Self::SendMessage),
            "heartbeat" => Some(Self::Heartbeat),
            _ => None,
        }
    }

    /// HTTP method.
    #[must_use]
    pub const fn method(self) -> Method {
        match self {
            Self::ChatUsers | Self::ChatMessages => Method::Get,
            Self::SendMessage | Self::Heartbeat => Method::Post,
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}?action={}", self.script(), self.action())
    }
}

/// Query for [`Endpoint::ChatUsers`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerQuery {
    /// Free-text filter; empty lists everyone.
    pub search: String,
    /// Page size.
    pub limit: usize,
    /// Rows to skip.
    pub offset: usize,
}

impl PeerQuery {
    /// Query-string pairs (the credential is added by the transport).
    #[must_use]
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("search", self.search.clone()),
            ("limit", self.limit.to_string()),
            ("offset", self.offset.to_string()),
        ]
    }
}

/// Query for [`Endpoint::ChatMessages`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageQuery {
    /// The other party of the conversation.
    pub peer_id: UserId,
    /// Page size.
    pub limit: usize,
    /// Messages to skip, counted back from the newest.
    pub offset: usize,
}

impl MessageQuery {
    /// Query-string pairs (the credential is added by the transport).
    #[must_use]
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("user_id", self.peer_id.to_string()),
            ("limit", self.limit.to_string()),
            ("offset", self.offset.to_string()),
        ]
    }
}

/// Body of [`Endpoint::SendMessage`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMessageRequest {
    /// Recipient.
    pub receiver_id: UserId,
    /// Trimmed message text.
    pub message: String,
    /// Idempotency token the server may echo on the stored message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_token: Option<ClientToken>,
}

/// Payload of a successful [`Endpoint::ChatUsers`] reply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerList {
    /// Users in server order.
    #[serde(default)]
    pub users: Vec<User>,
}

/// Payload of a successful [`Endpoint::ChatMessages`] reply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageList {
    /// Messages in server order.
    #[serde(default)]
    pub messages: Vec<Message>,
}

/// Payload of a successful [`Endpoint::SendMessage`] reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendAck {
    /// Id assigned to the stored message.
    pub message_id: MessageId,
}

/// Payload of a successful [`Endpoint::Heartbeat`] reply (nothing beyond
/// the `success` flag).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatAck {}
