//! Conversation messages as exchanged with the backend.

use serde::{Deserialize, Serialize};

use crate::ids::{ClientToken, MessageId, UserId};
use crate::lenient;
use crate::time::Timestamp;
use crate::user::CurrentUser;

/// Maximum accepted message body size in bytes (64 KB).
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Sender display data captured when the message was created.
///
/// Rendering reads these instead of looking the sender up, so a message
/// keeps the name and avatar it was sent with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderSnapshot {
    /// Sender display name.
    #[serde(rename = "sender_username", default, deserialize_with = "lenient::text")]
    pub username: String,
    /// Sender avatar reference.
    #[serde(rename = "sender_avatar", default, deserialize_with = "lenient::text")]
    pub avatar: String,
}

impl From<&CurrentUser> for SenderSnapshot {
    fn from(user: &CurrentUser) -> Self {
        Self {
            username: user.username.clone(),
            avatar: user.avatar.clone(),
        }
    }
}

/// Whether a message has been acknowledged by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryState {
    /// Locally created, carrying a synthetic id, awaiting the server.
    Pending,
    /// Carries its server-assigned id.
    Confirmed,
}

/// One message in a two-party conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Server id, or a negative synthetic id while pending.
    pub id: MessageId,
    /// Author.
    pub sender_id: UserId,
    /// Recipient.
    pub receiver_id: UserId,
    /// Text body; called `message` on the wire.
    #[serde(rename = "message")]
    pub body: String,
    /// Creation instant.
    pub created_at: Timestamp,
    /// Display snapshot of the sender.
    #[serde(flatten)]
    pub sender: SenderSnapshot,
    /// Idempotency token, present on optimistic messages and echoed by
    /// servers that support it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_token: Option<ClientToken>,
}

impl Message {
    /// Lifecycle state derived from the id range.
    #[must_use]
    pub const fn state(&self) -> DeliveryState {
        if self.id.is_synthetic() {
            DeliveryState::Pending
        } else {
            DeliveryState::Confirmed
        }
    }
}

/// Error returned when a message body fails validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Body is empty after trimming whitespace.
    #[error("message content is empty")]
    Empty,
    /// Body exceeds [`MAX_MESSAGE_SIZE`].
    #[error("message too large ({size} bytes, max {max} bytes)")]
    TooLarge {
        /// Actual size of the body in bytes.
        size: usize,
        /// Maximum allowed size in bytes.
        max: usize,
    },
}

/// Trim `text` and check it is sendable.
///
/// # Errors
///
/// Returns [`ValidationError::Empty`] for blank input and
/// [`ValidationError::TooLarge`] above [`MAX_MESSAGE_SIZE`].
pub fn validate_body(text: &str) -> Result<&str, ValidationError> {
    let body = text.trim();
    if body.is_empty() {
        return Err(ValidationError::Empty);
    }
    if body.len() > MAX_MESSAGE_SIZE {
        return Err(ValidationError::TooLarge {
            size: body.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }
    Ok(body)
}
