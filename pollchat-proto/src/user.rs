//! Chat peers, presence and the session owner.

use serde::{Deserialize, Serialize};

use crate::ids::UserId;
use crate::lenient;
use crate::time::Timestamp;

/// Coarse presence status derived from [`Presence`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PresenceStatus {
    /// Peer is currently connected.
    Online,
    /// Peer is not connected.
    Offline,
}

impl std::fmt::Display for PresenceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Online => write!(f, "online"),
            Self::Offline => write!(f, "offline"),
        }
    }
}

/// Online flag plus the last time the peer was seen.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Presence {
    /// Whether the peer is connected right now.
    #[serde(default, deserialize_with = "lenient::flag")]
    pub is_online: bool,
    /// Last activity, if the backend knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<Timestamp>,
}

impl Presence {
    /// Collapse into a [`PresenceStatus`].
    #[must_use]
    pub const fn status(&self) -> PresenceStatus {
        if self.is_online {
            PresenceStatus::Online
        } else {
            PresenceStatus::Offline
        }
    }
}

/// A chat peer as listed by the contacts endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Stable identity key.
    pub id: UserId,
    /// Display name.
    pub username: String,
    /// Opaque avatar reference, resolved by the host application.
    #[serde(default, deserialize_with = "lenient::text")]
    pub avatar: String,
    /// Presence fields, flattened on the wire.
    #[serde(flatten)]
    pub presence: Presence,
    /// Messages from this peer not yet read by the session owner.
    #[serde(default, deserialize_with = "lenient::count")]
    pub unread_count: u32,
    /// Preview of the latest message in the conversation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<String>,
    /// When the previewed message was sent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_time: Option<Timestamp>,
}

impl User {
    /// Avatar location under the given asset base (`<base>/uploads/<avatar>`).
    ///
    /// Returns `None` when the user has no avatar set.
    #[must_use]
    pub fn avatar_url(&self, base: &str) -> Option<String> {
        avatar_url(base, &self.avatar)
    }
}

/// The authenticated owner of the session.
///
/// Extra fields in the stored profile (email and so on) are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentUser {
    /// Identity key.
    pub id: UserId,
    /// Display name.
    pub username: String,
    /// Opaque avatar reference.
    #[serde(default, deserialize_with = "lenient::text")]
    pub avatar: String,
}

fn avatar_url(base: &str, avatar: &str) -> Option<String> {
    if avatar.is_empty() {
        return None;
    }
    Some(format!("{}/uploads/{avatar}", base.trim_end_matches('/')))
}
