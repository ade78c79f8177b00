//! Error taxonomy of the sync core.

use pollchat_proto::codec::CodecError;
use pollchat_proto::message::ValidationError;

use crate::transport::TransportError;

/// A local call that cannot proceed. No request is issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PreconditionError {
    /// Message text is blank after trimming.
    #[error("message is empty")]
    EmptyMessage,
    /// Message text exceeds the maximum body size.
    #[error("message is too large")]
    MessageTooLarge,
    /// No conversation peer is selected.
    #[error("no active peer")]
    NoActivePeer,
    /// No authenticated session.
    #[error("no session")]
    NoSession,
}

impl From<ValidationError> for PreconditionError {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::Empty => Self::EmptyMessage,
            ValidationError::TooLarge { .. } => Self::MessageTooLarge,
        }
    }
}

/// Errors returned by operations that talk to the backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// The call was invalid locally.
    #[error("precondition failed: {0}")]
    Precondition(#[from] PreconditionError),

    /// Network failure, timeout or non-2xx status.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Well-formed `success: false` reply.
    #[error("server rejected request: {}", message.as_deref().unwrap_or("no reason given"))]
    Rejected {
        /// Reason given by the server, if any.
        message: Option<String>,
    },

    /// Reply body could not be decoded.
    #[error("malformed reply: {0}")]
    Parse(#[from] CodecError),
}

impl SyncError {
    /// `true` for failures that the next poll tick may recover from.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Rejected { .. })
    }
}
