//! Typed calls over a [`Transport`].
//!
//! [`Api`] builds requests for each endpoint, bounds each one with a
//! timeout, and turns reply bodies into payloads or [`SyncError`]s.

use std::time::Duration;

use pollchat_proto::api::{
    Endpoint, HeartbeatAck, MessageList, MessageQuery, PeerList, PeerQuery, SendAck,
    SendMessageRequest,
};
use pollchat_proto::codec::{self, CodecError, Reply};
use pollchat_proto::ids::MessageId;
use pollchat_proto::message::Message;
use pollchat_proto::user::User;
use serde::de::DeserializeOwned;

use crate::error::SyncError;
use crate::session::Credential;
use crate::transport::{ApiRequest, Transport, TransportError};

/// Endpoint-level client.
#[derive(Debug)]
pub struct Api<T: Transport> {
    transport: T,
    timeout: Duration,
}

impl<T: Transport> Api<T> {
    /// Wrap `transport`; every call is abandoned after `timeout`.
    pub const fn new(transport: T, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    /// The underlying transport.
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Per-request timeout.
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// One page of peers.
    ///
    /// # Errors
    ///
    /// Any [`SyncError`] other than a precondition.
    pub async fn list_peers(
        &self,
        credential: &Credential,
        query: &PeerQuery,
    ) -> Result<Vec<User>, SyncError> {
        let mut request = ApiRequest::new(Endpoint::ChatUsers, self.timeout);
        request.query = query.to_pairs();
        let list: PeerList = self.call(&request, credential).await?;
        Ok(list.users)
    }

    /// One page of a conversation, in server order.
    ///
    /// # Errors
    ///
    /// Any [`SyncError`] other than a precondition.
    pub async fn list_messages(
        &self,
        credential: &Credential,
        query: &MessageQuery,
    ) -> Result<Vec<Message>, SyncError> {
        let mut request = ApiRequest::new(Endpoint::ChatMessages, self.timeout);
        request.query = query.to_pairs();
        let list: MessageList = self.call(&request, credential).await?;
        Ok(list.messages)
    }

    /// Submit a message and return the id the server stored it under.
    ///
    /// # Errors
    ///
    /// Any [`SyncError`] other than a precondition. A reply without a
    /// positive id is a [`SyncError::Parse`].
    pub async fn send_message(
        &self,
        credential: &Credential,
        body: &SendMessageRequest,
    ) -> Result<MessageId, SyncError> {
        let mut request = ApiRequest::new(Endpoint::SendMessage, self.timeout);
        request.body = Some(
            serde_json::to_value(body).map_err(|e| CodecError::Json(e.to_string()))?,
        );
        let ack: SendAck = self.call(&request, credential).await?;
        if !ack.message_id.is_confirmed() {
            return Err(CodecError::Json(format!(
                "server returned non-positive message id {}",
                ack.message_id
            ))
            .into());
        }
        Ok(ack.message_id)
    }

    /// Session liveness check. `Ok(false)` means the backend rejected the
    /// credential.
    ///
    /// # Errors
    ///
    /// [`SyncError::Transport`] or [`SyncError::Parse`]; a rejection is
    /// reported as `Ok(false)` instead.
    pub async fn heartbeat(&self, credential: &Credential) -> Result<bool, SyncError> {
        let request = ApiRequest::new(Endpoint::Heartbeat, self.timeout);
        match self.call::<HeartbeatAck>(&request, credential).await {
            Ok(_) => Ok(true),
            Err(SyncError::Rejected { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn call<R: DeserializeOwned>(
        &self,
        request: &ApiRequest,
        credential: &Credential,
    ) -> Result<R, SyncError> {
        let body = tokio::time::timeout(request.timeout, self.transport.call(request, credential))
            .await
            .map_err(|_| TransportError::Timeout)??;

        match codec::decode_reply::<R>(&body)? {
            Reply::Accepted(payload) => Ok(payload),
            Reply::Rejected { message } => {
                tracing::debug!(
                    endpoint = %request.endpoint,
                    reason = message.as_deref().unwrap_or(""),
                    "request rejected by server"
                );
                Err(SyncError::Rejected { message })
            }
        }
    }
}
