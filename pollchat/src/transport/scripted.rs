//! Scripted in-process transport for testing.
//!
//! Replies are queued per endpoint and consumed in order; when a queue is
//! empty the endpoint's fallback reply (if any) is used, then a dynamic
//! handler (if any). Every call is recorded, and each reply may carry a
//! delay so tests can hold a request in flight while time advances.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use pollchat_proto::api::Endpoint;
use pollchat_proto::codec::{self, Reply};
use serde::Serialize;

use super::{ApiRequest, Transport, TransportError};
use crate::session::Credential;

/// A canned reply: a body or a transport failure, optionally delayed.
#[derive(Debug, Clone)]
pub struct ScriptedReply {
    delay: Option<Duration>,
    result: Result<Vec<u8>, TransportError>,
}

impl ScriptedReply {
    /// `success: true` with `payload`'s fields.
    ///
    /// # Panics
    ///
    /// Panics if `payload` does not serialize to a JSON object.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn accepted<T: Serialize>(payload: &T) -> Self {
        let body = codec::encode_reply(&Reply::Accepted(payload))
            .expect("scripted payload must serialize to a JSON object");
        Self::raw(body)
    }

    /// `success: false` with an optional reason.
    #[must_use]
    pub fn rejected(message: Option<&str>) -> Self {
        let reply: Reply<()> = Reply::Rejected {
            message: message.map(str::to_owned),
        };
        // Rejections never serialize a payload, so this cannot fail.
        Self::raw(codec::encode_reply(&reply).unwrap_or_default())
    }

    /// A transport-level failure.
    #[must_use]
    pub const fn failure(error: TransportError) -> Self {
        Self {
            delay: None,
            result: Err(error),
        }
    }

    /// An arbitrary body, delivered with a 2xx status.
    #[must_use]
    pub fn raw(body: impl Into<Vec<u8>>) -> Self {
        Self {
            delay: None,
            result: Ok(body.into()),
        }
    }

    /// Deliver this reply only after `delay`.
    #[must_use]
    pub const fn after(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// A request observed by [`ScriptedTransport`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    /// The request as issued.
    pub request: ApiRequest,
    /// Credential text the request carried.
    pub token: String,
}

type Handler = Arc<dyn Fn(&ApiRequest) -> ScriptedReply + Send + Sync>;

#[derive(Default)]
struct ScriptState {
    queued: HashMap<Endpoint, VecDeque<ScriptedReply>>,
    fallback: HashMap<Endpoint, ScriptedReply>,
    handlers: HashMap<Endpoint, Handler>,
    calls: Vec<RecordedCall>,
}

/// [`Transport`] that answers from a script instead of a network.
///
/// Cloning shares the script and the call log, so a test can keep a handle
/// after moving a clone into the client.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedTransport {
    /// An empty script: every call fails with [`TransportError::Unavailable`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a one-shot reply for `endpoint`.
    pub fn push(&self, endpoint: Endpoint, reply: ScriptedReply) {
        self.state
            .lock()
            .queued
            .entry(endpoint)
            .or_default()
            .push_back(reply);
    }

    /// Reply used for `endpoint` whenever its queue is empty.
    pub fn set_fallback(&self, endpoint: Endpoint, reply: ScriptedReply) {
        self.state.lock().fallback.insert(endpoint, reply);
    }

    /// Compute replies for `endpoint` from the request when nothing is
    /// queued and no fallback is set.
    pub fn set_handler(
        &self,
        endpoint: Endpoint,
        handler: impl Fn(&ApiRequest) -> ScriptedReply + Send + Sync + 'static,
    ) {
        self.state.lock().handlers.insert(endpoint, Arc::new(handler));
    }

    /// Every call issued so far, oldest first.
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().calls.clone()
    }

    /// Total number of calls issued.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.state.lock().calls.len()
    }

    /// Number of calls issued to `endpoint`.
    #[must_use]
    pub fn calls_to(&self, endpoint: Endpoint) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.request.endpoint == endpoint)
            .count()
    }

    /// The most recent call to `endpoint`, if any.
    #[must_use]
    pub fn last_call_to(&self, endpoint: Endpoint) -> Option<RecordedCall> {
        self.state
            .lock()
            .calls
            .iter()
            .rev()
            .find(|c| c.request.endpoint == endpoint)
            .cloned()
    }

    fn next_reply(&self, request: &ApiRequest, credential: &Credential) -> ScriptedReply {
        let handler = {
            let mut state = self.state.lock();
            state.calls.push(RecordedCall {
                request: request.clone(),
                token: credential.expose().to_owned(),
            });
            if let Some(reply) = state
                .queued
                .get_mut(&request.endpoint)
                .and_then(VecDeque::pop_front)
            {
                return reply;
            }
            if let Some(reply) = state.fallback.get(&request.endpoint) {
                return reply.clone();
            }
            state.handlers.get(&request.endpoint).cloned()
        };

        // The handler runs without the lock so it may inspect the transport.
        handler.map_or_else(
            || {
                ScriptedReply::failure(TransportError::Unavailable(format!(
                    "no scripted reply for {}",
                    request.endpoint
                )))
            },
            |handler| handler(request),
        )
    }
}

impl Transport for ScriptedTransport {
    async fn call(
        &self,
        request: &ApiRequest,
        credential: &Credential,
    ) -> Result<Vec<u8>, TransportError> {
        let reply = self.next_reply(request, credential);
        if let Some(delay) = reply.delay {
            tokio::time::sleep(delay).await;
        }
        reply.result
    }
}
