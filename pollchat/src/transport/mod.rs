//! Transport layer abstraction for `PollChat`.
//!
//! Defines the [`Transport`] trait every backend connection satisfies.
//! Concrete implementations:
//! - [`http::HttpTransport`]: reqwest client against the real backend
//! - [`scripted::ScriptedTransport`]: in-process scripted replies for tests

pub mod http;
pub mod scripted;

use std::time::Duration;

use pollchat_proto::api::Endpoint;

use crate::session::Credential;

/// Errors that can occur while carrying a request to the backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The request did not complete within its timeout and was abandoned.
    #[error("request timed out")]
    Timeout,

    /// The server answered with a non-success HTTP status.
    #[error("HTTP status {status}: {body}")]
    Status {
        /// Numeric status code.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },

    /// The request could not be built or sent.
    #[error("request failed: {0}")]
    Request(String),

    /// The backend is unreachable.
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// One request to a backend endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    /// Target endpoint.
    pub endpoint: Endpoint,
    /// Query-string pairs, excluding `action` and the credential.
    pub query: Vec<(&'static str, String)>,
    /// JSON body for POST endpoints.
    pub body: Option<serde_json::Value>,
    /// Upper bound on the whole exchange.
    pub timeout: Duration,
}

impl ApiRequest {
    /// Request with no query parameters or body.
    #[must_use]
    pub const fn new(endpoint: Endpoint, timeout: Duration) -> Self {
        Self {
            endpoint,
            query: Vec::new(),
            body: None,
            timeout,
        }
    }

    /// Look up a query parameter by name.
    #[must_use]
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Async request/response channel to the chat backend.
///
/// Implementations attach the credential, honour the request timeout, and
/// return the raw reply body. Decoding and the `success` flag are handled
/// one layer up, in [`crate::api::Api`].
pub trait Transport: Send + Sync {
    /// Issue `request` on behalf of `credential` and return the reply body.
    ///
    /// Non-2xx statuses and network failures are [`TransportError`]s; a
    /// 2xx body is returned untouched even if it encodes a rejection.
    fn call(
        &self,
        request: &ApiRequest,
        credential: &Credential,
    ) -> impl std::future::Future<Output = Result<Vec<u8>, TransportError>> + Send;
}
