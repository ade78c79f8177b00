//! HTTP transport backed by `reqwest`.
//!
//! Requests go to `<base>/<script>?action=<action>&...&token=<token>` with
//! the same token as a bearer header; the backend reads either. A cookie
//! store keeps the server session cookie across calls.

use pollchat_proto::api::Method;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use url::Url;

use super::{ApiRequest, Transport, TransportError};
use crate::session::Credential;

/// [`Transport`] that talks to the backend over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpTransport {
    /// Create a transport rooted at `base_url` (e.g. `https://host/blogpost/api`).
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Request`] if the URL is invalid or the
    /// HTTP client cannot be built.
    pub fn new(base_url: &str) -> Result<Self, TransportError> {
        let mut base_url = Url::parse(base_url)
            .map_err(|e| TransportError::Request(format!("invalid base URL {base_url}: {e}")))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = reqwest::Client::builder()
            .cookie_store(true)
            .build()
            .map_err(|e| TransportError::Request(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, base_url })
    }

    /// The normalised base URL (always ends in `/`).
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint_url(
        &self,
        request: &ApiRequest,
        credential: &Credential,
    ) -> Result<Url, TransportError> {
        let mut url = self
            .base_url
            .join(request.endpoint.script())
            .map_err(|e| TransportError::Request(format!("invalid endpoint URL: {e}")))?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("action", request.endpoint.action());
            for (key, value) in &request.query {
                pairs.append_pair(key, value);
            }
            pairs.append_pair("token", credential.expose());
        }
        Ok(url)
    }
}

impl Transport for HttpTransport {
    async fn call(
        &self,
        request: &ApiRequest,
        credential: &Credential,
    ) -> Result<Vec<u8>, TransportError> {
        let url = self.endpoint_url(request, credential)?;

        let mut builder = match request.endpoint.method() {
            Method::Get => self.client.get(url),
            Method::Post => self.client.post(url),
        }
        .bearer_auth(credential.expose())
        .header(ACCEPT, "application/json")
        .timeout(request.timeout);

        builder = match &request.body {
            Some(body) => builder.json(body),
            None => builder.header(CONTENT_TYPE, "application/json"),
        };

        let response = builder.send().await.map_err(classify)?;
        let status = response.status();
        let body = response.bytes().await.map_err(classify)?;

        if !status.is_success() {
            tracing::debug!(
                endpoint = %request.endpoint,
                status = status.as_u16(),
                "backend returned error status"
            );
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        Ok(body.to_vec())
    }
}

fn classify(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_connect() {
        TransportError::Unavailable(err.to_string())
    } else {
        TransportError::Request(err.to_string())
    }
}
