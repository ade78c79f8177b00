//! HTTP surface of the development backend.
//!
//! Routes `api.php?action=...` and `realtime.php?action=...` to the
//! [`Backend`]. Callers authenticate with a bearer header or a `token`
//! query parameter. Every reply is a JSON object carrying a `success` flag;
//! an unknown token is a 200 with `success: false`, like the real backend.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use pollchat_proto::api::{
    Endpoint, HeartbeatAck, MessageList, PeerList, SendAck, SendMessageRequest,
};
use pollchat_proto::codec::{self, Reply};
use pollchat_proto::ids::UserId;
use serde::Serialize;

use crate::store::Backend;

const DEFAULT_LIMIT: usize = 30;

/// Shared state for the router.
#[derive(Debug, Clone)]
pub struct ServerState {
    backend: Arc<Backend>,
    latency: Duration,
}

impl ServerState {
    /// Serve `backend` with no artificial latency.
    #[must_use]
    pub const fn new(backend: Arc<Backend>) -> Self {
        Self {
            backend,
            latency: Duration::ZERO,
        }
    }

    /// Delay every reply by `latency`.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// The backend being served.
    #[must_use]
    pub const fn backend(&self) -> &Arc<Backend> {
        &self.backend
    }
}

type Params = HashMap<String, String>;

/// Starts the server on `addr` and returns the bound address and a join
/// handle.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
    state: ServerState,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "devserver error");
        }
    });

    Ok((bound_addr, handle))
}

/// The axum router, for embedding.
pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/api.php", get(api_get).post(api_post))
        .route("/realtime.php", post(realtime))
        .with_state(state)
}

async fn api_get(
    State(state): State<ServerState>,
    Query(params): Query<Params>,
    headers: HeaderMap,
) -> Response {
    state.delay().await;
    let Some(viewer) = state.authenticate(&params, &headers).await else {
        return invalid_token();
    };

    match action(&params) {
        Some(Endpoint::ChatUsers) => {
            let search = params.get("search").map_or("", String::as_str);
            let (limit, offset) = paging(&params);
            let users = state
                .backend
                .list_peers(viewer, search, limit, offset)
                .await;
            reply(&Reply::Accepted(PeerList { users }))
        }
        Some(Endpoint::ChatMessages) => {
            let Some(peer) = params.get("user_id").and_then(|v| v.parse().ok()) else {
                return rejected(StatusCode::BAD_REQUEST, "user_id is required");
            };
            let (limit, offset) = paging(&params);
            let messages = state
                .backend
                .list_messages(viewer, UserId::new(peer), limit, offset)
                .await;
            reply(&Reply::Accepted(MessageList { messages }))
        }
        _ => rejected(StatusCode::BAD_REQUEST, "Unknown action"),
    }
}

async fn api_post(
    State(state): State<ServerState>,
    Query(params): Query<Params>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    state.delay().await;
    let Some(viewer) = state.authenticate(&params, &headers).await else {
        return invalid_token();
    };
    if action(&params) != Some(Endpoint::SendMessage) {
        return rejected(StatusCode::BAD_REQUEST, "Unknown action");
    }

    let Ok(request) = serde_json::from_slice::<SendMessageRequest>(&body) else {
        return rejected(StatusCode::OK, "Invalid request body");
    };
    match state
        .backend
        .send(viewer, request.receiver_id, &request.message, request.client_token)
        .await
    {
        Ok(message_id) => reply(&Reply::Accepted(SendAck { message_id })),
        Err(e) => rejected(StatusCode::OK, &e.to_string()),
    }
}

async fn realtime(
    State(state): State<ServerState>,
    Query(params): Query<Params>,
    headers: HeaderMap,
) -> Response {
    state.delay().await;
    let Some(viewer) = state.authenticate(&params, &headers).await else {
        return invalid_token();
    };
    if action(&params) != Some(Endpoint::Heartbeat) {
        return rejected(StatusCode::BAD_REQUEST, "Unknown action");
    }
    state.backend.heartbeat(viewer).await;
    reply(&Reply::Accepted(HeartbeatAck {}))
}

impl ServerState {
    async fn delay(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }

    async fn authenticate(&self, params: &Params, headers: &HeaderMap) -> Option<UserId> {
        let bearer = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        let token = bearer.or_else(|| params.get("token").map(String::as_str))?;
        self.backend.authenticate(token).await
    }
}

fn action(params: &Params) -> Option<Endpoint> {
    params
        .get("action")
        .and_then(|a| Endpoint::from_action(a))
}

fn paging(params: &Params) -> (usize, usize) {
    let number = |key: &str, default: usize| {
        params
            .get(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    };
    (number("limit", DEFAULT_LIMIT), number("offset", 0))
}

fn reply<T: Serialize>(reply: &Reply<T>) -> Response {
    match codec::encode_reply(reply) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode reply");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn rejected(status: StatusCode, message: &str) -> Response {
    let mut response = reply::<()>(&Reply::Rejected {
        message: Some(message.to_owned()),
    });
    *response.status_mut() = status;
    response
}

fn invalid_token() -> Response {
    rejected(StatusCode::OK, "Invalid token")
}
