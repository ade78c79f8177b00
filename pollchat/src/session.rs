//! Session state: the authenticated user and their bearer credential.
//!
//! Credentials are issued elsewhere; this module only holds them, hands
//! them to the transport, and drops them when the backend says the session
//! is gone.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use pollchat_proto::ids::UserId;
use pollchat_proto::user::CurrentUser;
use zeroize::Zeroizing;

use crate::api::Api;
use crate::error::SyncError;
use crate::transport::Transport;

/// Opaque bearer token. Zeroed on drop; never printed.
#[derive(Clone)]
pub struct Credential(Arc<Zeroizing<String>>);

impl Credential {
    /// Wrap a token string.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(Arc::new(Zeroizing::new(token.into())))
    }

    /// The raw token, for attaching to a request.
    #[must_use]
    pub fn expose(&self) -> &str {
        self.0.as_str()
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// An authenticated session.
#[derive(Debug, Clone)]
pub struct Session {
    /// Session owner.
    pub user: CurrentUser,
    /// Bearer credential for every request.
    pub credential: Credential,
}

impl Session {
    /// Pair a user with their credential.
    #[must_use]
    pub const fn new(user: CurrentUser, credential: Credential) -> Self {
        Self { user, credential }
    }
}

/// Outcome of [`SessionHandle::verify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// The backend accepted the credential.
    Valid,
    /// The backend rejected the credential; the session was cleared.
    Expired,
    /// The backend could not be reached; the cached session is kept.
    Unverified,
    /// There was no session to verify.
    Missing,
}

/// Shared, swappable slot for the current [`Session`].
///
/// The epoch increases on every [`begin`](Self::begin) and
/// [`end`](Self::end) so in-flight work can tell whether the session it
/// started under is still the current one.
#[derive(Debug, Default)]
pub struct SessionHandle {
    slot: RwLock<Option<Session>>,
    epoch: AtomicU64,
}

impl SessionHandle {
    /// An empty handle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `session`, replacing any previous one.
    pub fn begin(&self, session: Session) {
        tracing::info!(user_id = %session.user.id, "session started");
        let mut slot = self.slot.write();
        *slot = Some(session);
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }

    /// Drop the current session. Returns `true` if there was one.
    pub fn end(&self) -> bool {
        let mut slot = self.slot.write();
        let had = slot.take().is_some();
        if had {
            self.epoch.fetch_add(1, Ordering::SeqCst);
            tracing::info!("session ended");
        }
        had
    }

    /// Snapshot of the current session.
    #[must_use]
    pub fn current(&self) -> Option<Session> {
        self.slot.read().clone()
    }

    /// The current credential, if signed in.
    #[must_use]
    pub fn credential(&self) -> Option<Credential> {
        self.slot.read().as_ref().map(|s| s.credential.clone())
    }

    /// The current user, if signed in.
    #[must_use]
    pub fn user(&self) -> Option<CurrentUser> {
        self.slot.read().as_ref().map(|s| s.user.clone())
    }

    /// The current user's id, if signed in.
    #[must_use]
    pub fn user_id(&self) -> Option<UserId> {
        self.slot.read().as_ref().map(|s| s.user.id)
    }

    /// Counter bumped on every session change.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Ask the backend whether the session is still alive.
    ///
    /// A negative answer clears the session. A transport failure keeps it,
    /// so a flaky network does not sign the user out.
    pub async fn verify<T: Transport>(&self, api: &Api<T>) -> SessionStatus {
        let epoch = self.epoch();
        let status = self.check(api).await;
        if status == SessionStatus::Expired {
            self.expire(epoch);
        }
        status
    }

    /// Like [`verify`](Self::verify), but leaves the session in place.
    /// The caller decides whether to [`expire`](Self::expire) it.
    pub async fn check<T: Transport>(&self, api: &Api<T>) -> SessionStatus {
        let Some(credential) = self.credential() else {
            return SessionStatus::Missing;
        };

        match api.heartbeat(&credential).await {
            Ok(true) => SessionStatus::Valid,
            Ok(false) | Err(SyncError::Parse(_)) => {
                tracing::warn!("heartbeat rejected");
                SessionStatus::Expired
            }
            Err(e) => {
                tracing::warn!(error = %e, "heartbeat failed, keeping cached session");
                SessionStatus::Unverified
            }
        }
    }

    /// End the session if it is still the one current at `epoch`.
    /// Returns `true` if it was ended.
    pub fn expire(&self, epoch: u64) -> bool {
        let mut slot = self.slot.write();
        if self.epoch() != epoch || slot.is_none() {
            return false;
        }
        *slot = None;
        self.epoch.fetch_add(1, Ordering::SeqCst);
        tracing::warn!("session invalidated");
        true
    }
}
