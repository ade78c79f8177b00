//! End-to-end tests: `ChatClient` over `HttpTransport` against the
//! development backend on a loopback port.
//!
//! Covers:
//! 1. Sign-in, contact listing and an unread counter.
//! 2. A sent message reaches the peer through its poll.
//! 3. Echoed client tokens and content matching both leave one copy.
//! 4. A revoked token is detected as an expired session.

use std::sync::Arc;
use std::time::Duration;

use pollchat::client::ChatClient;
use pollchat::config::SyncConfig;
use pollchat::event::SyncEvent;
use pollchat::outbound::SendOutcome;
use pollchat::session::{Credential, Session, SessionStatus};
use pollchat::transport::http::HttpTransport;
use pollchat_devserver::server::{self, ServerState};
use pollchat_devserver::store::{Backend, SeedUser};
use pollchat_proto::ids::UserId;
use pollchat_proto::user::CurrentUser;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const ALICE: UserId = UserId::new(1);
const BOB: UserId = UserId::new(2);

async fn start_backend(echo_client_token: bool) -> (String, Arc<Backend>) {
    let backend = Arc::new(
        Backend::new(vec![
            SeedUser::new(1, "alice", "alice-token"),
            SeedUser::new(2, "bob", "bob-token"),
            SeedUser::new(3, "carol", "carol-token"),
        ])
        .with_echo_client_token(echo_client_token),
    );
    let (addr, _handle) = server::start_server("127.0.0.1:0", ServerState::new(Arc::clone(&backend)))
        .await
        .expect("devserver should bind");
    (format!("http://{addr}/"), backend)
}

/// A signed-in client with its poll loop stopped; tests poll by hand.
async fn sign_in(
    base_url: &str,
    id: UserId,
    name: &str,
) -> (ChatClient<HttpTransport>, mpsc::Receiver<SyncEvent>) {
    let transport = HttpTransport::new(base_url).expect("valid base URL");
    let (client, rx) = ChatClient::new(transport, SyncConfig::default());
    let session = Session::new(
        CurrentUser {
            id,
            username: name.into(),
            avatar: String::new(),
        },
        Credential::new(format!("{name}-token")),
    );
    assert_eq!(client.begin_session(session).await, SessionStatus::Valid);
    client.stop_polling();
    (client, rx)
}

fn bodies(client: &ChatClient<HttpTransport>) -> Vec<String> {
    client.messages().into_iter().map(|m| m.body).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sign_in_lists_other_users() {
    let (url, _backend) = start_backend(true).await;
    let (alice, _rx) = sign_in(&url, ALICE, "alice").await;

    let names: Vec<String> = alice.contacts().into_iter().map(|u| u.username).collect();
    assert_eq!(names, vec!["bob", "carol"]);
}

#[tokio::test]
async fn message_reaches_peer_through_poll() {
    let (url, _backend) = start_backend(true).await;
    let (alice, _arx) = sign_in(&url, ALICE, "alice").await;
    let (bob, _brx) = sign_in(&url, BOB, "bob").await;

    alice.select_peer(BOB).await.unwrap();
    bob.select_peer(ALICE).await.unwrap();

    let outcome = alice.submit("hello bob").await.unwrap();
    assert!(matches!(outcome, SendOutcome::Confirmed { .. }));

    let report = bob.poll_now().await;
    assert!(report.active);
    assert_eq!(bodies(&bob), vec!["hello bob"]);
    assert_eq!(bob.messages()[0].sender.username, "alice");

    bob.submit("hi alice").await.unwrap();
    alice.poll_now().await;
    assert_eq!(bodies(&alice), vec!["hello bob", "hi alice"]);
    assert!(alice.messages().iter().all(|m| m.id.is_confirmed()));
}

#[tokio::test]
async fn unread_counter_clears_on_open() {
    let (url, _backend) = start_backend(true).await;
    let (alice, _arx) = sign_in(&url, ALICE, "alice").await;
    alice.select_peer(BOB).await.unwrap();
    alice.submit("one").await.unwrap();
    alice.submit("two").await.unwrap();

    let (bob, _brx) = sign_in(&url, BOB, "bob").await;
    let from_alice = bob.directory().get(ALICE).unwrap();
    assert_eq!(from_alice.unread_count, 2);
    assert_eq!(from_alice.last_message.as_deref(), Some("two"));

    bob.select_peer(ALICE).await.unwrap();
    assert_eq!(bob.directory().get(ALICE).unwrap().unread_count, 0);
    assert_eq!(bodies(&bob), vec!["one", "two"]);

    // The backend marked them read, so a fresh listing agrees.
    bob.search_contacts("").await.unwrap();
    assert_eq!(bob.directory().get(ALICE).unwrap().unread_count, 0);
}

#[tokio::test]
async fn own_message_is_not_duplicated_by_poll() {
    for echo in [true, false] {
        let (url, _backend) = start_backend(echo).await;
        let (alice, _rx) = sign_in(&url, ALICE, "alice").await;
        alice.select_peer(BOB).await.unwrap();

        alice.submit("just once").await.unwrap();
        alice.poll_now().await;
        alice.poll_now().await;

        assert_eq!(bodies(&alice), vec!["just once"], "echo = {echo}");
    }
}

#[tokio::test]
async fn older_pages_load_from_backend() {
    let (url, _backend) = start_backend(true).await;
    let (alice, _rx) = sign_in(&url, ALICE, "alice").await;
    alice.select_peer(BOB).await.unwrap();
    for i in 0..35 {
        alice.submit(&format!("m{i}")).await.unwrap();
    }

    alice.select_peer(BOB).await.unwrap();
    assert_eq!(alice.messages().len(), 30);
    assert_eq!(alice.messages()[0].body, "m5");

    assert_eq!(alice.load_older_messages().await.unwrap(), 5);
    let messages = alice.messages();
    assert_eq!(messages.len(), 35);
    assert_eq!(messages[0].body, "m0");
    assert_eq!(messages[34].body, "m34");
}

#[tokio::test]
async fn revoked_token_expires_session() {
    let (url, backend) = start_backend(true).await;
    let (alice, mut rx) = sign_in(&url, ALICE, "alice").await;
    alice.select_peer(BOB).await.unwrap();

    assert!(backend.revoke_token("alice-token").await);
    assert_eq!(alice.verify_session().await, SessionStatus::Expired);
    assert!(alice.session().is_none());
    assert!(alice.active_peer().is_none());

    let mut invalidated = false;
    while let Ok(event) = rx.try_recv() {
        invalidated |= event == SyncEvent::SessionInvalidated;
    }
    assert!(invalidated);
}

#[tokio::test]
async fn slow_backend_times_out_send() {
    let backend = Arc::new(Backend::new(vec![
        SeedUser::new(1, "alice", "alice-token"),
        SeedUser::new(2, "bob", "bob-token"),
    ]));
    let state = ServerState::new(Arc::clone(&backend)).with_latency(Duration::from_millis(400));
    let (addr, _handle) = server::start_server("127.0.0.1:0", state).await.unwrap();

    let transport = HttpTransport::new(&format!("http://{addr}/")).unwrap();
    let config = SyncConfig {
        request_timeout: Duration::from_millis(150),
        ..SyncConfig::default()
    };
    let (client, _rx) = ChatClient::new(transport, config);
    let session = Session::new(
        CurrentUser {
            id: ALICE,
            username: "alice".into(),
            avatar: String::new(),
        },
        Credential::new("alice-token"),
    );
    // The heartbeat times out too, which keeps the session unverified.
    assert_eq!(client.begin_session(session).await, SessionStatus::Unverified);
    client.stop_polling();

    // Opening the conversation times out as well, but the peer stays active.
    assert!(client.select_peer(BOB).await.is_err());
    let SendOutcome::Failed(warning) = client.submit("too slow").await.unwrap() else {
        panic!("expected timeout");
    };
    assert_eq!(warning.draft, "too slow");
    assert!(client.messages().is_empty());
}
