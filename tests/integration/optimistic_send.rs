//! Integration tests for optimistic sends.
//!
//! Covers:
//! 1. A confirmed send leaves exactly one message carrying the server id.
//! 2. A failed send removes the pending entry and restores the draft.
//! 3. A send that outlives the request timeout, or whose caller gives up
//!    on it, rolls back.
//! 4. A poll delivering the server copy before the send reply collapses the
//!    pending entry (by client token, or by content without one).
//! 5. Precondition failures issue no request.

use std::sync::Arc;
use std::time::Duration;

use pollchat::api::Api;
use pollchat::client::ChatClient;
use pollchat::config::SyncConfig;
use pollchat::conversation::{ConversationConfig, ConversationStore};
use pollchat::error::{PreconditionError, SyncError};
use pollchat::event::SyncEvent;
use pollchat::outbound::{OutboundMessageManager, SendOutcome};
use pollchat::pagination::LoadMode;
use pollchat::session::{Credential, Session, SessionHandle, SessionStatus};
use pollchat::transport::TransportError;
use pollchat::transport::scripted::{ScriptedReply, ScriptedTransport};
use pollchat_proto::api::{Endpoint, HeartbeatAck, MessageList, PeerList, SendAck};
use pollchat_proto::ids::{MessageId, UserId};
use pollchat_proto::message::{Message, SenderSnapshot};
use pollchat_proto::user::{CurrentUser, Presence, User};
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const ALICE: UserId = UserId::new(1);
const BOB: UserId = UserId::new(2);

fn alice_session() -> Session {
    Session::new(
        CurrentUser {
            id: ALICE,
            username: "alice".into(),
            avatar: "alice.png".into(),
        },
        Credential::new("alice-token"),
    )
}

fn bob() -> User {
    User {
        id: BOB,
        username: "bob".into(),
        avatar: String::new(),
        presence: Presence::default(),
        unread_count: 0,
        last_message: None,
        last_message_time: None,
    }
}

fn ack(id: i64) -> ScriptedReply {
    ScriptedReply::accepted(&SendAck {
        message_id: MessageId::new(id),
    })
}

/// A signed-in client with bob's (empty) conversation open and the poll
/// loop stopped, so every request in a test is one the test caused.
async fn signed_in(
    t: &ScriptedTransport,
) -> (Arc<ChatClient<ScriptedTransport>>, mpsc::Receiver<SyncEvent>) {
    t.set_fallback(Endpoint::Heartbeat, ScriptedReply::accepted(&HeartbeatAck {}));
    t.set_fallback(
        Endpoint::ChatUsers,
        ScriptedReply::accepted(&PeerList { users: vec![bob()] }),
    );
    t.set_fallback(
        Endpoint::ChatMessages,
        ScriptedReply::accepted(&MessageList::default()),
    );

    let (client, rx) = ChatClient::new(t.clone(), SyncConfig::default());
    assert_eq!(client.begin_session(alice_session()).await, SessionStatus::Valid);
    client.stop_polling();
    client.select_peer(BOB).await.unwrap();
    (Arc::new(client), rx)
}

/// The server's copy of `pending`, as a later poll would list it.
fn server_copy(pending: &Message, id: i64, echo_token: bool) -> Message {
    Message {
        id: MessageId::new(id),
        client_token: if echo_token {
            pending.client_token.clone()
        } else {
            None
        },
        ..pending.clone()
    }
}

async fn wait_for_pending(client: &ChatClient<ScriptedTransport>) -> Message {
    loop {
        if let Some(m) = client.messages().into_iter().find(|m| m.id.is_synthetic()) {
            return m;
        }
        tokio::task::yield_now().await;
    }
}

fn drain(rx: &mut mpsc::Receiver<SyncEvent>) -> Vec<SyncEvent> {
    let mut events = Vec::new();
    while let Ok(e) = rx.try_recv() {
        events.push(e);
    }
    events
}

// ---------------------------------------------------------------------------
// Confirm and roll back
// ---------------------------------------------------------------------------

#[tokio::test]
async fn confirmed_send_holds_one_message_with_server_id() {
    let t = ScriptedTransport::new();
    let (client, mut rx) = signed_in(&t).await;
    drain(&mut rx);
    t.push(Endpoint::SendMessage, ack(42));

    let outcome = client.submit("hello").await.unwrap();
    let SendOutcome::Confirmed { synthetic, id } = outcome else {
        panic!("expected confirmation, got {outcome:?}");
    };
    assert!(synthetic.is_synthetic());
    assert_eq!(id, MessageId::new(42));

    let messages = client.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id, MessageId::new(42));
    assert_eq!(messages[0].body, "hello");
    assert_eq!(messages[0].sender.username, "alice");
    assert_eq!(messages[0].sender.avatar, "alice.png");
    assert_eq!(client.conversation().pending_count(), 0);
    assert!(client.outbound().draft().is_empty());

    assert!(drain(&mut rx).contains(&SyncEvent::MessageConfirmed { synthetic, id }));

    // The server copy arriving later is recognised by id.
    let copy = Message {
        client_token: None,
        ..messages[0].clone()
    };
    t.push(
        Endpoint::ChatMessages,
        ScriptedReply::accepted(&MessageList {
            messages: vec![copy],
        }),
    );
    client.poll_now().await;
    assert_eq!(client.messages().len(), 1);
}

#[tokio::test]
async fn request_carries_body_recipient_and_token() {
    let t = ScriptedTransport::new();
    let (client, _rx) = signed_in(&t).await;
    t.push(Endpoint::SendMessage, ack(7));

    client.submit("  hi bob  ").await.unwrap();

    let call = t.last_call_to(Endpoint::SendMessage).unwrap();
    assert_eq!(call.token, "alice-token");
    let body = call.request.body.unwrap();
    assert_eq!(body["receiver_id"], 2);
    assert_eq!(body["message"], "hi bob");
    assert!(body["client_token"].is_string());
}

#[tokio::test]
async fn failed_send_rolls_back_and_restores_draft() {
    let t = ScriptedTransport::new();
    let (client, mut rx) = signed_in(&t).await;
    drain(&mut rx);
    t.push(
        Endpoint::SendMessage,
        ScriptedReply::failure(TransportError::Unavailable("connection refused".into())),
    );

    let outcome = client.submit("hello").await.unwrap();
    let SendOutcome::Failed(warning) = outcome else {
        panic!("expected failure, got {outcome:?}");
    };
    assert_eq!(warning.draft, "hello");
    assert!(matches!(warning.error, SyncError::Transport(_)));

    assert!(client.messages().is_empty());
    assert_eq!(client.outbound().draft(), "hello");
    assert!(drain(&mut rx).contains(&SyncEvent::MessageRolledBack {
        synthetic: warning.synthetic,
        draft: "hello".into(),
    }));
}

#[tokio::test]
async fn rejected_send_reports_server_reason() {
    let t = ScriptedTransport::new();
    let (client, _rx) = signed_in(&t).await;
    t.push(
        Endpoint::SendMessage,
        ScriptedReply::rejected(Some("Recipient not found")),
    );

    let SendOutcome::Failed(warning) = client.submit("anyone there?").await.unwrap() else {
        panic!("expected failure");
    };
    assert_eq!(
        warning.error,
        SyncError::Rejected {
            message: Some("Recipient not found".into())
        }
    );
    assert_eq!(client.outbound().draft(), "anyone there?");
}

#[tokio::test(start_paused = true)]
async fn send_outliving_timeout_rolls_back() {
    let t = ScriptedTransport::new();
    let (client, _rx) = signed_in(&t).await;
    t.push(Endpoint::SendMessage, ack(5).after(Duration::from_secs(30)));

    let SendOutcome::Failed(warning) = client.submit("slow").await.unwrap() else {
        panic!("expected failure");
    };
    assert_eq!(warning.error, SyncError::Transport(TransportError::Timeout));
    assert!(client.messages().is_empty());
    assert_eq!(client.outbound().draft(), "slow");
}

#[tokio::test(start_paused = true)]
async fn dropped_submit_withdraws_pending_message() {
    let t = ScriptedTransport::new();
    let (client, mut rx) = signed_in(&t).await;
    drain(&mut rx);
    t.push(Endpoint::SendMessage, ack(9).after(Duration::from_secs(5)));

    // The caller gives up before the reply arrives.
    let abandoned = tokio::time::timeout(Duration::from_secs(1), client.submit("hello")).await;
    assert!(abandoned.is_err());
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert!(client.messages().is_empty());
    assert_eq!(client.conversation().pending_count(), 0);
    assert_eq!(client.outbound().draft(), "hello");
    assert!(drain(&mut rx).iter().any(|e| matches!(
        e,
        SyncEvent::MessageRolledBack { synthetic, draft }
            if synthetic.is_synthetic() && draft == "hello"
    )));
}

#[tokio::test]
async fn aborted_submit_task_withdraws_pending_message() {
    let t = ScriptedTransport::new();
    let (client, _rx) = signed_in(&t).await;
    t.push(Endpoint::SendMessage, ack(9).after(Duration::from_secs(5)));

    let sender = Arc::clone(&client);
    let task = tokio::spawn(async move { sender.submit("hello").await });
    wait_for_pending(&client).await;
    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());

    assert!(client.messages().is_empty());
    assert_eq!(client.outbound().draft(), "hello");
}

#[tokio::test]
async fn consecutive_sends_get_distinct_synthetic_ids() {
    let t = ScriptedTransport::new();
    let (client, _rx) = signed_in(&t).await;
    t.push(Endpoint::SendMessage, ack(1));
    t.push(Endpoint::SendMessage, ack(2));

    let first = client.submit("one").await.unwrap();
    let second = client.submit("two").await.unwrap();
    let (
        SendOutcome::Confirmed { synthetic: a, .. },
        SendOutcome::Confirmed { synthetic: b, .. },
    ) = (first, second)
    else {
        panic!("expected confirmations");
    };
    assert!(b < a);
    assert_eq!(client.messages().len(), 2);
}

// ---------------------------------------------------------------------------
// Poll and send reply racing
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn poll_first_collapses_pending_by_token() {
    let t = ScriptedTransport::new();
    let (client, mut rx) = signed_in(&t).await;
    t.push(Endpoint::SendMessage, ack(42).after(Duration::from_secs(2)));

    let send = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.submit("hello").await })
    };
    let pending = wait_for_pending(&client).await;
    drain(&mut rx);

    t.push(
        Endpoint::ChatMessages,
        ScriptedReply::accepted(&MessageList {
            messages: vec![server_copy(&pending, 42, true)],
        }),
    );
    let report = client.poll_now().await;
    assert_eq!(report.merged.unwrap().collapsed, vec![(pending.id, MessageId::new(42))]);
    assert_eq!(client.messages().len(), 1);
    assert_eq!(client.messages()[0].id, MessageId::new(42));

    let outcome = send.await.unwrap().unwrap();
    assert_eq!(
        outcome,
        SendOutcome::Confirmed {
            synthetic: pending.id,
            id: MessageId::new(42)
        }
    );
    assert_eq!(client.messages().len(), 1);

    // Confirmation is reported once, by the poll.
    let confirmations = drain(&mut rx)
        .into_iter()
        .filter(|e| matches!(e, SyncEvent::MessageConfirmed { .. }))
        .count();
    assert_eq!(confirmations, 1);
}

#[tokio::test(start_paused = true)]
async fn poll_first_collapses_pending_by_content() {
    let t = ScriptedTransport::new();
    let (client, _rx) = signed_in(&t).await;
    t.push(Endpoint::SendMessage, ack(43).after(Duration::from_secs(2)));

    let send = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.submit("same words").await })
    };
    let pending = wait_for_pending(&client).await;

    t.push(
        Endpoint::ChatMessages,
        ScriptedReply::accepted(&MessageList {
            messages: vec![server_copy(&pending, 43, false)],
        }),
    );
    client.poll_now().await;
    assert_eq!(client.conversation().pending_count(), 0);

    assert!(matches!(
        send.await.unwrap().unwrap(),
        SendOutcome::Confirmed { .. }
    ));
    let messages = client.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id, MessageId::new(43));
}

#[tokio::test(start_paused = true)]
async fn failure_after_poll_collapse_counts_as_confirmed() {
    let t = ScriptedTransport::new();
    let (client, mut rx) = signed_in(&t).await;
    t.push(
        Endpoint::SendMessage,
        ScriptedReply::failure(TransportError::Unavailable("reset".into()))
            .after(Duration::from_secs(2)),
    );

    let send = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.submit("made it").await })
    };
    let pending = wait_for_pending(&client).await;
    t.push(
        Endpoint::ChatMessages,
        ScriptedReply::accepted(&MessageList {
            messages: vec![server_copy(&pending, 44, true)],
        }),
    );
    client.poll_now().await;
    drain(&mut rx);

    assert_eq!(
        send.await.unwrap().unwrap(),
        SendOutcome::Confirmed {
            synthetic: pending.id,
            id: MessageId::new(44)
        }
    );
    assert_eq!(client.messages().len(), 1);
    assert!(client.outbound().draft().is_empty());
    assert!(
        !drain(&mut rx)
            .iter()
            .any(|e| matches!(e, SyncEvent::MessageRolledBack { .. }))
    );
}

#[tokio::test(start_paused = true)]
async fn unrelated_message_with_same_text_from_peer_is_kept() {
    let t = ScriptedTransport::new();
    let (client, _rx) = signed_in(&t).await;
    t.push(Endpoint::SendMessage, ack(50).after(Duration::from_secs(2)));

    let send = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.submit("ok").await })
    };
    let pending = wait_for_pending(&client).await;

    let from_bob = Message {
        id: MessageId::new(49),
        sender_id: BOB,
        receiver_id: ALICE,
        sender: SenderSnapshot {
            username: "bob".into(),
            avatar: String::new(),
        },
        client_token: None,
        ..pending.clone()
    };
    t.push(
        Endpoint::ChatMessages,
        ScriptedReply::accepted(&MessageList {
            messages: vec![from_bob],
        }),
    );
    client.poll_now().await;
    assert_eq!(client.conversation().pending_count(), 1);

    send.await.unwrap().unwrap();
    let ids: Vec<i64> = client.messages().iter().map(|m| m.id.get()).collect();
    assert_eq!(ids, vec![49, 50]);
}

// ---------------------------------------------------------------------------
// Preconditions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn blank_text_is_refused_without_request() {
    let t = ScriptedTransport::new();
    let (client, _rx) = signed_in(&t).await;
    client.outbound().set_draft("   ");

    assert_eq!(
        client.outbound().submit_draft().await,
        Err(PreconditionError::EmptyMessage)
    );
    assert_eq!(t.calls_to(Endpoint::SendMessage), 0);
    assert!(client.messages().is_empty());
    assert_eq!(client.outbound().draft(), "   ");
}

#[tokio::test]
async fn oversized_text_is_refused_without_request() {
    let t = ScriptedTransport::new();
    let (client, _rx) = signed_in(&t).await;
    let huge = "x".repeat(pollchat_proto::message::MAX_MESSAGE_SIZE + 1);

    assert_eq!(
        client.submit(&huge).await,
        Err(PreconditionError::MessageTooLarge)
    );
    assert_eq!(t.calls_to(Endpoint::SendMessage), 0);
}

#[tokio::test]
async fn no_active_peer_is_refused_without_request() {
    let t = ScriptedTransport::new();
    t.set_fallback(Endpoint::Heartbeat, ScriptedReply::accepted(&HeartbeatAck {}));
    t.set_fallback(Endpoint::ChatUsers, ScriptedReply::accepted(&PeerList::default()));
    let (client, _rx) = ChatClient::new(t.clone(), SyncConfig::default());
    client.begin_session(alice_session()).await;
    client.stop_polling();

    assert_eq!(
        client.submit("hello").await,
        Err(PreconditionError::NoActivePeer)
    );
    assert_eq!(t.calls_to(Endpoint::SendMessage), 0);
}

#[tokio::test]
async fn missing_session_is_refused_without_request() {
    let t = ScriptedTransport::new();
    t.set_fallback(
        Endpoint::ChatMessages,
        ScriptedReply::accepted(&MessageList::default()),
    );
    let api = Arc::new(Api::new(t.clone(), Duration::from_secs(10)));
    let session = Arc::new(SessionHandle::new());
    let (tx, _rx) = mpsc::channel(16);
    let conversation = Arc::new(ConversationStore::new(
        Arc::clone(&api),
        Arc::clone(&session),
        ConversationConfig::default(),
        tx.clone(),
    ));
    let outbound = OutboundMessageManager::new(api, Arc::clone(&session), Arc::clone(&conversation), tx);

    session.begin(alice_session());
    conversation
        .load(BOB, 0, 30, LoadMode::Replace)
        .await
        .unwrap();
    session.end();

    assert_eq!(
        outbound.submit("hello").await,
        Err(PreconditionError::NoSession)
    );
    assert_eq!(t.calls_to(Endpoint::SendMessage), 0);
    assert!(conversation.is_empty());
}
