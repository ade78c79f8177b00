//! Integration tests for conversation loading and merging.
//!
//! Covers:
//! 1. Replace then Append pages 30 + 30 into 60 ordered messages.
//! 2. Merging the same batch twice changes nothing.
//! 3. A page that arrives after a peer switch is discarded.
//! 4. Backend quirks (string ids, MySQL datetimes) decode and sort.

use std::sync::Arc;
use std::time::Duration;

use pollchat::api::Api;
use pollchat::conversation::{ConversationConfig, ConversationStore};
use pollchat::event::SyncEvent;
use pollchat::pagination::LoadMode;
use pollchat::session::{Credential, Session, SessionHandle};
use pollchat::transport::scripted::{ScriptedReply, ScriptedTransport};
use pollchat_proto::api::{Endpoint, MessageList};
use pollchat_proto::ids::{MessageId, UserId};
use pollchat_proto::message::{Message, SenderSnapshot};
use pollchat_proto::time::Timestamp;
use pollchat_proto::user::CurrentUser;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const ME: UserId = UserId::new(1);
const BOB: UserId = UserId::new(2);
const CAROL: UserId = UserId::new(3);

fn message(id: i64, from: UserId, to: UserId, secs: i64) -> Message {
    Message {
        id: MessageId::new(id),
        sender_id: from,
        receiver_id: to,
        body: format!("message {id}"),
        created_at: Timestamp::from_unix_millis(1_700_000_000_000 + secs * 1000).unwrap(),
        sender: SenderSnapshot {
            username: format!("user{}", from.get()),
            avatar: String::new(),
        },
        client_token: None,
    }
}

/// Messages `first..=last` with bob, one second apart, newest first (as the
/// backend might list them).
fn bob_range(first: i64, last: i64) -> Vec<Message> {
    (first..=last).rev().map(|i| message(i, BOB, ME, i)).collect()
}

fn page(messages: Vec<Message>) -> ScriptedReply {
    ScriptedReply::accepted(&MessageList { messages })
}

fn store(
    transport: &ScriptedTransport,
) -> (Arc<ConversationStore<ScriptedTransport>>, mpsc::Receiver<SyncEvent>) {
    let session = Arc::new(SessionHandle::new());
    session.begin(Session::new(
        CurrentUser {
            id: ME,
            username: "me".into(),
            avatar: String::new(),
        },
        Credential::new("tok"),
    ));
    let api = Arc::new(Api::new(transport.clone(), Duration::from_secs(10)));
    let (tx, rx) = mpsc::channel(64);
    let store = ConversationStore::new(api, session, ConversationConfig::default(), tx);
    (Arc::new(store), rx)
}

fn ids(store: &ConversationStore<ScriptedTransport>) -> Vec<i64> {
    store.messages().iter().map(|m| m.id.get()).collect()
}

// ---------------------------------------------------------------------------
// Pagination
// ---------------------------------------------------------------------------

#[tokio::test]
async fn replace_then_append_yields_sixty_ordered_messages() {
    let t = ScriptedTransport::new();
    t.push(Endpoint::ChatMessages, page(bob_range(31, 60)));
    t.push(Endpoint::ChatMessages, page(bob_range(1, 30)));
    let (store, _rx) = store(&t);

    assert_eq!(store.load(BOB, 0, 30, LoadMode::Replace).await.unwrap(), 30);
    assert_eq!(store.cursor().offset, 30);

    assert_eq!(store.load_older().await.unwrap(), 30);
    assert_eq!(store.cursor().offset, 60);
    assert_eq!(store.len(), 60);
    assert_eq!(ids(&store), (1..=60).collect::<Vec<_>>());

    let calls = t.calls();
    assert_eq!(calls[0].request.query_param("offset"), Some("0"));
    assert_eq!(calls[1].request.query_param("offset"), Some("30"));
    assert_eq!(calls[1].request.query_param("limit"), Some("30"));
}

#[tokio::test]
async fn replace_discards_previous_conversation() {
    let t = ScriptedTransport::new();
    t.push(Endpoint::ChatMessages, page(bob_range(1, 3)));
    t.push(
        Endpoint::ChatMessages,
        page(vec![message(10, CAROL, ME, 5)]),
    );
    let (store, _rx) = store(&t);

    store.load(BOB, 0, 30, LoadMode::Replace).await.unwrap();
    store.load(CAROL, 0, 30, LoadMode::Replace).await.unwrap();

    assert_eq!(store.active_peer(), Some(CAROL));
    assert_eq!(ids(&store), vec![10]);
}

#[tokio::test]
async fn failed_append_keeps_messages_and_cursor() {
    let t = ScriptedTransport::new();
    t.push(Endpoint::ChatMessages, page(bob_range(1, 3)));
    t.push(
        Endpoint::ChatMessages,
        ScriptedReply::rejected(Some("database busy")),
    );
    let (store, _rx) = store(&t);

    store.load(BOB, 0, 30, LoadMode::Replace).await.unwrap();
    assert!(store.load_older().await.is_err());
    assert_eq!(store.len(), 3);
    assert_eq!(store.cursor().offset, 30);
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

#[tokio::test]
async fn merge_is_idempotent_and_sorted() {
    let t = ScriptedTransport::new();
    t.push(Endpoint::ChatMessages, page(vec![]));
    let (store, mut rx) = store(&t);
    store.load(BOB, 0, 30, LoadMode::Replace).await.unwrap();
    while rx.try_recv().is_ok() {}

    let batch = vec![
        message(5, BOB, ME, 50),
        message(2, ME, BOB, 20),
        message(9, BOB, ME, 90),
    ];
    let first = store.merge(&batch);
    assert_eq!(first.inserted, 3);
    let snapshot = store.messages();

    let second = store.merge(&batch);
    assert_eq!(second.inserted, 0);
    assert_eq!(store.messages(), snapshot);
    assert_eq!(ids(&store), vec![2, 5, 9]);

    // Only the first merge is reported.
    assert!(matches!(
        rx.try_recv(),
        Ok(SyncEvent::MessagesMerged { inserted: 3, .. })
    ));
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn overlapping_windows_do_not_duplicate() {
    let t = ScriptedTransport::new();
    t.push(Endpoint::ChatMessages, page(bob_range(1, 20)));
    let (store, _rx) = store(&t);
    store.load(BOB, 0, 30, LoadMode::Replace).await.unwrap();

    store.merge(&bob_range(5, 25));
    assert_eq!(ids(&store), (1..=25).collect::<Vec<_>>());
}

// ---------------------------------------------------------------------------
// Stale results
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn page_arriving_after_peer_switch_is_discarded() {
    let t = ScriptedTransport::new();
    t.push(
        Endpoint::ChatMessages,
        page(bob_range(1, 5)).after(Duration::from_secs(5)),
    );
    t.push(
        Endpoint::ChatMessages,
        page(vec![message(100, CAROL, ME, 1)]),
    );
    let (store, _rx) = store(&t);

    let slow = {
        let store = Arc::clone(&store);
        tokio::spawn(async move { store.load(BOB, 0, 30, LoadMode::Replace).await })
    };
    while t.calls_to(Endpoint::ChatMessages) == 0 {
        tokio::task::yield_now().await;
    }

    store.load(CAROL, 0, 30, LoadMode::Replace).await.unwrap();
    assert_eq!(slow.await.unwrap().unwrap(), 0);

    assert_eq!(store.active_peer(), Some(CAROL));
    assert_eq!(ids(&store), vec![100]);
}

// ---------------------------------------------------------------------------
// Wire leniency
// ---------------------------------------------------------------------------

#[tokio::test]
async fn backend_quirks_decode_and_sort() {
    let t = ScriptedTransport::new();
    t.push(
        Endpoint::ChatMessages,
        ScriptedReply::raw(
            br#"{"success":"1","messages":[
                {"id":"8","sender_id":"2","receiver_id":"1","message":"later",
                 "created_at":"2024-05-01 10:00:05","sender_username":"bob","sender_avatar":null},
                {"id":7,"sender_id":2,"receiver_id":1,"message":"earlier",
                 "created_at":"2024-05-01T10:00:00Z","sender_username":"bob"}
            ]}"#
            .to_vec(),
        ),
    );
    let (store, _rx) = store(&t);

    store.load(BOB, 0, 30, LoadMode::Replace).await.unwrap();
    let messages = store.messages();
    assert_eq!(ids(&store), vec![7, 8]);
    assert_eq!(messages[1].body, "later");
    assert_eq!(messages[1].sender.avatar, "");
    assert_eq!(messages[0].sender.username, "bob");
}

#[tokio::test]
async fn malformed_page_is_a_parse_error() {
    let t = ScriptedTransport::new();
    t.push(
        Endpoint::ChatMessages,
        ScriptedReply::raw(b"<b>Fatal error</b>".to_vec()),
    );
    let (store, _rx) = store(&t);

    let err = store
        .load(BOB, 0, 30, LoadMode::Replace)
        .await
        .unwrap_err();
    assert!(matches!(err, pollchat::error::SyncError::Parse(_)));
    assert!(store.is_empty());
}
