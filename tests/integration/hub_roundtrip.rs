//! End-to-end tests: an in-process hub with real `WsTransport` clients.
//!
//! Verifies:
//! 1. Identification handshake, including rejection of an empty user id.
//! 2. Presence snapshot plus online/offline broadcasts reach the registry.
//! 3. Typing signals fan out between two clients with self-filtering.
//! 4. Role changes posted over HTTP reach room subscribers.
//! 5. A hub-side close or a local disconnect marks the transport
//!    disconnected and wakes anyone waiting on `closed`.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Notify;

use tahweel_hub::hub::{self, HubState};
use tahweel_proto::{Channel, EventKind, ServerEvent};
use tahweel_realtime::presence::{PresenceRegistry, PresenceTracker};
use tahweel_realtime::transport::ws::{WsOptions, WsTransport};
use tahweel_realtime::transport::{RealtimeTransport, TransportError};
use tahweel_realtime::typing::{ConversationTyping, TypingRegistry, TypingTimings};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const WAIT: Duration = Duration::from_secs(5);

async fn start_hub() -> (String, Arc<HubState>, tokio::task::JoinHandle<()>) {
    let state = Arc::new(HubState::new());
    let (addr, handle) = hub::start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .unwrap();
    (addr.to_string(), state, handle)
}

async fn connect(addr: &str, user_id: &str) -> Arc<WsTransport> {
    let transport = WsTransport::connect(&format!("ws://{addr}/ws"), user_id, &WsOptions::default())
        .await
        .unwrap();
    Arc::new(transport)
}

/// Polls `condition` until it holds or the wait budget runs out.
async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Waits until the hub has processed everything `transport` sent so far.
///
/// The hub answers every presence subscription with a snapshot and handles
/// one connection's frames in order, so the snapshot acts as a barrier.
async fn flush(transport: &WsTransport) {
    let notify = Arc::new(Notify::new());
    let signal = Arc::clone(&notify);
    let listener = transport.listen(
        EventKind::PresenceInitial,
        Arc::new(move |_: &ServerEvent| signal.notify_one()),
    );
    transport.subscribe(&Channel::Presence).unwrap();
    tokio::time::timeout(WAIT, notify.notified()).await.unwrap();
    listener.release();
}

// ---------------------------------------------------------------------------
// Handshake
// ---------------------------------------------------------------------------

#[tokio::test]
async fn identify_with_empty_user_is_rejected() {
    let (addr, _state, handle) = start_hub().await;

    let result = WsTransport::connect(&format!("ws://{addr}/ws"), "", &WsOptions::default()).await;
    assert!(matches!(result, Err(TransportError::Rejected(_))));

    handle.abort();
}

#[tokio::test]
async fn identified_client_is_online() {
    let (addr, state, handle) = start_hub().await;
    let alice = connect(&addr, "alice").await;

    assert_eq!(alice.user_id(), "alice");
    assert!(alice.is_connected());
    assert!(state.is_online("alice").await);

    handle.abort();
}

// ---------------------------------------------------------------------------
// Presence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn presence_tracks_hub_state() {
    let (addr, _state, handle) = start_hub().await;
    let _bob = connect(&addr, "bob").await;
    let alice = connect(&addr, "alice").await;

    let registry = PresenceRegistry::new(Arc::clone(&alice) as Arc<dyn RealtimeTransport>);
    let tracker = PresenceTracker::mount(&registry);

    eventually("presence snapshot", || tracker.is_ready()).await;
    assert!(tracker.is_user_online("alice"));
    assert!(tracker.is_user_online("bob"));
    assert!(tracker.is_tracking());

    let carol = connect(&addr, "carol").await;
    eventually("carol online", || tracker.is_user_online("carol")).await;

    carol.disconnect();
    eventually("carol offline", || !tracker.is_user_online("carol")).await;
    assert_eq!(tracker.online_user_ids(), vec!["alice", "bob"]);

    handle.abort();
}

// ---------------------------------------------------------------------------
// Typing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn typing_fans_out_between_clients() {
    let (addr, _state, handle) = start_hub().await;
    let alice = connect(&addr, "alice").await;
    let bob = connect(&addr, "bob").await;

    let alice_typing = TypingRegistry::new(
        Arc::clone(&alice) as Arc<dyn RealtimeTransport>,
        "alice",
        TypingTimings::default(),
    );
    let bob_typing = TypingRegistry::new(
        Arc::clone(&bob) as Arc<dyn RealtimeTransport>,
        "bob",
        TypingTimings::default(),
    );
    let mut alice_dm = ConversationTyping::mount(&alice_typing, "dm", "Alice");
    let bob_dm = ConversationTyping::mount(&bob_typing, "dm", "Bob");
    flush(&alice).await;
    flush(&bob).await;

    alice_dm.handle_typing();
    eventually("bob sees alice typing", || bob_dm.is_other_user_typing()).await;
    let entry = bob_dm.typing_user().unwrap();
    assert_eq!(entry.user_id, "alice");
    assert_eq!(entry.username, "Alice");

    // Alice's own echo is filtered.
    flush(&alice).await;
    assert!(!alice_dm.is_other_user_typing());

    alice_dm.stop_typing();
    eventually("bob sees alice stop", || !bob_dm.is_other_user_typing()).await;

    handle.abort();
}

#[tokio::test]
async fn unsubscribed_client_gets_no_typing() {
    let (addr, _state, handle) = start_hub().await;
    let alice = connect(&addr, "alice").await;
    let bob = connect(&addr, "bob").await;

    let alice_typing = TypingRegistry::new(
        Arc::clone(&alice) as Arc<dyn RealtimeTransport>,
        "alice",
        TypingTimings::default(),
    );
    let bob_typing = TypingRegistry::new(
        Arc::clone(&bob) as Arc<dyn RealtimeTransport>,
        "bob",
        TypingTimings::default(),
    );
    let mut alice_dm = ConversationTyping::mount(&alice_typing, "dm", "Alice");
    flush(&alice).await;

    alice_dm.handle_typing();
    flush(&alice).await;
    flush(&bob).await;
    assert!(!bob_typing.is_typing(&Channel::conversation("dm")));

    handle.abort();
}

// ---------------------------------------------------------------------------
// Role changes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn role_change_post_reaches_room_subscribers() {
    let (addr, _state, handle) = start_hub().await;
    let bob = connect(&addr, "bob").await;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let _listener = bob.listen(
        EventKind::MemberRoleChanged,
        Arc::new(move |event: &ServerEvent| sink.lock().push(event.clone())),
    );
    bob.subscribe(&Channel::room("r1")).unwrap();
    flush(&bob).await;

    let body = r#"{"user_id":"carol","role":"admin"}"#;
    let request = format!(
        "POST /rooms/r1/roles HTTP/1.1\r\nHost: {addr}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    let mut stream = tokio::net::TcpStream::connect(&addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();

    assert!(response.starts_with("HTTP/1.1 200"), "response: {response}");
    assert!(response.contains(r#"{"delivered":1}"#), "response: {response}");

    eventually("role change delivered", || !seen.lock().is_empty()).await;
    assert_eq!(
        seen.lock()[0],
        ServerEvent::MemberRoleChanged {
            room_id: "r1".into(),
            user_id: "carol".into(),
            role: "admin".into(),
        }
    );

    handle.abort();
}

// ---------------------------------------------------------------------------
// Disconnect
// ---------------------------------------------------------------------------

#[tokio::test]
async fn hub_close_marks_transport_disconnected() {
    let (addr, state, handle) = start_hub().await;
    let alice = connect(&addr, "alice").await;

    state.close_all_connections().await;
    tokio::time::timeout(WAIT, alice.closed()).await.unwrap();
    assert!(!alice.is_connected());
    assert!(alice.emit(tahweel_proto::ClientEvent::StopTyping {
        channel: Channel::conversation("dm"),
    })
    .is_err());

    handle.abort();
}

#[tokio::test]
async fn idle_client_wakes_when_hub_closes() {
    let (addr, state, handle) = start_hub().await;
    let alice = connect(&addr, "alice").await;

    let waiter = Arc::clone(&alice);
    let closed = tokio::spawn(async move { waiter.closed().await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!closed.is_finished());

    state.close_all_connections().await;
    tokio::time::timeout(WAIT, closed).await.unwrap().unwrap();
    assert!(!alice.is_connected());

    handle.abort();
}

#[tokio::test]
async fn local_disconnect_resolves_closed() {
    let (addr, _state, handle) = start_hub().await;
    let alice = connect(&addr, "alice").await;

    alice.disconnect();
    tokio::time::timeout(WAIT, alice.closed()).await.unwrap();

    handle.abort();
}
