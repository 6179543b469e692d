//! Integration tests for typing indicators over a loopback transport.
//!
//! Verifies:
//! 1. Entries expire exactly at the ttl boundary and are swept from storage.
//! 2. Typing-start emission is throttled.
//! 3. The idle timer sends exactly one stop and is reset by new keystrokes.
//! 4. The local user's own events never create entries.
//! 5. Conversation and room adapters keep their teardown behavior apart.

use std::sync::Arc;
use std::time::Duration;

use tahweel_proto::{Channel, ClientEvent, ServerEvent, TypingEvent};
use tahweel_realtime::transport::loopback::LoopbackTransport;
use tahweel_realtime::typing::{
    ConversationTyping, RoomTyping, TypingRegistry, TypingSession, TypingTimings,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn setup() -> (LoopbackTransport, TypingRegistry) {
    let transport = LoopbackTransport::new();
    let registry = TypingRegistry::new(
        Arc::new(transport.clone()),
        "me",
        TypingTimings::default(),
    );
    (transport, registry)
}

fn start(channel: &Channel, user_id: &str, username: &str) -> ServerEvent {
    ServerEvent::TypingStart(TypingEvent {
        channel: channel.clone(),
        user_id: user_id.to_string(),
        username: username.to_string(),
    })
}

fn count_starts(transport: &LoopbackTransport) -> usize {
    transport
        .emitted()
        .iter()
        .filter(|e| matches!(e, ClientEvent::Typing { .. }))
        .count()
}

fn count_stops(transport: &LoopbackTransport) -> usize {
    transport
        .emitted()
        .iter()
        .filter(|e| matches!(e, ClientEvent::StopTyping { .. }))
        .count()
}

async fn advance_ms(ms: u64) {
    tokio::time::advance(Duration::from_millis(ms)).await;
}

// ---------------------------------------------------------------------------
// Expiry
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn entry_expires_at_ttl() {
    let (transport, registry) = setup();
    let channel = Channel::conversation("dm");
    registry.subscribe(&channel);
    transport.deliver(&start(&channel, "peer", "Peer"));

    advance_ms(2999).await;
    assert!(registry.is_typing(&channel));

    advance_ms(2).await;
    assert!(!registry.is_typing(&channel));
}

#[tokio::test(start_paused = true)]
async fn refresh_extends_entry() {
    let (transport, registry) = setup();
    let channel = Channel::room_typing("lobby");
    registry.subscribe(&channel);

    transport.deliver(&start(&channel, "peer", "Peer"));
    advance_ms(2500).await;
    transport.deliver(&start(&channel, "peer", "Peer"));
    advance_ms(2500).await;

    assert!(registry.is_typing(&channel));
    assert_eq!(registry.typing_users(&channel).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn sweep_runs_in_background() {
    let (transport, registry) = setup();
    let channel = Channel::conversation("dm");
    registry.subscribe(&channel);
    let mut version = registry.watch();
    transport.deliver(&start(&channel, "peer", "Peer"));
    version.borrow_and_update();

    // ttl plus one sweep interval bounds how long a stale entry lingers.
    tokio::time::sleep(Duration::from_millis(4000)).await;
    assert!(version.has_changed().unwrap());
    assert_eq!(registry.sweep(), 0);
}

// ---------------------------------------------------------------------------
// Throttle and idle stop
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn emissions_within_throttle_window_collapse() {
    let (transport, registry) = setup();
    let mut session = TypingSession::new(registry, Channel::conversation("dm"), "Me");

    assert!(session.emit_typing());
    advance_ms(200).await;
    assert!(!session.emit_typing());
    assert_eq!(count_starts(&transport), 1);

    advance_ms(300).await;
    assert!(session.emit_typing());
    assert_eq!(count_starts(&transport), 2);
}

#[tokio::test(start_paused = true)]
async fn idle_sends_exactly_one_stop() {
    let (transport, registry) = setup();
    let mut session = TypingSession::new(registry, Channel::conversation("dm"), "Me");

    session.handle_typing();
    tokio::time::sleep(Duration::from_millis(2100)).await;
    assert_eq!(count_stops(&transport), 1);

    tokio::time::sleep(Duration::from_millis(5000)).await;
    assert_eq!(count_stops(&transport), 1);
    assert!(!session.has_pending_stop());
}

#[tokio::test(start_paused = true)]
async fn keystrokes_reset_idle_timer() {
    let (transport, registry) = setup();
    let mut session = TypingSession::new(registry, Channel::conversation("dm"), "Me");

    session.handle_typing();
    tokio::time::sleep(Duration::from_millis(1500)).await;
    session.handle_typing();
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(count_stops(&transport), 0);

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(count_stops(&transport), 1);
}

#[tokio::test(start_paused = true)]
async fn steady_typing_is_throttled() {
    let (transport, registry) = setup();
    let mut session = TypingSession::new(registry, Channel::room_typing("lobby"), "Me");

    // Ten keystrokes 100 ms apart span 900 ms: starts at 0 and 500 only.
    for _ in 0..10 {
        session.handle_typing();
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(count_starts(&transport), 2);
}

// ---------------------------------------------------------------------------
// Self filtering
// ---------------------------------------------------------------------------

#[tokio::test]
async fn own_typing_never_shows() {
    let (transport, registry) = setup();
    let channel = Channel::conversation("dm");
    let conversation = ConversationTyping::mount(&registry, "dm", "Me");

    transport.deliver(&start(&channel, "me", "Me"));
    assert!(!conversation.is_other_user_typing());
    assert!(conversation.typing_user().is_none());

    transport.deliver(&start(&channel, "peer", "Peer"));
    assert!(conversation.is_other_user_typing());
}

// ---------------------------------------------------------------------------
// Adapters
// ---------------------------------------------------------------------------

#[tokio::test]
async fn conversation_keeps_subscription_room_releases_it() {
    let transport = LoopbackTransport::new();
    let shared = TypingRegistry::new(
        Arc::new(transport.clone()),
        "me",
        TypingTimings::default(),
    );

    drop(ConversationTyping::mount(&shared, "dm", "Me"));

    let mut rooms = RoomTyping::mount(
        Arc::new(transport.clone()),
        "me",
        "Me",
        TypingTimings::default(),
    );
    rooms.watch_room("lobby");
    drop(rooms);

    assert_eq!(transport.unsubscribe_count(&Channel::conversation("dm")), 0);
    assert_eq!(transport.unsubscribe_count(&Channel::room_typing("lobby")), 1);
}

#[tokio::test]
async fn room_events_stay_out_of_conversation_registry() {
    let transport = LoopbackTransport::new();
    let shared = TypingRegistry::new(
        Arc::new(transport.clone()),
        "me",
        TypingTimings::default(),
    );
    let _conversation = ConversationTyping::mount(&shared, "dm", "Me");
    let mut rooms = RoomTyping::mount(
        Arc::new(transport.clone()),
        "me",
        "Me",
        TypingTimings::default(),
    );
    rooms.watch_room("lobby");

    let lobby = Channel::room_typing("lobby");
    transport.deliver(&start(&lobby, "peer", "Peer"));

    assert!(rooms.is_typing_in_conversation("lobby"));
    assert_eq!(rooms.get_typing_username("lobby").as_deref(), Some("Peer"));
    assert!(!shared.is_typing(&lobby));
}

#[tokio::test]
async fn room_typing_emits_on_room_channel() {
    let transport = LoopbackTransport::new();
    let mut rooms = RoomTyping::mount(
        Arc::new(transport.clone()),
        "me",
        "Me",
        TypingTimings::default(),
    );
    rooms.watch_room("lobby");

    assert!(rooms.handle_typing("lobby"));
    assert!(rooms.stop_typing("lobby"));

    assert_eq!(
        transport.emitted(),
        vec![
            ClientEvent::Typing {
                channel: Channel::room_typing("lobby"),
                display_name: "Me".to_string(),
            },
            ClientEvent::StopTyping {
                channel: Channel::room_typing("lobby"),
            },
        ]
    );
}

#[tokio::test]
async fn typing_failures_do_not_propagate() {
    let (transport, registry) = setup();
    transport.set_connected(false);
    let mut conversation = ConversationTyping::mount(&registry, "dm", "Me");

    conversation.handle_typing();
    conversation.stop_typing();
    assert!(transport.emitted().is_empty());
}
