//! Integration tests for the presence registry and its trackers.
//!
//! Verifies:
//! 1. Concurrent trackers share one presence subscription.
//! 2. Snapshot, online and offline events drive the online set.
//! 3. Full unmount resets state; remount resubscribes and waits for a new
//!    snapshot.
//! 4. Events from a previous activation are ignored.
//! 5. Presence keeps working when the transport refuses calls.

use std::sync::Arc;

use tahweel_proto::{Channel, EventKind, ServerEvent};
use tahweel_realtime::presence::{PresenceRegistry, PresenceTracker};
use tahweel_realtime::transport::RealtimeTransport;
use tahweel_realtime::transport::loopback::LoopbackTransport;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn setup() -> (LoopbackTransport, PresenceRegistry) {
    let transport = LoopbackTransport::new();
    let registry = PresenceRegistry::new(Arc::new(transport.clone()));
    (transport, registry)
}

fn snapshot(ids: &[&str]) -> ServerEvent {
    ServerEvent::PresenceInitial {
        user_ids: ids.iter().map(ToString::to_string).collect(),
    }
}

fn online(id: &str) -> ServerEvent {
    ServerEvent::UserOnline {
        user_id: id.to_string(),
    }
}

fn offline(id: &str) -> ServerEvent {
    ServerEvent::UserOffline {
        user_id: id.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Subscription sharing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn concurrent_trackers_share_one_subscription() {
    let (transport, registry) = setup();

    let first = PresenceTracker::mount(&registry);
    let second = PresenceTracker::mount(&registry);
    let third = PresenceTracker::mount(&registry);

    assert_eq!(registry.subscriber_count(), 3);
    assert_eq!(transport.subscribe_count(&Channel::Presence), 1);
    assert_eq!(transport.listener_count(EventKind::PresenceInitial), 1);

    drop(first);
    drop(second);
    assert!(registry.is_subscribed());
    assert_eq!(registry.subscriber_count(), 1);

    drop(third);
    assert!(!registry.is_subscribed());
    assert_eq!(transport.listener_count(EventKind::PresenceInitial), 0);
}

#[tokio::test]
async fn late_tracker_sees_existing_state() {
    let (transport, registry) = setup();
    let _early = PresenceTracker::mount(&registry);
    transport.deliver(&snapshot(&["A", "B"]));

    let late = PresenceTracker::mount(&registry);
    assert!(late.is_ready());
    assert_eq!(late.online_user_ids(), vec!["A", "B"]);
}

// ---------------------------------------------------------------------------
// Online set
// ---------------------------------------------------------------------------

#[tokio::test]
async fn snapshot_populates_online_set() {
    let (transport, registry) = setup();
    let tracker = PresenceTracker::mount(&registry);
    assert!(!tracker.is_ready());

    transport.deliver(&snapshot(&["A", "B", "C"]));

    assert!(tracker.is_user_online("A"));
    assert!(!tracker.is_user_online("D"));
    assert!(tracker.is_ready());
    assert!(tracker.is_tracking());
}

#[tokio::test]
async fn online_and_offline_events_apply_incrementally() {
    let (transport, registry) = setup();
    let _tracker = PresenceTracker::mount(&registry);
    transport.deliver(&snapshot(&["A", "B", "C"]));

    transport.deliver(&online("D"));
    transport.deliver(&offline("A"));

    let mut ids: Vec<String> = registry.online_users().iter().cloned().collect();
    ids.sort();
    assert_eq!(ids, vec!["B", "C", "D"]);
}

#[tokio::test]
async fn add_remove_order_does_not_matter() {
    for remove_first in [false, true] {
        let (transport, registry) = setup();
        let _tracker = PresenceTracker::mount(&registry);
        transport.deliver(&snapshot(&["A", "B"]));

        if remove_first {
            transport.deliver(&offline("A"));
            transport.deliver(&online("C"));
        } else {
            transport.deliver(&online("C"));
            transport.deliver(&offline("A"));
        }

        let mut ids: Vec<String> = registry.online_users().iter().cloned().collect();
        ids.sort();
        assert_eq!(ids, vec!["B", "C"], "remove_first = {remove_first}");
    }
}

#[tokio::test]
async fn redundant_events_do_not_publish() {
    let (transport, registry) = setup();
    let _tracker = PresenceTracker::mount(&registry);
    transport.deliver(&snapshot(&["A"]));
    let before = registry.online_users();

    transport.deliver(&online("A"));
    transport.deliver(&offline("Z"));

    assert!(Arc::ptr_eq(&before, &registry.online_users()));
}

#[tokio::test]
async fn tracker_wakes_on_change() {
    let (transport, registry) = setup();
    let mut tracker = PresenceTracker::mount(&registry);

    transport.deliver(&snapshot(&["A"]));
    assert!(tracker.changed().await);
    assert_eq!(tracker.online_user_ids(), vec!["A"]);
}

// ---------------------------------------------------------------------------
// Reset and remount
// ---------------------------------------------------------------------------

#[tokio::test]
async fn full_unmount_resets_and_remount_resubscribes() {
    let (transport, registry) = setup();
    let tracker = PresenceTracker::mount(&registry);
    transport.deliver(&snapshot(&["A", "B"]));
    drop(tracker);

    assert_eq!(registry.subscriber_count(), 0);
    assert!(registry.online_users().is_empty());
    assert!(!registry.is_ready());

    let tracker = PresenceTracker::mount(&registry);
    assert_eq!(transport.subscribe_count(&Channel::Presence), 2);
    assert!(!tracker.is_ready());
    assert!(!tracker.is_user_online("A"));

    transport.deliver(&snapshot(&["C"]));
    assert!(tracker.is_ready());
    assert_eq!(tracker.online_user_ids(), vec!["C"]);
}

#[tokio::test]
async fn events_between_activations_are_ignored() {
    let (transport, registry) = setup();
    drop(PresenceTracker::mount(&registry));

    transport.deliver(&snapshot(&["A"]));
    transport.deliver(&online("B"));

    assert!(registry.online_users().is_empty());
    assert!(!registry.is_ready());
}

#[tokio::test]
async fn extra_deactivate_is_harmless() {
    let (transport, registry) = setup();
    registry.deactivate();
    assert_eq!(registry.subscriber_count(), 0);

    let _tracker = PresenceTracker::mount(&registry);
    assert_eq!(registry.subscriber_count(), 1);
    assert_eq!(transport.subscribe_count(&Channel::Presence), 1);
}

// ---------------------------------------------------------------------------
// Degraded transport
// ---------------------------------------------------------------------------

#[tokio::test]
async fn disconnected_transport_still_counts_consumers() {
    let (transport, registry) = setup();
    transport.set_connected(false);

    let tracker = PresenceTracker::mount(&registry);
    assert_eq!(registry.subscriber_count(), 1);
    assert!(registry.is_subscribed());
    assert!(!tracker.is_tracking());
    assert!(!transport.is_connected());

    transport.set_connected(true);
    transport.deliver(&snapshot(&["A"]));
    assert!(tracker.is_tracking());
    assert!(tracker.is_user_online("A"));
}
