//! Process-wide presence registry.
//!
//! A single [`PresenceRegistry`] owns the set of online user ids for the
//! whole process. Consumers mount against it with [`PresenceTracker`]; the
//! registry reference-counts them so the transport sees exactly one
//! `subscribe(presence)` per activation, no matter how many consumers
//! mount concurrently.
//!
//! The online set is published as an `Arc<HashSet<String>>` through a
//! `tokio::sync::watch` channel. Every real mutation publishes a fresh
//! `Arc`, so consumers can detect changes with pointer equality.

mod tracker;

use std::collections::HashSet;
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;
use tokio::sync::watch;

use tahweel_proto::{Channel, EventKind, ServerEvent};

use crate::transport::{Listener, RealtimeTransport};

pub use tracker::PresenceTracker;

/// Immutable view of the online set at one point in time.
pub type OnlineSnapshot = Arc<HashSet<String>>;

const PRESENCE_EVENTS: [EventKind; 3] = [
    EventKind::PresenceInitial,
    EventKind::UserOnline,
    EventKind::UserOffline,
];

static GLOBAL: OnceLock<PresenceRegistry> = OnceLock::new();

struct PresenceState {
    subscriber_count: usize,
    subscribed: bool,
    initialized: bool,
    /// Bumped on every reset; handlers from an older activation are ignored.
    generation: u64,
    online: OnlineSnapshot,
    listeners: Vec<Listener>,
}

struct Shared {
    transport: Arc<dyn RealtimeTransport>,
    state: Mutex<PresenceState>,
    snapshot_tx: watch::Sender<OnlineSnapshot>,
}

/// Reference-counted owner of the process-wide online set.
///
/// Cloning is cheap and every clone refers to the same registry.
#[derive(Clone)]
pub struct PresenceRegistry {
    shared: Arc<Shared>,
}

impl PresenceRegistry {
    /// Creates an inactive registry on top of `transport`.
    pub fn new(transport: Arc<dyn RealtimeTransport>) -> Self {
        let empty: OnlineSnapshot = Arc::new(HashSet::new());
        let (snapshot_tx, _) = watch::channel(Arc::clone(&empty));
        Self {
            shared: Arc::new(Shared {
                transport,
                state: Mutex::new(PresenceState {
                    subscriber_count: 0,
                    subscribed: false,
                    initialized: false,
                    generation: 0,
                    online: empty,
                    listeners: Vec::new(),
                }),
                snapshot_tx,
            }),
        }
    }

    /// Registers one more consumer and returns the current online set.
    ///
    /// The first activation after a reset registers the presence listeners
    /// and asks the transport for the presence channel. Later activations
    /// make no transport call.
    pub fn activate(&self) -> OnlineSnapshot {
        let mut state = self.shared.state.lock();
        state.subscriber_count += 1;

        if !state.subscribed {
            state.listeners = self.register_listeners(state.generation);
            state.subscribed = true;
            if let Err(e) = self.shared.transport.subscribe(&Channel::Presence) {
                tracing::warn!(error = %e, "presence subscribe failed");
            }
            tracing::debug!(generation = state.generation, "presence activated");
        }

        Arc::clone(&state.online)
    }

    /// Releases one consumer.
    ///
    /// When the last consumer leaves, the listeners are dropped, the online
    /// set is cleared, and the next [`activate`](Self::activate) starts over
    /// with a fresh snapshot request. Calling this with no active consumers
    /// is a no-op.
    pub fn deactivate(&self) {
        let mut state = self.shared.state.lock();
        if state.subscriber_count == 0 {
            tracing::debug!("presence deactivate without active consumers ignored");
            return;
        }
        state.subscriber_count -= 1;
        if state.subscriber_count > 0 {
            return;
        }

        let listeners = std::mem::take(&mut state.listeners);
        state.subscribed = false;
        state.initialized = false;
        state.generation += 1;
        state.online = Arc::new(HashSet::new());
        drop(state);
        self.shared.publish();
        drop(listeners);
        tracing::debug!("presence deactivated, online set cleared");
    }

    /// Whether `user_id` is in the online set.
    ///
    /// Before [`is_ready`](Self::is_ready) returns `true`, `false` here means
    /// "unknown", not "offline".
    #[must_use]
    pub fn is_online(&self, user_id: &str) -> bool {
        self.shared.state.lock().online.contains(user_id)
    }

    /// Whether the initial snapshot has arrived since the last activation.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.shared.state.lock().initialized
    }

    /// Whether the presence channel has been requested for the current
    /// activation.
    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        self.shared.state.lock().subscribed
    }

    /// Number of mounted consumers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.shared.state.lock().subscriber_count
    }

    /// The current online set.
    #[must_use]
    pub fn online_users(&self) -> OnlineSnapshot {
        Arc::clone(&self.shared.state.lock().online)
    }

    /// A receiver that observes every published snapshot.
    ///
    /// Holding a borrow from the receiver while calling other registry
    /// methods is fine; publishing never holds the state lock while it
    /// waits on the watch lock.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<OnlineSnapshot> {
        self.shared.snapshot_tx.subscribe()
    }

    /// Whether the underlying transport is connected.
    #[must_use]
    pub fn transport_connected(&self) -> bool {
        self.shared.transport.is_connected()
    }

    /// Makes this registry the one read by [`is_user_online_global`] and
    /// [`is_presence_ready`]. Returns `false` if one was already installed.
    pub fn install_global(&self) -> bool {
        GLOBAL.set(self.clone()).is_ok()
    }

    fn register_listeners(&self, generation: u64) -> Vec<Listener> {
        PRESENCE_EVENTS
            .into_iter()
            .map(|kind| {
                let weak: Weak<Shared> = Arc::downgrade(&self.shared);
                self.shared.transport.listen(
                    kind,
                    Arc::new(move |event: &ServerEvent| {
                        if let Some(shared) = weak.upgrade() {
                            shared.apply(generation, event);
                        }
                    }),
                )
            })
            .collect()
    }
}

impl Shared {
    fn apply(&self, generation: u64, event: &ServerEvent) {
        let mut state = self.state.lock();
        if !state.subscribed || state.generation != generation {
            return;
        }

        let next = match event {
            ServerEvent::PresenceInitial { user_ids } => {
                state.initialized = true;
                tracing::debug!(count = user_ids.len(), "presence snapshot received");
                Some(user_ids.iter().cloned().collect::<HashSet<_>>())
            }
            ServerEvent::UserOnline { user_id } if !state.online.contains(user_id) => {
                let mut set = (*state.online).clone();
                set.insert(user_id.clone());
                Some(set)
            }
            ServerEvent::UserOffline { user_id } if state.online.contains(user_id) => {
                let mut set = (*state.online).clone();
                set.remove(user_id);
                Some(set)
            }
            _ => None,
        };

        if let Some(set) = next {
            state.online = Arc::new(set);
            drop(state);
            self.publish();
        }
    }

    /// Publishes the newest online set to watchers.
    ///
    /// Must be called without the state lock; the lock order is watch, then
    /// state.
    fn publish(&self) {
        self.snapshot_tx.send_if_modified(|current| {
            let latest = Arc::clone(&self.state.lock().online);
            if Arc::ptr_eq(current, &latest) {
                false
            } else {
                *current = latest;
                true
            }
        });
    }
}

/// Whether `user_id` is online according to the installed global registry.
///
/// Returns `false` when no registry has been installed.
#[must_use]
pub fn is_user_online_global(user_id: &str) -> bool {
    GLOBAL.get().is_some_and(|r| r.is_online(user_id))
}

/// Whether the installed global registry has received its initial snapshot.
#[must_use]
pub fn is_presence_ready() -> bool {
    GLOBAL.get().is_some_and(PresenceRegistry::is_ready)
}
