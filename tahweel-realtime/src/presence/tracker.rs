//! Per-consumer presence adapter.

use tokio::sync::watch;

use super::{OnlineSnapshot, PresenceRegistry};

/// A mounted presence consumer.
///
/// Mounting activates the registry; dropping the tracker deactivates it.
/// The tracker starts out holding whatever the registry already knows, so a
/// consumer mounted after others never sees an empty flash.
pub struct PresenceTracker {
    registry: PresenceRegistry,
    snapshot: watch::Receiver<OnlineSnapshot>,
}

impl PresenceTracker {
    /// Activates `registry` and snapshots its current state.
    #[must_use]
    pub fn mount(registry: &PresenceRegistry) -> Self {
        let mut snapshot = registry.watch();
        registry.activate();
        snapshot.borrow_and_update();
        Self {
            registry: registry.clone(),
            snapshot,
        }
    }

    /// The online set as of the latest published snapshot.
    #[must_use]
    pub fn online_users(&self) -> OnlineSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Online user ids, sorted.
    #[must_use]
    pub fn online_user_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.snapshot.borrow().iter().cloned().collect();
        ids.sort_unstable();
        ids
    }

    /// Whether presence is being tracked over a live connection.
    #[must_use]
    pub fn is_tracking(&self) -> bool {
        self.registry.is_subscribed() && self.registry.transport_connected()
    }

    /// Whether `user_id` is online right now.
    ///
    /// Reads the registry at call time rather than the tracker's snapshot.
    #[must_use]
    pub fn is_user_online(&self, user_id: &str) -> bool {
        self.registry.is_online(user_id)
    }

    /// Whether the initial snapshot has arrived.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.registry.is_ready()
    }

    /// Waits for the next published snapshot. Returns `false` if the
    /// registry has gone away.
    pub async fn changed(&mut self) -> bool {
        self.snapshot.changed().await.is_ok()
    }
}

impl Drop for PresenceTracker {
    fn drop(&mut self) {
        self.registry.deactivate();
    }
}
