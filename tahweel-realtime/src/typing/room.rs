//! Typing adapter for any number of chat rooms.

use std::collections::HashMap;
use std::sync::Arc;

use tahweel_proto::Channel;
use tokio::sync::watch;

use super::{TypingEntry, TypingRegistry, TypingSession, TypingTimings};
use crate::transport::RealtimeTransport;

/// A mounted consumer of several rooms' typing channels.
///
/// Owns its registry. Dropping the adapter unsubscribes every watched room
/// and cancels every idle timer.
pub struct RoomTyping {
    registry: TypingRegistry,
    display_name: String,
    sessions: HashMap<String, TypingSession>,
}

impl RoomTyping {
    /// Creates an adapter watching no rooms yet.
    #[must_use]
    pub fn mount(
        transport: Arc<dyn RealtimeTransport>,
        local_user_id: &str,
        display_name: &str,
        timings: TypingTimings,
    ) -> Self {
        Self {
            registry: TypingRegistry::new(transport, local_user_id, timings),
            display_name: display_name.to_string(),
            sessions: HashMap::new(),
        }
    }

    /// Starts watching `room_id`. Returns `false` if already watched.
    pub fn watch_room(&mut self, room_id: &str) -> bool {
        if self.sessions.contains_key(room_id) {
            return false;
        }
        let channel = Channel::room_typing(room_id);
        self.registry.subscribe(&channel);
        self.sessions.insert(
            room_id.to_string(),
            TypingSession::new(self.registry.clone(), channel, self.display_name.clone()),
        );
        true
    }

    /// Stops watching `room_id`. Returns `false` if it was not watched.
    pub fn unwatch_room(&mut self, room_id: &str) -> bool {
        let Some(session) = self.sessions.remove(room_id) else {
            return false;
        };
        self.registry.unsubscribe(session.channel());
        true
    }

    /// Watched room ids, sorted.
    #[must_use]
    pub fn rooms(&self) -> Vec<&str> {
        let mut rooms: Vec<&str> = self.sessions.keys().map(String::as_str).collect();
        rooms.sort_unstable();
        rooms
    }

    /// Remote users typing in `room_id`, most recent first.
    #[must_use]
    pub fn typing_users(&self, room_id: &str) -> Vec<TypingEntry> {
        self.registry.typing_users(&Channel::room_typing(room_id))
    }

    /// Whether anyone else is typing in `room_id`.
    #[must_use]
    pub fn is_typing_in_conversation(&self, room_id: &str) -> bool {
        self.registry.is_typing(&Channel::room_typing(room_id))
    }

    /// Display name of the most recent typist in `room_id`.
    #[must_use]
    pub fn get_typing_username(&self, room_id: &str) -> Option<String> {
        self.registry.typing_username(&Channel::room_typing(room_id))
    }

    /// Keystroke entry point for `room_id`. Returns `false` if the room is
    /// not watched.
    pub fn handle_typing(&mut self, room_id: &str) -> bool {
        let Some(session) = self.sessions.get_mut(room_id) else {
            tracing::debug!(room_id, "typing in unwatched room ignored");
            return false;
        };
        session.handle_typing();
        true
    }

    /// Explicit stop for `room_id`. Returns `false` if the room is not watched.
    pub fn stop_typing(&mut self, room_id: &str) -> bool {
        let Some(session) = self.sessions.get_mut(room_id) else {
            return false;
        };
        session.stop_typing();
        true
    }

    /// The registry backing this adapter.
    #[must_use]
    pub const fn registry(&self) -> &TypingRegistry {
        &self.registry
    }

    /// A receiver that changes whenever the typing table changes.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<u64> {
        self.registry.watch()
    }
}

impl Drop for RoomTyping {
    fn drop(&mut self) {
        for (_, session) in self.sessions.drain() {
            self.registry.unsubscribe(session.channel());
        }
    }
}
