//! Typing adapter for a single direct-message conversation.

use tahweel_proto::Channel;
use tokio::sync::watch;

use super::{TypingEntry, TypingRegistry, TypingSession};

/// A mounted consumer of one conversation's typing channel.
///
/// Takes a registry shared across mounts. Dropping the adapter cancels its
/// idle timer but leaves the channel subscribed, so navigating away and back
/// keeps the peer's indicator live without a resubscribe. [`RoomTyping`]
/// behaves differently and unsubscribes on drop.
///
/// [`RoomTyping`]: super::RoomTyping
pub struct ConversationTyping {
    registry: TypingRegistry,
    session: TypingSession,
}

impl ConversationTyping {
    /// Subscribes `registry` to the conversation's typing channel.
    #[must_use]
    pub fn mount(registry: &TypingRegistry, conversation_id: &str, display_name: &str) -> Self {
        let channel = Channel::conversation(conversation_id);
        registry.subscribe(&channel);
        Self {
            registry: registry.clone(),
            session: TypingSession::new(registry.clone(), channel, display_name),
        }
    }

    /// The conversation's typing channel.
    #[must_use]
    pub const fn channel(&self) -> &Channel {
        self.session.channel()
    }

    /// The peer currently typing, if any.
    #[must_use]
    pub fn typing_user(&self) -> Option<TypingEntry> {
        self.registry.typing_users(self.channel()).into_iter().next()
    }

    /// Whether the other side of the conversation is typing.
    #[must_use]
    pub fn is_other_user_typing(&self) -> bool {
        self.registry.is_typing(self.channel())
    }

    /// Keystroke entry point; see [`TypingSession::handle_typing`].
    pub fn handle_typing(&mut self) {
        self.session.handle_typing();
    }

    /// Explicit stop, e.g. after the message was sent.
    pub fn stop_typing(&mut self) {
        self.session.stop_typing();
    }

    /// A receiver that changes whenever the typing table changes.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<u64> {
        self.registry.watch()
    }
}
