//! Events exchanged between realtime clients and the hub.

use serde::{Deserialize, Serialize};

use crate::channel::Channel;

/// Events sent from a client to the hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientEvent {
    /// First frame on every connection.
    ///
    /// The hub answers with [`ServerEvent::Ready`] or [`ServerEvent::Error`].
    Identify {
        /// The authenticated user this connection belongs to.
        user_id: String,
        /// Session token issued by the auth provider, if any.
        token: Option<String>,
    },
    /// Start receiving events for a channel. Subscribing twice is a no-op.
    Subscribe {
        /// Channel to join.
        channel: Channel,
    },
    /// Stop receiving events for a channel. Unknown channels are ignored.
    Unsubscribe {
        /// Channel to leave.
        channel: Channel,
    },
    /// The local user is composing a message on a typing channel.
    Typing {
        /// Typing channel.
        channel: Channel,
        /// Name shown to peers in the indicator.
        display_name: String,
    },
    /// The local user stopped composing.
    StopTyping {
        /// Typing channel.
        channel: Channel,
    },
}

/// A remote user started (or is still) typing on a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingEvent {
    /// Typing channel the event was published on.
    pub channel: Channel,
    /// Id of the typing user (stamped by the hub).
    pub user_id: String,
    /// Display name supplied by the typing user.
    pub username: String,
}

/// Events sent from the hub to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerEvent {
    /// Identification accepted.
    Ready {
        /// The user id bound to this connection.
        user_id: String,
    },
    /// Full list of online users, sent in answer to a presence subscription.
    PresenceInitial {
        /// Every user with at least one live connection.
        user_ids: Vec<String>,
    },
    /// A user opened their first connection.
    UserOnline {
        /// User that came online.
        user_id: String,
    },
    /// A user closed their last connection.
    UserOffline {
        /// User that went offline.
        user_id: String,
    },
    /// Someone is typing.
    TypingStart(TypingEvent),
    /// Someone stopped typing.
    TypingStop {
        /// Typing channel the event was published on.
        channel: Channel,
        /// User that stopped typing.
        user_id: String,
    },
    /// A room member's role changed.
    MemberRoleChanged {
        /// Room the member belongs to.
        room_id: String,
        /// Member whose role changed.
        user_id: String,
        /// New role name (`member`, `moderator`, `admin`, ...).
        role: String,
    },
    /// The hub rejected something this client sent.
    Error {
        /// Human-readable reason.
        reason: String,
    },
}

/// Discriminant of a [`ServerEvent`], used to register listeners by event name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// [`ServerEvent::Ready`].
    Ready,
    /// [`ServerEvent::PresenceInitial`].
    PresenceInitial,
    /// [`ServerEvent::UserOnline`].
    UserOnline,
    /// [`ServerEvent::UserOffline`].
    UserOffline,
    /// [`ServerEvent::TypingStart`].
    TypingStart,
    /// [`ServerEvent::TypingStop`].
    TypingStop,
    /// [`ServerEvent::MemberRoleChanged`].
    MemberRoleChanged,
    /// [`ServerEvent::Error`].
    Error,
}

impl ServerEvent {
    /// Returns the kind of this event.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Ready { .. } => EventKind::Ready,
            Self::PresenceInitial { .. } => EventKind::PresenceInitial,
            Self::UserOnline { .. } => EventKind::UserOnline,
            Self::UserOffline { .. } => EventKind::UserOffline,
            Self::TypingStart(_) => EventKind::TypingStart,
            Self::TypingStop { .. } => EventKind::TypingStop,
            Self::MemberRoleChanged { .. } => EventKind::MemberRoleChanged,
            Self::Error { .. } => EventKind::Error,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Ready => "ready",
            Self::PresenceInitial => "presence:initial",
            Self::UserOnline => "user:online",
            Self::UserOffline => "user:offline",
            Self::TypingStart => "typing:start",
            Self::TypingStop => "typing:stop",
            Self::MemberRoleChanged => "member:role-changed",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}
