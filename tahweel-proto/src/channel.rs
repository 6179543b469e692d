//! Named subscription scopes on the realtime channel.
//!
//! Every event the hub fans out is addressed to a [`Channel`]. The string
//! form (`presence`, `conversation:{id}`, `room:{id}:typing`, `room:{id}`)
//! is what shows up in logs and on the command line.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A subscription scope on the realtime channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Channel {
    /// Process-wide online/offline announcements.
    Presence,
    /// Typing indicators for a direct-message conversation.
    Conversation(String),
    /// Typing indicators for a chat room. Kept apart from the room's
    /// message channel so typing chatter never reaches message listeners.
    RoomTyping(String),
    /// Membership and role changes for a chat room.
    Room(String),
}

impl Channel {
    /// Typing channel for a direct-message conversation.
    pub fn conversation(id: impl Into<String>) -> Self {
        Self::Conversation(id.into())
    }

    /// Typing channel for a chat room.
    pub fn room_typing(room_id: impl Into<String>) -> Self {
        Self::RoomTyping(room_id.into())
    }

    /// Membership channel for a chat room.
    pub fn room(room_id: impl Into<String>) -> Self {
        Self::Room(room_id.into())
    }

    /// Returns `true` for channels that carry typing indicators.
    #[must_use]
    pub const fn is_typing(&self) -> bool {
        matches!(self, Self::Conversation(_) | Self::RoomTyping(_))
    }

    /// The conversation or room id this channel is scoped to, if any.
    #[must_use]
    pub fn scope_id(&self) -> Option<&str> {
        match self {
            Self::Presence => None,
            Self::Conversation(id) | Self::RoomTyping(id) | Self::Room(id) => Some(id),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Presence => write!(f, "presence"),
            Self::Conversation(id) => write!(f, "conversation:{id}"),
            Self::RoomTyping(id) => write!(f, "room:{id}:typing"),
            Self::Room(id) => write!(f, "room:{id}"),
        }
    }
}

/// Error returned when a channel name cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid channel name: {0:?}")]
pub struct ParseChannelError(pub String);

impl FromStr for Channel {
    type Err = ParseChannelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "presence" {
            return Ok(Self::Presence);
        }
        if let Some(id) = s.strip_prefix("conversation:")
            && !id.is_empty()
        {
            return Ok(Self::Conversation(id.to_string()));
        }
        if let Some(rest) = s.strip_prefix("room:") {
            if let Some(id) = rest.strip_suffix(":typing")
                && !id.is_empty()
            {
                return Ok(Self::RoomTyping(id.to_string()));
            }
            if !rest.is_empty() {
                return Ok(Self::Room(rest.to_string()));
            }
        }
        Err(ParseChannelError(s.to_string()))
    }
}
