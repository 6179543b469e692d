//! Channel membership for hub connections.
//!
//! Subscriptions are per connection, not per user: two connections of the
//! same user subscribe independently. Joining twice is a no-op, so clients
//! can resend subscriptions after a reconnect without double delivery.

use std::collections::{HashMap, HashSet};

use tahweel_proto::Channel;

use crate::hub::ConnectionId;

/// Maps each channel to the connections subscribed to it.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    members: HashMap<Channel, HashSet<ConnectionId>>,
}

impl ChannelRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes `conn` to `channel`. Returns `false` if it already was.
    pub fn join(&mut self, channel: &Channel, conn: ConnectionId) -> bool {
        self.members.entry(channel.clone()).or_default().insert(conn)
    }

    /// Unsubscribes `conn` from `channel`. Returns `false` if it was not
    /// subscribed.
    pub fn leave(&mut self, channel: &Channel, conn: ConnectionId) -> bool {
        let Some(members) = self.members.get_mut(channel) else {
            return false;
        };
        let removed = members.remove(&conn);
        if members.is_empty() {
            self.members.remove(channel);
        }
        removed
    }

    /// Removes `conn` from every channel. Returns how many it left.
    pub fn leave_all(&mut self, conn: ConnectionId) -> usize {
        let mut left = 0;
        self.members.retain(|_, members| {
            if members.remove(&conn) {
                left += 1;
            }
            !members.is_empty()
        });
        left
    }

    /// Connections subscribed to `channel`.
    #[must_use]
    pub fn members(&self, channel: &Channel) -> Vec<ConnectionId> {
        self.members
            .get(channel)
            .map(|m| m.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Whether `conn` is subscribed to `channel`.
    #[must_use]
    pub fn is_member(&self, channel: &Channel, conn: ConnectionId) -> bool {
        self.members.get(channel).is_some_and(|m| m.contains(&conn))
    }

    /// Number of channels with at least one subscriber.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.members.len()
    }
}
