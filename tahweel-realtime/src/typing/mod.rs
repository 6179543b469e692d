//! Typing indicators.
//!
//! - [`TypingTable`]: self-expiring "who is typing where" table
//! - [`TypingRegistry`]: table plus channel subscriptions and periodic sweep
//! - [`TypingSession`]: throttled start and idle stop for one input
//! - [`ConversationTyping`] / [`RoomTyping`]: consumer adapters
//!
//! Entries are active while `now - typing_at < ttl`. The sweep runs every
//! `sweep_interval`, so a stuck indicator is visible for at most
//! `ttl + sweep_interval`.

mod conversation;
mod registry;
mod room;
mod session;

use std::collections::HashMap;
use std::time::Duration;

use tahweel_proto::Channel;
use tokio::time::Instant;

pub use conversation::ConversationTyping;
pub use registry::TypingRegistry;
pub use room::RoomTyping;
pub use session::TypingSession;

/// Timing knobs for typing indicators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypingTimings {
    /// How long an entry stays active without a refresh.
    pub ttl: Duration,
    /// Period of the background sweep.
    pub sweep_interval: Duration,
    /// Minimum gap between two typing-start emissions.
    pub throttle: Duration,
    /// Quiet period after which typing-stop is sent automatically.
    pub idle_stop: Duration,
}

impl Default for TypingTimings {
    fn default() -> Self {
        Self {
            ttl: Duration::from_millis(3000),
            sweep_interval: Duration::from_millis(1000),
            throttle: Duration::from_millis(500),
            idle_stop: Duration::from_millis(2000),
        }
    }
}

/// One remote user typing on one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingEntry {
    /// Id of the typing user.
    pub user_id: String,
    /// Display name shown in the indicator.
    pub username: String,
    /// Last time a typing-start was seen for this user.
    pub typing_at: Instant,
}

/// Per-channel table of typing entries with time-based expiry.
#[derive(Debug)]
pub struct TypingTable {
    ttl: Duration,
    entries: HashMap<Channel, Vec<TypingEntry>>,
}

impl TypingTable {
    /// Creates an empty table whose entries expire after `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
        }
    }

    /// Inserts or refreshes the entry for `user_id` on `channel`.
    pub fn record_start(&mut self, channel: &Channel, user_id: &str, username: &str, now: Instant) {
        let entries = self.entries.entry(channel.clone()).or_default();
        if let Some(entry) = entries.iter_mut().find(|e| e.user_id == user_id) {
            entry.typing_at = now;
            username.clone_into(&mut entry.username);
        } else {
            entries.push(TypingEntry {
                user_id: user_id.to_string(),
                username: username.to_string(),
                typing_at: now,
            });
        }
    }

    /// Removes the entry for `user_id` on `channel`. Returns whether one existed.
    pub fn record_stop(&mut self, channel: &Channel, user_id: &str) -> bool {
        let Some(entries) = self.entries.get_mut(channel) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|e| e.user_id != user_id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            self.entries.remove(channel);
        }
        removed
    }

    /// Drops every expired entry. Returns how many were removed.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let ttl = self.ttl;
        let mut removed = 0;
        self.entries.retain(|_, entries| {
            let before = entries.len();
            entries.retain(|e| is_active(e, now, ttl));
            removed += before - entries.len();
            !entries.is_empty()
        });
        removed
    }

    /// Drops every entry for `channel`.
    pub fn remove_channel(&mut self, channel: &Channel) -> bool {
        self.entries.remove(channel).is_some()
    }

    /// Active entries for `channel`, most recent first.
    #[must_use]
    pub fn active(&self, channel: &Channel, now: Instant) -> Vec<TypingEntry> {
        let mut active: Vec<TypingEntry> = self
            .entries
            .get(channel)
            .into_iter()
            .flatten()
            .filter(|e| is_active(e, now, self.ttl))
            .cloned()
            .collect();
        active.sort_by(|a, b| b.typing_at.cmp(&a.typing_at));
        active
    }

    /// Whether anyone is actively typing on `channel`.
    #[must_use]
    pub fn is_typing(&self, channel: &Channel, now: Instant) -> bool {
        self.entries
            .get(channel)
            .is_some_and(|entries| entries.iter().any(|e| is_active(e, now, self.ttl)))
    }

    /// Total stored entries, expired or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    /// Whether the table stores no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn is_active(entry: &TypingEntry, now: Instant, ttl: Duration) -> bool {
    now.saturating_duration_since(entry.typing_at) < ttl
}
