//! Per-user connection counts for the hub.
//!
//! A user is online while at least one of their connections is identified.
//! Only the first connection and the last disconnection change the online
//! set, so a user with two tabs open does not flap when one tab closes.

use std::collections::HashMap;

/// Online set with per-user connection counts.
#[derive(Debug, Default)]
pub struct PresenceBook {
    counts: HashMap<String, usize>,
}

impl PresenceBook {
    /// Creates an empty book.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one more connection for `user_id`.
    ///
    /// Returns `true` if the user just came online.
    pub fn connect(&mut self, user_id: &str) -> bool {
        let count = self.counts.entry(user_id.to_string()).or_insert(0);
        *count += 1;
        *count == 1
    }

    /// Records one fewer connection for `user_id`.
    ///
    /// Returns `true` if the user just went offline. Unknown users are
    /// ignored.
    pub fn disconnect(&mut self, user_id: &str) -> bool {
        let Some(count) = self.counts.get_mut(user_id) else {
            return false;
        };
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.counts.remove(user_id);
            true
        } else {
            false
        }
    }

    /// Whether `user_id` has at least one connection.
    #[must_use]
    pub fn is_online(&self, user_id: &str) -> bool {
        self.counts.contains_key(user_id)
    }

    /// Number of open connections for `user_id`.
    #[must_use]
    pub fn connection_count(&self, user_id: &str) -> usize {
        self.counts.get(user_id).copied().unwrap_or(0)
    }

    /// Online user ids, sorted.
    #[must_use]
    pub fn snapshot(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.counts.keys().cloned().collect();
        ids.sort_unstable();
        ids
    }

    /// Number of online users.
    #[must_use]
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// Whether nobody is online.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}
