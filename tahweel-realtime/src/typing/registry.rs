//! Shared typing state for one or more typing channels.

use std::collections::HashSet;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};

use tahweel_proto::{Channel, ClientEvent, EventKind, ServerEvent, TypingEvent};

use super::{TypingEntry, TypingTable, TypingTimings};
use crate::transport::{Listener, RealtimeTransport};

struct Shared {
    transport: Arc<dyn RealtimeTransport>,
    local_user_id: String,
    timings: TypingTimings,
    table: Mutex<TypingTable>,
    subscribed: Mutex<HashSet<Channel>>,
    listeners: Mutex<Vec<Listener>>,
    version: watch::Sender<u64>,
    sweeper: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

/// Typing table fed by transport events for the channels it subscribed to.
///
/// Events from the local user and events for channels this registry never
/// subscribed to are ignored. A background task sweeps expired entries every
/// `sweep_interval` for as long as any clone of the registry is alive.
#[derive(Clone)]
pub struct TypingRegistry {
    shared: Arc<Shared>,
}

impl TypingRegistry {
    /// Creates a registry for `local_user_id` on top of `transport`.
    ///
    /// The periodic sweep only runs when called inside a tokio runtime;
    /// outside one, entries still expire on read.
    pub fn new(
        transport: Arc<dyn RealtimeTransport>,
        local_user_id: impl Into<String>,
        timings: TypingTimings,
    ) -> Self {
        let (version, _) = watch::channel(0);
        let shared = Arc::new(Shared {
            transport,
            local_user_id: local_user_id.into(),
            timings,
            table: Mutex::new(TypingTable::new(timings.ttl)),
            subscribed: Mutex::new(HashSet::new()),
            listeners: Mutex::new(Vec::new()),
            version,
            sweeper: Mutex::new(None),
        });

        let start = {
            let weak = Arc::downgrade(&shared);
            shared.transport.listen(
                EventKind::TypingStart,
                Arc::new(move |event: &ServerEvent| {
                    if let (Some(shared), ServerEvent::TypingStart(typing)) = (weak.upgrade(), event)
                        && shared.is_subscribed(&typing.channel)
                    {
                        shared.record_start(&typing.channel, &typing.user_id, &typing.username);
                    }
                }),
            )
        };
        let stop = {
            let weak = Arc::downgrade(&shared);
            shared.transport.listen(
                EventKind::TypingStop,
                Arc::new(move |event: &ServerEvent| {
                    if let (Some(shared), ServerEvent::TypingStop { channel, user_id }) =
                        (weak.upgrade(), event)
                        && shared.is_subscribed(channel)
                    {
                        shared.record_stop(channel, user_id);
                    }
                }),
            )
        };
        shared.listeners.lock().extend([start, stop]);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let task = handle.spawn(sweep_loop(Arc::downgrade(&shared), timings));
                *shared.sweeper.lock() = Some(task);
            }
            Err(_) => {
                tracing::debug!("no tokio runtime, typing sweep disabled");
            }
        }

        Self { shared }
    }

    /// Subscribes to `channel` unless this registry already has.
    ///
    /// Returns `true` if a transport subscription was requested.
    pub fn subscribe(&self, channel: &Channel) -> bool {
        if !self.shared.subscribed.lock().insert(channel.clone()) {
            return false;
        }
        if let Err(e) = self.shared.transport.subscribe(channel) {
            tracing::warn!(channel = %channel, error = %e, "typing subscribe failed");
        }
        tracing::debug!(channel = %channel, "typing channel subscribed");
        true
    }

    /// Unsubscribes from `channel` and forgets its entries.
    ///
    /// Returns `false` if this registry was not subscribed.
    pub fn unsubscribe(&self, channel: &Channel) -> bool {
        if !self.shared.subscribed.lock().remove(channel) {
            return false;
        }
        if let Err(e) = self.shared.transport.unsubscribe(channel) {
            tracing::warn!(channel = %channel, error = %e, "typing unsubscribe failed");
        }
        if self.shared.table.lock().remove_channel(channel) {
            self.shared.bump();
        }
        tracing::debug!(channel = %channel, "typing channel unsubscribed");
        true
    }

    /// Whether this registry subscribed to `channel`.
    #[must_use]
    pub fn is_subscribed(&self, channel: &Channel) -> bool {
        self.shared.is_subscribed(channel)
    }

    /// Registers `handler` for typing-start events from remote users on
    /// channels this registry subscribed to.
    pub fn on_typing_start<F>(&self, handler: F) -> Listener
    where
        F: Fn(&TypingEvent) + Send + Sync + 'static,
    {
        let weak = Arc::downgrade(&self.shared);
        self.shared.transport.listen(
            EventKind::TypingStart,
            Arc::new(move |event: &ServerEvent| {
                if let (Some(shared), ServerEvent::TypingStart(typing)) = (weak.upgrade(), event)
                    && shared.accepts(&typing.channel, &typing.user_id)
                {
                    handler(typing);
                }
            }),
        )
    }

    /// Registers `handler` for typing-stop events from remote users on
    /// channels this registry subscribed to. The handler receives the
    /// channel and the user id.
    pub fn on_typing_stop<F>(&self, handler: F) -> Listener
    where
        F: Fn(&Channel, &str) + Send + Sync + 'static,
    {
        let weak = Arc::downgrade(&self.shared);
        self.shared.transport.listen(
            EventKind::TypingStop,
            Arc::new(move |event: &ServerEvent| {
                if let (Some(shared), ServerEvent::TypingStop { channel, user_id }) =
                    (weak.upgrade(), event)
                    && shared.accepts(channel, user_id)
                {
                    handler(channel, user_id);
                }
            }),
        )
    }

    /// Inserts or refreshes an entry. Returns `false` for the local user.
    pub fn record_start(&self, channel: &Channel, user_id: &str, username: &str) -> bool {
        self.shared.record_start(channel, user_id, username)
    }

    /// Removes an entry. Returns whether one existed.
    pub fn record_stop(&self, channel: &Channel, user_id: &str) -> bool {
        self.shared.record_stop(channel, user_id)
    }

    /// Drops expired entries now. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        self.shared.sweep()
    }

    /// Sends typing-start for the local user. Failures are logged, not returned.
    pub fn send_typing(&self, channel: &Channel, display_name: &str) {
        let event = ClientEvent::Typing {
            channel: channel.clone(),
            display_name: display_name.to_string(),
        };
        if let Err(e) = self.shared.transport.emit(event) {
            tracing::warn!(channel = %channel, error = %e, "typing broadcast failed");
        }
    }

    /// Sends typing-stop for the local user. Failures are logged, not returned.
    pub fn send_stop_typing(&self, channel: &Channel) {
        let event = ClientEvent::StopTyping {
            channel: channel.clone(),
        };
        if let Err(e) = self.shared.transport.emit(event) {
            tracing::warn!(channel = %channel, error = %e, "stop-typing broadcast failed");
        }
    }

    /// Whether a remote user is actively typing on `channel`.
    #[must_use]
    pub fn is_typing(&self, channel: &Channel) -> bool {
        self.shared.table.lock().is_typing(channel, Instant::now())
    }

    /// Remote users actively typing on `channel`, most recent first.
    #[must_use]
    pub fn typing_users(&self, channel: &Channel) -> Vec<TypingEntry> {
        self.shared.table.lock().active(channel, Instant::now())
    }

    /// Display name of the most recent active typist on `channel`.
    #[must_use]
    pub fn typing_username(&self, channel: &Channel) -> Option<String> {
        self.typing_users(channel)
            .into_iter()
            .next()
            .map(|e| e.username)
    }

    /// A receiver whose value increments on every table change.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<u64> {
        self.shared.version.subscribe()
    }

    /// The user whose own events are filtered out.
    #[must_use]
    pub fn local_user_id(&self) -> &str {
        &self.shared.local_user_id
    }

    /// Timing configuration.
    #[must_use]
    pub fn timings(&self) -> TypingTimings {
        self.shared.timings
    }
}

impl Shared {
    fn is_subscribed(&self, channel: &Channel) -> bool {
        self.subscribed.lock().contains(channel)
    }

    fn accepts(&self, channel: &Channel, user_id: &str) -> bool {
        user_id != self.local_user_id && self.is_subscribed(channel)
    }

    fn record_start(&self, channel: &Channel, user_id: &str, username: &str) -> bool {
        if user_id == self.local_user_id {
            return false;
        }
        self.table
            .lock()
            .record_start(channel, user_id, username, Instant::now());
        self.bump();
        true
    }

    fn record_stop(&self, channel: &Channel, user_id: &str) -> bool {
        let removed = self.table.lock().record_stop(channel, user_id);
        if removed {
            self.bump();
        }
        removed
    }

    fn sweep(&self) -> usize {
        let removed = self.table.lock().sweep(Instant::now());
        if removed > 0 {
            tracing::trace!(removed, "expired typing entries swept");
            self.bump();
        }
        removed
    }

    fn bump(&self) {
        self.version.send_modify(|v| *v = v.wrapping_add(1));
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        if let Some(task) = self.sweeper.get_mut().take() {
            task.abort();
        }
    }
}

async fn sweep_loop(shared: Weak<Shared>, timings: TypingTimings) {
    let mut ticker = tokio::time::interval(timings.sweep_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let Some(shared) = shared.upgrade() else {
            break;
        };
        shared.sweep();
    }
}
