//! Loopback transport for testing.
//!
//! [`LoopbackTransport`] never touches the network. Every request is
//! recorded as a [`TransportCall`] and incoming events are injected with
//! [`LoopbackTransport::deliver`], which dispatches them synchronously on
//! the caller's thread. Clones share the same call log and listeners.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tahweel_proto::{Channel, ClientEvent, EventKind, ServerEvent};

use super::{EventHandler, Listener, ListenerSet, RealtimeTransport, TransportError};

/// A request the code under test made of the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    /// `subscribe(channel)`.
    Subscribe(Channel),
    /// `unsubscribe(channel)`.
    Unsubscribe(Channel),
    /// `emit(event)` for anything other than subscribe/unsubscribe.
    Emit(ClientEvent),
}

/// In-process transport double.
#[derive(Clone)]
pub struct LoopbackTransport {
    calls: Arc<Mutex<Vec<TransportCall>>>,
    listeners: ListenerSet,
    connected: Arc<AtomicBool>,
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackTransport {
    /// Creates a connected loopback transport with an empty call log.
    #[must_use]
    pub fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            listeners: ListenerSet::new(),
            connected: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Simulates the hub sending `event`. Returns how many handlers ran.
    pub fn deliver(&self, event: &ServerEvent) -> usize {
        self.listeners.dispatch(event)
    }

    /// Flips the connection state. While disconnected every request fails
    /// with [`TransportError::ConnectionClosed`] and is not recorded.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Every request recorded so far, oldest first.
    #[must_use]
    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().clone()
    }

    /// Empties the call log.
    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// How many times `subscribe(channel)` was requested.
    #[must_use]
    pub fn subscribe_count(&self, channel: &Channel) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, TransportCall::Subscribe(ch) if ch == channel))
            .count()
    }

    /// How many times `unsubscribe(channel)` was requested.
    #[must_use]
    pub fn unsubscribe_count(&self, channel: &Channel) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, TransportCall::Unsubscribe(ch) if ch == channel))
            .count()
    }

    /// Emitted events (subscriptions excluded), oldest first.
    #[must_use]
    pub fn emitted(&self) -> Vec<ClientEvent> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                TransportCall::Emit(e) => Some(e.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of live listeners for `kind`.
    #[must_use]
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners.count(kind)
    }
}

impl RealtimeTransport for LoopbackTransport {
    fn emit(&self, event: ClientEvent) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }
        let call = match event {
            ClientEvent::Subscribe { channel } => TransportCall::Subscribe(channel),
            ClientEvent::Unsubscribe { channel } => TransportCall::Unsubscribe(channel),
            other => TransportCall::Emit(other),
        };
        self.calls.lock().push(call);
        Ok(())
    }

    fn listen(&self, kind: EventKind, handler: EventHandler) -> Listener {
        self.listeners.register(kind, handler)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
