//! Realtime transport abstraction.
//!
//! Defines the [`RealtimeTransport`] trait the registries are written
//! against. Concrete implementations:
//! - [`loopback::LoopbackTransport`]: in-process double that records calls
//! - [`ws::WsTransport`]: WebSocket connection to a `tahweel-hub`

pub mod listeners;
pub mod loopback;
pub mod ws;

use std::sync::Arc;

use tahweel_proto::{Channel, ClientEvent, EventKind, ServerEvent};

pub use listeners::{Listener, ListenerSet};

/// Callback invoked for every [`ServerEvent`] of the kind it was registered for.
pub type EventHandler = Arc<dyn Fn(&ServerEvent) + Send + Sync>;

/// Errors that can occur during transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection to the hub has been closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// The operation timed out before completing.
    #[error("transport operation timed out")]
    Timeout,

    /// The hub could not be reached at the given URL.
    #[error("hub {0} is unreachable")]
    Unreachable(String),

    /// The hub refused the identification handshake.
    #[error("identification rejected: {0}")]
    Rejected(String),

    /// An event could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] tahweel_proto::codec::CodecError),

    /// An underlying I/O error occurred.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A persistent connection with named channel subscriptions and event
/// emit/listen.
///
/// All methods are non-blocking. `subscribe`, `unsubscribe`, and `emit`
/// hand the request off to the connection and return; they are
/// fire-and-forget and idempotent at the hub.
///
/// # Invariant
///
/// `listen`, `subscribe`, `unsubscribe` and `emit` never invoke handlers
/// synchronously. Handlers only run from the transport's own dispatch path,
/// so callers may hold their own locks across these calls.
pub trait RealtimeTransport: Send + Sync {
    /// Ask the hub for events on `channel`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionClosed`] if the connection is gone.
    fn subscribe(&self, channel: &Channel) -> Result<(), TransportError> {
        self.emit(ClientEvent::Subscribe {
            channel: channel.clone(),
        })
    }

    /// Stop receiving events on `channel`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionClosed`] if the connection is gone.
    fn unsubscribe(&self, channel: &Channel) -> Result<(), TransportError> {
        self.emit(ClientEvent::Unsubscribe {
            channel: channel.clone(),
        })
    }

    /// Send an event to the hub.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionClosed`] if the connection is gone,
    /// or [`TransportError::Codec`] if the event cannot be encoded.
    fn emit(&self, event: ClientEvent) -> Result<(), TransportError>;

    /// Register `handler` for every incoming event of `kind`.
    ///
    /// The handler stays registered until the returned [`Listener`] is
    /// released or dropped.
    fn listen(&self, kind: EventKind, handler: EventHandler) -> Listener;

    /// Whether the connection to the hub is currently up.
    fn is_connected(&self) -> bool;
}
