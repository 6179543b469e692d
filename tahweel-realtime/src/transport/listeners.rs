//! Listener bookkeeping shared by every transport implementation.
//!
//! A [`ListenerSet`] maps registrations to handlers. Registering returns a
//! [`Listener`] token; releasing or dropping the token removes exactly that
//! registration. Dispatch snapshots the matching handlers before calling
//! them so a handler may register or release listeners itself.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tahweel_proto::{EventKind, ServerEvent};

use super::EventHandler;

#[derive(Default)]
struct Registrations {
    next_id: u64,
    handlers: BTreeMap<u64, (EventKind, EventHandler)>,
}

/// Registry of event handlers keyed by [`EventKind`].
#[derive(Clone, Default)]
pub struct ListenerSet {
    inner: Arc<Mutex<Registrations>>,
}

impl ListenerSet {
    /// Creates an empty listener set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for events of `kind`.
    pub fn register(&self, kind: EventKind, handler: EventHandler) -> Listener {
        let mut regs = self.inner.lock();
        let id = regs.next_id;
        regs.next_id += 1;
        regs.handlers.insert(id, (kind, handler));
        drop(regs);
        Listener {
            set: Arc::downgrade(&self.inner),
            id,
            kind,
        }
    }

    /// Invokes every handler registered for the event's kind, in
    /// registration order. Returns the number of handlers called.
    pub fn dispatch(&self, event: &ServerEvent) -> usize {
        let kind = event.kind();
        let matching: Vec<EventHandler> = self
            .inner
            .lock()
            .handlers
            .values()
            .filter(|(k, _)| *k == kind)
            .map(|(_, h)| Arc::clone(h))
            .collect();
        for handler in &matching {
            handler(event);
        }
        matching.len()
    }

    /// Number of live registrations for `kind`.
    #[must_use]
    pub fn count(&self, kind: EventKind) -> usize {
        self.inner
            .lock()
            .handlers
            .values()
            .filter(|(k, _)| *k == kind)
            .count()
    }
}

/// Capability token for one handler registration.
///
/// Dropping the token unregisters the handler. [`Listener::release`] does
/// the same explicitly.
#[must_use = "dropping a Listener unregisters its handler immediately"]
pub struct Listener {
    set: Weak<Mutex<Registrations>>,
    id: u64,
    kind: EventKind,
}

impl Listener {
    /// The event kind this listener was registered for.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        self.kind
    }

    /// Unregisters the handler.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Some(set) = self.set.upgrade() {
            set.lock().handlers.remove(&self.id);
        }
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish()
    }
}
