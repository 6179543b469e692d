//! Shared protocol definitions for the Tahweel realtime channel.

pub mod channel;
pub mod codec;
pub mod event;

pub use channel::Channel;
pub use event::{ClientEvent, EventKind, ServerEvent, TypingEvent};
