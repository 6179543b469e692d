//! `Tahweel` hub library.
//!
//! Exposes the hub server for use in tests and embedding. The hub accepts
//! WebSocket connections, tracks which users are online, and fans typing
//! signals and room announcements out to channel subscribers.

pub mod channels;
pub mod config;
pub mod hub;
pub mod presence;
