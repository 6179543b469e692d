//! `Tahweel` realtime client: reference-counted presence and typing
//! indicators multiplexed over one shared hub connection.

pub mod config;
pub mod presence;
pub mod transport;
pub mod typing;
