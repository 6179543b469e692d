//! Serialization for the realtime wire protocol.
//!
//! Each WebSocket binary frame carries exactly one postcard-encoded event,
//! so no length prefix is needed.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::event::{ClientEvent, ServerEvent};

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Frame exceeds the configured size limit.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Actual size in bytes.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },
}

fn to_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    postcard::to_allocvec(value).map_err(|e| CodecError::Serialization(e.to_string()))
}

fn from_bytes<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    postcard::from_bytes(bytes).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Encodes a [`ClientEvent`].
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the event cannot be serialized.
pub fn encode_client(event: &ClientEvent) -> Result<Vec<u8>, CodecError> {
    to_bytes(event)
}

/// Decodes a [`ClientEvent`].
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the bytes are not a valid event.
pub fn decode_client(bytes: &[u8]) -> Result<ClientEvent, CodecError> {
    from_bytes(bytes)
}

/// Encodes a [`ServerEvent`].
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the event cannot be serialized.
pub fn encode_server(event: &ServerEvent) -> Result<Vec<u8>, CodecError> {
    to_bytes(event)
}

/// Decodes a [`ServerEvent`].
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the bytes are not a valid event.
pub fn decode_server(bytes: &[u8]) -> Result<ServerEvent, CodecError> {
    from_bytes(bytes)
}

/// Decodes a [`ClientEvent`], rejecting frames larger than `max` bytes first.
///
/// # Errors
///
/// Returns `CodecError::FrameTooLarge` for oversized frames, otherwise the
/// same errors as [`decode_client`].
pub fn decode_client_bounded(bytes: &[u8], max: usize) -> Result<ClientEvent, CodecError> {
    if bytes.len() > max {
        return Err(CodecError::FrameTooLarge {
            size: bytes.len(),
            max,
        });
    }
    decode_client(bytes)
}
