//! Codec for encoding and decoding Relay payloads.
//!
//! Text frames carry JSON. Binary frames carry the same object encoded with
//! MessagePack, for clients that prefer a compact encoding.

use bytes::Bytes;
use serde_json::Value;
use thiserror::Error;

use crate::payload::Payload;

/// Default maximum encoded payload size (64 KiB).
pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Payload exceeds the size limit.
    #[error("Payload size {size} exceeds maximum {max}")]
    TooLarge { size: usize, max: usize },

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// Well-formed data that is not a payload.
    #[error("Invalid payload: {0}")]
    Invalid(&'static str),
}

fn check_size(size: usize, max: usize) -> Result<(), ProtocolError> {
    if size > max {
        return Err(ProtocolError::TooLarge { size, max });
    }
    Ok(())
}

fn into_payload(value: Value) -> Result<Payload, ProtocolError> {
    match value {
        Value::Object(map) => Ok(Payload::from_map(map)),
        _ => Err(ProtocolError::Invalid("payload must be an object")),
    }
}

/// Decode a JSON text payload.
///
/// # Errors
///
/// Returns an error if the text is too large, not JSON, or not an object.
pub fn decode_text(text: &str) -> Result<Payload, ProtocolError> {
    check_size(text.len(), MAX_PAYLOAD_SIZE)?;
    into_payload(serde_json::from_str(text)?)
}

/// Decode a MessagePack payload.
///
/// # Errors
///
/// Returns an error if the data is too large, malformed, or not a map.
pub fn decode_binary(data: &[u8]) -> Result<Payload, ProtocolError> {
    check_size(data.len(), MAX_PAYLOAD_SIZE)?;
    into_payload(rmp_serde::from_slice(data)?)
}

/// Encode a payload as JSON text.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_text(payload: &Payload) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(payload)?)
}

/// Encode a payload as MessagePack.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_binary(payload: &Payload) -> Result<Bytes, ProtocolError> {
    Ok(Bytes::from(rmp_serde::to_vec_named(payload)?))
}

/// Codec with a configurable size limit.
#[derive(Debug, Clone, Copy)]
pub struct PayloadCodec {
    max_size: usize,
}

impl Default for PayloadCodec {
    fn default() -> Self {
        Self::new(MAX_PAYLOAD_SIZE)
    }
}

impl PayloadCodec {
    /// Create a codec that rejects inbound payloads larger than `max_size`.
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self { max_size }
    }

    /// The inbound size limit.
    #[must_use]
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Decode a JSON text payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is too large or invalid.
    pub fn decode_text(&self, text: &str) -> Result<Payload, ProtocolError> {
        check_size(text.len(), self.max_size)?;
        into_payload(serde_json::from_str(text)?)
    }

    /// Decode a MessagePack payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the data is too large or invalid.
    pub fn decode_binary(&self, data: &[u8]) -> Result<Payload, ProtocolError> {
        check_size(data.len(), self.max_size)?;
        into_payload(rmp_serde::from_slice(data)?)
    }

    /// Encode a payload as JSON text.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode_text(&self, payload: &Payload) -> Result<String, ProtocolError> {
        encode_text(payload)
    }
}
