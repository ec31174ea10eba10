//! Codec for encoding and decoding broadcast signals.

use crate::signal::BroadcastMessage;
use bytes::Bytes;

/// Largest payload accepted as a signal, in bytes.
///
/// Signals ride on the transport's lightweight signal channel, which caps
/// payloads well below regular messages. An encoded message is 53 bytes.
pub const MAX_SIGNAL_SIZE: usize = 64;

/// Error type for codec operations
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Payload exceeds [`MAX_SIGNAL_SIZE`]
    #[error("Signal too large: {0} bytes")]
    TooLarge(usize),

    /// Payload is not a valid signal
    #[error("Invalid signal format: {0}")]
    InvalidFormat(String),
}

/// Encode a broadcast message to bytes
///
/// # Errors
///
/// Returns an error if serialization fails or the result exceeds
/// [`MAX_SIGNAL_SIZE`].
pub fn encode_message(message: &BroadcastMessage) -> Result<Bytes, CodecError> {
    let encoded =
        serde_json::to_vec(message).map_err(|e| CodecError::InvalidFormat(e.to_string()))?;

    if encoded.len() > MAX_SIGNAL_SIZE {
        return Err(CodecError::TooLarge(encoded.len()));
    }

    Ok(Bytes::from(encoded))
}

/// Decode a broadcast message from bytes
///
/// # Errors
///
/// Returns an error if the payload is oversized or is not a well-formed
/// signal.
pub fn decode_message(data: &[u8]) -> Result<BroadcastMessage, CodecError> {
    if data.len() > MAX_SIGNAL_SIZE {
        return Err(CodecError::TooLarge(data.len()));
    }

    serde_json::from_slice(data).map_err(|e| CodecError::InvalidFormat(e.to_string()))
}
