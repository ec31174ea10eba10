//! Signaling protocol for Floorlink talk-token arbitration.
//!
//! Participants coordinate the floor with four tiny broadcast signals,
//! each tagged with the correlation ID of the acquire attempt it belongs
//! to. Signals travel as compact JSON objects (`{"s":"RB","i":"<uuid>"}`)
//! so they fit inside a transport's small-signal payload limit.

#![warn(clippy::pedantic)]

pub mod codec;
pub mod signal;

pub use codec::{decode_message, encode_message, CodecError, MAX_SIGNAL_SIZE};
pub use signal::{BroadcastMessage, CorrelationId, Signal};
