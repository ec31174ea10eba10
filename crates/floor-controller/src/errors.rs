//! Floor controller error types.
//!
//! Transport and audio failures are logged and counted where they happen;
//! they never surface from `request_acquire` / `request_release`. A
//! `FloorError` reaching a caller means the arbiter itself is gone.

use crate::audio::AudioError;
use crate::config::ConfigError;
use crate::transport::TransportError;
use floor_protocol::CodecError;
use thiserror::Error;

/// Floor controller error type.
#[derive(Debug, Error)]
pub enum FloorError {
    /// Signaling transport failure (publish or metadata access).
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Undecodable or unencodable signal.
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Audio session failure.
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The arbiter actor has stopped and can no longer take requests.
    #[error("Arbiter unavailable: {0}")]
    ArbiterUnavailable(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl FloorError {
    /// Returns a bounded label for metrics.
    #[must_use]
    pub fn error_kind(&self) -> &'static str {
        match self {
            FloorError::Transport(_) => "transport",
            FloorError::Codec(_) => "codec",
            FloorError::Audio(_) => "audio",
            FloorError::Config(_) => "config",
            FloorError::ArbiterUnavailable(_) => "arbiter_unavailable",
            FloorError::Internal(_) => "internal",
        }
    }
}
