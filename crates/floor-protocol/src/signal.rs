//! Signal and message types.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Kind of broadcast signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Signal {
    /// Request broadcast: a new acquire attempt.
    #[serde(rename = "RB")]
    RequestBroadcast,
    /// Refresh broadcast: the holder renewed its lease.
    #[serde(rename = "RR")]
    RefreshBroadcast,
    /// Acknowledge broadcast: a listener confirms receipt of a request.
    #[serde(rename = "AB")]
    AcknowledgeBroadcast,
    /// End broadcast: the floor was released.
    #[serde(rename = "EB")]
    EndBroadcast,
}

impl Signal {
    /// Returns the two-letter wire code, also used as a log/metric label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Signal::RequestBroadcast => "RB",
            Signal::RefreshBroadcast => "RR",
            Signal::AcknowledgeBroadcast => "AB",
            Signal::EndBroadcast => "EB",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Correlates every signal of one acquire attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(pub Uuid);

impl CorrelationId {
    /// Create a new random correlation ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A single broadcast signal.
///
/// Immutable value type: derivatives (`refresh`, `end`, `ack`) keep the
/// originating request's correlation ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BroadcastMessage {
    #[serde(rename = "s")]
    signal: Signal,
    #[serde(rename = "i")]
    correlation_id: CorrelationId,
}

impl BroadcastMessage {
    /// Build a message from its parts.
    #[must_use]
    pub const fn new(signal: Signal, correlation_id: CorrelationId) -> Self {
        Self {
            signal,
            correlation_id,
        }
    }

    /// Start a new acquire attempt with a fresh correlation ID.
    #[must_use]
    pub fn request() -> Self {
        Self::new(Signal::RequestBroadcast, CorrelationId::new())
    }

    /// Refresh signal for the same attempt.
    #[must_use]
    pub const fn refresh(&self) -> Self {
        Self::new(Signal::RefreshBroadcast, self.correlation_id)
    }

    /// End signal for the same attempt.
    #[must_use]
    pub const fn end(&self) -> Self {
        Self::new(Signal::EndBroadcast, self.correlation_id)
    }

    /// Acknowledgment of this attempt.
    #[must_use]
    pub const fn ack(&self) -> Self {
        Self::new(Signal::AcknowledgeBroadcast, self.correlation_id)
    }

    #[must_use]
    pub const fn signal(&self) -> Signal {
        self.signal
    }

    #[must_use]
    pub const fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }
}
