//! Signaling transport abstraction.
//!
//! The floor protocol needs three things from the channel it runs over:
//!
//! - a best-effort broadcast of small signals to every other member
//! - a shared metadata map with merge-then-replace writes
//! - a presence (occupancy) count
//!
//! [`SignalingTransport`] captures exactly that. [`local::LocalHub`] is an
//! in-process implementation used by the simulator and the test-suite.

pub mod local;

use async_trait::async_trait;
use bytes::Bytes;
use common::types::ParticipantId;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tracing::warn;

/// Custom metadata entries of a channel.
pub type MetadataMap = HashMap<String, serde_json::Value>;

/// Snapshot of a channel's metadata map.
///
/// `version` increases by one with every committed write or delete.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelMetadata {
    pub custom: MetadataMap,
    pub version: u64,
}

impl ChannelMetadata {
    /// Look up a single entry.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.custom.get(key)
    }
}

/// Result of a version-gated metadata write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The write was committed at `version`.
    Written { version: u64 },
    /// Someone else wrote first; nothing was changed.
    Conflict { current_version: u64 },
}

/// Transport error type.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The local participant is no longer connected to the channel.
    #[error("Transport disconnected")]
    Disconnected,

    /// Signal publish failed.
    #[error("Publish failed: {0}")]
    Publish(String),

    /// Metadata read or write failed.
    #[error("Metadata operation failed: {0}")]
    Metadata(String),

    /// The transport does not implement this operation.
    #[error("Operation not supported: {0}")]
    Unsupported(&'static str),
}

/// A signal as delivered by the transport, tagged with its publisher.
#[derive(Debug, Clone)]
pub struct SignalEnvelope {
    pub publisher: ParticipantId,
    pub payload: Bytes,
}

/// Subscription to inbound signals.
///
/// Signals published by the subscribing participant itself are filtered
/// out. Dropping the subscription (or calling [`Self::unsubscribe`])
/// detaches it from the transport.
pub struct SignalSubscription {
    local_id: ParticipantId,
    receiver: broadcast::Receiver<SignalEnvelope>,
}

impl SignalSubscription {
    #[must_use]
    pub fn new(local_id: ParticipantId, receiver: broadcast::Receiver<SignalEnvelope>) -> Self {
        Self { local_id, receiver }
    }

    /// Receive the next signal published by another participant.
    ///
    /// Returns `None` once the transport has shut down. Cancel safe.
    pub async fn recv(&mut self) -> Option<Bytes> {
        loop {
            match self.receiver.recv().await {
                Ok(envelope) if envelope.publisher == self.local_id => {}
                Ok(envelope) => return Some(envelope.payload),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        target: "floor.transport",
                        participant_id = %self.local_id,
                        skipped,
                        "Signal subscription lagged, signals dropped"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Detach from the transport.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl std::fmt::Debug for SignalSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalSubscription")
            .field("local_id", &self.local_id)
            .finish_non_exhaustive()
    }
}

/// Per-channel signaling transport bound to one local participant.
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    /// The participant this transport publishes as.
    fn participant_id(&self) -> &ParticipantId;

    /// Publish a signal to every other member. Delivery is not confirmed.
    async fn send_signal(&self, payload: Bytes) -> Result<(), TransportError>;

    /// Read the metadata map as currently visible to this participant.
    async fn read_metadata(&self) -> Result<ChannelMetadata, TransportError>;

    /// Merge `entries` into this participant's view of the map and replace
    /// the stored map with the result. Returns the committed version.
    async fn write_metadata(&self, entries: MetadataMap) -> Result<u64, TransportError>;

    /// Write `entries` only if the stored map is still at `expected_version`.
    async fn write_metadata_if(
        &self,
        _expected_version: u64,
        _entries: MetadataMap,
    ) -> Result<WriteOutcome, TransportError> {
        Err(TransportError::Unsupported("conditional metadata writes"))
    }

    /// Remove a single key from the map.
    async fn delete_metadata_key(&self, key: &str) -> Result<(), TransportError>;

    /// Subscribe to inbound signals.
    fn subscribe_signals(&self) -> SignalSubscription;

    /// Occupancy of the channel, including the local participant.
    fn presence(&self) -> watch::Receiver<u32>;

    /// Metadata change notifications.
    fn metadata(&self) -> watch::Receiver<ChannelMetadata>;
}
