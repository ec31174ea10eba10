//! Signal publishing and decoding on top of a [`SignalingTransport`].

use crate::errors::FloorError;
use crate::observability::metrics;
use crate::transport::SignalingTransport;
use bytes::Bytes;
use floor_protocol::{decode_message, encode_message, BroadcastMessage};
use std::sync::Arc;
use tracing::{debug, warn};

/// Fire-and-forget publisher for floor signals.
///
/// Failures are logged and counted, never returned: a lost signal only
/// slows convergence.
#[derive(Clone)]
pub(crate) struct Signaler {
    transport: Arc<dyn SignalingTransport>,
}

impl Signaler {
    pub(crate) fn new(transport: Arc<dyn SignalingTransport>) -> Self {
        Self { transport }
    }

    /// Publish `message`. Returns whether the transport accepted it.
    pub(crate) async fn send(&self, message: BroadcastMessage) -> bool {
        match self.try_send(message).await {
            Ok(()) => {
                debug!(
                    target: "floor.transport",
                    participant_id = %self.transport.participant_id(),
                    signal = %message.signal(),
                    correlation_id = %message.correlation_id(),
                    "Signal sent"
                );
                true
            }
            Err(e) => {
                let operation = match e {
                    FloorError::Codec(_) => "encode",
                    _ => "publish",
                };
                metrics::record_transport_error(operation);
                warn!(
                    target: "floor.transport",
                    participant_id = %self.transport.participant_id(),
                    signal = %message.signal(),
                    error = %e,
                    "Failed to send signal"
                );
                false
            }
        }
    }

    async fn try_send(&self, message: BroadcastMessage) -> Result<(), FloorError> {
        let payload = encode_message(&message)?;
        self.transport.send_signal(payload).await?;
        Ok(())
    }
}

/// Decode an inbound payload, dropping it with a warning if malformed.
pub(crate) fn decode_inbound(payload: &Bytes) -> Option<BroadcastMessage> {
    match decode_message(payload) {
        Ok(message) => Some(message),
        Err(e) => {
            metrics::record_malformed_signal();
            warn!(
                target: "floor.transport",
                error = %e,
                len = payload.len(),
                "Dropping malformed signal"
            );
            None
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::transport::local::LocalHub;
    use common::types::ParticipantId;
    use floor_protocol::Signal;

    #[tokio::test]
    async fn test_send_reaches_peer_and_decodes() {
        let hub = LocalHub::new();
        let alice = Signaler::new(Arc::new(hub.join(ParticipantId::new("alice"))));
        let bob = hub.join(ParticipantId::new("bob"));
        let mut inbound = bob.subscribe_signals();

        let request = BroadcastMessage::request();
        assert!(alice.send(request).await);

        let payload = inbound.recv().await.unwrap();
        let decoded = decode_inbound(&payload).unwrap();
        assert_eq!(decoded.signal(), Signal::RequestBroadcast);
        assert_eq!(decoded.correlation_id(), request.correlation_id());
    }

    #[tokio::test]
    async fn test_send_failure_is_reported_not_raised() {
        let hub = LocalHub::new();
        let id = ParticipantId::new("alice");
        let alice = Signaler::new(Arc::new(hub.join(id.clone())));
        hub.disconnect(&id);

        assert!(!alice.send(BroadcastMessage::request()).await);
    }

    #[test]
    fn test_malformed_payload_is_dropped() {
        assert!(decode_inbound(&Bytes::from_static(b"{\"s\":\"ZZ\"}")).is_none());
    }
}
