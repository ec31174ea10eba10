//! Raw channel member for observing and injecting signals.

use common::types::ParticipantId;
use floor_controller::transport::local::{LocalHub, LocalTransport};
use floor_controller::transport::{SignalSubscription, SignalingTransport};
use floor_protocol::{decode_message, encode_message, BroadcastMessage, Signal};
use std::time::Duration;

/// A channel member without an arbiter.
///
/// It counts toward presence like any other participant, so a group with
/// a probe needs one more AB for quorum unless the probe acknowledges.
pub struct SignalProbe {
    transport: LocalTransport,
    signals: SignalSubscription,
}

impl SignalProbe {
    pub fn join(hub: &LocalHub, name: &str) -> Self {
        let transport = hub.join(ParticipantId::new(name));
        let signals = transport.subscribe_signals();
        Self { transport, signals }
    }

    pub fn participant_id(&self) -> &ParticipantId {
        self.transport.participant_id()
    }

    pub fn transport(&self) -> &LocalTransport {
        &self.transport
    }

    /// Next decodable signal from another member.
    pub async fn recv(&mut self) -> BroadcastMessage {
        loop {
            let payload = self.signals.recv().await.expect("signal bus closed");
            if let Ok(message) = decode_message(&payload) {
                return message;
            }
        }
    }

    /// Next signal of the given kind, skipping others.
    pub async fn recv_signal(&mut self, signal: Signal) -> BroadcastMessage {
        loop {
            let message = self.recv().await;
            if message.signal() == signal {
                return message;
            }
        }
    }

    /// Every signal received during `window`.
    pub async fn collect_for(&mut self, window: Duration) -> Vec<BroadcastMessage> {
        let deadline = tokio::time::Instant::now() + window;
        let mut messages = Vec::new();
        while let Ok(message) = tokio::time::timeout_at(deadline, self.recv()).await {
            messages.push(message);
        }
        messages
    }

    pub async fn send(&self, message: BroadcastMessage) {
        let payload = encode_message(&message).expect("encode signal");
        self.transport
            .send_signal(payload)
            .await
            .expect("probe send failed");
    }

    /// Send raw bytes, e.g. a malformed payload.
    pub async fn send_raw(&self, payload: impl Into<bytes::Bytes>) {
        self.transport
            .send_signal(payload.into())
            .await
            .expect("probe send failed");
    }
}
