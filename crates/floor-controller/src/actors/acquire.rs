//! Acquire quorum waiter.
//!
//! Sends the RB for one acquire attempt and waits until every other member
//! of the group has acknowledged it, or until the fallback timeout passes.
//! Either way the attempt resolves exactly once and reports back to the
//! arbiter, which moves `Locking -> Locked`.

use super::messages::{ArbiterEvent, ResolveReason};
use crate::observability::metrics;
use crate::signaling::{decode_inbound, Signaler};
use crate::transport::SignalSubscription;
use common::types::ParticipantId;
use floor_protocol::{BroadcastMessage, Signal};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// Quorum rule: every other member has confirmed.
///
/// A reported presence of 0 still counts the local participant.
pub(crate) fn quorum_met(confirmations: u32, presence: u32) -> bool {
    confirmations >= presence.max(1) - 1
}

pub(crate) struct AcquireWaiter {
    pub(crate) participant_id: ParticipantId,
    pub(crate) request: BroadcastMessage,
    pub(crate) signaler: Signaler,
    pub(crate) signals: SignalSubscription,
    pub(crate) presence: watch::Receiver<u32>,
    pub(crate) timeout: Duration,
    pub(crate) poll_interval: Duration,
    pub(crate) events: mpsc::Sender<ArbiterEvent>,
    pub(crate) epoch: u64,
    pub(crate) cancel_token: CancellationToken,
}

impl AcquireWaiter {
    #[instrument(
        skip_all,
        name = "floor.acquire",
        fields(
            participant_id = %self.participant_id,
            correlation_id = %self.request.correlation_id()
        )
    )]
    pub(crate) async fn run(mut self) {
        let started = Instant::now();
        let deadline = started + self.timeout;
        let correlation_id = self.request.correlation_id();

        self.signaler.send(self.request).await;

        let mut ticker = interval_at(started + self.poll_interval, self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut confirmations: u32 = 0;
        let mut signals_open = true;
        let mut presence_open = true;

        let reason = loop {
            let presence = *self.presence.borrow_and_update();
            if quorum_met(confirmations, presence) {
                break ResolveReason::Quorum;
            }
            if Instant::now() >= deadline {
                break ResolveReason::Timeout;
            }

            tokio::select! {
                biased;

                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "floor.acquire",
                        participant_id = %self.participant_id,
                        confirmations,
                        "Acquire attempt cancelled"
                    );
                    self.signals.unsubscribe();
                    return;
                }

                payload = self.signals.recv(), if signals_open => {
                    match payload {
                        Some(payload) => {
                            let Some(message) = decode_inbound(&payload) else {
                                continue;
                            };
                            if message.signal() == Signal::AcknowledgeBroadcast
                                && message.correlation_id() == correlation_id
                            {
                                confirmations = confirmations.saturating_add(1);
                                debug!(
                                    target: "floor.acquire",
                                    participant_id = %self.participant_id,
                                    confirmations,
                                    presence,
                                    "Acknowledgment received"
                                );
                            }
                        }
                        None => signals_open = false,
                    }
                }

                changed = self.presence.changed(), if presence_open => {
                    if changed.is_err() {
                        presence_open = false;
                    }
                }

                _ = ticker.tick() => {}
            }
        };

        self.signals.unsubscribe();

        let elapsed = started.elapsed();
        metrics::record_acquire_resolved(reason.as_str(), elapsed);
        info!(
            target: "floor.acquire",
            participant_id = %self.participant_id,
            reason = reason.as_str(),
            confirmations,
            elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            "Acquire attempt resolved"
        );

        let _ = self
            .events
            .send(ArbiterEvent::AcquireResolved {
                epoch: self.epoch,
                correlation_id,
                reason,
            })
            .await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::transport::local::LocalHub;
    use crate::transport::SignalingTransport;
    use floor_protocol::encode_message;
    use std::sync::Arc;

    struct Harness {
        hub: LocalHub,
        peer: crate::transport::local::LocalTransport,
        peer_signals: SignalSubscription,
        events: mpsc::Receiver<ArbiterEvent>,
        cancel_token: CancellationToken,
        request: BroadcastMessage,
    }

    fn start(timeout_ms: u64) -> Harness {
        let hub = LocalHub::new();
        let local = hub.join(ParticipantId::new("alice"));
        let peer = hub.join(ParticipantId::new("peer"));
        let peer_signals = peer.subscribe_signals();
        let (events_tx, events) = mpsc::channel(4);
        let cancel_token = CancellationToken::new();
        let request = BroadcastMessage::request();

        let waiter = AcquireWaiter {
            participant_id: ParticipantId::new("alice"),
            request,
            signaler: Signaler::new(Arc::new(local.clone())),
            signals: local.subscribe_signals(),
            presence: local.presence(),
            timeout: Duration::from_millis(timeout_ms),
            poll_interval: Duration::from_millis(100),
            events: events_tx,
            epoch: 7,
            cancel_token: cancel_token.clone(),
        };
        tokio::spawn(waiter.run());

        Harness {
            hub,
            peer,
            peer_signals,
            events,
            cancel_token,
            request,
        }
    }

    #[test]
    fn test_quorum_rule() {
        assert!(quorum_met(0, 0));
        assert!(quorum_met(0, 1));
        assert!(!quorum_met(0, 2));
        assert!(quorum_met(1, 2));
        assert!(!quorum_met(1, 3));
        assert!(quorum_met(2, 3));
        assert!(quorum_met(5, 3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sends_rb_then_resolves_on_ack() {
        let mut h = start(1_500);
        let started = Instant::now();

        let rb = decode_inbound(&h.peer_signals.recv().await.unwrap()).unwrap();
        assert_eq!(rb, h.request);

        h.peer
            .send_signal(encode_message(&rb.ack()).unwrap())
            .await
            .unwrap();

        let event = h.events.recv().await.unwrap();
        assert_eq!(
            event,
            ArbiterEvent::AcquireResolved {
                epoch: 7,
                correlation_id: h.request.correlation_id(),
                reason: ResolveReason::Quorum,
            }
        );
        assert!(started.elapsed() < Duration::from_millis(1_500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ack_for_other_attempt_is_not_counted() {
        let mut h = start(1_500);
        let started = Instant::now();

        let _rb = h.peer_signals.recv().await.unwrap();
        let foreign = BroadcastMessage::request().ack();
        h.peer
            .send_signal(encode_message(&foreign).unwrap())
            .await
            .unwrap();

        let event = h.events.recv().await.unwrap();
        assert!(matches!(
            event,
            ArbiterEvent::AcquireResolved {
                reason: ResolveReason::Timeout,
                ..
            }
        ));
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(1_500));
        assert!(elapsed < Duration::from_millis(1_600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_presence_drop_completes_quorum() {
        let mut h = start(1_500);
        let _rb = h.peer_signals.recv().await.unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        h.hub.disconnect(h.peer.participant_id());

        let event = h.events.recv().await.unwrap();
        assert!(matches!(
            event,
            ArbiterEvent::AcquireResolved {
                reason: ResolveReason::Quorum,
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_presence_resolves_immediately() {
        let mut h = start(1_500);
        h.hub.set_reported_occupancy(Some(0));
        let started = Instant::now();

        let event = h.events.recv().await.unwrap();
        assert_eq!(
            event,
            ArbiterEvent::AcquireResolved {
                epoch: 7,
                correlation_id: h.request.correlation_id(),
                reason: ResolveReason::Quorum,
            }
        );
        assert_eq!(started.elapsed(), Duration::ZERO);

        // The RB still goes out.
        let rb = decode_inbound(&h.peer_signals.recv().await.unwrap()).unwrap();
        assert_eq!(rb, h.request);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_resolution_reports_nothing() {
        let mut h = start(1_500);
        let _rb = h.peer_signals.recv().await.unwrap();

        h.cancel_token.cancel();
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert!(h.events.try_recv().is_err());
    }
}
