//! Lease refresh loop run while this participant holds the floor.

use super::messages::ArbiterEvent;
use crate::lease::{LeaseStore, LeaseWrite};
use crate::observability::metrics;
use crate::signaling::Signaler;
use common::types::ParticipantId;
use floor_protocol::BroadcastMessage;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Rewrites the lease and sends RR every `interval`.
///
/// A tick that has started its lease write always finishes it, and nothing
/// is sent after cancellation. Callers stop the loop with
/// `BackgroundTask::stop` before deleting the lease.
pub(crate) struct LeaseRefresher {
    pub(crate) participant_id: ParticipantId,
    pub(crate) request: BroadcastMessage,
    pub(crate) lease: LeaseStore,
    pub(crate) signaler: Signaler,
    pub(crate) interval: Duration,
    /// Version of the last successful fenced write; `None` when unfenced.
    pub(crate) fence: Option<u64>,
    pub(crate) events: mpsc::Sender<ArbiterEvent>,
    pub(crate) epoch: u64,
    pub(crate) cancel_token: CancellationToken,
}

impl LeaseRefresher {
    #[instrument(
        skip_all,
        name = "floor.refresh",
        fields(
            participant_id = %self.participant_id,
            correlation_id = %self.request.correlation_id()
        )
    )]
    pub(crate) async fn run(mut self) {
        info!(
            target: "floor.refresh",
            participant_id = %self.participant_id,
            interval_ms = u64::try_from(self.interval.as_millis()).unwrap_or(u64::MAX),
            "Lease refresher started"
        );

        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                () = self.cancel_token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.lease.renew(self.fence).await {
                Ok(LeaseWrite::Written { version, .. }) => {
                    if self.fence.is_some() {
                        self.fence = Some(version);
                    }
                }
                Ok(LeaseWrite::Conflict { current_version }) => {
                    metrics::record_fenced_out("refresh");
                    warn!(
                        target: "floor.refresh",
                        participant_id = %self.participant_id,
                        expected_version = ?self.fence,
                        current_version,
                        "Lease overwritten by another participant, giving up the floor"
                    );
                    let _ = self
                        .events
                        .send(ArbiterEvent::FencedOut { epoch: self.epoch })
                        .await;
                    break;
                }
                Err(e) => {
                    metrics::record_transport_error("write_lease");
                    warn!(
                        target: "floor.refresh",
                        participant_id = %self.participant_id,
                        error = %e,
                        "Lease refresh failed"
                    );
                }
            }

            if self.cancel_token.is_cancelled() {
                break;
            }

            self.signaler.send(self.request.refresh()).await;
            debug!(
                target: "floor.refresh",
                participant_id = %self.participant_id,
                "Lease refreshed"
            );
        }

        info!(
            target: "floor.refresh",
            participant_id = %self.participant_id,
            "Lease refresher stopped"
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::actors::task::BackgroundTask;
    use crate::signaling::decode_inbound;
    use crate::transport::local::LocalHub;
    use crate::transport::SignalingTransport;
    use common::clock::PausedClock;
    use floor_protocol::Signal;
    use std::sync::Arc;

    const KEY: &str = "floor-lock";

    fn refresher(
        hub: &LocalHub,
        fence: Option<u64>,
    ) -> (BackgroundTask, BroadcastMessage, mpsc::Receiver<ArbiterEvent>) {
        let transport: Arc<dyn SignalingTransport> =
            Arc::new(hub.join(ParticipantId::new("alice")));
        let (events_tx, events) = mpsc::channel(4);
        let token = CancellationToken::new();
        let request = BroadcastMessage::request();

        let refresher = LeaseRefresher {
            participant_id: ParticipantId::new("alice"),
            request,
            lease: LeaseStore::new(
                Arc::clone(&transport),
                Arc::new(PausedClock::new()),
                KEY,
                Duration::from_secs(3),
            ),
            signaler: Signaler::new(transport),
            interval: Duration::from_secs(1),
            fence,
            events: events_tx,
            epoch: 3,
            cancel_token: token.clone(),
        };

        (
            BackgroundTask::spawn("refresher", token, refresher.run()),
            request,
            events,
        )
    }

    fn lease_value(hub: &LocalHub) -> Option<i64> {
        hub.committed_metadata()
            .get(KEY)
            .and_then(serde_json::Value::as_i64)
    }

    #[tokio::test(start_paused = true)]
    async fn test_renews_lease_and_sends_rr_every_interval() {
        let hub = LocalHub::new();
        let observer = hub.join(ParticipantId::new("bob"));
        let mut inbound = observer.subscribe_signals();
        let (mut task, request, _events) = refresher(&hub, None);

        tokio::time::sleep(Duration::from_millis(1_050)).await;
        let first = lease_value(&hub).unwrap();
        assert_eq!(first, PausedClock::DEFAULT_ANCHOR_MILLIS + 1_000 + 3_000);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(lease_value(&hub).unwrap(), first + 1_000);

        for _ in 0..2 {
            let rr = decode_inbound(&inbound.recv().await.unwrap()).unwrap();
            assert_eq!(rr.signal(), Signal::RefreshBroadcast);
            assert_eq!(rr.correlation_id(), request.correlation_id());
        }

        task.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_slow_write_prevents_resurrection() {
        let hub = LocalHub::new();
        hub.set_write_latency(Duration::from_millis(300));
        let observer = hub.join(ParticipantId::new("bob"));
        let mut inbound = observer.subscribe_signals();
        let (mut task, _request, _events) = refresher(&hub, None);

        // Tick at 1s starts a write that commits at 1.3s.
        tokio::time::sleep(Duration::from_millis(1_100)).await;
        task.stop().await;

        // The in-flight write landed before stop returned...
        assert!(lease_value(&hub).is_some());
        // ...and no RR followed it.
        assert!(matches!(
            tokio::time::timeout(Duration::from_millis(10), inbound.recv()).await,
            Err(_)
        ));

        // Deleting now is final: no straggling tick re-writes the lease.
        observer.delete_metadata_key(KEY).await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(lease_value(&hub), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fenced_conflict_reports_and_stops() {
        let hub = LocalHub::new();
        let intruder = hub.join(ParticipantId::new("mallory"));
        let (mut task, _request, mut events) = refresher(&hub, Some(0));

        intruder
            .write_metadata(crate::transport::MetadataMap::from([(
                KEY.to_string(),
                serde_json::json!(1),
            )]))
            .await
            .unwrap();

        let event = events.recv().await.unwrap();
        assert_eq!(event, ArbiterEvent::FencedOut { epoch: 3 });
        assert_eq!(lease_value(&hub), Some(1));

        task.stop().await;
    }
}
