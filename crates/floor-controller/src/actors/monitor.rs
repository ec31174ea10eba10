//! Stale-lock monitor run while another participant holds the floor.
//!
//! Every `interval`, and whenever the channel metadata changes, the monitor
//! checks whether the holder's lease is still live. A recent RB/RR counts as liveness for `debounce`, whatever the
//! lease read says, so a holder whose lease write has not propagated yet
//! is not mistaken for a dead one. Once the lease is expired and the
//! holder has been quiet for longer than the debounce window the monitor
//! reports `LeaseExpired` and exits.

use super::messages::ArbiterEvent;
use crate::lease::LeaseStore;
use crate::observability::metrics;
use common::types::ParticipantId;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, trace, warn};

/// `true` while `last_activity` lies within the debounce window.
pub(crate) fn within_debounce(last_activity: Instant, debounce: Duration) -> bool {
    last_activity.elapsed() < debounce
}

pub(crate) struct StaleLockMonitor {
    pub(crate) participant_id: ParticipantId,
    pub(crate) lease: LeaseStore,
    pub(crate) interval: Duration,
    pub(crate) debounce: Duration,
    /// Time of the most recent RB/RR from the holder.
    pub(crate) activity: watch::Receiver<Instant>,
    pub(crate) events: mpsc::Sender<ArbiterEvent>,
    pub(crate) epoch: u64,
    pub(crate) cancel_token: CancellationToken,
}

impl StaleLockMonitor {
    #[instrument(skip_all, name = "floor.monitor", fields(participant_id = %self.participant_id))]
    pub(crate) async fn run(self) {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut changes = self.lease.changes();
        changes.mark_unchanged();
        let mut changes_open = true;

        loop {
            tokio::select! {
                biased;
                () = self.cancel_token.cancelled() => return,
                _ = ticker.tick() => {}
                changed = changes.changed(), if changes_open => {
                    if changed.is_err() {
                        // Polling alone from here on.
                        changes_open = false;
                        continue;
                    }
                    trace!(
                        target: "floor.monitor",
                        participant_id = %self.participant_id,
                        "Channel metadata changed, checking lease"
                    );
                }
            }

            let last_activity = *self.activity.borrow();
            if within_debounce(last_activity, self.debounce) {
                trace!(
                    target: "floor.monitor",
                    participant_id = %self.participant_id,
                    "Recent floor activity, lease assumed live"
                );
                continue;
            }

            let snapshot = match self.lease.read().await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    metrics::record_transport_error("read_metadata");
                    warn!(
                        target: "floor.monitor",
                        participant_id = %self.participant_id,
                        error = %e,
                        "Lease check failed"
                    );
                    continue;
                }
            };

            if snapshot.is_live(self.lease.now_millis()) {
                continue;
            }

            info!(
                target: "floor.monitor",
                participant_id = %self.participant_id,
                expires_at = ?snapshot.lease.map(|l| l.expires_at_millis),
                "Floor lease expired without renewal"
            );
            let _ = self
                .events
                .send(ArbiterEvent::LeaseExpired { epoch: self.epoch })
                .await;
            return;
        }
    }
}
