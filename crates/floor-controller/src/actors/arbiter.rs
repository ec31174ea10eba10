//! `FloorArbiter` - owns the lock state machine for one participant.
//!
//! The arbiter is the single consumer of the participant's inbound signal
//! stream, so transitions follow signal arrival order. Timed work runs in
//! background tasks that report back through an internal event channel:
//!
//! - `AcquireWaiter` while `Locking`
//! - `LeaseRefresher` while `Locked`
//! - `StaleLockMonitor` while `LockedByOther`
//!
//! Each task is tagged with the epoch (state change counter) it was started
//! in, and reports from an older epoch are ignored. A timeout that fires
//! after its attempt already resolved therefore has no effect.
//!
//! # Transitions
//!
//! | From | Trigger | To |
//! |------|---------|----|
//! | `Unlocked` | acquire, lease free | `Locking` |
//! | `Locking` | quorum or timeout | `Locked` |
//! | `Locking` / `Locked` | release | `Unlocked` |
//! | `Locked` | fenced refresh rejected | `Unlocked` |
//! | `Unlocked` | RB / RR | `LockedByOther` |
//! | `LockedByOther` | EB | `Unlocked` |
//! | `LockedByOther` | lease expired | `Unlocked` |

use super::acquire::AcquireWaiter;
use super::messages::{AcquireOutcome, ArbiterEvent, ArbiterMessage, ReleaseOutcome};
use super::monitor::{within_debounce, StaleLockMonitor};
use super::refresher::LeaseRefresher;
use super::task::BackgroundTask;
use crate::audio::{AudioDriver, AudioMode, AudioSession};
use crate::config::{
    DEFAULT_ACQUIRE_POLL_MS, DEFAULT_ACQUIRE_TIMEOUT_MS, DEFAULT_ACTIVITY_DEBOUNCE_MS,
    DEFAULT_LEASE_TTL_MS, DEFAULT_LOCK_KEY, DEFAULT_MONITOR_INTERVAL_MS,
    DEFAULT_REFRESH_INTERVAL_MS,
};
use crate::errors::FloorError;
use crate::lease::{LeaseMode, LeaseStore, LeaseWrite};
use crate::observability::metrics;
use crate::signaling::{decode_inbound, Signaler};
use crate::state::{LockState, LockStateReceiver};
use crate::transport::{SignalSubscription, SignalingTransport};
use bytes::Bytes;
use common::clock::Clock;
use common::types::ParticipantId;
use floor_protocol::{BroadcastMessage, CorrelationId, Signal};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Mailbox size for handle requests.
const ARBITER_CHANNEL_BUFFER: usize = 32;

/// Buffer for background task reports; each task reports at most once.
const EVENT_CHANNEL_BUFFER: usize = 16;

/// Timing and mode settings of an arbiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArbiterSettings {
    pub lock_key: String,
    pub lease_ttl: Duration,
    pub refresh_interval: Duration,
    pub acquire_timeout: Duration,
    pub acquire_poll_interval: Duration,
    pub monitor_interval: Duration,
    pub activity_debounce: Duration,
    pub lease_mode: LeaseMode,
    pub audio_mode: AudioMode,
}

impl Default for ArbiterSettings {
    fn default() -> Self {
        Self {
            lock_key: DEFAULT_LOCK_KEY.to_string(),
            lease_ttl: Duration::from_millis(DEFAULT_LEASE_TTL_MS),
            refresh_interval: Duration::from_millis(DEFAULT_REFRESH_INTERVAL_MS),
            acquire_timeout: Duration::from_millis(DEFAULT_ACQUIRE_TIMEOUT_MS),
            acquire_poll_interval: Duration::from_millis(DEFAULT_ACQUIRE_POLL_MS),
            monitor_interval: Duration::from_millis(DEFAULT_MONITOR_INTERVAL_MS),
            activity_debounce: Duration::from_millis(DEFAULT_ACTIVITY_DEBOUNCE_MS),
            lease_mode: LeaseMode::default(),
            audio_mode: AudioMode::default(),
        }
    }
}

/// Handle to a `FloorArbiter`.
#[derive(Clone)]
pub struct FloorArbiterHandle {
    sender: mpsc::Sender<ArbiterMessage>,
    state: watch::Receiver<LockState>,
    cancel_token: CancellationToken,
    participant_id: ParticipantId,
}

impl FloorArbiterHandle {
    #[must_use]
    pub fn participant_id(&self) -> &ParticipantId {
        &self.participant_id
    }

    /// Ask for the floor.
    ///
    /// Transport failures are not errors here; they show up as
    /// [`AcquireOutcome::TransportUnavailable`] or as a slower
    /// `Locking -> Locked`. An error means the arbiter has stopped.
    pub async fn request_acquire(&self) -> Result<AcquireOutcome, FloorError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ArbiterMessage::RequestAcquire { respond_to: tx })
            .await
            .map_err(|e| FloorError::ArbiterUnavailable(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| FloorError::ArbiterUnavailable(format!("response receive failed: {e}")))
    }

    /// Give the floor back (or abandon a pending acquire).
    pub async fn request_release(&self) -> Result<ReleaseOutcome, FloorError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ArbiterMessage::RequestRelease { respond_to: tx })
            .await
            .map_err(|e| FloorError::ArbiterUnavailable(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| FloorError::ArbiterUnavailable(format!("response receive failed: {e}")))
    }

    /// Current lock state.
    #[must_use]
    pub fn state(&self) -> LockState {
        *self.state.borrow()
    }

    /// Subscribe to lock state changes.
    #[must_use]
    pub fn subscribe_state(&self) -> LockStateReceiver {
        LockStateReceiver::from_watch_receiver(self.state.clone())
    }

    /// Stop the arbiter. A held or pending floor is released first.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

impl std::fmt::Debug for FloorArbiterHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FloorArbiterHandle")
            .field("participant_id", &self.participant_id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// The floor arbiter actor.
pub struct FloorArbiter {
    participant_id: ParticipantId,
    settings: ArbiterSettings,
    receiver: mpsc::Receiver<ArbiterMessage>,
    events_tx: mpsc::Sender<ArbiterEvent>,
    events_rx: mpsc::Receiver<ArbiterEvent>,
    cancel_token: CancellationToken,
    state_tx: watch::Sender<LockState>,
    /// Bumped on every state change.
    epoch: u64,

    transport: Arc<dyn SignalingTransport>,
    lease: LeaseStore,
    signaler: Signaler,
    audio: AudioDriver,
    signals: SignalSubscription,
    signals_open: bool,

    /// RB of our current attempt while `Locking` / `Locked`.
    request: Option<BroadcastMessage>,
    /// Version of our last fenced lease write.
    fence: Option<u64>,
    /// Correlation ID of the remote holder while `LockedByOther`.
    observed: Option<CorrelationId>,
    activity_tx: watch::Sender<Instant>,

    acquire_task: Option<BackgroundTask>,
    refresh_task: Option<BackgroundTask>,
    monitor_task: Option<BackgroundTask>,
}

impl FloorArbiter {
    /// Spawn an arbiter for the participant behind `transport`.
    ///
    /// The signal subscription is taken before this returns, so no signal
    /// published afterwards is missed.
    pub fn spawn(
        transport: Arc<dyn SignalingTransport>,
        audio: Arc<dyn AudioSession>,
        clock: Arc<dyn Clock>,
        settings: ArbiterSettings,
        cancel_token: CancellationToken,
    ) -> (FloorArbiterHandle, JoinHandle<()>) {
        let participant_id = transport.participant_id().clone();
        let (sender, receiver) = mpsc::channel(ARBITER_CHANNEL_BUFFER);
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_BUFFER);
        let (state_tx, state_rx) = watch::channel(LockState::Unlocked);
        let (activity_tx, _) = watch::channel(Instant::now());

        let lease = LeaseStore::new(
            Arc::clone(&transport),
            clock,
            settings.lock_key.clone(),
            settings.lease_ttl,
        );

        let actor = Self {
            participant_id: participant_id.clone(),
            receiver,
            events_tx,
            events_rx,
            cancel_token: cancel_token.clone(),
            state_tx,
            epoch: 0,
            lease,
            signaler: Signaler::new(Arc::clone(&transport)),
            audio: AudioDriver::new(audio, settings.audio_mode, participant_id.clone()),
            signals: transport.subscribe_signals(),
            signals_open: true,
            transport,
            settings,
            request: None,
            fence: None,
            observed: None,
            activity_tx,
            acquire_task: None,
            refresh_task: None,
            monitor_task: None,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = FloorArbiterHandle {
            sender,
            state: state_rx,
            cancel_token,
            participant_id,
        };

        (handle, task_handle)
    }

    #[instrument(skip_all, name = "floor.arbiter", fields(participant_id = %self.participant_id))]
    async fn run(mut self) {
        info!(
            target: "floor.arbiter",
            participant_id = %self.participant_id,
            lease_mode = %self.settings.lease_mode,
            audio_mode = %self.settings.audio_mode,
            "FloorArbiter started"
        );

        self.audio.start();

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "floor.arbiter",
                        participant_id = %self.participant_id,
                        "FloorArbiter received cancellation signal"
                    );
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => self.handle_message(message).await,
                        None => {
                            info!(
                                target: "floor.arbiter",
                                participant_id = %self.participant_id,
                                "FloorArbiter channel closed, exiting"
                            );
                            break;
                        }
                    }
                }

                Some(event) = self.events_rx.recv() => {
                    self.handle_event(event).await;
                }

                payload = self.signals.recv(), if self.signals_open => {
                    match payload {
                        Some(payload) => self.handle_signal(&payload).await,
                        None => {
                            warn!(
                                target: "floor.arbiter",
                                participant_id = %self.participant_id,
                                "Signal stream closed"
                            );
                            self.signals_open = false;
                        }
                    }
                }
            }
        }

        self.shutdown().await;
    }

    async fn handle_message(&mut self, message: ArbiterMessage) {
        match message {
            ArbiterMessage::RequestAcquire { respond_to } => {
                let outcome = self.acquire().await;
                metrics::record_acquire_request(outcome.as_str());
                let _ = respond_to.send(outcome);
            }
            ArbiterMessage::RequestRelease { respond_to } => {
                let outcome = self.release().await;
                let _ = respond_to.send(outcome);
            }
        }
    }

    fn state(&self) -> LockState {
        *self.state_tx.borrow()
    }

    fn set_state(&mut self, next: LockState) {
        let previous = self.state();
        if previous == next {
            return;
        }

        self.state_tx.send_replace(next);
        self.epoch += 1;
        metrics::record_state_transition(next.as_str());
        info!(
            target: "floor.arbiter",
            participant_id = %self.participant_id,
            from = %previous,
            to = %next,
            "Lock state changed"
        );

        self.audio.on_transition(previous, next);
    }

    // ------------------------------------------------------------------
    // Local requests
    // ------------------------------------------------------------------

    async fn acquire(&mut self) -> AcquireOutcome {
        let state = self.state();
        if state != LockState::Unlocked {
            debug!(
                target: "floor.arbiter",
                participant_id = %self.participant_id,
                state = %state,
                "Acquire ignored, not unlocked"
            );
            return AcquireOutcome::AlreadyActive(state);
        }

        let snapshot = match self.lease.read().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                metrics::record_transport_error("read_metadata");
                warn!(
                    target: "floor.arbiter",
                    participant_id = %self.participant_id,
                    error = %e,
                    "Cannot read floor lease, acquire rejected"
                );
                return AcquireOutcome::TransportUnavailable;
            }
        };

        if snapshot.is_live(self.lease.now_millis()) {
            info!(
                target: "floor.arbiter",
                participant_id = %self.participant_id,
                "Floor lease still live, acquire rejected"
            );
            return AcquireOutcome::LeaseHeld;
        }

        let fence = match self.settings.lease_mode {
            LeaseMode::LastWriterWins => None,
            LeaseMode::Fenced => Some(snapshot.version),
        };

        match self.lease.renew(fence).await {
            Ok(LeaseWrite::Written { version, .. }) => {
                self.fence = fence.map(|_| version);
            }
            Ok(LeaseWrite::Conflict { current_version }) => {
                metrics::record_fenced_out("acquire");
                info!(
                    target: "floor.arbiter",
                    participant_id = %self.participant_id,
                    seen_version = snapshot.version,
                    current_version,
                    "Lease changed during acquire, backing off"
                );
                return AcquireOutcome::Fenced;
            }
            Err(e) => {
                metrics::record_transport_error("write_lease");
                warn!(
                    target: "floor.arbiter",
                    participant_id = %self.participant_id,
                    error = %e,
                    "Lease write failed during acquire"
                );
                if fence.is_some() {
                    return AcquireOutcome::TransportUnavailable;
                }
            }
        }

        let request = BroadcastMessage::request();
        self.request = Some(request);
        self.set_state(LockState::Locking);
        self.start_acquire_waiter(request);

        AcquireOutcome::Started
    }

    async fn release(&mut self) -> ReleaseOutcome {
        let state = self.state();
        match state {
            LockState::Locked => stop_task(&mut self.refresh_task).await,
            LockState::Locking => stop_task(&mut self.acquire_task).await,
            LockState::Unlocked | LockState::LockedByOther => {
                debug!(
                    target: "floor.arbiter",
                    participant_id = %self.participant_id,
                    state = %state,
                    "Release ignored, not holding the floor"
                );
                return ReleaseOutcome::NotHolding(state);
            }
        }

        self.delete_lease().await;
        if let Some(request) = self.request.take() {
            self.signaler.send(request.end()).await;
        }
        self.fence = None;
        self.set_state(LockState::Unlocked);

        ReleaseOutcome::Released
    }

    // ------------------------------------------------------------------
    // Background task reports
    // ------------------------------------------------------------------

    async fn handle_event(&mut self, event: ArbiterEvent) {
        if event.epoch() != self.epoch {
            debug!(
                target: "floor.arbiter",
                participant_id = %self.participant_id,
                ?event,
                current_epoch = self.epoch,
                "Ignoring stale background report"
            );
            return;
        }

        match event {
            ArbiterEvent::AcquireResolved { correlation_id, .. } => {
                let current = self.request.map(|r| r.correlation_id());
                if self.state() != LockState::Locking || current != Some(correlation_id) {
                    return;
                }
                stop_task(&mut self.acquire_task).await;
                self.set_state(LockState::Locked);
                self.start_refresher();
            }

            ArbiterEvent::LeaseExpired { .. } => {
                if self.state() != LockState::LockedByOther {
                    return;
                }
                stop_task(&mut self.monitor_task).await;

                // Activity may have arrived after the monitor's check.
                if within_debounce(*self.activity_tx.borrow(), self.settings.activity_debounce) {
                    debug!(
                        target: "floor.arbiter",
                        participant_id = %self.participant_id,
                        "Floor activity since expiry check, monitoring again"
                    );
                    self.start_monitor();
                    return;
                }

                self.take_over_stale_lock().await;
            }

            ArbiterEvent::FencedOut { .. } => {
                if self.state() != LockState::Locked {
                    return;
                }
                stop_task(&mut self.refresh_task).await;
                self.request = None;
                self.fence = None;
                self.set_state(LockState::Unlocked);
            }
        }
    }

    async fn take_over_stale_lock(&mut self) {
        metrics::record_stale_lock_takeover();
        info!(
            target: "floor.arbiter",
            participant_id = %self.participant_id,
            observed_correlation_id = ?self.observed,
            "Reclaiming stale floor lease"
        );

        self.delete_lease().await;
        let correlation_id = self.observed.take().unwrap_or_default();
        self.signaler
            .send(BroadcastMessage::new(Signal::EndBroadcast, correlation_id))
            .await;
        self.set_state(LockState::Unlocked);
    }

    // ------------------------------------------------------------------
    // Inbound signals
    // ------------------------------------------------------------------

    async fn handle_signal(&mut self, payload: &Bytes) {
        let Some(message) = decode_inbound(payload) else {
            return;
        };

        debug!(
            target: "floor.arbiter",
            participant_id = %self.participant_id,
            signal = %message.signal(),
            correlation_id = %message.correlation_id(),
            "Signal received"
        );

        match message.signal() {
            Signal::RequestBroadcast | Signal::RefreshBroadcast => self.on_floor_claim(message).await,
            Signal::EndBroadcast => self.on_floor_end().await,
            // Counted by the acquire waiter.
            Signal::AcknowledgeBroadcast => {}
        }
    }

    async fn on_floor_claim(&mut self, message: BroadcastMessage) {
        let state = self.state();

        if message.signal() == Signal::RequestBroadcast && !state.is_claiming() {
            self.signaler.send(message.ack()).await;
        }

        match state {
            LockState::Unlocked => {
                self.observed = Some(message.correlation_id());
                self.activity_tx.send_replace(Instant::now());
                self.set_state(LockState::LockedByOther);
                self.start_monitor();
            }
            LockState::LockedByOther => {
                self.observed = Some(message.correlation_id());
                self.activity_tx.send_replace(Instant::now());
            }
            LockState::Locking | LockState::Locked => {
                warn!(
                    target: "floor.arbiter",
                    participant_id = %self.participant_id,
                    state = %state,
                    signal = %message.signal(),
                    correlation_id = %message.correlation_id(),
                    "Competing floor claim ignored"
                );
            }
        }
    }

    async fn on_floor_end(&mut self) {
        let state = self.state();
        if state != LockState::LockedByOther {
            debug!(
                target: "floor.arbiter",
                participant_id = %self.participant_id,
                state = %state,
                "EB ignored, floor not held by another participant"
            );
            return;
        }

        stop_task(&mut self.monitor_task).await;
        self.observed = None;
        self.set_state(LockState::Unlocked);
    }

    // ------------------------------------------------------------------
    // Background tasks
    // ------------------------------------------------------------------

    fn start_acquire_waiter(&mut self, request: BroadcastMessage) {
        let token = self.cancel_token.child_token();
        let waiter = AcquireWaiter {
            participant_id: self.participant_id.clone(),
            request,
            signaler: self.signaler.clone(),
            signals: self.transport.subscribe_signals(),
            presence: self.transport.presence(),
            timeout: self.settings.acquire_timeout,
            poll_interval: self.settings.acquire_poll_interval,
            events: self.events_tx.clone(),
            epoch: self.epoch,
            cancel_token: token.clone(),
        };
        self.acquire_task = Some(BackgroundTask::spawn("acquire", token, waiter.run()));
    }

    fn start_refresher(&mut self) {
        let Some(request) = self.request else {
            return;
        };
        let token = self.cancel_token.child_token();
        let refresher = LeaseRefresher {
            participant_id: self.participant_id.clone(),
            request,
            lease: self.lease.clone(),
            signaler: self.signaler.clone(),
            interval: self.settings.refresh_interval,
            fence: self.fence,
            events: self.events_tx.clone(),
            epoch: self.epoch,
            cancel_token: token.clone(),
        };
        self.refresh_task = Some(BackgroundTask::spawn("refresh", token, refresher.run()));
    }

    fn start_monitor(&mut self) {
        let token = self.cancel_token.child_token();
        let monitor = StaleLockMonitor {
            participant_id: self.participant_id.clone(),
            lease: self.lease.clone(),
            interval: self.settings.monitor_interval,
            debounce: self.settings.activity_debounce,
            activity: self.activity_tx.subscribe(),
            events: self.events_tx.clone(),
            epoch: self.epoch,
            cancel_token: token.clone(),
        };
        self.monitor_task = Some(BackgroundTask::spawn("monitor", token, monitor.run()));
    }

    async fn delete_lease(&self) {
        if let Err(e) = self.lease.delete().await {
            metrics::record_transport_error("delete_lease");
            warn!(
                target: "floor.arbiter",
                participant_id = %self.participant_id,
                error = %e,
                "Failed to delete floor lease"
            );
        }
    }

    async fn shutdown(mut self) {
        // Child tokens are already cancelled; release still does its own
        // lease delete and EB.
        let state = self.state();
        if state.is_claiming() {
            self.release().await;
        }

        stop_task(&mut self.acquire_task).await;
        stop_task(&mut self.refresh_task).await;
        stop_task(&mut self.monitor_task).await;

        self.signals.unsubscribe();
        self.audio.shutdown();

        info!(
            target: "floor.arbiter",
            participant_id = %self.participant_id,
            final_state = %state,
            "FloorArbiter stopped"
        );
    }
}

async fn stop_task(slot: &mut Option<BackgroundTask>) {
    if let Some(mut task) = slot.take() {
        task.stop().await;
    }
}
