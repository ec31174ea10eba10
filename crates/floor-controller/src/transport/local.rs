//! In-process signaling transport.
//!
//! `LocalHub` models one channel shared by several participants living in
//! the same process. Signals fan out over a `tokio::sync::broadcast`
//! channel. The metadata map keeps a committed copy plus the copy that
//! participants can observe, which trails the committed one by
//! `metadata_lag` to reproduce an eventually-consistent store.
//!
//! Writes are merge-then-replace against the writer's observed copy, so
//! two participants writing concurrently can clobber each other exactly
//! like they would against a real store without compare-and-swap.

use super::{
    ChannelMetadata, MetadataMap, SignalEnvelope, SignalSubscription, SignalingTransport,
    TransportError, WriteOutcome,
};
use async_trait::async_trait;
use bytes::Bytes;
use common::types::ParticipantId;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, trace};

/// Buffer size of the signal broadcast channel.
const SIGNAL_CHANNEL_CAPACITY: usize = 256;

struct HubState {
    committed: ChannelMetadata,
    connected: HashSet<ParticipantId>,
    reported_occupancy: Option<u32>,
    metadata_lag: Duration,
    write_latency: Duration,
}

struct HubInner {
    signals: broadcast::Sender<SignalEnvelope>,
    state: Mutex<HubState>,
    visible: watch::Sender<ChannelMetadata>,
    presence: watch::Sender<u32>,
}

impl HubInner {
    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_connected(&self, id: &ParticipantId) -> bool {
        self.lock().connected.contains(id)
    }

    fn refresh_presence(&self, state: &HubState) {
        let count = state
            .reported_occupancy
            .unwrap_or_else(|| u32::try_from(state.connected.len()).unwrap_or(u32::MAX));
        self.presence.send_if_modified(|current| {
            let changed = *current != count;
            *current = count;
            changed
        });
    }

    /// Make a committed snapshot observable, now or after the configured lag.
    fn publish(self: &Arc<Self>, snapshot: ChannelMetadata, lag: Duration) {
        if lag.is_zero() {
            publish_if_newer(&self.visible, snapshot);
            return;
        }

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(lag).await;
            publish_if_newer(&inner.visible, snapshot);
        });
    }
}

fn publish_if_newer(visible: &watch::Sender<ChannelMetadata>, snapshot: ChannelMetadata) {
    visible.send_if_modified(|current| {
        if snapshot.version > current.version {
            *current = snapshot;
            true
        } else {
            false
        }
    });
}

/// In-memory channel shared by local participants.
#[derive(Clone)]
pub struct LocalHub {
    inner: Arc<HubInner>,
}

impl LocalHub {
    #[must_use]
    pub fn new() -> Self {
        let (signals, _) = broadcast::channel(SIGNAL_CHANNEL_CAPACITY);
        let (visible, _) = watch::channel(ChannelMetadata::default());
        let (presence, _) = watch::channel(0);

        Self {
            inner: Arc::new(HubInner {
                signals,
                state: Mutex::new(HubState {
                    committed: ChannelMetadata::default(),
                    connected: HashSet::new(),
                    reported_occupancy: None,
                    metadata_lag: Duration::ZERO,
                    write_latency: Duration::ZERO,
                }),
                visible,
                presence,
            }),
        }
    }

    /// Connect a participant and return its transport.
    pub fn join(&self, participant_id: ParticipantId) -> LocalTransport {
        {
            let mut state = self.inner.lock();
            state.connected.insert(participant_id.clone());
            self.inner.refresh_presence(&state);
        }

        debug!(
            target: "floor.transport.local",
            participant_id = %participant_id,
            "Participant joined channel"
        );

        LocalTransport {
            participant_id,
            inner: Arc::clone(&self.inner),
        }
    }

    /// Drop a participant from the channel without any goodbye.
    ///
    /// Its transport stays alive but every publish and metadata call fails
    /// with [`TransportError::Disconnected`]; presence drops by one.
    pub fn disconnect(&self, participant_id: &ParticipantId) {
        let mut state = self.inner.lock();
        if state.connected.remove(participant_id) {
            self.inner.refresh_presence(&state);
            info!(
                target: "floor.transport.local",
                participant_id = %participant_id,
                "Participant disconnected from channel"
            );
        }
    }

    /// Delay between a committed write and its visibility to participants.
    pub fn set_metadata_lag(&self, lag: Duration) {
        self.inner.lock().metadata_lag = lag;
    }

    /// Delay applied to every metadata write before it commits.
    pub fn set_write_latency(&self, latency: Duration) {
        self.inner.lock().write_latency = latency;
    }

    /// Override the occupancy reported to participants (`None` reports the
    /// number of connected participants).
    pub fn set_reported_occupancy(&self, occupancy: Option<u32>) {
        let mut state = self.inner.lock();
        state.reported_occupancy = occupancy;
        self.inner.refresh_presence(&state);
    }

    /// The committed metadata map, ignoring visibility lag.
    #[must_use]
    pub fn committed_metadata(&self) -> ChannelMetadata {
        self.inner.lock().committed.clone()
    }

    /// Number of currently connected participants.
    #[must_use]
    pub fn connected_count(&self) -> usize {
        self.inner.lock().connected.len()
    }
}

impl Default for LocalHub {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LocalHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("LocalHub")
            .field("connected", &state.connected.len())
            .field("version", &state.committed.version)
            .field("metadata_lag", &state.metadata_lag)
            .field("write_latency", &state.write_latency)
            .finish()
    }
}

/// One participant's view of a [`LocalHub`].
#[derive(Clone)]
pub struct LocalTransport {
    participant_id: ParticipantId,
    inner: Arc<HubInner>,
}

impl LocalTransport {
    fn ensure_connected(&self) -> Result<(), TransportError> {
        if self.inner.is_connected(&self.participant_id) {
            Ok(())
        } else {
            Err(TransportError::Disconnected)
        }
    }

    async fn simulate_write_latency(&self) {
        let latency = self.inner.lock().write_latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    /// Commit `custom` as the new map and schedule its visibility.
    fn commit(&self, state: &mut HubState, custom: MetadataMap) -> u64 {
        state.committed = ChannelMetadata {
            custom,
            version: state.committed.version + 1,
        };
        self.inner
            .publish(state.committed.clone(), state.metadata_lag);
        state.committed.version
    }
}

impl std::fmt::Debug for LocalTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTransport")
            .field("participant_id", &self.participant_id)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SignalingTransport for LocalTransport {
    fn participant_id(&self) -> &ParticipantId {
        &self.participant_id
    }

    async fn send_signal(&self, payload: Bytes) -> Result<(), TransportError> {
        self.ensure_connected()?;

        // No receivers is not an error: nobody else is listening.
        let receivers = self
            .inner
            .signals
            .send(SignalEnvelope {
                publisher: self.participant_id.clone(),
                payload,
            })
            .unwrap_or(0);

        trace!(
            target: "floor.transport.local",
            participant_id = %self.participant_id,
            receivers,
            "Signal published"
        );
        Ok(())
    }

    async fn read_metadata(&self) -> Result<ChannelMetadata, TransportError> {
        self.ensure_connected()?;
        Ok(self.inner.visible.borrow().clone())
    }

    async fn write_metadata(&self, entries: MetadataMap) -> Result<u64, TransportError> {
        self.ensure_connected()?;

        // The base is captured before the write is in flight.
        let mut custom = self.inner.visible.borrow().custom.clone();
        custom.extend(entries);

        self.simulate_write_latency().await;
        self.ensure_connected()?;

        let mut state = self.inner.lock();
        Ok(self.commit(&mut state, custom))
    }

    async fn write_metadata_if(
        &self,
        expected_version: u64,
        entries: MetadataMap,
    ) -> Result<WriteOutcome, TransportError> {
        self.ensure_connected()?;
        self.simulate_write_latency().await;
        self.ensure_connected()?;

        let mut state = self.inner.lock();
        if state.committed.version != expected_version {
            return Ok(WriteOutcome::Conflict {
                current_version: state.committed.version,
            });
        }

        let mut custom = state.committed.custom.clone();
        custom.extend(entries);
        let version = self.commit(&mut state, custom);
        Ok(WriteOutcome::Written { version })
    }

    async fn delete_metadata_key(&self, key: &str) -> Result<(), TransportError> {
        self.ensure_connected()?;

        let mut custom = self.inner.visible.borrow().custom.clone();
        custom.remove(key);

        self.simulate_write_latency().await;
        self.ensure_connected()?;

        let mut state = self.inner.lock();
        self.commit(&mut state, custom);
        Ok(())
    }

    fn subscribe_signals(&self) -> SignalSubscription {
        SignalSubscription::new(self.participant_id.clone(), self.inner.signals.subscribe())
    }

    fn presence(&self) -> watch::Receiver<u32> {
        self.inner.presence.subscribe()
    }

    fn metadata(&self) -> watch::Receiver<ChannelMetadata> {
        self.inner.visible.subscribe()
    }
}
