//! Push-to-talk adapter over a [`FloorArbiterHandle`].
//!
//! Button semantics: `press` only asks for the floor when idle and
//! `release` only gives it back while this participant is claiming it.
//! Presses while someone else talks are dropped.

use crate::actors::{AcquireOutcome, FloorArbiterHandle, ReleaseOutcome};
use crate::errors::FloorError;
use crate::state::{LockState, LockStateReceiver};
use std::fmt;
use tracing::debug;

/// User-facing talk state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PttState {
    Inactive,
    Connecting,
    Broadcasting,
    Receiving,
}

impl PttState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            PttState::Inactive => "inactive",
            PttState::Connecting => "connecting",
            PttState::Broadcasting => "broadcasting",
            PttState::Receiving => "receiving",
        }
    }
}

impl From<LockState> for PttState {
    fn from(state: LockState) -> Self {
        match state {
            LockState::Unlocked => PttState::Inactive,
            LockState::Locking => PttState::Connecting,
            LockState::Locked => PttState::Broadcasting,
            LockState::LockedByOther => PttState::Receiving,
        }
    }
}

impl fmt::Display for PttState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Push-to-talk button bound to one arbiter.
#[derive(Debug, Clone)]
pub struct PushToTalk {
    arbiter: FloorArbiterHandle,
    states: LockStateReceiver,
}

impl PushToTalk {
    #[must_use]
    pub fn new(arbiter: FloorArbiterHandle) -> Self {
        let states = arbiter.subscribe_state();
        Self { arbiter, states }
    }

    #[must_use]
    pub fn state(&self) -> PttState {
        self.states.current().into()
    }

    /// Button pressed. Returns `None` when the press was dropped.
    pub async fn press(&self) -> Result<Option<AcquireOutcome>, FloorError> {
        let state = self.state();
        if state != PttState::Inactive {
            debug!(
                target: "floor.ptt",
                participant_id = %self.arbiter.participant_id(),
                state = %state,
                "Press ignored"
            );
            return Ok(None);
        }
        self.arbiter.request_acquire().await.map(Some)
    }

    /// Button released. Returns `None` when the release was dropped.
    pub async fn release(&self) -> Result<Option<ReleaseOutcome>, FloorError> {
        let state = self.state();
        if !matches!(state, PttState::Connecting | PttState::Broadcasting) {
            debug!(
                target: "floor.ptt",
                participant_id = %self.arbiter.participant_id(),
                state = %state,
                "Release ignored"
            );
            return Ok(None);
        }
        self.arbiter.request_release().await.map(Some)
    }

    /// Wait for the next talk state change. `None` once the arbiter stopped.
    pub async fn changed(&mut self) -> Option<PttState> {
        self.states.changed().await.map(PttState::from)
    }
}
