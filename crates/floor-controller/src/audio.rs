//! Audio session collaborator.
//!
//! The arbiter never makes decisions based on audio; it only drives the
//! session from its state transitions. [`AudioDriver`] maps transitions to
//! session calls according to the configured [`AudioMode`].

use crate::state::LockState;
use common::types::ParticipantId;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Clone, Error)]
pub enum AudioError {
    #[error("Audio device error: {0}")]
    Device(String),

    #[error("Audio session not connected")]
    NotConnected,
}

/// Local media session.
pub trait AudioSession: Send + Sync {
    /// Join the media session with the microphone live.
    fn connect_and_unmute(&self) -> Result<(), AudioError>;

    /// Join the media session muted.
    fn connect_listen_only(&self) -> Result<(), AudioError>;

    /// Stop transmitting, stay connected.
    fn mute(&self) -> Result<(), AudioError>;

    /// Leave the media session.
    fn disconnect(&self) -> Result<(), AudioError>;
}

/// When the media session is connected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AudioMode {
    /// Connected listen-only for the whole lifetime of the arbiter.
    #[default]
    Hot,
    /// Connected only while somebody holds the floor.
    Cold,
}

impl AudioMode {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            AudioMode::Hot => "hot",
            AudioMode::Cold => "cold",
        }
    }
}

impl fmt::Display for AudioMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AudioMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hot" => Ok(AudioMode::Hot),
            "cold" => Ok(AudioMode::Cold),
            other => Err(format!(
                "FLOOR_AUDIO_MODE must be 'hot' or 'cold', got '{other}'"
            )),
        }
    }
}

/// Audio session that only logs, used by the simulator.
#[derive(Debug, Clone)]
pub struct TracingAudioSession {
    participant_id: ParticipantId,
}

impl TracingAudioSession {
    #[must_use]
    pub fn new(participant_id: ParticipantId) -> Self {
        Self { participant_id }
    }

    fn log(&self, action: &'static str) -> Result<(), AudioError> {
        info!(
            target: "floor.audio",
            participant_id = %self.participant_id,
            action,
            "Audio session"
        );
        Ok(())
    }
}

impl AudioSession for TracingAudioSession {
    fn connect_and_unmute(&self) -> Result<(), AudioError> {
        self.log("connect_and_unmute")
    }

    fn connect_listen_only(&self) -> Result<(), AudioError> {
        self.log("connect_listen_only")
    }

    fn mute(&self) -> Result<(), AudioError> {
        self.log("mute")
    }

    fn disconnect(&self) -> Result<(), AudioError> {
        self.log("disconnect")
    }
}

/// Drives an [`AudioSession`] from lock state transitions.
pub(crate) struct AudioDriver {
    session: Arc<dyn AudioSession>,
    mode: AudioMode,
    participant_id: ParticipantId,
}

impl AudioDriver {
    pub(crate) fn new(
        session: Arc<dyn AudioSession>,
        mode: AudioMode,
        participant_id: ParticipantId,
    ) -> Self {
        Self {
            session,
            mode,
            participant_id,
        }
    }

    /// Called once when the arbiter starts.
    pub(crate) fn start(&self) {
        if self.mode == AudioMode::Hot {
            self.call("connect_listen_only", |s| s.connect_listen_only());
        }
    }

    pub(crate) fn on_transition(&self, from: LockState, to: LockState) {
        match to {
            LockState::Locked => {
                self.call("connect_and_unmute", |s| s.connect_and_unmute());
            }
            LockState::LockedByOther => {
                if self.mode == AudioMode::Cold {
                    self.call("connect_listen_only", |s| s.connect_listen_only());
                }
            }
            LockState::Unlocked | LockState::Locking => {
                if from == LockState::Locked {
                    self.call("mute", |s| s.mute());
                }
                if self.mode == AudioMode::Cold
                    && to == LockState::Unlocked
                    && matches!(from, LockState::Locked | LockState::LockedByOther)
                {
                    self.call("disconnect", |s| s.disconnect());
                }
            }
        }
    }

    /// Called once when the arbiter stops.
    pub(crate) fn shutdown(&self) {
        self.call("disconnect", |s| s.disconnect());
    }

    fn call(&self, action: &'static str, op: impl FnOnce(&dyn AudioSession) -> Result<(), AudioError>) {
        if let Err(e) = op(self.session.as_ref()) {
            warn!(
                target: "floor.audio",
                participant_id = %self.participant_id,
                action,
                error = %e,
                "Audio session call failed"
            );
        }
    }
}
