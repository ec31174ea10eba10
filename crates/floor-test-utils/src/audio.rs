//! Recording audio session.

use floor_controller::audio::{AudioError, AudioSession};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// One call made on an [`AudioSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioCall {
    ConnectAndUnmute,
    ConnectListenOnly,
    Mute,
    Disconnect,
}

/// Audio session that records every call.
///
/// Clones share the same log, so a test can keep one clone and hand the
/// other to an arbiter.
#[derive(Debug, Clone, Default)]
pub struct RecordingAudio {
    calls: Arc<Mutex<Vec<AudioCall>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingAudio {
    pub fn new() -> Self {
        Self::default()
    }

    /// All calls so far.
    pub fn calls(&self) -> Vec<AudioCall> {
        self.calls.lock().unwrap().clone()
    }

    /// All calls so far, clearing the log.
    pub fn take(&self) -> Vec<AudioCall> {
        std::mem::take(&mut *self.calls.lock().unwrap())
    }

    pub fn last(&self) -> Option<AudioCall> {
        self.calls.lock().unwrap().last().copied()
    }

    /// Make every following call fail (still recorded).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn record(&self, call: AudioCall) -> Result<(), AudioError> {
        self.calls.lock().unwrap().push(call);
        if self.failing.load(Ordering::SeqCst) {
            return Err(AudioError::Device(format!("{call:?} failed")));
        }
        Ok(())
    }
}

impl AudioSession for RecordingAudio {
    fn connect_and_unmute(&self) -> Result<(), AudioError> {
        self.record(AudioCall::ConnectAndUnmute)
    }

    fn connect_listen_only(&self) -> Result<(), AudioError> {
        self.record(AudioCall::ConnectListenOnly)
    }

    fn mute(&self) -> Result<(), AudioError> {
        self.record(AudioCall::Mute)
    }

    fn disconnect(&self) -> Result<(), AudioError> {
        self.record(AudioCall::Disconnect)
    }
}
