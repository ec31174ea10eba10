//! A talk group of arbiters sharing one in-memory hub.

use crate::audio::RecordingAudio;
use crate::probe::SignalProbe;
use common::clock::PausedClock;
use common::types::ParticipantId;
use floor_controller::actors::{ArbiterSettings, FloorArbiter, FloorArbiterHandle};
use floor_controller::audio::AudioMode;
use floor_controller::lease::LeaseMode;
use floor_controller::state::LockState;
use floor_controller::transport::local::LocalHub;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// One arbiter in a [`TestGroup`].
pub struct TestMember {
    pub participant_id: ParticipantId,
    pub handle: FloorArbiterHandle,
    pub audio: RecordingAudio,
    task: Option<JoinHandle<()>>,
}

impl TestMember {
    pub fn state(&self) -> LockState {
        self.handle.state()
    }

    /// Wait until this member reaches `state`.
    pub async fn wait_for(&self, state: LockState) {
        self.handle
            .subscribe_state()
            .wait_for(|s| s == state)
            .await
            .unwrap_or_else(|| panic!("{} stopped before reaching {state}", self.participant_id));
    }

    /// Cancel the arbiter and wait for it to finish its teardown.
    pub async fn shutdown(&mut self) {
        self.handle.cancel();
        if let Some(task) = self.task.take() {
            task.await.expect("arbiter task panicked");
        }
    }
}

/// Builder for [`TestGroup`].
pub struct TestGroupBuilder {
    participants: usize,
    settings: ArbiterSettings,
}

impl TestGroupBuilder {
    pub fn participants(mut self, n: usize) -> Self {
        self.participants = n;
        self
    }

    pub fn settings(mut self, settings: ArbiterSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn lease_mode(mut self, mode: LeaseMode) -> Self {
        self.settings.lease_mode = mode;
        self
    }

    pub fn audio_mode(mut self, mode: AudioMode) -> Self {
        self.settings.audio_mode = mode;
        self
    }

    /// Spawn the group. Members are named `p0`, `p1`, ...
    ///
    /// Must be called inside a tokio runtime.
    pub fn build(self) -> TestGroup {
        let mut group = TestGroup {
            hub: LocalHub::new(),
            clock: Arc::new(PausedClock::new()),
            settings: self.settings,
            members: Vec::new(),
        };
        for n in 0..self.participants {
            group.spawn_member(&format!("p{n}"));
        }
        group
    }
}

/// N arbiters with recording audio on one [`LocalHub`].
pub struct TestGroup {
    pub hub: LocalHub,
    pub clock: Arc<PausedClock>,
    settings: ArbiterSettings,
    members: Vec<TestMember>,
}

impl TestGroup {
    pub fn builder() -> TestGroupBuilder {
        TestGroupBuilder {
            participants: 2,
            settings: ArbiterSettings::default(),
        }
    }

    /// Add another arbiter to the group and return its index.
    pub fn spawn_member(&mut self, name: &str) -> usize {
        self.spawn_member_with_skew(name, 0)
    }

    /// Add an arbiter whose wall clock runs `skew_millis` ahead of (or,
    /// when negative, behind) the group clock.
    pub fn spawn_member_with_skew(&mut self, name: &str, skew_millis: i64) -> usize {
        let participant_id = ParticipantId::new(name);
        let audio = RecordingAudio::new();
        let clock = Arc::new(self.clock.as_ref().clone().with_skew(skew_millis));
        let (handle, task) = FloorArbiter::spawn(
            Arc::new(self.hub.join(participant_id.clone())),
            Arc::new(audio.clone()),
            clock,
            self.settings.clone(),
            CancellationToken::new(),
        );
        self.members.push(TestMember {
            participant_id,
            handle,
            audio,
            task: Some(task),
        });
        self.members.len() - 1
    }

    pub fn member(&self, n: usize) -> &TestMember {
        &self.members[n]
    }

    pub fn member_mut(&mut self, n: usize) -> &mut TestMember {
        &mut self.members[n]
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn settings(&self) -> &ArbiterSettings {
        &self.settings
    }

    /// Join a raw signal observer. It counts toward presence.
    pub fn probe(&self, name: &str) -> SignalProbe {
        SignalProbe::join(&self.hub, name)
    }

    /// Number of members currently `Locked`.
    pub fn holders(&self) -> usize {
        self.members
            .iter()
            .filter(|m| m.task.is_some() && m.state() == LockState::Locked)
            .count()
    }

    /// Kill member `n` without any release: drop it from the channel and
    /// abort its arbiter.
    pub fn crash(&mut self, n: usize) {
        let member = &mut self.members[n];
        self.hub.disconnect(&member.participant_id);
        if let Some(task) = member.task.take() {
            task.abort();
        }
    }

    /// Current lease value in the committed metadata.
    pub fn lease_expiry(&self) -> Option<i64> {
        self.hub
            .committed_metadata()
            .get(&self.settings.lock_key)
            .and_then(|v| v.as_i64())
    }

    /// Advance virtual time in small steps so every task gets to run.
    pub async fn advance(&self, by: Duration) {
        let step = Duration::from_millis(10);
        let mut elapsed = Duration::ZERO;
        while elapsed < by {
            let next = step.min(by - elapsed);
            tokio::time::sleep(next).await;
            elapsed += next;
        }
    }
}
