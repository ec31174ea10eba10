//! Integration tests for the audio session driven by lock transitions, the
//! push-to-talk adapter, and robustness against bad input.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use floor_controller::actors::{AcquireOutcome, ReleaseOutcome};
use floor_controller::audio::AudioMode;
use floor_controller::ptt::{PttState, PushToTalk};
use floor_controller::state::LockState;
use floor_protocol::MAX_SIGNAL_SIZE;
use floor_test_utils::{AudioCall, TestGroup};

#[tokio::test(start_paused = true)]
async fn test_hot_audio_stays_connected_and_toggles_mute() {
    let mut group = TestGroup::builder().participants(2).build();
    group.advance(Duration::from_millis(10)).await;

    assert_eq!(group.member(0).audio.calls(), vec![AudioCall::ConnectListenOnly]);
    assert_eq!(group.member(1).audio.calls(), vec![AudioCall::ConnectListenOnly]);

    group.member(0).handle.request_acquire().await.unwrap();
    group.member(0).wait_for(LockState::Locked).await;
    group.member(1).wait_for(LockState::LockedByOther).await;
    group.member(0).handle.request_release().await.unwrap();
    group.member(1).wait_for(LockState::Unlocked).await;

    assert_eq!(
        group.member(0).audio.calls(),
        vec![
            AudioCall::ConnectListenOnly,
            AudioCall::ConnectAndUnmute,
            AudioCall::Mute,
        ]
    );
    // Listeners in a hot channel are already connected.
    assert_eq!(group.member(1).audio.calls(), vec![AudioCall::ConnectListenOnly]);

    group.member_mut(0).shutdown().await;
    assert_eq!(group.member(0).audio.last(), Some(AudioCall::Disconnect));
}

#[tokio::test(start_paused = true)]
async fn test_cold_audio_connects_on_demand() {
    let group = TestGroup::builder()
        .participants(2)
        .audio_mode(AudioMode::Cold)
        .build();
    group.advance(Duration::from_millis(10)).await;
    assert!(group.member(0).audio.calls().is_empty());

    group.member(0).handle.request_acquire().await.unwrap();
    group.member(0).wait_for(LockState::Locked).await;
    group.member(1).wait_for(LockState::LockedByOther).await;

    assert_eq!(group.member(0).audio.take(), vec![AudioCall::ConnectAndUnmute]);
    assert_eq!(group.member(1).audio.take(), vec![AudioCall::ConnectListenOnly]);

    group.member(0).handle.request_release().await.unwrap();
    group.member(1).wait_for(LockState::Unlocked).await;

    assert_eq!(
        group.member(0).audio.take(),
        vec![AudioCall::Mute, AudioCall::Disconnect]
    );
    assert_eq!(group.member(1).audio.take(), vec![AudioCall::Disconnect]);
}

#[tokio::test(start_paused = true)]
async fn test_teardown_while_holding_mutes_then_disconnects() {
    let mut group = TestGroup::builder().participants(1).build();

    group.member(0).handle.request_acquire().await.unwrap();
    group.member(0).wait_for(LockState::Locked).await;
    group.member_mut(0).shutdown().await;

    assert_eq!(
        group.member(0).audio.calls(),
        vec![
            AudioCall::ConnectListenOnly,
            AudioCall::ConnectAndUnmute,
            AudioCall::Mute,
            AudioCall::Disconnect,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_audio_failures_do_not_block_the_floor() {
    let group = TestGroup::builder().participants(2).build();
    group.member(0).audio.set_failing(true);

    group.member(0).handle.request_acquire().await.unwrap();
    group.member(0).wait_for(LockState::Locked).await;
    group.member(1).wait_for(LockState::LockedByOther).await;

    assert_eq!(group.member(0).audio.last(), Some(AudioCall::ConnectAndUnmute));
}

#[tokio::test(start_paused = true)]
async fn test_push_to_talk_gates_presses_and_releases() {
    let group = TestGroup::builder().participants(2).build();
    let alice = PushToTalk::new(group.member(0).handle.clone());
    let bob = PushToTalk::new(group.member(1).handle.clone());

    assert_eq!(alice.state(), PttState::Inactive);
    assert_eq!(alice.release().await.unwrap(), None);

    assert_eq!(alice.press().await.unwrap(), Some(AcquireOutcome::Started));
    assert_eq!(alice.state(), PttState::Connecting);
    // A second press while connecting is dropped by the button.
    assert_eq!(alice.press().await.unwrap(), None);

    group.member(0).wait_for(LockState::Locked).await;
    group.member(1).wait_for(LockState::LockedByOther).await;
    assert_eq!(alice.state(), PttState::Broadcasting);
    assert_eq!(bob.state(), PttState::Receiving);

    // Bob cannot talk over Alice, nor release her floor.
    assert_eq!(bob.press().await.unwrap(), None);
    assert_eq!(bob.release().await.unwrap(), None);

    assert_eq!(alice.release().await.unwrap(), Some(ReleaseOutcome::Released));
    assert_eq!(alice.state(), PttState::Inactive);
    group.member(1).wait_for(LockState::Unlocked).await;
    assert_eq!(bob.state(), PttState::Inactive);
}

#[tokio::test(start_paused = true)]
async fn test_push_to_talk_release_while_connecting() {
    let group = TestGroup::builder().participants(1).build();
    let _silent = group.probe("silent");
    let mut button = PushToTalk::new(group.member(0).handle.clone());

    button.press().await.unwrap();
    assert_eq!(button.changed().await, Some(PttState::Connecting));

    assert_eq!(
        button.release().await.unwrap(),
        Some(ReleaseOutcome::Released)
    );
    assert_eq!(button.state(), PttState::Inactive);
}

#[tokio::test(start_paused = true)]
async fn test_malformed_signals_are_dropped() {
    let group = TestGroup::builder().participants(1).build();
    let noisy = group.probe("noisy");

    noisy.send_raw("not json").await;
    noisy.send_raw(r#"{"s":"XX","i":"00000000-0000-0000-0000-000000000000"}"#).await;
    noisy.send_raw(vec![b'{'; MAX_SIGNAL_SIZE + 1]).await;
    group.advance(Duration::from_millis(100)).await;

    assert_eq!(group.member(0).state(), LockState::Unlocked);

    // The arbiter is still responsive afterwards.
    assert_eq!(
        group.member(0).handle.request_acquire().await.unwrap(),
        AcquireOutcome::Started
    );
}
