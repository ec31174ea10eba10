//! Integration tests for giving the floor back: release, EB handling and
//! arbiter teardown.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use common::clock::Clock;
use floor_controller::actors::{AcquireOutcome, ReleaseOutcome};
use floor_controller::state::LockState;
use floor_controller::transport::{MetadataMap, SignalingTransport};
use floor_protocol::{BroadcastMessage, Signal};
use floor_test_utils::TestGroup;

#[tokio::test(start_paused = true)]
async fn test_release_unlocks_everyone_and_deletes_lease() {
    let group = TestGroup::builder().participants(3).build();

    group.member(0).handle.request_acquire().await.unwrap();
    group.member(0).wait_for(LockState::Locked).await;
    assert!(group.lease_expiry().is_some());

    assert_eq!(
        group.member(0).handle.request_release().await.unwrap(),
        ReleaseOutcome::Released
    );
    assert_eq!(group.member(0).state(), LockState::Unlocked);
    assert_eq!(group.lease_expiry(), None);

    group.member(1).wait_for(LockState::Unlocked).await;
    group.member(2).wait_for(LockState::Unlocked).await;
}

#[tokio::test(start_paused = true)]
async fn test_release_racing_refresh_never_resurrects_lease() {
    let group = TestGroup::builder().participants(2).build();

    group.member(0).handle.request_acquire().await.unwrap();
    group.member(0).wait_for(LockState::Locked).await;

    // The refresh tick at 1s starts a write that lands at 1.3s.
    group.hub.set_write_latency(Duration::from_millis(300));
    tokio::time::sleep(Duration::from_millis(1_100)).await;

    assert_eq!(
        group.member(0).handle.request_release().await.unwrap(),
        ReleaseOutcome::Released
    );
    assert_eq!(group.lease_expiry(), None);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(group.lease_expiry(), None);
    assert_eq!(group.member(0).state(), LockState::Unlocked);
    assert_eq!(group.member(1).state(), LockState::Unlocked);
}

#[tokio::test(start_paused = true)]
async fn test_release_while_locking_abandons_attempt() {
    let group = TestGroup::builder().participants(1).build();
    let mut silent = group.probe("silent");

    group.member(0).handle.request_acquire().await.unwrap();
    let rb = silent.recv_signal(Signal::RequestBroadcast).await;
    assert_eq!(group.member(0).state(), LockState::Locking);

    assert_eq!(
        group.member(0).handle.request_release().await.unwrap(),
        ReleaseOutcome::Released
    );
    assert_eq!(group.lease_expiry(), None);

    let eb = silent.recv_signal(Signal::EndBroadcast).await;
    assert_eq!(eb.correlation_id(), rb.correlation_id());

    // The abandoned attempt's timeout never locks.
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(group.member(0).state(), LockState::Unlocked);
}

#[tokio::test(start_paused = true)]
async fn test_release_when_not_holding_is_noop() {
    let group = TestGroup::builder().participants(2).build();
    let mut observer = group.probe("observer");

    assert_eq!(
        group.member(1).handle.request_release().await.unwrap(),
        ReleaseOutcome::NotHolding(LockState::Unlocked)
    );

    group.member(0).handle.request_acquire().await.unwrap();
    let rb = observer.recv_signal(Signal::RequestBroadcast).await;
    observer.send(rb.ack()).await;
    group.member(1).wait_for(LockState::LockedByOther).await;

    assert_eq!(
        group.member(1).handle.request_release().await.unwrap(),
        ReleaseOutcome::NotHolding(LockState::LockedByOther)
    );
    let signals = observer.collect_for(Duration::from_millis(500)).await;
    assert!(signals.iter().all(|m| m.signal() != Signal::EndBroadcast));
}

#[tokio::test(start_paused = true)]
async fn test_end_broadcast_unlocks_even_with_fresh_lease() {
    let group = TestGroup::builder().participants(1).build();
    let mut holder = group.probe("holder");

    let rb = BroadcastMessage::request();
    holder.send(rb).await;
    group.member(0).wait_for(LockState::LockedByOther).await;

    // The member acknowledged the remote attempt.
    let ab = holder.recv_signal(Signal::AcknowledgeBroadcast).await;
    assert_eq!(ab.correlation_id(), rb.correlation_id());

    let expiry = group.clock.now_millis() + 60_000;
    holder
        .transport()
        .write_metadata(MetadataMap::from([(
            group.settings().lock_key.clone(),
            serde_json::json!(expiry),
        )]))
        .await
        .unwrap();

    holder.send(rb.end()).await;
    group.member(0).wait_for(LockState::Unlocked).await;

    // EB alone does not touch the lease.
    assert_eq!(group.lease_expiry(), Some(expiry));
}

#[tokio::test(start_paused = true)]
async fn test_end_broadcast_ignored_when_not_locked_by_other() {
    let group = TestGroup::builder().participants(1).build();
    let stranger = group.probe("stranger");

    stranger.send(BroadcastMessage::request().end()).await;
    group.advance(Duration::from_millis(100)).await;
    assert_eq!(group.member(0).state(), LockState::Unlocked);

    group.member(0).handle.request_acquire().await.unwrap();
    group.member(0).wait_for(LockState::Locking).await;
    stranger.send(BroadcastMessage::request().end()).await;
    group.advance(Duration::from_millis(100)).await;
    assert_eq!(group.member(0).state(), LockState::Locking);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_releases_held_floor() {
    let mut group = TestGroup::builder().participants(2).build();

    group.member(0).handle.request_acquire().await.unwrap();
    group.member(0).wait_for(LockState::Locked).await;
    group.member(1).wait_for(LockState::LockedByOther).await;

    group.member_mut(0).shutdown().await;

    assert_eq!(group.lease_expiry(), None);
    group.member(1).wait_for(LockState::Unlocked).await;
    assert!(group.member(0).handle.request_acquire().await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_of_observer_sends_nothing() {
    let mut group = TestGroup::builder().participants(2).build();
    let mut observer = group.probe("observer");

    group.member(0).handle.request_acquire().await.unwrap();
    let rb = observer.recv_signal(Signal::RequestBroadcast).await;
    observer.send(rb.ack()).await;
    group.member(0).wait_for(LockState::Locked).await;

    group.member_mut(1).shutdown().await;

    let signals = observer.collect_for(Duration::from_millis(2_500)).await;
    assert!(signals.iter().all(|m| m.signal() != Signal::EndBroadcast));
    assert_eq!(group.member(0).state(), LockState::Locked);
    assert!(group.lease_expiry().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_floor_can_be_retaken_after_release() {
    let group = TestGroup::builder().participants(2).build();

    group.member(0).handle.request_acquire().await.unwrap();
    group.member(0).wait_for(LockState::Locked).await;
    group.member(0).handle.request_release().await.unwrap();
    group.member(1).wait_for(LockState::Unlocked).await;

    assert_eq!(
        group.member(1).handle.request_acquire().await.unwrap(),
        AcquireOutcome::Started
    );
    group.member(1).wait_for(LockState::Locked).await;
    group.member(0).wait_for(LockState::LockedByOther).await;
}
