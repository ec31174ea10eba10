//! Observable floor lock state.

use std::fmt;
use tokio::sync::watch;

/// Local view of who holds the floor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum LockState {
    /// Nobody is known to hold the floor.
    #[default]
    Unlocked,
    /// This participant asked for the floor and is waiting for the group.
    Locking,
    /// This participant holds the floor.
    Locked,
    /// Another participant holds the floor.
    LockedByOther,
}

impl LockState {
    /// Bounded label for logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            LockState::Unlocked => "unlocked",
            LockState::Locking => "locking",
            LockState::Locked => "locked",
            LockState::LockedByOther => "locked_by_other",
        }
    }

    /// `true` while this participant is acquiring or holding the floor.
    #[must_use]
    pub const fn is_claiming(&self) -> bool {
        matches!(self, LockState::Locking | LockState::Locked)
    }
}

impl fmt::Display for LockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only subscription to an arbiter's [`LockState`].
#[derive(Debug, Clone)]
pub struct LockStateReceiver(watch::Receiver<LockState>);

impl LockStateReceiver {
    #[must_use]
    pub fn from_watch_receiver(receiver: watch::Receiver<LockState>) -> Self {
        Self(receiver)
    }

    /// Current state.
    #[must_use]
    pub fn current(&self) -> LockState {
        *self.0.borrow()
    }

    /// Wait for the next state change and return the new state.
    ///
    /// Returns `None` once the arbiter has stopped.
    pub async fn changed(&mut self) -> Option<LockState> {
        self.0.changed().await.ok()?;
        Some(*self.0.borrow_and_update())
    }

    /// Wait until the state satisfies `predicate`.
    ///
    /// Returns `None` if the arbiter stops first.
    pub async fn wait_for(&mut self, predicate: impl Fn(LockState) -> bool) -> Option<LockState> {
        self.0
            .wait_for(|state| predicate(*state))
            .await
            .ok()
            .map(|state| *state)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_labels() {
        assert_eq!(LockState::default(), LockState::Unlocked);
        assert_eq!(LockState::LockedByOther.to_string(), "locked_by_other");
        assert!(LockState::Locking.is_claiming());
        assert!(LockState::Locked.is_claiming());
        assert!(!LockState::LockedByOther.is_claiming());
    }

    #[tokio::test]
    async fn test_receiver_follows_changes() {
        let (tx, rx) = watch::channel(LockState::Unlocked);
        let mut receiver = LockStateReceiver::from_watch_receiver(rx);

        tx.send_replace(LockState::Locking);
        assert_eq!(receiver.changed().await, Some(LockState::Locking));

        tx.send_replace(LockState::Locked);
        assert_eq!(
            receiver.wait_for(|s| s == LockState::Locked).await,
            Some(LockState::Locked)
        );

        drop(tx);
        assert_eq!(receiver.changed().await, None);
        assert_eq!(receiver.current(), LockState::Locked);
    }
}
