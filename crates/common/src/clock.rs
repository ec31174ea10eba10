//! Wall-clock abstraction.
//!
//! Lease expiry is expressed as Unix epoch milliseconds so that every
//! participant can compare it against its own clock. Components take an
//! `Arc<dyn Clock>` rather than calling `chrono::Utc::now()` directly so
//! tests can drive expiry with tokio's virtual time.

use std::fmt::Debug;

/// Source of the current wall-clock time.
pub trait Clock: Send + Sync + Debug {
    /// Milliseconds since the Unix epoch.
    fn now_millis(&self) -> i64;
}

/// Clock backed by the system's UTC time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Clock that advances with tokio's (possibly paused) time.
///
/// Anchored at a fixed epoch timestamp when created; `now_millis` adds the
/// elapsed `tokio::time::Instant` duration. Under
/// `#[tokio::test(start_paused = true)]` this makes lease expiry follow
/// `tokio::time::advance`.
#[cfg(any(test, feature = "test-utils"))]
#[derive(Debug, Clone)]
pub struct PausedClock {
    anchor_millis: i64,
    started: tokio::time::Instant,
    skew_millis: i64,
}

#[cfg(any(test, feature = "test-utils"))]
impl PausedClock {
    /// Fixed anchor used by default (2024-01-01T00:00:00Z).
    pub const DEFAULT_ANCHOR_MILLIS: i64 = 1_704_067_200_000;

    /// Create a clock anchored at [`Self::DEFAULT_ANCHOR_MILLIS`].
    #[must_use]
    pub fn new() -> Self {
        Self::anchored_at(Self::DEFAULT_ANCHOR_MILLIS)
    }

    /// Create a clock anchored at the given epoch milliseconds.
    #[must_use]
    pub fn anchored_at(anchor_millis: i64) -> Self {
        Self {
            anchor_millis,
            started: tokio::time::Instant::now(),
            skew_millis: 0,
        }
    }

    /// Return a copy of this clock that runs ahead (positive) or behind
    /// (negative) by `skew_millis`.
    #[must_use]
    pub fn with_skew(mut self, skew_millis: i64) -> Self {
        self.skew_millis = skew_millis;
        self
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl Default for PausedClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl Clock for PausedClock {
    fn now_millis(&self) -> i64 {
        let elapsed = i64::try_from(self.started.elapsed().as_millis()).unwrap_or(i64::MAX);
        self.anchor_millis
            .saturating_add(elapsed)
            .saturating_add(self.skew_millis)
    }
}
