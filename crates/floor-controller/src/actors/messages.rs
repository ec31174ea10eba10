//! Message types for the floor arbiter.

use crate::state::LockState;
use floor_protocol::CorrelationId;
use tokio::sync::oneshot;

/// Requests sent to the arbiter through its handle.
#[derive(Debug)]
pub enum ArbiterMessage {
    /// Ask for the floor.
    RequestAcquire {
        respond_to: oneshot::Sender<AcquireOutcome>,
    },
    /// Give the floor back.
    RequestRelease {
        respond_to: oneshot::Sender<ReleaseOutcome>,
    },
}

/// Result of an acquire request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// Lease written and RB sent; the arbiter is now `Locking`.
    Started,
    /// Someone else's lease is still live. Nothing changed.
    LeaseHeld,
    /// Not `Unlocked`. Nothing changed.
    AlreadyActive(LockState),
    /// Fenced lease write lost the race. Nothing changed.
    Fenced,
    /// The lease could not be read (or, when fenced, written).
    TransportUnavailable,
}

impl AcquireOutcome {
    /// Bounded label for metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            AcquireOutcome::Started => "started",
            AcquireOutcome::LeaseHeld => "lease_held",
            AcquireOutcome::AlreadyActive(_) => "already_active",
            AcquireOutcome::Fenced => "fenced",
            AcquireOutcome::TransportUnavailable => "transport_unavailable",
        }
    }
}

/// Result of a release request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Lease deleted, EB sent, now `Unlocked`.
    Released,
    /// This participant was neither `Locking` nor `Locked`.
    NotHolding(LockState),
}

/// Why an acquire attempt resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveReason {
    /// Every other member acknowledged.
    Quorum,
    /// Fallback timeout elapsed.
    Timeout,
}

impl ResolveReason {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ResolveReason::Quorum => "quorum",
            ResolveReason::Timeout => "timeout",
        }
    }
}

/// Reports from background tasks back to the arbiter.
///
/// `epoch` identifies the lock state the reporting task was started in;
/// reports from an earlier epoch are stale and ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ArbiterEvent {
    AcquireResolved {
        epoch: u64,
        correlation_id: CorrelationId,
        reason: ResolveReason,
    },
    LeaseExpired {
        epoch: u64,
    },
    FencedOut {
        epoch: u64,
    },
}

impl ArbiterEvent {
    pub(crate) const fn epoch(&self) -> u64 {
        match self {
            ArbiterEvent::AcquireResolved { epoch, .. }
            | ArbiterEvent::LeaseExpired { epoch }
            | ArbiterEvent::FencedOut { epoch } => *epoch,
        }
    }
}
