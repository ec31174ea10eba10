//! Actor implementation of the floor arbitration protocol.
//!
//! ```text
//! FloorArbiter (one per participant, owns LockState)
//! ├── AcquireWaiter     while Locking        (RB, counts AB, quorum/timeout)
//! ├── LeaseRefresher    while Locked         (lease rewrite + RR every interval)
//! └── StaleLockMonitor  while LockedByOther  (lease expiry check)
//! ```
//!
//! Background tasks never touch `LockState` directly. They report to the
//! arbiter through an internal event channel, and the arbiter applies the
//! transition if the report is still current.
//!
//! # Modules
//!
//! - [`arbiter`] - `FloorArbiter` actor and its handle
//! - [`messages`] - Request and outcome types

mod acquire;
pub mod arbiter;
pub mod messages;
mod monitor;
mod refresher;
mod task;

// Re-export primary types
pub use arbiter::{ArbiterSettings, FloorArbiter, FloorArbiterHandle};
pub use messages::{AcquireOutcome, ArbiterMessage, ReleaseOutcome, ResolveReason};
