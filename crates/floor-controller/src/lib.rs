//! Floor Controller Library
//!
//! Distributed push-to-talk floor arbitration for a channel of peers that
//! share only a broadcast signal bus and an eventually consistent metadata
//! map. No server decides who talks; every participant runs the same
//! protocol:
//!
//! - **Lease**: the holder keeps `now + ttl` under a well-known metadata key
//!   and rewrites it every refresh interval
//! - **Signals**: RB (request), RR (refresh), EB (end) and AB (acknowledge),
//!   all tagged with the correlation ID of one acquire attempt
//! - **Quorum**: an acquire completes once every other member has sent AB,
//!   or after a fallback timeout
//! - **Stale-lock recovery**: observers reclaim a lease that expired
//!   without an EB
//!
//! # Modules
//!
//! - [`actors`] - `FloorArbiter` actor and its background tasks
//! - [`audio`] - Audio session collaborator and hot/cold modes
//! - [`config`] - Configuration from environment
//! - [`errors`] - Error types
//! - [`lease`] - Lease read/renew/delete over channel metadata
//! - [`observability`] - Metrics
//! - [`ptt`] - Push-to-talk adapter
//! - [`state`] - `LockState` and its subscription
//! - [`transport`] - Signaling transport trait and in-memory hub

#![warn(clippy::pedantic)]

pub mod actors;
pub mod audio;
pub mod config;
pub mod errors;
pub mod lease;
pub mod observability;
pub mod ptt;
pub(crate) mod signaling;
pub mod state;
pub mod transport;
