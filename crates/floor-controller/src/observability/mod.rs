//! Observability for the floor controller.
//!
//! Logs go through `tracing` with one target per component (`floor.arbiter`,
//! `floor.acquire`, `floor.refresh`, `floor.monitor`, `floor.lease`,
//! `floor.audio`, `floor.transport`). Metric labels are bounded.
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `floor_acquire_requests_total` | Counter | `outcome` | Local acquire requests |
//! | `floor_acquire_resolved_total` | Counter | `reason` | Quorum vs. timeout resolutions |
//! | `floor_acquire_duration_seconds` | Histogram | `reason` | Time spent in `Locking` |
//! | `floor_state_transitions_total` | Counter | `state` | Lock state changes |
//! | `floor_stale_lock_takeovers_total` | Counter | none | Expired leases reclaimed |
//! | `floor_fenced_out_total` | Counter | `phase` | Lost fenced lease writes |
//! | `floor_transport_errors_total` | Counter | `operation` | Failed transport calls |
//! | `floor_malformed_signals_total` | Counter | none | Undecodable inbound signals |

pub mod metrics;
