//! # Floor Test Utilities
//!
//! Shared fixtures for floor controller integration tests. Everything runs
//! on a [`LocalHub`](floor_controller::transport::local::LocalHub) under
//! tokio's paused clock, so timing properties can be asserted exactly.
//!
//! ## Modules
//!
//! - `audio` - [`RecordingAudio`], an audio session that records calls
//! - `probe` - [`SignalProbe`], a raw channel member that sees every signal
//! - `group` - [`TestGroup`], N arbiters on one hub
//!
//! ## Usage
//!
//! ```rust,ignore
//! use floor_test_utils::*;
//!
//! #[tokio::test(start_paused = true)]
//! async fn test_example() {
//!     let group = TestGroup::builder().participants(3).build();
//!     let mut probe = group.probe("observer");
//!
//!     group.member(0).handle.request_acquire().await.unwrap();
//!     let rb = probe.recv().await;
//!     assert_eq!(rb.signal(), Signal::RequestBroadcast);
//! }
//! ```

pub mod audio;
pub mod group;
pub mod probe;

pub use audio::{AudioCall, RecordingAudio};
pub use group::{TestGroup, TestGroupBuilder, TestMember};
pub use probe::SignalProbe;
