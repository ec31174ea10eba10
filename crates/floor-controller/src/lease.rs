//! Floor lease stored in the channel metadata map.
//!
//! The lease is a single entry, `"<lock-key>" -> expiry in epoch millis`.
//! Whoever is acquiring or holding the floor rewrites it; everyone reads it
//! to decide whether the floor is taken. A missing entry or an expiry in
//! the past both mean "free".

use crate::transport::{
    ChannelMetadata, MetadataMap, SignalingTransport, TransportError, WriteOutcome,
};
use common::clock::Clock;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

/// How lease writes are performed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LeaseMode {
    /// Plain merge-then-replace. Concurrent acquirers may both win.
    #[default]
    LastWriterWins,
    /// Version-gated writes. A participant whose write loses the race
    /// backs off instead of proceeding.
    Fenced,
}

impl LeaseMode {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            LeaseMode::LastWriterWins => "last-writer-wins",
            LeaseMode::Fenced => "fenced",
        }
    }
}

impl fmt::Display for LeaseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LeaseMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "last-writer-wins" | "lww" => Ok(LeaseMode::LastWriterWins),
            "fenced" => Ok(LeaseMode::Fenced),
            other => Err(format!(
                "FLOOR_LEASE_MODE must be 'last-writer-wins' or 'fenced', got '{other}'"
            )),
        }
    }
}

/// A lease as read from the metadata map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lease {
    pub expires_at_millis: i64,
}

impl Lease {
    /// A lease is live while its expiry lies strictly in the future.
    #[must_use]
    pub fn is_live(&self, now_millis: i64) -> bool {
        self.expires_at_millis > now_millis
    }
}

/// Lease entry plus the metadata version it was read at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseSnapshot {
    pub lease: Option<Lease>,
    pub version: u64,
}

impl LeaseSnapshot {
    #[must_use]
    pub fn is_live(&self, now_millis: i64) -> bool {
        self.lease.is_some_and(|lease| lease.is_live(now_millis))
    }
}

/// Result of writing a fresh lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseWrite {
    Written { lease: Lease, version: u64 },
    /// Fenced write rejected: the map moved past the expected version.
    Conflict { current_version: u64 },
}

/// Accessor for the lease entry.
#[derive(Clone)]
pub struct LeaseStore {
    transport: Arc<dyn SignalingTransport>,
    clock: Arc<dyn Clock>,
    key: String,
    ttl: Duration,
}

impl LeaseStore {
    #[must_use]
    pub fn new(
        transport: Arc<dyn SignalingTransport>,
        clock: Arc<dyn Clock>,
        key: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            transport,
            clock,
            key: key.into(),
            ttl,
        }
    }

    /// Notifications of changes to the channel metadata holding the lease.
    #[must_use]
    pub fn changes(&self) -> watch::Receiver<ChannelMetadata> {
        self.transport.metadata()
    }

    /// Current wall-clock time used for liveness checks.
    #[must_use]
    pub fn now_millis(&self) -> i64 {
        self.clock.now_millis()
    }

    /// Read the lease as currently visible to this participant.
    pub async fn read(&self) -> Result<LeaseSnapshot, TransportError> {
        let metadata = self.transport.read_metadata().await?;

        let lease = match metadata.get(&self.key) {
            None => None,
            Some(value) => match value.as_i64() {
                Some(expires_at_millis) => Some(Lease { expires_at_millis }),
                None => {
                    warn!(
                        target: "floor.lease",
                        key = %self.key,
                        "Lease entry is not an integer timestamp, treating as absent"
                    );
                    None
                }
            },
        };

        Ok(LeaseSnapshot {
            lease,
            version: metadata.version,
        })
    }

    /// Write a lease expiring one TTL from now.
    ///
    /// With `fence` set the write only commits if the map is still at that
    /// version.
    pub async fn renew(&self, fence: Option<u64>) -> Result<LeaseWrite, TransportError> {
        let ttl_millis = i64::try_from(self.ttl.as_millis()).unwrap_or(i64::MAX);
        let lease = Lease {
            expires_at_millis: self.clock.now_millis().saturating_add(ttl_millis),
        };
        let entries = MetadataMap::from([(
            self.key.clone(),
            serde_json::Value::from(lease.expires_at_millis),
        )]);

        let result = match fence {
            None => {
                let version = self.transport.write_metadata(entries).await?;
                LeaseWrite::Written { lease, version }
            }
            Some(expected_version) => {
                match self
                    .transport
                    .write_metadata_if(expected_version, entries)
                    .await?
                {
                    WriteOutcome::Written { version } => LeaseWrite::Written { lease, version },
                    WriteOutcome::Conflict { current_version } => {
                        LeaseWrite::Conflict { current_version }
                    }
                }
            }
        };

        debug!(
            target: "floor.lease",
            key = %self.key,
            expires_at = lease.expires_at_millis,
            fenced = fence.is_some(),
            written = matches!(result, LeaseWrite::Written { .. }),
            "Lease write finished"
        );

        Ok(result)
    }

    /// Remove the lease entry.
    pub async fn delete(&self) -> Result<(), TransportError> {
        self.transport.delete_metadata_key(&self.key).await?;
        debug!(target: "floor.lease", key = %self.key, "Lease deleted");
        Ok(())
    }
}

impl fmt::Debug for LeaseStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeaseStore")
            .field("key", &self.key)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}
