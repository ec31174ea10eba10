//! Floor controller configuration.
//!
//! Configuration is loaded from environment variables. Timing values are
//! given in milliseconds and validated against each other: a lease must
//! outlive at least one missed refresh, and the activity debounce window
//! must be shorter than the lease.

use crate::actors::ArbiterSettings;
use crate::audio::AudioMode;
use crate::lease::LeaseMode;
use common::config::{ObservabilityConfig, DEFAULT_LOG_LEVEL};
use common::types::ParticipantId;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default metadata key holding the lease expiry.
pub const DEFAULT_LOCK_KEY: &str = "floor-lock";

/// Default lease TTL in milliseconds.
pub const DEFAULT_LEASE_TTL_MS: u64 = 3_000;

/// Default lease refresh interval in milliseconds.
pub const DEFAULT_REFRESH_INTERVAL_MS: u64 = 1_000;

/// Default quorum fallback timeout in milliseconds.
pub const DEFAULT_ACQUIRE_TIMEOUT_MS: u64 = 1_500;

/// Default quorum poll granularity in milliseconds.
pub const DEFAULT_ACQUIRE_POLL_MS: u64 = 100;

/// Default stale-lock monitor poll interval in milliseconds.
pub const DEFAULT_MONITOR_INTERVAL_MS: u64 = 1_000;

/// Default grace period after RB/RR activity, in milliseconds.
///
/// Compensates for metadata propagation lag between a lease write and its
/// visibility to other participants. Not a guaranteed bound.
pub const DEFAULT_ACTIVITY_DEBOUNCE_MS: u64 = 2_000;

/// Default simulator group size.
pub const DEFAULT_SIM_PARTICIPANTS: usize = 3;

/// Default participant ID prefix.
pub const DEFAULT_PARTICIPANT_ID_PREFIX: &str = "floor";

/// Floor controller configuration.
#[derive(Clone)]
pub struct Config {
    /// Channel (talk group) name.
    pub channel: String,

    /// Identifier of the local participant.
    pub participant_id: ParticipantId,

    /// Metadata key holding the lease (default: "floor-lock").
    pub lock_key: String,

    /// Lease TTL (default: 3s).
    pub lease_ttl: Duration,

    /// Lease refresh cadence while holding the floor (default: 1s).
    pub refresh_interval: Duration,

    /// Quorum fallback timeout (default: 1.5s).
    pub acquire_timeout: Duration,

    /// Quorum poll granularity (default: 100ms).
    pub acquire_poll_interval: Duration,

    /// Stale-lock monitor cadence (default: 1s).
    pub monitor_interval: Duration,

    /// Debounce window after observed RB/RR activity (default: 2s).
    pub activity_debounce: Duration,

    /// Lease write mode (default: last-writer-wins).
    pub lease_mode: LeaseMode,

    /// Audio session mode (default: hot).
    pub audio_mode: AudioMode,

    /// Number of participants spawned by `floor-sim`.
    pub sim_participants: usize,

    /// Logging configuration.
    pub observability: ObservabilityConfig,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("channel", &self.channel)
            .field("participant_id", &self.participant_id.as_str())
            .field("lock_key", &self.lock_key)
            .field("lease_ttl", &self.lease_ttl)
            .field("refresh_interval", &self.refresh_interval)
            .field("acquire_timeout", &self.acquire_timeout)
            .field("acquire_poll_interval", &self.acquire_poll_interval)
            .field("monitor_interval", &self.monitor_interval)
            .field("activity_debounce", &self.activity_debounce)
            .field("lease_mode", &self.lease_mode)
            .field("audio_mode", &self.audio_mode)
            .field("sim_participants", &self.sim_participants)
            .field("observability", &self.observability)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let channel = vars
            .get("FLOOR_CHANNEL")
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("FLOOR_CHANNEL".to_string()))?
            .clone();

        let lock_key = vars
            .get("FLOOR_LOCK_KEY")
            .cloned()
            .unwrap_or_else(|| DEFAULT_LOCK_KEY.to_string());

        let lease_ttl = parse_millis(vars, "FLOOR_LEASE_TTL_MS", DEFAULT_LEASE_TTL_MS)?;
        let refresh_interval = parse_millis(
            vars,
            "FLOOR_REFRESH_INTERVAL_MS",
            DEFAULT_REFRESH_INTERVAL_MS,
        )?;
        let acquire_timeout =
            parse_millis(vars, "FLOOR_ACQUIRE_TIMEOUT_MS", DEFAULT_ACQUIRE_TIMEOUT_MS)?;
        let acquire_poll_interval =
            parse_millis(vars, "FLOOR_ACQUIRE_POLL_MS", DEFAULT_ACQUIRE_POLL_MS)?;
        let monitor_interval = parse_millis(
            vars,
            "FLOOR_MONITOR_INTERVAL_MS",
            DEFAULT_MONITOR_INTERVAL_MS,
        )?;
        let activity_debounce = parse_millis(
            vars,
            "FLOOR_ACTIVITY_DEBOUNCE_MS",
            DEFAULT_ACTIVITY_DEBOUNCE_MS,
        )?;

        if lease_ttl <= refresh_interval {
            return Err(ConfigError::InvalidValue(format!(
                "FLOOR_LEASE_TTL_MS ({}) must be greater than FLOOR_REFRESH_INTERVAL_MS ({})",
                lease_ttl.as_millis(),
                refresh_interval.as_millis()
            )));
        }

        if activity_debounce >= lease_ttl {
            return Err(ConfigError::InvalidValue(format!(
                "FLOOR_ACTIVITY_DEBOUNCE_MS ({}) must be less than FLOOR_LEASE_TTL_MS ({})",
                activity_debounce.as_millis(),
                lease_ttl.as_millis()
            )));
        }

        let lease_mode = match vars.get("FLOOR_LEASE_MODE") {
            Some(value) => value.parse().map_err(ConfigError::InvalidValue)?,
            None => LeaseMode::default(),
        };

        let audio_mode = match vars.get("FLOOR_AUDIO_MODE") {
            Some(value) => value.parse().map_err(ConfigError::InvalidValue)?,
            None => AudioMode::default(),
        };

        let sim_participants = vars
            .get("FLOOR_SIM_PARTICIPANTS")
            .and_then(|s| s.parse().ok())
            .filter(|n: &usize| *n > 0)
            .unwrap_or(DEFAULT_SIM_PARTICIPANTS);

        let observability = ObservabilityConfig {
            log_level: vars
                .get("FLOOR_LOG_LEVEL")
                .cloned()
                .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
            json_logs: vars
                .get("FLOOR_JSON_LOGS")
                .is_some_and(|s| s == "1" || s.eq_ignore_ascii_case("true")),
        };

        // Generate participant ID
        let participant_id = vars.get("FLOOR_PARTICIPANT_ID").cloned().unwrap_or_else(|| {
            let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_PARTICIPANT_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        Ok(Config {
            channel,
            participant_id: ParticipantId::new(participant_id),
            lock_key,
            lease_ttl,
            refresh_interval,
            acquire_timeout,
            acquire_poll_interval,
            monitor_interval,
            activity_debounce,
            lease_mode,
            audio_mode,
            sim_participants,
            observability,
        })
    }

    /// Arbiter timing and mode settings derived from this configuration.
    #[must_use]
    pub fn arbiter_settings(&self) -> ArbiterSettings {
        ArbiterSettings {
            lock_key: self.lock_key.clone(),
            lease_ttl: self.lease_ttl,
            refresh_interval: self.refresh_interval,
            acquire_timeout: self.acquire_timeout,
            acquire_poll_interval: self.acquire_poll_interval,
            monitor_interval: self.monitor_interval,
            activity_debounce: self.activity_debounce,
            lease_mode: self.lease_mode,
            audio_mode: self.audio_mode,
        }
    }
}

/// Parse a strictly positive millisecond value, falling back to `default`
/// when unset.
fn parse_millis(
    vars: &HashMap<String, String>,
    name: &str,
    default: u64,
) -> Result<Duration, ConfigError> {
    let millis = match vars.get(name) {
        Some(value) => value
            .parse::<u64>()
            .map_err(|e| ConfigError::InvalidValue(format!("{name}: {e}")))?,
        None => default,
    };

    if millis == 0 {
        return Err(ConfigError::InvalidValue(format!(
            "{name} must be greater than zero"
        )));
    }

    Ok(Duration::from_millis(millis))
}
