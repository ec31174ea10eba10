//! Common configuration types for Floorlink components.

use serde::{Deserialize, Serialize};

/// Default log filter when neither `RUST_LOG` nor a configured level is set.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Observability configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Enable JSON-formatted logs
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            json_logs: false,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_observability_config() {
        let config = ObservabilityConfig::default();
        assert_eq!(config.log_level, "info");
        assert!(!config.json_logs);
    }

    #[test]
    fn test_observability_config_deserializes() {
        let config: ObservabilityConfig =
            serde_json::from_str(r#"{"log_level":"debug","json_logs":true}"#).unwrap();
        assert_eq!(config.log_level, "debug");
        assert!(config.json_logs);
    }
}
