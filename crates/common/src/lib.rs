//! Common utilities and types shared across Floorlink components.

#![warn(clippy::pedantic)]

/// Module for common data types
pub mod types;

/// Module for common configuration
pub mod config;

/// Module for wall-clock access used by lease expiry checks
pub mod clock;
