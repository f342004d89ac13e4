//! zgate CLI Library
//!
//! Shared functionality for the zgate relay: configuration files, the
//! pre-shared key engine and statistics display.

pub mod config;
pub mod preshared;
pub mod stats;

pub use config::{ConfigError, KeysConfig, NetworkConfig, RelayConfig, RoleConfig};
pub use preshared::PresharedEngine;
pub use stats::{compact_stats, display_gate_stats, format_bandwidth, format_bytes};
