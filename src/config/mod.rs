//! Configuration system
//!
//! Loads ~/.config/ges-stats/config.yaml with sections for:
//! - The HTTP server bind address
//! - The reporting database
//! - The statistics cache (backend, single-flight, sweeping)
//! - Statistics TTL and query timeout

mod stats_config;
pub mod validation;

pub use stats_config::{
    CacheBackend, CacheConfig, DatabaseConfig, GesStatsConfig, ServerConfig, StatsConfig,
};
pub use validation::{validate_config, validate_config_result, ValidationError};
