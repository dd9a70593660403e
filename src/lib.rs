//! ges-stats - Cached enrollment and attendance statistics
//!
//! Rolls per-school reporting rows up to circuits, districts and regions of
//! the Ghana Education Service hierarchy and serves the results over HTTP,
//! memoized in a TTL cache with pattern-based invalidation.
//!
//! # Architecture
//!
//! - **cache**: `CacheService` get-or-set memoization over pluggable stores
//! - **entity**: School hierarchy levels and reporting periods
//! - **storage**: Reporting rows (SQLite) and dataset import
//! - **stats**: Cache + storage + rollups for one entity
//! - **server**: axum HTTP API
//! - **config**: YAML configuration and validation
//!
//! The pure aggregation functions live in the `ges-rollup` crate.

pub mod cache;
pub mod config;
pub mod entity;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod server;
pub mod stats;
pub mod storage;

// Re-exports
pub use error::{Result, StatsError};
