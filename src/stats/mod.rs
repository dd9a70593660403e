//! Entity statistics
//!
//! Builds the cache key for a request, and on a miss fetches the three row
//! families concurrently and folds them with `ges_rollup`.

mod service;

pub use service::{EntityStats, StatsService, StatsServiceConfig};
