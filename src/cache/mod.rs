//! Cache layer for rolled-up statistics
//!
//! `CacheService` memoizes expensive computations under string keys with a
//! time-to-live, and removes keys in bulk by glob pattern. The backing store
//! and the clock are injected so the same service runs against process
//! memory, a shared SQLite file, or a fake clock in tests.
//!
//! Store failures during lookups never reach callers: the service logs them
//! and runs the supplier directly.

mod clock;
mod error;
pub mod keys;
mod memory;
mod pattern;
mod service;
mod sqlite;
mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{CacheError, CacheResult};
pub use memory::MemoryStore;
pub use pattern::KeyPattern;
pub use service::{CacheOptions, CacheService, CacheStats};
pub use sqlite::SqliteStore;
pub use store::{CacheEntry, CacheStore};
