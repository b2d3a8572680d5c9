//! Cache Module
//!
//! Provides a bounded in-memory cache with per-entry TTL, sampled eviction
//! and coalesced loading.

mod entry;
mod stats;
mod store;


// Re-export public types
pub use entry::CacheEntry;
pub use stats::CacheStats;
pub use store::{RemovalCause, RemovalListener, TtlCache, TtlCacheBuilder, DEFAULT_EVICTION_EFFORT};

pub(crate) use store::WeakTtlCache;
