//! Cache Module
//!
//! Provides a file-backed cache with TTL expiration, threshold eviction and
//! atomic writes.

mod clock;
mod codec;
mod counter;
mod entry;
mod eviction;
mod filesystem;
mod hasher;
mod options;
mod stats;
mod store;


// Re-export public types
pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::EntryCodec;
pub use counter::CountTracker;
pub use entry::{absolute_expiry, is_expired, EntryMeta};
pub use eviction::{EvictionPolicy, Evictor, ModuloSweep};
pub use filesystem::{CacheBuilder, FileSystemCache};
pub use hasher::{HashMethod, KeyHasher};
pub use options::CacheOptions;
pub use stats::{CacheStats, StatsRecorder};
pub use store::EntryStore;

// == Public Constants ==
/// Key whose entry holds the approximate entry count
pub const COUNT_KEY: &str = "__wz_cache_count";

/// Suffix of in-flight temp files, never listed as entries
pub const TRANSACTION_SUFFIX: &str = ".__wz_cache";
