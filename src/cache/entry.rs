//! Cache Entry Module
//!
//! Expiry arithmetic shared by reads, writes and eviction sweeps.

// == Entry Metadata ==
/// What an eviction sweep knows about one on-disk entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryMeta {
    /// Name of the backing file inside the cache directory
    pub filename: String,
    /// Absolute unix expiry in seconds, 0 = never expires
    pub expiry: u64,
}

impl EntryMeta {
    pub fn new(filename: impl Into<String>, expiry: u64) -> Self {
        Self {
            filename: filename.into(),
            expiry,
        }
    }

    /// Sweep-time staleness check.
    ///
    /// Inclusive of the expiry second itself, unlike [`is_expired`], so a
    /// sweep may remove an entry one second before reads would refuse it.
    pub fn is_stale(&self, now: u64) -> bool {
        self.expiry != 0 && self.expiry <= now
    }
}

// == Absolute Expiry ==
/// Converts a relative timeout in seconds into an absolute expiry.
///
/// A timeout of 0 means "never" and stays 0.
pub fn absolute_expiry(now: u64, timeout: u64) -> u64 {
    if timeout == 0 {
        0
    } else {
        now.saturating_add(timeout)
    }
}

// == Is Expired ==
/// Read-time expiry check: an entry is served through its expiry second.
pub fn is_expired(expiry: u64, now: u64) -> bool {
    expiry != 0 && expiry < now
}
