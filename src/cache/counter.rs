//! Count Tracker Module
//!
//! Keeps an approximate number of entries in a management entry stored
//! alongside the entries it counts.
//!
//! Adjustments are read-modify-write with no cross-process locking, so
//! workers sharing a directory can make the count drift. Drift is corrected
//! by [`CountTracker::recount`], which the cache runs after clears and
//! eviction sweeps.

use tracing::warn;

use crate::cache::{EntryStore, COUNT_KEY};
use crate::error::Result;

// == Count Tracker ==
#[derive(Debug, Clone)]
pub struct CountTracker {
    /// File name of the counter entry
    filename: String,
    /// False for unbounded caches, which skip counting entirely
    enabled: bool,
}

impl CountTracker {
    pub fn new(store: &EntryStore, enabled: bool) -> Self {
        Self {
            filename: store.filename_for(COUNT_KEY.as_bytes()),
            enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    // == Count ==
    /// Current approximate count. A missing or unreadable counter reads as 0.
    pub fn count(&self, store: &EntryStore) -> u64 {
        if !self.enabled {
            return 0;
        }
        match store.load::<u64>(&self.filename) {
            Ok(Some((_, count))) => count,
            Ok(None) => 0,
            Err(e) => {
                warn!("Unreadable entry counter, treating as 0: {}", e);
                0
            }
        }
    }

    // == Adjust ==
    /// Adds `delta` to the stored count, never going below zero.
    pub fn adjust(&self, store: &EntryStore, delta: i64) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let current = self.count(store);
        let next = if delta < 0 {
            current.saturating_sub(delta.unsigned_abs())
        } else {
            current.saturating_add(delta as u64)
        };
        self.reset(store, next)
    }

    // == Reset ==
    /// Overwrites the stored count.
    pub fn reset(&self, store: &EntryStore, value: u64) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        store.save(&self.filename, 0, &value)
    }

    // == Recount ==
    /// Replaces the stored count with the number of entry files on disk.
    pub fn recount(&self, store: &EntryStore) -> Result<u64> {
        if !self.enabled {
            return Ok(0);
        }
        let actual = store.list_entries()?.len() as u64;
        self.reset(store, actual)?;
        Ok(actual)
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{EntryCodec, HashMethod};
    use tempfile::TempDir;

    fn open_store(tmp: &TempDir) -> EntryStore {
        EntryStore::open(tmp.path(), 0o600, Box::new(HashMethod::Md5), EntryCodec::plain())
            .unwrap()
    }

    #[test]
    fn test_missing_counter_reads_zero() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp);
        let counter = CountTracker::new(&store, true);

        assert_eq!(counter.count(&store), 0);
    }

    #[test]
    fn test_adjust_and_reset() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp);
        let counter = CountTracker::new(&store, true);

        counter.adjust(&store, 1).unwrap();
        counter.adjust(&store, 1).unwrap();
        assert_eq!(counter.count(&store), 2);

        counter.adjust(&store, -5).unwrap();
        assert_eq!(counter.count(&store), 0);

        counter.reset(&store, 17).unwrap();
        assert_eq!(counter.count(&store), 17);
    }

    #[test]
    fn test_counter_is_not_listed() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp);
        let counter = CountTracker::new(&store, true);

        counter.reset(&store, 3).unwrap();
        assert!(store.list_entries().unwrap().is_empty());
    }

    #[test]
    fn test_recount_heals_drift() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp);
        let counter = CountTracker::new(&store, true);

        store.save("a", 0, &1).unwrap();
        store.save("b", 0, &2).unwrap();
        counter.reset(&store, 40).unwrap();

        assert_eq!(counter.recount(&store).unwrap(), 2);
        assert_eq!(counter.count(&store), 2);
    }

    #[test]
    fn test_disabled_tracker_writes_nothing() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp);
        let counter = CountTracker::new(&store, false);

        counter.adjust(&store, 1).unwrap();
        counter.reset(&store, 9).unwrap();

        assert_eq!(counter.count(&store), 0);
        assert!(!store.exists(&store.filename_for(COUNT_KEY.as_bytes())));
    }
}
