//! Eviction Module
//!
//! Threshold-triggered sweeps that keep the number of entry files near the
//! configured threshold.
//!
//! There is no access-order bookkeeping. A sweep walks the directory once in
//! whatever order the filesystem returns and asks an [`EvictionPolicy`]
//! about each entry. The default [`ModuloSweep`] removes every stale entry
//! plus every third entry by position, so which live entries survive differs
//! from run to run.

use tracing::debug;

use crate::cache::{CountTracker, EntryMeta, EntryStore};

// == Eviction Policy ==
/// Decides whether one entry is removed during a sweep.
pub trait EvictionPolicy: Send + Sync {
    /// `index` is the entry's position in the sweep's enumeration.
    fn decide(&self, entry: &EntryMeta, index: usize, now: u64) -> bool;
}

// == Modulo Sweep ==
/// Removes stale entries and every `modulus`-th entry by position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuloSweep {
    modulus: usize,
}

impl ModuloSweep {
    pub fn new(modulus: usize) -> Self {
        Self {
            modulus: modulus.max(1),
        }
    }
}

impl Default for ModuloSweep {
    fn default() -> Self {
        Self::new(3)
    }
}

impl EvictionPolicy for ModuloSweep {
    fn decide(&self, entry: &EntryMeta, index: usize, now: u64) -> bool {
        entry.is_stale(now) || index % self.modulus == 0
    }
}

// == Evictor ==
/// Runs sweeps against a store once its count passes the threshold.
pub struct Evictor {
    /// Maximum approximate entry count, 0 = unbounded
    threshold: u64,
    policy: Box<dyn EvictionPolicy>,
}

impl Evictor {
    pub fn new(threshold: u64, policy: Box<dyn EvictionPolicy>) -> Self {
        Self { threshold, policy }
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    // == Prune ==
    /// Sweeps if the approximate count exceeds the threshold.
    ///
    /// Returns the number of entries removed.
    pub fn prune(&self, store: &EntryStore, counter: &CountTracker, now: u64) -> usize {
        if self.threshold == 0 || counter.count(store) <= self.threshold {
            return 0;
        }
        self.sweep(store, counter, now)
    }

    // == Sweep ==
    /// One pass over every entry, then an exact recount.
    ///
    /// Entries that vanish or fail to decode mid-sweep are left alone.
    pub fn sweep(&self, store: &EntryStore, counter: &CountTracker, now: u64) -> usize {
        let names = match store.list_entries() {
            Ok(names) => names,
            Err(e) => {
                debug!("Eviction sweep could not list entries: {}", e);
                return 0;
            }
        };

        let mut removed = 0;
        for (index, filename) in names.into_iter().enumerate() {
            let expiry = match store.load_expiry(&filename) {
                Ok(Some(expiry)) => expiry,
                Ok(None) => continue,
                Err(e) => {
                    debug!("Eviction sweep skipping {}: {}", filename, e);
                    continue;
                }
            };

            let entry = EntryMeta::new(filename, expiry);
            if !self.policy.decide(&entry, index, now) {
                continue;
            }

            match store.remove(&entry.filename) {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => debug!("Eviction sweep failed to remove {}: {}", entry.filename, e),
            }
        }

        if let Err(e) = counter.recount(store) {
            debug!("Recount after eviction failed: {}", e);
        }

        debug!("Evicted {} entries", removed);
        removed
    }
}

impl std::fmt::Debug for Evictor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Evictor")
            .field("threshold", &self.threshold)
            .finish_non_exhaustive()
    }
}
