//! File System Cache Module
//!
//! The public cache: get/set/add/delete/has/clear over an [`EntryStore`],
//! with lazy expiry on reads and threshold eviction on writes.
//!
//! Every operation is synchronous and holds no locks between calls, so any
//! number of processes may point at the same directory. Only construction
//! returns errors; at runtime, failures are logged and surface as `false` or
//! `None`.

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::cache::{
    absolute_expiry, is_expired, CacheOptions, CacheStats, Clock, CountTracker, EntryCodec,
    EntryStore, EvictionPolicy, Evictor, KeyHasher, ModuloSweep, StatsRecorder, SystemClock,
};
use crate::error::{CacheError, Result};

// == File System Cache ==
/// A key/value cache storing one file per entry under a directory.
pub struct FileSystemCache {
    store: EntryStore,
    counter: CountTracker,
    evictor: Evictor,
    clock: Arc<dyn Clock>,
    stats: StatsRecorder,
    /// Timeout applied when a write passes `None`
    default_timeout: u64,
    ignore_errors: bool,
}

impl FileSystemCache {
    // == Constructor ==
    /// Opens a cache with the default hasher for `options`, the system clock
    /// and the [`ModuloSweep`] eviction policy.
    pub fn new(options: CacheOptions) -> Result<Self> {
        CacheBuilder::new(options).build()
    }

    /// Starts a builder for swapping the hasher, clock or eviction policy.
    pub fn builder(options: CacheOptions) -> CacheBuilder {
        CacheBuilder::new(options)
    }

    // == Factory ==
    /// Builds a cache from named configuration values.
    ///
    /// See [`CacheOptions::from_settings`] for the recognized names.
    pub fn factory(settings: &HashMap<String, String>) -> Result<Self> {
        Self::new(CacheOptions::from_settings(settings)?)
    }

    // == Get ==
    /// Returns the live value for `key`, or `None`.
    ///
    /// An expired entry is deleted as a side effect. Unreadable entries,
    /// including ones stored as a different type than `V`, read as `None`.
    pub fn get<V: DeserializeOwned>(&self, key: impl AsRef<[u8]>) -> Option<V> {
        let key = key.as_ref();
        let filename = self.resolve(key)?;

        let value = match self.store.load::<V>(&filename) {
            Ok(Some((expiry, value))) => {
                if is_expired(expiry, self.clock.now()) {
                    self.remove_entry(key, &filename);
                    None
                } else {
                    Some(value)
                }
            }
            Ok(None) => None,
            Err(e) => {
                self.report("get", key, &e);
                None
            }
        };

        if value.is_some() {
            self.stats.record_hit();
        } else {
            self.stats.record_miss();
        }
        value
    }

    // == Set ==
    /// Stores `value` under `key`, replacing any previous entry.
    ///
    /// `timeout` is in seconds: `None` uses the configured default and
    /// `Some(0)` never expires. Returns whether the write succeeded.
    pub fn set<V: Serialize + ?Sized>(
        &self,
        key: impl AsRef<[u8]>,
        value: &V,
        timeout: Option<u64>,
    ) -> bool {
        let key = key.as_ref();
        let Some(filename) = self.resolve(key) else {
            return false;
        };

        self.prune();

        let expiry = self.expiry_for(timeout);
        let is_new = !self.store.exists(&filename);
        match self.store.save(&filename, expiry, value) {
            Ok(()) => {
                if is_new {
                    self.adjust_count(1);
                }
                self.stats.record_set();
                true
            }
            Err(e) => {
                self.report("set", key, &e);
                false
            }
        }
    }

    // == Add ==
    /// Stores `value` only if `key` has no live entry.
    ///
    /// A stale entry is cleared first and does not block the add. The final
    /// write is create-if-absent, so of two racing adds exactly one wins.
    pub fn add<V: Serialize + ?Sized>(
        &self,
        key: impl AsRef<[u8]>,
        value: &V,
        timeout: Option<u64>,
    ) -> bool {
        let key = key.as_ref();
        let Some(filename) = self.resolve(key) else {
            return false;
        };
        if self.has(key) {
            return false;
        }

        self.prune();

        let expiry = self.expiry_for(timeout);
        let written = self
            .store
            .codec()
            .encode(expiry, value)
            .and_then(|bytes| self.store.write_new(&filename, &bytes));

        match written {
            Ok(true) => {
                self.adjust_count(1);
                self.stats.record_set();
                true
            }
            Ok(false) => false,
            Err(e) => {
                self.report("add", key, &e);
                false
            }
        }
    }

    // == Delete ==
    /// Removes `key`. Returns false when there was nothing to remove.
    pub fn delete(&self, key: impl AsRef<[u8]>) -> bool {
        let key = key.as_ref();
        match self.resolve(key) {
            Some(filename) => self.remove_entry(key, &filename),
            None => false,
        }
    }

    // == Has ==
    /// Whether `key` has a live entry. Expired entries are deleted.
    pub fn has(&self, key: impl AsRef<[u8]>) -> bool {
        let key = key.as_ref();
        let Some(filename) = self.resolve(key) else {
            return false;
        };

        match self.store.load_expiry(&filename) {
            Ok(Some(expiry)) if is_expired(expiry, self.clock.now()) => {
                self.remove_entry(key, &filename);
                false
            }
            Ok(Some(_)) => true,
            Ok(None) => false,
            Err(e) => {
                self.report("has", key, &e);
                false
            }
        }
    }

    // == Clear ==
    /// Removes every entry.
    ///
    /// Stops at the first failed removal and returns false, leaving the
    /// entries already removed gone. With `ignore_errors` set it keeps going
    /// past failures instead and returns true. Either way the counter ends up
    /// matching what is left on disk.
    pub fn clear(&self) -> bool {
        let names = match self.store.list_entries() {
            Ok(names) => names,
            Err(e) => {
                error!("clear -> {}", e);
                return false;
            }
        };

        let mut skipped = 0usize;
        for filename in names {
            if let Err(e) = self.store.remove(&filename) {
                if self.ignore_errors {
                    debug!("clear ignoring {}", e);
                    skipped += 1;
                    continue;
                }
                error!("clear -> {}", e);
                self.recount();
                return false;
            }
        }

        if skipped > 0 {
            warn!("clear left {} entries behind", skipped);
            self.recount();
        } else if let Err(e) = self.counter.reset(&self.store, 0) {
            warn!("Failed to reset entry counter: {}", e);
        }
        true
    }

    // == Entry Count ==
    /// Approximate number of entries on disk.
    ///
    /// Unbounded caches keep no counter and list the directory instead.
    pub fn entry_count(&self) -> u64 {
        if self.counter.is_enabled() {
            return self.counter.count(&self.store);
        }
        self.store
            .list_entries()
            .map(|names| names.len() as u64)
            .unwrap_or(0)
    }

    // == Stats ==
    /// Returns this process's counters plus the approximate entry count.
    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot(self.entry_count())
    }

    pub fn threshold(&self) -> u64 {
        self.evictor.threshold()
    }

    pub fn store(&self) -> &EntryStore {
        &self.store
    }

    // == Internals ==
    /// File name for a public key, refusing the management entries.
    fn resolve(&self, key: &[u8]) -> Option<String> {
        let filename = self.store.filename_for(key);
        if self.store.is_reserved(&filename) {
            warn!(
                "Refusing access to reserved key {:?}",
                String::from_utf8_lossy(key)
            );
            return None;
        }
        Some(filename)
    }

    fn expiry_for(&self, timeout: Option<u64>) -> u64 {
        absolute_expiry(self.clock.now(), timeout.unwrap_or(self.default_timeout))
    }

    fn remove_entry(&self, key: &[u8], filename: &str) -> bool {
        match self.store.remove(filename) {
            Ok(true) => {
                self.adjust_count(-1);
                true
            }
            Ok(false) => false,
            Err(e) => {
                self.report("delete", key, &e);
                false
            }
        }
    }

    fn prune(&self) {
        let removed = self
            .evictor
            .prune(&self.store, &self.counter, self.clock.now());
        if removed > 0 {
            self.stats.record_evictions(removed);
        }
    }

    fn adjust_count(&self, delta: i64) {
        if let Err(e) = self.counter.adjust(&self.store, delta) {
            warn!("Failed to update entry counter: {}", e);
        }
    }

    fn recount(&self) {
        if let Err(e) = self.counter.recount(&self.store) {
            warn!("Failed to recount entries: {}", e);
        }
    }

    fn report(&self, op: &str, key: &[u8], err: &CacheError) {
        error!("{} key {:?} -> {}", op, String::from_utf8_lossy(key), err);
    }
}

impl std::fmt::Debug for FileSystemCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSystemCache")
            .field("store", &self.store)
            .field("evictor", &self.evictor)
            .field("default_timeout", &self.default_timeout)
            .field("ignore_errors", &self.ignore_errors)
            .finish_non_exhaustive()
    }
}

// == Cache Builder ==
/// Builder for a [`FileSystemCache`] with custom collaborators.
pub struct CacheBuilder {
    options: CacheOptions,
    hasher: Option<Box<dyn KeyHasher>>,
    clock: Option<Arc<dyn Clock>>,
    policy: Option<Box<dyn EvictionPolicy>>,
}

impl CacheBuilder {
    pub fn new(options: CacheOptions) -> Self {
        Self {
            options,
            hasher: None,
            clock: None,
            policy: None,
        }
    }

    /// Replaces the hash named by the options.
    pub fn hasher(mut self, hasher: impl KeyHasher + 'static) -> Self {
        self.hasher = Some(Box::new(hasher));
        self
    }

    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    pub fn policy(mut self, policy: impl EvictionPolicy + 'static) -> Self {
        self.policy = Some(Box::new(policy));
        self
    }

    // == Build ==
    /// Creates the directory and seeds the entry counter from a scan.
    pub fn build(self) -> Result<FileSystemCache> {
        let options = self.options;
        options.validate()?;

        let codec = if options.compress {
            EntryCodec::compressed(options.compress_level)
        } else {
            EntryCodec::plain()
        };
        let hasher = self
            .hasher
            .unwrap_or_else(|| Box::new(options.hash_method) as Box<dyn KeyHasher>);
        let store = EntryStore::open(&options.cache_dir, options.mode, hasher, codec)?;

        let counter = CountTracker::new(&store, options.threshold != 0);
        if let Err(e) = counter.recount(&store) {
            warn!("Failed to seed entry counter: {}", e);
        }

        let policy = self
            .policy
            .unwrap_or_else(|| Box::new(ModuloSweep::default()) as Box<dyn EvictionPolicy>);

        debug!(
            "Opened file cache at {} (threshold={}, default_timeout={}s, compress={})",
            options.cache_dir.display(),
            options.threshold,
            options.default_timeout,
            options.compress
        );

        Ok(FileSystemCache {
            store,
            counter,
            evictor: Evictor::new(options.threshold, policy),
            clock: self
                .clock
                .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>),
            stats: StatsRecorder::new(),
            default_timeout: options.default_timeout,
            ignore_errors: options.ignore_errors,
        })
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{HashMethod, ManualClock, COUNT_KEY};
    use serde::Deserialize;
    use tempfile::TempDir;

    const START: u64 = 1_700_000_000;

    fn open(tmp: &TempDir, threshold: u64) -> (FileSystemCache, ManualClock) {
        let clock = ManualClock::new(START);
        let cache = FileSystemCache::builder(CacheOptions::new(tmp.path()).threshold(threshold))
            .clock(clock.clone())
            .build()
            .unwrap();
        (cache, clock)
    }

    #[test]
    fn test_set_and_get() {
        let tmp = TempDir::new().unwrap();
        let (cache, _) = open(&tmp, 500);

        assert!(cache.set("key1", "value1", None));
        assert_eq!(cache.get::<String>("key1"), Some("value1".to_string()));
    }

    #[test]
    fn test_get_nonexistent() {
        let tmp = TempDir::new().unwrap();
        let (cache, _) = open(&tmp, 500);

        assert_eq!(cache.get::<String>("nonexistent"), None);
        assert!(!cache.has("nonexistent"));
    }

    #[test]
    fn test_structured_values() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Page {
            title: String,
            views: u32,
        }

        let tmp = TempDir::new().unwrap();
        let (cache, _) = open(&tmp, 500);
        let page = Page {
            title: "home".to_string(),
            views: 12,
        };

        assert!(cache.set("page:/", &page, None));
        assert_eq!(cache.get::<Page>("page:/"), Some(page));
        // Asking for the wrong type is a miss, not a panic.
        assert_eq!(cache.get::<Vec<u8>>("page:/"), None);
    }

    #[test]
    fn test_bytes_and_text_keys_match() {
        let tmp = TempDir::new().unwrap();
        let (cache, _) = open(&tmp, 500);

        cache.set("k", &1u32, None);
        assert_eq!(cache.get::<u32>(b"k"), Some(1));
    }

    #[test]
    fn test_overwrite_keeps_one_file() {
        let tmp = TempDir::new().unwrap();
        let (cache, _) = open(&tmp, 500);

        cache.set("key1", "value1", None);
        cache.set("key1", "value2", None);

        assert_eq!(cache.get::<String>("key1"), Some("value2".to_string()));
        assert_eq!(cache.store().list_entries().unwrap().len(), 1);
        assert_eq!(cache.entry_count(), 1);
    }

    #[test]
    fn test_expiry_deletes_on_get() {
        let tmp = TempDir::new().unwrap();
        let (cache, clock) = open(&tmp, 500);

        cache.set("session", "abc", Some(1));
        let filename = cache.store().filename_for(b"session");

        clock.advance(1);
        assert_eq!(cache.get::<String>("session"), Some("abc".to_string()));

        clock.advance(1);
        assert_eq!(cache.get::<String>("session"), None);
        assert!(!cache.store().exists(&filename));
        assert_eq!(cache.entry_count(), 0);
    }

    #[test]
    fn test_expiry_deletes_on_has() {
        let tmp = TempDir::new().unwrap();
        let (cache, clock) = open(&tmp, 500);

        cache.set("session", "abc", Some(10));
        assert!(cache.has("session"));

        clock.advance(11);
        assert!(!cache.has("session"));
        assert!(!cache.store().exists(&cache.store().filename_for(b"session")));
    }

    #[test]
    fn test_default_timeout_applies() {
        let tmp = TempDir::new().unwrap();
        let clock = ManualClock::new(START);
        let cache =
            FileSystemCache::builder(CacheOptions::new(tmp.path()).default_timeout(60))
                .clock(clock.clone())
                .build()
                .unwrap();

        cache.set("k", "v", None);
        clock.advance(60);
        assert!(cache.has("k"));
        clock.advance(1);
        assert!(!cache.has("k"));
    }

    #[test]
    fn test_zero_timeout_never_expires() {
        let tmp = TempDir::new().unwrap();
        let (cache, clock) = open(&tmp, 500);

        cache.set("forever", "v", Some(0));
        clock.advance(100 * 365 * 24 * 3600);
        assert_eq!(cache.get::<String>("forever"), Some("v".to_string()));
    }

    #[test]
    fn test_add_only_when_absent() {
        let tmp = TempDir::new().unwrap();
        let (cache, _) = open(&tmp, 500);

        assert!(cache.add("k", "v1", None));
        assert!(!cache.add("k", "v2", None));
        assert_eq!(cache.get::<String>("k"), Some("v1".to_string()));
        assert_eq!(cache.entry_count(), 1);
    }

    #[test]
    fn test_add_replaces_expired_entry() {
        let tmp = TempDir::new().unwrap();
        let (cache, clock) = open(&tmp, 500);

        cache.set("k", "old", Some(5));
        clock.advance(6);

        assert!(cache.add("k", "new", None));
        assert_eq!(cache.get::<String>("k"), Some("new".to_string()));
        assert_eq!(cache.entry_count(), 1);
    }

    #[test]
    fn test_delete_twice() {
        let tmp = TempDir::new().unwrap();
        let (cache, _) = open(&tmp, 500);

        cache.set("k", "v", None);
        assert!(cache.delete("k"));
        assert!(!cache.delete("k"));
        assert!(!cache.delete("never-set"));
        assert_eq!(cache.entry_count(), 0);
    }

    #[test]
    fn test_clear() {
        let tmp = TempDir::new().unwrap();
        let (cache, _) = open(&tmp, 500);

        for i in 0..10 {
            cache.set(format!("key{}", i), &i, None);
        }
        assert_eq!(cache.entry_count(), 10);

        assert!(cache.clear());
        for i in 0..10 {
            assert_eq!(cache.get::<i32>(format!("key{}", i)), None);
        }
        assert_eq!(cache.entry_count(), 0);
        assert!(cache.store().list_entries().unwrap().is_empty());
    }

    fn open_clearable(tmp: &TempDir, ignore_errors: bool) -> FileSystemCache {
        let cache = FileSystemCache::new(
            CacheOptions::new(tmp.path())
                .threshold(500)
                .ignore_errors(ignore_errors),
        )
        .unwrap();
        for i in 0..10 {
            cache.set(format!("key{}", i), &i, None);
        }
        cache
    }

    #[test]
    fn test_clear_stops_at_failed_removal() {
        let tmp = TempDir::new().unwrap();
        let cache = open_clearable(&tmp, false);
        let stuck = cache.store().filename_for(b"key4");
        cache.store().refuse_removal(&stuck);

        assert!(!cache.clear());

        let left = cache.store().list_entries().unwrap();
        assert!(left.contains(&stuck));
        assert_eq!(cache.entry_count(), left.len() as u64);
        assert_eq!(cache.get::<i32>("key4"), Some(4));
    }

    #[test]
    fn test_clear_ignoring_errors_removes_the_rest() {
        let tmp = TempDir::new().unwrap();
        let cache = open_clearable(&tmp, true);
        let stuck = cache.store().filename_for(b"key4");
        cache.store().refuse_removal(&stuck);

        assert!(cache.clear());

        assert_eq!(cache.store().list_entries().unwrap(), vec![stuck]);
        assert_eq!(cache.entry_count(), 1);
        for i in (0..10).filter(|i| *i != 4) {
            assert_eq!(cache.get::<i32>(format!("key{}", i)), None);
        }
    }

    #[test]
    fn test_reserved_key_is_refused() {
        let tmp = TempDir::new().unwrap();
        let (cache, _) = open(&tmp, 500);
        cache.set("a", "b", None);

        assert_eq!(cache.get::<u64>(COUNT_KEY), None);
        assert!(!cache.set(COUNT_KEY, &999u64, None));
        assert!(!cache.delete(COUNT_KEY));
        assert!(!cache.has(COUNT_KEY));
        assert_eq!(cache.entry_count(), 1);
    }

    #[test]
    fn test_unbounded_cache_keeps_no_counter() {
        let tmp = TempDir::new().unwrap();
        let (cache, _) = open(&tmp, 0);

        for i in 0..20 {
            cache.set(format!("key{}", i), &i, None);
        }

        let counter_file = cache.store().filename_for(COUNT_KEY.as_bytes());
        assert!(!cache.store().exists(&counter_file));
        assert_eq!(cache.entry_count(), 20);
        assert_eq!(cache.stats().evictions, 0);
    }

    #[test]
    fn test_threshold_triggers_sweep() {
        let tmp = TempDir::new().unwrap();
        let (cache, _) = open(&tmp, 10);

        for i in 0..30 {
            cache.set(format!("key{}", i), &i, None);
        }

        let on_disk = cache.store().list_entries().unwrap().len() as u64;
        assert!(on_disk < 30);
        assert!(cache.stats().evictions > 0);
        assert_eq!(cache.entry_count(), on_disk);
    }

    #[test]
    fn test_counter_seeded_from_existing_directory() {
        let tmp = TempDir::new().unwrap();
        {
            let (cache, _) = open(&tmp, 0);
            for i in 0..7 {
                cache.set(format!("key{}", i), &i, None);
            }
        }

        let (cache, _) = open(&tmp, 100);
        assert_eq!(cache.entry_count(), 7);
    }

    #[test]
    fn test_corrupt_entry_reads_as_miss() {
        let tmp = TempDir::new().unwrap();
        let (cache, _) = open(&tmp, 500);

        let filename = cache.store().filename_for(b"k");
        cache.store().write(&filename, b"\x00\x01garbage").unwrap();

        assert_eq!(cache.get::<String>("k"), None);
        assert!(!cache.has("k"));
        assert!(cache.set("k", "repaired", None));
        assert_eq!(cache.get::<String>("k"), Some("repaired".to_string()));
    }

    #[test]
    fn test_custom_hasher_and_policy() {
        struct Plain;
        impl KeyHasher for Plain {
            fn hash(&self, key: &[u8]) -> String {
                hex::encode(key)
            }
        }

        struct KeepAll;
        impl EvictionPolicy for KeepAll {
            fn decide(&self, _: &crate::cache::EntryMeta, _: usize, _: u64) -> bool {
                false
            }
        }

        let tmp = TempDir::new().unwrap();
        let cache = FileSystemCache::builder(CacheOptions::new(tmp.path()).threshold(2))
            .hasher(Plain)
            .policy(KeepAll)
            .build()
            .unwrap();

        for key in ["a", "b", "c", "d"] {
            cache.set(key, key, None);
        }

        assert!(tmp.path().join(hex::encode("a")).exists());
        assert_eq!(cache.store().list_entries().unwrap().len(), 4);
    }

    #[test]
    fn test_stats_hits_and_misses() {
        let tmp = TempDir::new().unwrap();
        let (cache, _) = open(&tmp, 500);

        cache.set("k", "v", None);
        cache.get::<String>("k");
        cache.get::<String>("missing");

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.sets, 1);
        assert_eq!(stats.total_entries, 1);
    }

    #[test]
    fn test_sha256_layout() {
        let tmp = TempDir::new().unwrap();
        let cache = FileSystemCache::new(
            CacheOptions::new(tmp.path()).hash_method(HashMethod::Sha256),
        )
        .unwrap();

        cache.set("k", "v", None);
        assert!(tmp.path().join(HashMethod::Sha256.hash(b"k")).exists());
    }
}
