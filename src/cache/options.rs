//! Cache Options Module
//!
//! Construction-time settings and the factory that reads them from named
//! configuration values.

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;

use crate::cache::HashMethod;
use crate::error::{CacheError, Result};

/// Default approximate entry limit before sweeps start
pub const DEFAULT_THRESHOLD: u64 = 500;

/// Default entry lifetime in seconds
pub const DEFAULT_TIMEOUT: u64 = 300;

/// Default permission bits for entry files
pub const DEFAULT_MODE: u32 = 0o600;

/// Default zlib level when compression is on
pub const DEFAULT_COMPRESS_LEVEL: u32 = 3;

// == Cache Options ==
/// Settings for one [`FileSystemCache`](crate::cache::FileSystemCache).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheOptions {
    /// Directory holding the entry files
    pub cache_dir: PathBuf,
    /// Approximate entry limit, 0 = unbounded (disables counting)
    pub threshold: u64,
    /// Timeout in seconds used when a write passes none, 0 = never expire
    pub default_timeout: u64,
    /// Permission bits applied to entry files on POSIX systems
    pub mode: u32,
    /// Key to file name hash
    pub hash_method: HashMethod,
    /// Keep clearing past failed removals instead of stopping
    pub ignore_errors: bool,
    /// Wrap encoded records in zlib
    pub compress: bool,
    /// zlib level, 0-9
    pub compress_level: u32,
}

impl CacheOptions {
    /// Options with every default and the given directory.
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            threshold: DEFAULT_THRESHOLD,
            default_timeout: DEFAULT_TIMEOUT,
            mode: DEFAULT_MODE,
            hash_method: HashMethod::default(),
            ignore_errors: false,
            compress: false,
            compress_level: DEFAULT_COMPRESS_LEVEL,
        }
    }

    pub fn threshold(mut self, threshold: u64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn default_timeout(mut self, secs: u64) -> Self {
        self.default_timeout = secs;
        self
    }

    pub fn mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    pub fn hash_method(mut self, method: HashMethod) -> Self {
        self.hash_method = method;
        self
    }

    pub fn ignore_errors(mut self, ignore: bool) -> Self {
        self.ignore_errors = ignore;
        self
    }

    pub fn compress(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    pub fn compress_level(mut self, level: u32) -> Self {
        self.compress_level = level;
        self
    }

    // == Validate ==
    pub fn validate(&self) -> Result<()> {
        if self.cache_dir.as_os_str().is_empty() {
            return Err(CacheError::Configuration(
                "cache directory must not be empty".to_string(),
            ));
        }
        if self.compress_level > 9 {
            return Err(CacheError::Configuration(format!(
                "compression level {} is outside 0-9",
                self.compress_level
            )));
        }
        if self.mode > 0o7777 {
            return Err(CacheError::Configuration(format!(
                "file mode {:o} is not a permission mode",
                self.mode
            )));
        }
        Ok(())
    }

    // == From Settings ==
    /// Builds options from named configuration values.
    ///
    /// # Recognized Names
    /// - `CACHE_DIR` - cache directory (required)
    /// - `CACHE_THRESHOLD` - entry limit (default: 500)
    /// - `CACHE_DEFAULT_TIMEOUT` - seconds (default: 300)
    /// - `CACHE_IGNORE_ERRORS` - bool (default: false)
    /// - `CACHE_COMPRESS` - bool (default: false)
    /// - `CACHE_COMPRESS_LEVEL` - 0-9 (default: 3)
    /// - `CACHE_MODE` - octal permission bits (default: 600)
    /// - `CACHE_HASH_METHOD` - `md5` or `sha256` (default: md5)
    pub fn from_settings(settings: &HashMap<String, String>) -> Result<Self> {
        let cache_dir = settings
            .get("CACHE_DIR")
            .filter(|dir| !dir.trim().is_empty())
            .ok_or_else(|| CacheError::Configuration("CACHE_DIR is required".to_string()))?;

        let mut options = Self::new(cache_dir.trim());
        options.threshold = parse_setting(settings, "CACHE_THRESHOLD", options.threshold)?;
        options.default_timeout =
            parse_setting(settings, "CACHE_DEFAULT_TIMEOUT", options.default_timeout)?;
        options.ignore_errors = parse_flag(settings, "CACHE_IGNORE_ERRORS", options.ignore_errors)?;
        options.compress = parse_flag(settings, "CACHE_COMPRESS", options.compress)?;
        options.compress_level =
            parse_setting(settings, "CACHE_COMPRESS_LEVEL", options.compress_level)?;
        options.hash_method = parse_setting(settings, "CACHE_HASH_METHOD", options.hash_method)?;

        if let Some(raw) = settings.get("CACHE_MODE") {
            let digits = raw.trim().trim_start_matches("0o");
            options.mode = u32::from_str_radix(digits, 8).map_err(|_| {
                CacheError::Configuration(format!("CACHE_MODE '{}' is not an octal mode", raw))
            })?;
        }

        options.validate()?;
        Ok(options)
    }
}

fn parse_setting<T: FromStr>(settings: &HashMap<String, String>, name: &str, default: T) -> Result<T> {
    match settings.get(name) {
        Some(raw) => raw.trim().parse().map_err(|_| {
            CacheError::Configuration(format!("{} has invalid value '{}'", name, raw))
        }),
        None => Ok(default),
    }
}

fn parse_flag(settings: &HashMap<String, String>, name: &str, default: bool) -> Result<bool> {
    match settings.get(name).map(|v| v.trim().to_ascii_lowercase()) {
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
        Some(v) => Err(CacheError::Configuration(format!(
            "{} has invalid value '{}'",
            name, v
        ))),
        None => Ok(default),
    }
}
