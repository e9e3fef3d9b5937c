//! Configuration Module
//!
//! Handles loading and managing server configuration from environment variables.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use crate::cache::CacheOptions;
use crate::error::Result;

/// Environment variables forwarded to [`CacheOptions::from_settings`].
const CACHE_SETTINGS: [&str; 8] = [
    "CACHE_DIR",
    "CACHE_THRESHOLD",
    "CACHE_DEFAULT_TIMEOUT",
    "CACHE_IGNORE_ERRORS",
    "CACHE_COMPRESS",
    "CACHE_COMPRESS_LEVEL",
    "CACHE_MODE",
    "CACHE_HASH_METHOD",
];

/// Server configuration parameters.
#[derive(Debug, Clone)]
pub struct Config {
    /// Settings for the shared file cache
    pub cache: CacheOptions,
    /// HTTP server port
    pub server_port: u16,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_*` - see [`CacheOptions::from_settings`]; `CACHE_DIR`
    ///   defaults to `fscache` under the system temp directory
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Same as [`Config::from_env`] with an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut settings: HashMap<String, String> = CACHE_SETTINGS
            .iter()
            .filter_map(|&name| lookup(name).map(|value| (name.to_string(), value)))
            .collect();
        settings
            .entry("CACHE_DIR".to_string())
            .or_insert_with(|| default_cache_dir().display().to_string());

        Ok(Self {
            cache: CacheOptions::from_settings(&settings)?,
            server_port: lookup("SERVER_PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache: CacheOptions::new(default_cache_dir()),
            server_port: 3000,
        }
    }
}

fn default_cache_dir() -> PathBuf {
    env::temp_dir().join("fscache")
}
