//! fscache - A file-backed key/value cache
//!
//! One file per entry under a shared directory, with TTL expiration,
//! threshold eviction and atomic writes. Safe to share between processes.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod models;

pub use api::AppState;
pub use cache::{CacheOptions, FileSystemCache};
pub use config::Config;
pub use error::CacheError;
