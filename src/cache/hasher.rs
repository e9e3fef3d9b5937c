//! Key Hasher Module
//!
//! Maps cache keys to filesystem-safe file names.

use std::fmt;
use std::str::FromStr;

use sha2::{Digest, Sha256};

use crate::error::CacheError;

// == Key Hasher ==
/// Deterministic mapping from a key to the name of its backing file.
///
/// Implementations must return the same name for the same key in every
/// process, and only characters that are safe in a file name.
pub trait KeyHasher: Send + Sync {
    fn hash(&self, key: &[u8]) -> String;
}

// == Hash Method ==
/// Built-in hash functions selectable from configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HashMethod {
    /// MD5 hex digest, the layout used by existing cache directories
    #[default]
    Md5,
    /// SHA-256 hex digest
    Sha256,
}

impl KeyHasher for HashMethod {
    fn hash(&self, key: &[u8]) -> String {
        match self {
            HashMethod::Md5 => format!("{:x}", md5::compute(key)),
            HashMethod::Sha256 => hex::encode(Sha256::digest(key)),
        }
    }
}

impl FromStr for HashMethod {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "md5" => Ok(HashMethod::Md5),
            "sha256" | "sha-256" => Ok(HashMethod::Sha256),
            other => Err(CacheError::Configuration(format!(
                "Unknown hash method '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for HashMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashMethod::Md5 => f.write_str("md5"),
            HashMethod::Sha256 => f.write_str("sha256"),
        }
    }
}
