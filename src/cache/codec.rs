//! Entry Codec Module
//!
//! Serializes `(expiry, value)` records to CBOR, optionally wrapped in zlib.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{CacheError, Result};

// == Entry Codec ==
/// Encodes and decodes the on-disk record of one cache entry.
///
/// Entries written with compression enabled cannot be read back with it
/// disabled (and vice versa); such reads fail with [`CacheError::Decode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryCodec {
    /// zlib level, `None` when compression is off
    compression: Option<u32>,
}

impl EntryCodec {
    /// Plain CBOR, no compression stage.
    pub fn plain() -> Self {
        Self { compression: None }
    }

    /// CBOR wrapped in zlib at the given level (0-9).
    pub fn compressed(level: u32) -> Self {
        Self {
            compression: Some(level.min(9)),
        }
    }

    pub fn is_compressed(&self) -> bool {
        self.compression.is_some()
    }

    // == Encode ==
    /// Serializes the record, then compresses it if enabled.
    pub fn encode<V: Serialize + ?Sized>(&self, expiry: u64, value: &V) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        ciborium::into_writer(&(expiry, value), &mut data)
            .map_err(|e| CacheError::Encode(e.to_string()))?;

        match self.compression {
            Some(level) => {
                let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(level));
                encoder
                    .write_all(&data)
                    .map_err(|e| CacheError::Encode(e.to_string()))?;
                encoder
                    .finish()
                    .map_err(|e| CacheError::Encode(e.to_string()))
            }
            None => Ok(data),
        }
    }

    // == Decode ==
    /// Decompresses (if enabled) and deserializes a record.
    pub fn decode<V: DeserializeOwned>(&self, bytes: &[u8]) -> Result<(u64, V)> {
        match self.compression {
            Some(_) => {
                let raw = inflate(bytes)?;
                from_cbor(&raw)
            }
            None => from_cbor(bytes),
        }
    }

    /// Decodes only as far as needed to learn the expiry of a record.
    pub fn decode_expiry(&self, bytes: &[u8]) -> Result<u64> {
        let (expiry, _): (u64, ciborium::Value) = self.decode(bytes)?;
        Ok(expiry)
    }
}

impl Default for EntryCodec {
    fn default() -> Self {
        Self::plain()
    }
}

fn inflate(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    ZlibDecoder::new(bytes)
        .read_to_end(&mut out)
        .map_err(|e| CacheError::Decode(e.to_string()))?;
    Ok(out)
}

fn from_cbor<V: DeserializeOwned>(bytes: &[u8]) -> Result<(u64, V)> {
    ciborium::from_reader(bytes).map_err(|e| CacheError::Decode(e.to_string()))
}
