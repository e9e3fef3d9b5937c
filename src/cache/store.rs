//! Entry Store Module
//!
//! Owns the cache directory: file naming, atomic writes, reads, removal and
//! listing of entry files.
//!
//! Writes go to a uniquely named sibling temp file which is fsynced and then
//! renamed over the target, so a reader sees either the previous complete
//! record or the new one. On Windows a rename cannot replace a target that
//! another handle holds open; there the target is removed and the rename
//! retried, leaving a short window in which the entry reads as absent.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::cache::{EntryCodec, KeyHasher, COUNT_KEY, TRANSACTION_SUFFIX};
use crate::error::{CacheError, Result};

// == Entry Store ==
/// Filesystem-backed storage of encoded entries, one file per key.
pub struct EntryStore {
    /// Base directory holding every entry file
    dir: PathBuf,
    /// Permission bits applied after each write (POSIX only)
    mode: u32,
    /// Key to file name mapping
    hasher: Box<dyn KeyHasher>,
    /// Record encoding
    codec: EntryCodec,
    /// File names of management entries, hidden from listings
    reserved: Vec<String>,
    /// File names whose removal fails, for exercising error paths
    #[cfg(test)]
    refused_removals: std::sync::Mutex<Vec<String>>,
}

impl EntryStore {
    // == Constructor ==
    /// Opens the store, creating `dir` and its parents if needed.
    ///
    /// Failure to create the directory is fatal and reported as
    /// [`CacheError::Configuration`].
    pub fn open(
        dir: impl Into<PathBuf>,
        mode: u32,
        hasher: Box<dyn KeyHasher>,
        codec: EntryCodec,
    ) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| {
            CacheError::Configuration(format!(
                "cannot create cache directory {}: {}",
                dir.display(),
                e
            ))
        })?;

        let reserved = vec![hasher.hash(COUNT_KEY.as_bytes())];

        Ok(Self {
            dir,
            mode,
            hasher,
            codec,
            reserved,
            #[cfg(test)]
            refused_removals: Default::default(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn codec(&self) -> &EntryCodec {
        &self.codec
    }

    /// File name backing `key`.
    pub fn filename_for(&self, key: &[u8]) -> String {
        self.hasher.hash(key)
    }

    /// Whether `filename` belongs to a management entry.
    pub fn is_reserved(&self, filename: &str) -> bool {
        self.reserved.iter().any(|r| r == filename)
    }

    fn path_of(&self, filename: &str) -> PathBuf {
        self.dir.join(filename)
    }

    // == Write ==
    /// Atomically replaces the content of `filename` with `bytes`.
    pub fn write(&self, filename: &str, bytes: &[u8]) -> Result<()> {
        let target = self.path_of(filename);
        let staged = self.stage(bytes)?;

        match staged.persist(&target) {
            Ok(_) => {}
            #[cfg(windows)]
            Err(err) if target.exists() => {
                let _ = fs::remove_file(&target);
                err.file
                    .persist(&target)
                    .map_err(|e| CacheError::io(&target, e.error))?;
            }
            Err(err) => return Err(CacheError::io(&target, err.error)),
        }

        self.apply_mode(&target)
    }

    // == Write New ==
    /// Writes `filename` only if it does not exist yet.
    ///
    /// Returns `Ok(false)` when another writer got there first. The
    /// existence check and the rename are one filesystem operation.
    pub fn write_new(&self, filename: &str, bytes: &[u8]) -> Result<bool> {
        let target = self.path_of(filename);
        let staged = self.stage(bytes)?;

        match staged.persist_noclobber(&target) {
            Ok(_) => {}
            Err(err) if err.error.kind() == io::ErrorKind::AlreadyExists => return Ok(false),
            Err(err) => return Err(CacheError::io(&target, err.error)),
        }

        self.apply_mode(&target)?;
        Ok(true)
    }

    /// Writes `bytes` to a fresh temp file in the cache directory and
    /// flushes it to stable storage.
    fn stage(&self, bytes: &[u8]) -> Result<NamedTempFile> {
        let mut staged = tempfile::Builder::new()
            .suffix(TRANSACTION_SUFFIX)
            .tempfile_in(&self.dir)
            .map_err(|e| CacheError::io(&self.dir, e))?;

        staged
            .write_all(bytes)
            .map_err(|e| CacheError::io(staged.path(), e))?;
        staged
            .as_file()
            .sync_all()
            .map_err(|e| CacheError::io(staged.path(), e))?;

        Ok(staged)
    }

    #[cfg(unix)]
    fn apply_mode(&self, path: &Path) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        fs::set_permissions(path, fs::Permissions::from_mode(self.mode))
            .map_err(|e| CacheError::io(path, e))
    }

    #[cfg(not(unix))]
    fn apply_mode(&self, path: &Path) -> Result<()> {
        let mut perms = fs::metadata(path)
            .map_err(|e| CacheError::io(path, e))?
            .permissions();
        perms.set_readonly(false);
        fs::set_permissions(path, perms).map_err(|e| CacheError::io(path, e))
    }

    // == Read ==
    /// Reads the whole file. `Ok(None)` means the file does not exist.
    pub fn read(&self, filename: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_of(filename);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CacheError::io(path, e)),
        }
    }

    // == Remove ==
    /// Deletes the file, returning whether anything was removed.
    pub fn remove(&self, filename: &str) -> Result<bool> {
        let path = self.path_of(filename);
        #[cfg(test)]
        if self.is_removal_refused(filename) {
            let err = io::Error::new(io::ErrorKind::PermissionDenied, "removal refused");
            return Err(CacheError::io(path, err));
        }
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CacheError::io(path, e)),
        }
    }

    /// Makes every later `remove` of `filename` fail.
    #[cfg(test)]
    pub(crate) fn refuse_removal(&self, filename: &str) {
        if let Ok(mut refused) = self.refused_removals.lock() {
            refused.push(filename.to_string());
        }
    }

    #[cfg(test)]
    fn is_removal_refused(&self, filename: &str) -> bool {
        self.refused_removals
            .lock()
            .map(|refused| refused.iter().any(|name| name == filename))
            .unwrap_or(false)
    }

    pub fn exists(&self, filename: &str) -> bool {
        self.path_of(filename).exists()
    }

    // == List Entries ==
    /// Names of all regular entry files, in directory order.
    ///
    /// In-flight temp files and management entries are left out.
    pub fn list_entries(&self) -> Result<Vec<String>> {
        let reader = fs::read_dir(&self.dir).map_err(|e| CacheError::io(&self.dir, e))?;

        let mut names = Vec::new();
        for dirent in reader {
            // Entries vanishing mid-listing are another process's business.
            let Ok(dirent) = dirent else { continue };
            if dirent.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let Ok(name) = dirent.file_name().into_string() else {
                continue;
            };
            if name.ends_with(TRANSACTION_SUFFIX) || self.is_reserved(&name) {
                continue;
            }
            names.push(name);
        }
        Ok(names)
    }

    // == Records ==
    /// Encodes `(expiry, value)` and writes it atomically.
    pub fn save<V: Serialize + ?Sized>(&self, filename: &str, expiry: u64, value: &V) -> Result<()> {
        let bytes = self.codec.encode(expiry, value)?;
        self.write(filename, &bytes)
    }

    /// Reads and decodes a record. `Ok(None)` means the file does not exist.
    pub fn load<V: DeserializeOwned>(&self, filename: &str) -> Result<Option<(u64, V)>> {
        match self.read(filename)? {
            Some(bytes) => self.codec.decode(&bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Reads only the expiry of a record.
    pub fn load_expiry(&self, filename: &str) -> Result<Option<u64>> {
        match self.read(filename)? {
            Some(bytes) => self.codec.decode_expiry(&bytes).map(Some),
            None => Ok(None),
        }
    }
}

impl std::fmt::Debug for EntryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryStore")
            .field("dir", &self.dir)
            .field("mode", &format_args!("{:o}", self.mode))
            .field("codec", &self.codec)
            .finish_non_exhaustive()
    }
}
