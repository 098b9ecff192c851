//! File fingerprints - cheap, comparable digests used to detect changes.
//!
//! A fingerprint records size, mtime, and a content hash. Testing compares
//! size+mtime first and only hashes the file when the cheap comparison
//! fails, so unchanged files are almost never re-read.

use std::fs::{self, File};
use std::io::{ErrorKind, Read};
use std::path::Path;
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};

use crate::error::Result;

const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// Immutable digest of a file's identity. The default value is the "empty"
/// fingerprint, representing a location known not to exist.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    exists: bool,
    size: u64,
    mtime_ms: u64,
    hash: [u8; 32],
}

/// Outcome of testing a stored fingerprint against the filesystem.
#[derive(Clone, Debug)]
pub struct FingerprintTestResult {
    /// The location's content is unchanged since the fingerprint was taken.
    pub matches: bool,
    /// Content matched but the recorded timestamp is stale; the caller
    /// should persist `new_fingerprint` without re-indexing.
    pub needs_refresh: bool,
    pub new_fingerprint: Fingerprint,
}

impl Fingerprint {
    pub fn new(size: u64, mtime_ms: u64, hash: [u8; 32]) -> Self {
        Self {
            exists: true,
            size,
            mtime_ms,
            hash,
        }
    }

    /// The fingerprint of a location known not to exist.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn file_exists(&self) -> bool {
        self.exists
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn mtime_ms(&self) -> u64 {
        self.mtime_ms
    }

    pub fn hash(&self) -> [u8; 32] {
        self.hash
    }

    /// Tests this fingerprint against the file currently at `path`.
    ///
    /// A missing file is never an error: it matches iff this fingerprint is
    /// the empty one. Pure read; callers persist the result.
    pub fn test(&self, path: &Path) -> Result<FingerprintTestResult> {
        let metadata = match fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                return Ok(FingerprintTestResult {
                    matches: !self.exists,
                    needs_refresh: false,
                    new_fingerprint: Fingerprint::empty(),
                });
            }
            Err(error) => return Err(error.into()),
        };

        let size = metadata.len();
        let mtime_ms = metadata
            .modified()
            .ok()
            .and_then(|value| value.duration_since(UNIX_EPOCH).ok())
            .map(|value| value.as_millis() as u64)
            .unwrap_or(0);

        if self.exists && self.size == size && self.mtime_ms == mtime_ms {
            return Ok(FingerprintTestResult {
                matches: true,
                needs_refresh: false,
                new_fingerprint: self.clone(),
            });
        }

        let hash = hash_contents(path)?;
        let new_fingerprint = Fingerprint::new(size, mtime_ms, hash);
        let matches = self.exists && self.size == size && self.hash == hash;

        Ok(FingerprintTestResult {
            matches,
            // Same content under a new timestamp: refresh the stored
            // fingerprint so the next test matches cheaply again.
            needs_refresh: matches,
            new_fingerprint,
        })
    }
}

fn hash_contents(path: &Path) -> Result<[u8; 32]> {
    let mut file = File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0u8; HASH_BUFFER_SIZE];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(*hasher.finalize().as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn missing_file_matches_empty_fingerprint() {
        let temp = tempfile::TempDir::new().expect("tempdir");
        let missing = temp.path().join("nope.jar");

        let result = Fingerprint::empty().test(&missing).expect("test");
        assert!(result.matches);
        assert!(!result.needs_refresh);
        assert!(!result.new_fingerprint.file_exists());
    }

    #[test]
    fn missing_file_does_not_match_real_fingerprint() {
        let temp = tempfile::TempDir::new().expect("tempdir");
        let missing = temp.path().join("nope.jar");

        let stored = Fingerprint::new(10, 1234, [7u8; 32]);
        let result = stored.test(&missing).expect("test");
        assert!(!result.matches);
        assert!(!result.new_fingerprint.file_exists());
    }

    #[test]
    fn unchanged_file_matches_without_refresh() {
        let temp = tempfile::TempDir::new().expect("tempdir");
        let path = temp.path().join("a.jar");
        fs::write(&path, b"content").expect("write");

        let first = Fingerprint::empty().test(&path).expect("first test");
        assert!(!first.matches);

        let second = first.new_fingerprint.test(&path).expect("second test");
        assert!(second.matches);
        assert!(!second.needs_refresh);
    }

    #[test]
    fn content_change_is_detected() {
        let temp = tempfile::TempDir::new().expect("tempdir");
        let path = temp.path().join("a.jar");
        fs::write(&path, b"before").expect("write");
        let stored = Fingerprint::empty().test(&path).expect("test").new_fingerprint;

        fs::write(&path, b"after-with-longer-body").expect("rewrite");
        let result = stored.test(&path).expect("retest");
        assert!(!result.matches);
        assert!(result.new_fingerprint.file_exists());
    }

    #[test]
    fn stale_timestamp_with_same_content_needs_refresh() {
        let temp = tempfile::TempDir::new().expect("tempdir");
        let path = temp.path().join("a.jar");
        fs::write(&path, b"content").expect("write");

        let current = Fingerprint::empty().test(&path).expect("test").new_fingerprint;
        // Same size and hash, but a timestamp that no longer matches.
        let stale = Fingerprint::new(
            current.size(),
            current.mtime_ms().wrapping_sub(60_000),
            current.hash(),
        );

        let result = stale.test(&path).expect("retest");
        assert!(result.matches);
        assert!(result.needs_refresh);
        assert_eq!(result.new_fingerprint.mtime_ms(), current.mtime_ms());
    }
}
