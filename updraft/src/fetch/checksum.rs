//! SHA-256 checksums for staged payloads.
//!
//! The fetcher keeps a [`RollingChecksum`] that is updated block by block as
//! data arrives. When a transfer resumes, the hasher is first seeded with the
//! bytes already on disk so the final value always covers the whole file.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};

use super::error::{FetchError, FetchResult};

/// Buffer size for reading files during checksum calculation (64KB).
const BUFFER_SIZE: usize = 64 * 1024;

/// Incrementally computed SHA-256 over a download.
#[derive(Clone, Default)]
pub struct RollingChecksum {
    hasher: Sha256,
    bytes: u64,
}

impl std::fmt::Debug for RollingChecksum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RollingChecksum")
            .field("bytes", &self.bytes)
            .finish_non_exhaustive()
    }
}

impl RollingChecksum {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one block of data.
    pub fn update(&mut self, block: &[u8]) {
        self.hasher.update(block);
        self.bytes += block.len() as u64;
    }

    /// Feed the first `len` bytes of an existing file.
    pub fn seed_from_file(&mut self, path: &Path, len: u64) -> FetchResult<()> {
        let file = File::open(path).map_err(|e| FetchError::storage(path, e))?;
        let mut reader = file.take(len);
        let mut buffer = vec![0u8; BUFFER_SIZE];
        loop {
            let read = reader
                .read(&mut buffer)
                .map_err(|e| FetchError::storage(path, e))?;
            if read == 0 {
                break;
            }
            self.update(&buffer[..read]);
        }
        Ok(())
    }

    /// Number of bytes hashed so far.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Lowercase hex digest of everything fed so far.
    pub fn hex(&self) -> String {
        format!("{:x}", self.hasher.clone().finalize())
    }
}

/// Calculate the SHA-256 digest of a file.
///
/// Returns the raw digest and the number of bytes read.
pub fn file_digest(path: &Path) -> FetchResult<([u8; 32], u64)> {
    let mut checksum = RollingChecksum::new();
    checksum.seed_from_file(path, u64::MAX)?;
    let bytes = checksum.bytes();
    Ok((checksum.hasher.finalize().into(), bytes))
}

/// Calculate the lowercase hex SHA-256 checksum of a file.
pub fn calculate_file_checksum(path: &Path) -> FetchResult<String> {
    let (digest, _) = file_digest(path)?;
    Ok(to_hex(&digest))
}

/// Compare a computed checksum against the expected value.
///
/// Comparison ignores case and surrounding whitespace.
pub fn verify_checksum(filename: &str, expected: &str, actual: &str) -> FetchResult<()> {
    if expected.trim().eq_ignore_ascii_case(actual) {
        return Ok(());
    }
    Err(FetchError::Integrity {
        filename: filename.to_string(),
        reason: format!(
            "checksum mismatch (expected {}, got {})",
            expected.trim(),
            actual
        ),
    })
}

pub(crate) fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
