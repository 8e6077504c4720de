//! Incremental checksums and hashes.
//!
//! Every [`Digest`] is also an [`Observer`](crate::tap::Observer), so any of
//! them can sit in a tap and hash a stream as it flows past.

use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::Digest as _;

use crate::error::StreamResult;
use crate::file::FileSource;
use crate::stream::{Source, Transfer};

/// Chunk size used by [`Digest::compute_file`].
pub const FILE_DIGEST_CHUNK: usize = 16 * 1024;

/// A 32-byte digest value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DigestBytes(pub [u8; 32]);

impl DigestBytes {
    /// Lowercase hex string.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Display for DigestBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// An incremental digest.
pub trait Digest: Default {
    /// Result type.
    type Output;

    /// Feeds more bytes.
    fn update(&mut self, data: &[u8]);

    /// Digest of everything fed so far; does not disturb the state.
    fn get(&self) -> Self::Output;

    /// Returns to the initial state.
    fn reset(&mut self) {
        *self = Self::default();
    }

    /// One-shot digest of `data`.
    fn compute(data: &[u8]) -> Self::Output {
        let mut digest = Self::default();
        digest.update(data);
        digest.get()
    }

    /// Digest of a whole file, read in 16 KiB chunks.
    fn compute_file(path: impl AsRef<Path>) -> StreamResult<Self::Output> {
        let mut source = FileSource::open(path)?;
        let mut digest = Self::default();
        let mut chunk = vec![0u8; FILE_DIGEST_CHUNK];
        loop {
            match source.read(&mut chunk)? {
                Transfer::Bytes(n) => digest.update(&chunk[..n]),
                Transfer::EndOfStream => return Ok(digest.get()),
            }
        }
    }
}

/// CRC-32 (IEEE).
#[derive(Debug, Clone, Default)]
pub struct Crc32(crc32fast::Hasher);

impl Digest for Crc32 {
    type Output = u32;

    fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    fn get(&self) -> u32 {
        self.0.clone().finalize()
    }
}

/// SHA-256.
#[derive(Debug, Clone, Default)]
pub struct Sha256(sha2::Sha256);

impl Digest for Sha256 {
    type Output = DigestBytes;

    fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    fn get(&self) -> DigestBytes {
        DigestBytes(self.0.clone().finalize().into())
    }
}

/// BLAKE3.
#[derive(Debug, Clone, Default)]
pub struct Blake3(blake3::Hasher);

impl Digest for Blake3 {
    type Output = DigestBytes;

    fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    fn get(&self) -> DigestBytes {
        DigestBytes(*self.0.finalize().as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc32_known_value() {
        assert_eq!(Crc32::compute(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn test_sha256_empty() {
        assert_eq!(
            Sha256::compute(b"").to_hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_sha256_abc() {
        assert_eq!(
            Sha256::compute(b"abc").to_string(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_blake3_matches_crate() {
        let expected = blake3::hash(b"streaming");
        assert_eq!(Blake3::compute(b"streaming").as_bytes(), expected.as_bytes());
    }

    #[test]
    fn test_incremental_equals_one_shot() {
        let mut d = Sha256::default();
        d.update(b"hello ");
        let partial = d.get();
        d.update(b"world");
        assert_eq!(d.get(), Sha256::compute(b"hello world"));
        assert_eq!(partial, Sha256::compute(b"hello "));
    }

    #[test]
    fn test_reset() {
        let mut d = Crc32::default();
        d.update(b"junk");
        d.reset();
        d.update(b"123456789");
        assert_eq!(d.get(), 0xCBF4_3926);
    }

    #[test]
    fn test_compute_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob.bin");
        let data: Vec<u8> = (0..40_000u32).map(|i| (i * 7 % 256) as u8).collect();
        std::fs::write(&path, &data).unwrap();
        assert_eq!(Blake3::compute_file(&path).unwrap(), Blake3::compute(&data));
        assert_eq!(Crc32::compute_file(&path).unwrap(), Crc32::compute(&data));
    }

    #[test]
    fn test_compute_file_missing() {
        let err = Crc32::compute_file("/nonexistent/tbx/blob").unwrap_err();
        assert!(err.is_not_found());
    }
}
