// Hash utilities for file content scanning
//
// MD5 and SHA-1 match the digests stored in EWF images and the hash lists
// investigators are usually handed; SHA-256/512 and BLAKE3 are offered for
// extraction manifests.

use std::fmt;
use std::str::FromStr;

use blake3::Hasher as Blake3Hasher;
use md5::Md5;
use serde::Serialize;
use sha1::{Digest, Sha1};
use sha2::{Sha256, Sha512};

use crate::error::EvidenceError;

// =============================================================================
// Hash Algorithm Enum
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Md5,
    Sha1,
    Sha256,
    Sha512,
    Blake3,
}

impl HashAlgorithm {
    /// Get the canonical algorithm name
    pub fn name(&self) -> &'static str {
        match self {
            HashAlgorithm::Md5 => "MD5",
            HashAlgorithm::Sha1 => "SHA-1",
            HashAlgorithm::Sha256 => "SHA-256",
            HashAlgorithm::Sha512 => "SHA-512",
            HashAlgorithm::Blake3 => "BLAKE3",
        }
    }

    /// Expected digest length in hex characters
    pub fn hash_length(&self) -> usize {
        match self {
            HashAlgorithm::Md5 => 32,
            HashAlgorithm::Sha1 => 40,
            HashAlgorithm::Sha256 => 64,
            HashAlgorithm::Sha512 => 128,
            HashAlgorithm::Blake3 => 64,
        }
    }
}

impl FromStr for HashAlgorithm {
    type Err = EvidenceError;

    fn from_str(algorithm: &str) -> Result<Self, Self::Err> {
        match algorithm.trim().to_lowercase().as_str() {
            "md5" => Ok(HashAlgorithm::Md5),
            "sha1" | "sha-1" => Ok(HashAlgorithm::Sha1),
            "sha256" | "sha-256" => Ok(HashAlgorithm::Sha256),
            "sha512" | "sha-512" => Ok(HashAlgorithm::Sha512),
            "blake3" => Ok(HashAlgorithm::Blake3),
            _ => Err(EvidenceError::InvalidArgument(format!(
                "Unsupported hash algorithm: '{}'. Supported: md5, sha1, sha256, sha512, blake3",
                algorithm
            ))),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Streaming Hasher
// =============================================================================

/// Incremental hasher over any supported algorithm
///
/// Blake3Hasher is boxed because it is far larger than the other variants.
pub enum StreamingHasher {
    Md5(Md5),
    Sha1(Sha1),
    Sha256(Sha256),
    Sha512(Sha512),
    Blake3(Box<Blake3Hasher>),
}

impl StreamingHasher {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Md5 => StreamingHasher::Md5(Md5::new()),
            HashAlgorithm::Sha1 => StreamingHasher::Sha1(Sha1::new()),
            HashAlgorithm::Sha256 => StreamingHasher::Sha256(Sha256::new()),
            HashAlgorithm::Sha512 => StreamingHasher::Sha512(Sha512::new()),
            HashAlgorithm::Blake3 => StreamingHasher::Blake3(Box::new(Blake3Hasher::new())),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            StreamingHasher::Md5(h) => Digest::update(h, data),
            StreamingHasher::Sha1(h) => Digest::update(h, data),
            StreamingHasher::Sha256(h) => Digest::update(h, data),
            StreamingHasher::Sha512(h) => Digest::update(h, data),
            StreamingHasher::Blake3(h) => {
                h.update(data);
            }
        }
    }

    /// Finalize and return the digest as lowercase hex
    pub fn finalize(self) -> String {
        match self {
            StreamingHasher::Md5(h) => hex::encode(h.finalize()),
            StreamingHasher::Sha1(h) => hex::encode(h.finalize()),
            StreamingHasher::Sha256(h) => hex::encode(h.finalize()),
            StreamingHasher::Sha512(h) => hex::encode(h.finalize()),
            StreamingHasher::Blake3(h) => h.finalize().to_hex().to_string(),
        }
    }
}

/// One-shot hash of an in-memory buffer
pub fn compute_hash(data: &[u8], algorithm: HashAlgorithm) -> String {
    let mut hasher = StreamingHasher::new(algorithm);
    hasher.update(data);
    hasher.finalize()
}

// =============================================================================
// Hash Validation Utilities
// =============================================================================

/// Validate that a string looks like a digest for the given algorithm
pub fn is_valid_hash(hash: &str, algorithm: HashAlgorithm) -> bool {
    hash.len() == algorithm.hash_length() && hash.chars().all(|c| c.is_ascii_hexdigit())
}

/// Guess the hash algorithm from a digest string based on length
pub fn guess_algorithm_from_hash(hash: &str) -> Option<HashAlgorithm> {
    if !hash.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    match hash.len() {
        32 => Some(HashAlgorithm::Md5),
        40 => Some(HashAlgorithm::Sha1),
        64 => Some(HashAlgorithm::Sha256), // Could also be BLAKE3
        128 => Some(HashAlgorithm::Sha512),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digests() {
        assert_eq!(
            compute_hash(b"abc", HashAlgorithm::Md5),
            "900150983cd24fb0d6963f7d28e17f72"
        );
        assert_eq!(
            compute_hash(b"abc", HashAlgorithm::Sha1),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
        assert_eq!(
            compute_hash(b"abc", HashAlgorithm::Sha256),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_streaming_matches_one_shot() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        for algorithm in [
            HashAlgorithm::Md5,
            HashAlgorithm::Sha1,
            HashAlgorithm::Sha512,
            HashAlgorithm::Blake3,
        ] {
            let mut hasher = StreamingHasher::new(algorithm);
            for chunk in data.chunks(777) {
                hasher.update(chunk);
            }
            let digest = hasher.finalize();
            assert_eq!(digest, compute_hash(&data, algorithm));
            assert!(is_valid_hash(&digest, algorithm));
        }
    }

    #[test]
    fn test_parse_and_guess() {
        assert_eq!("SHA-1".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Sha1);
        assert!("crc32".parse::<HashAlgorithm>().is_err());
        assert_eq!(
            guess_algorithm_from_hash("d41d8cd98f00b204e9800998ecf8427e"),
            Some(HashAlgorithm::Md5)
        );
        assert_eq!(guess_algorithm_from_hash("zz1d8cd98f00b204e9800998ecf8427e"), None);
        assert_eq!(guess_algorithm_from_hash("abc"), None);
    }
}
