//! Content hashing over full payloads.
//!
//! Hashing is a gating step: when duplicate detection is on, the sha256 is
//! needed before any engine is invoked.

use sha1::Digest;
use sonde_protocol::FileHashes;

/// Compute md5/sha1/sha256/crc32 over a payload.
pub fn hash_bytes(data: &[u8]) -> FileHashes {
    let md5 = format!("{:x}", md5::compute(data));

    let mut sha1_hasher = sha1::Sha1::new();
    sha1_hasher.update(data);
    let sha1 = format!("{:x}", sha1_hasher.finalize());

    let mut sha256_hasher = sha2::Sha256::new();
    sha256_hasher.update(data);
    let sha256 = format!("{:x}", sha256_hasher.finalize());

    let crc32 = format!("{:08x}", crc32fast::hash(data));

    FileHashes {
        md5,
        sha1,
        sha256,
        crc32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vectors_for_empty_input() {
        let hashes = hash_bytes(b"");
        assert_eq!(hashes.md5, "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(hashes.sha1, "da39a3ee5e6b4b0d3255bfef95601890afd80709");
        assert_eq!(
            hashes.sha256,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(hashes.crc32, "00000000");
    }

    #[test]
    fn test_known_vectors_for_abc() {
        let hashes = hash_bytes(b"abc");
        assert_eq!(hashes.md5, "900150983cd24fb0d6963f7d28e17f72");
        assert_eq!(hashes.sha1, "a9993e364706816aba3e25717850c26c9cd0d89d");
        assert_eq!(
            hashes.sha256,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        // CRC32 of "abc"
        assert_eq!(hashes.crc32, "352441c2");
    }

    #[test]
    fn test_crc32_is_zero_padded() {
        // Any payload whose crc32 has leading zeros keeps 8 digits.
        let hashes = hash_bytes(b"");
        assert_eq!(hashes.crc32.len(), 8);
    }

    #[test]
    fn test_identical_payloads_hash_identically() {
        assert_eq!(hash_bytes(b"sonde"), hash_bytes(b"sonde"));
        assert_ne!(hash_bytes(b"sonde").sha256, hash_bytes(b"sondes").sha256);
    }
}
