// SPDX-License-Identifier: MIT
//! 64-bit content checksums
//!
//! Entries and the metadata frame both carry a 64-bit checksum of their
//! uncompressed content. The value is the first 8 bytes of the SHA-256
//! digest, read little-endian.

use sha2::{Digest, Sha256};

/// Compute the 64-bit checksum of `data`.
pub fn content_checksum(data: &[u8]) -> u64 {
    let digest = Sha256::digest(data);
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(prefix)
}

/// Render a checksum the way it is shown in listings.
pub fn checksum_hex(checksum: u64) -> String {
    hex::encode(checksum.to_le_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_is_deterministic() {
        assert_eq!(content_checksum(b"hello"), content_checksum(b"hello"));
        assert_ne!(content_checksum(b"hello"), content_checksum(b"hellp"));
    }

    #[test]
    fn test_checksum_matches_sha256_prefix() {
        // sha256("") = e3b0c44298fc1c14...
        assert_eq!(checksum_hex(content_checksum(b"")), "e3b0c44298fc1c14");
    }
}
