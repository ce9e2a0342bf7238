// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 etlflow contributors

//! Content hashing for idempotency keys
//!
//! Uses BLAKE3 for fast, stable hashing.

use blake3::Hasher;

/// Compute a quick hash of a string
pub fn hash_string(s: &str) -> String {
    hash_bytes(s.as_bytes())
}

/// Hash of an in-memory artifact, as lowercase hex
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Hasher::new();
    hasher.update(bytes);
    hasher.finalize().to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_string() {
        let hash1 = hash_string("hello");
        let hash2 = hash_string("hello");
        let hash3 = hash_string("world");

        assert_eq!(hash1, hash2);
        assert_ne!(hash1, hash3);
    }

    #[test]
    fn test_hash_bytes_matches_string_hash() {
        let csv = b"id,name\n1,ana\n";

        assert_eq!(hash_bytes(csv), hash_string("id,name\n1,ana\n"));
        assert_eq!(hash_bytes(csv).len(), 64);
        assert_ne!(hash_bytes(csv), hash_bytes(b"id,name\n"));
    }
}
