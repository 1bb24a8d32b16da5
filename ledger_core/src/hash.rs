//! Hashing functionality using BLAKE3.

use crate::error::{Error, Result};
use serde::{Serialize, Serializer};
use std::fmt;

/// Hash digest size in bytes (BLAKE3 produces 256-bit hashes).
pub const HASH_SIZE: usize = 32;

/// A 32-byte BLAKE3 hash digest.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Hash([u8; HASH_SIZE]);

impl Hash {
    /// Create a Hash from raw bytes.
    #[cfg(test)]
    pub(crate) fn from_bytes(bytes: [u8; HASH_SIZE]) -> Self {
        Hash(bytes)
    }

    /// Create a Hash from a slice that must be exactly `HASH_SIZE` bytes long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let array: [u8; HASH_SIZE] = bytes.try_into().map_err(|_| {
            Error::decode(format!(
                "Expected {} hash bytes, got {}",
                HASH_SIZE,
                bytes.len()
            ))
        })?;
        Ok(Hash(array))
    }

    /// Create a Hash from a hex string (64 hex characters).
    #[cfg(test)]
    pub(crate) fn from_hex(hex_str: &str) -> Result<Self> {
        if hex_str.len() != HASH_SIZE * 2 {
            return Err(Error::decode(format!(
                "Expected {} hex characters, got {}",
                HASH_SIZE * 2,
                hex_str.len()
            )));
        }

        let bytes =
            hex::decode(hex_str).map_err(|e| Error::decode(format!("Invalid hex: {}", e)))?;

        Self::from_slice(&bytes)
    }

    /// Convert to hex string (64 characters).
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    /// Hash raw bytes using BLAKE3.
    pub fn hash_bytes(data: &[u8]) -> Self {
        let hash = blake3::hash(data);
        Hash(*hash.as_bytes())
    }

    /// Hash a sequence of fields, each prefixed with its length.
    ///
    /// The length prefix keeps `["ab", "c"]` and `["a", "bc"]` apart.
    pub fn hash_length_prefixed(parts: &[&[u8]]) -> Self {
        let mut hasher = blake3::Hasher::new();
        for part in parts {
            hasher.update(&(part.len() as u64).to_le_bytes());
            hasher.update(part);
        }
        Hash(*hasher.finalize().as_bytes())
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.to_hex())
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_hello_world() {
        let hash = Hash::hash_bytes(b"hello world");

        // BLAKE3 of "hello world"
        assert_eq!(
            hash.to_hex(),
            "d74981efa70a0c880b8d8c1985d075dbcbf679b99a5f9914e5aaf96b831a9e24"
        );
    }

    #[test]
    fn test_hash_from_hex_invalid() {
        assert!(Hash::from_hex("abcd").is_err());
        assert!(Hash::from_hex("").is_err());
        assert!(Hash::from_hex(&"z".repeat(64)).is_err());
    }

    #[test]
    fn test_from_slice_wrong_length() {
        assert!(Hash::from_slice(&[0u8; 31]).is_err());
        assert!(Hash::from_slice(&[0u8; 33]).is_err());
        assert!(Hash::from_slice(&[7u8; 32]).is_ok());
    }

    #[test]
    fn test_length_prefixed_separates_fields() {
        let a = Hash::hash_length_prefixed(&[b"ab", b"c"]);
        let b = Hash::hash_length_prefixed(&[b"a", b"bc"]);
        assert_ne!(a, b);
        assert_eq!(a, Hash::hash_length_prefixed(&[b"ab", b"c"]));
    }

    #[test]
    fn test_serialize_as_hex() {
        let hash = Hash::hash_bytes(b"test");
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{}\"", hash.to_hex()));
    }

    // Property-based tests
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            max_shrink_iters: 10000,
            ..ProptestConfig::default()
        })]

        /// Hashing the same data always produces the same hash
        #[test]
        fn prop_hash_deterministic(data: Vec<u8>) {
            prop_assert_eq!(Hash::hash_bytes(&data), Hash::hash_bytes(&data));
        }

        /// Round-trip through hex preserves the hash
        #[test]
        fn prop_hex_roundtrip(bytes in prop::array::uniform32(any::<u8>())) {
            let hash = Hash::from_bytes(bytes);
            let parsed = Hash::from_hex(&hash.to_hex())?;
            prop_assert_eq!(hash, parsed);
        }
    }
}
