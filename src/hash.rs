//! # Hashing Primitives
//!
//! SHA-256 full hashes, the 4-byte prefixes derived from them, and the
//! 32-bit host keys used as the primary storage index.

use sha2::{Digest, Sha256};

/// Full 32-byte SHA-256 hash of a canonical URL form.
pub fn full_hash(data: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data.as_bytes());
    hasher.finalize().into()
}

/// First 4 bytes of the SHA-256 hash.
pub fn prefix(data: &str) -> [u8; 4] {
    let hash = full_hash(data);
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Host key for a host suffix: the low 4 bytes of `SHA-256("<host>/")`
/// interpreted as a little-endian u32.
pub fn host_key(host: &str) -> u32 {
    let hash = full_hash(&format!("{host}/"));
    u32::from_le_bytes([hash[0], hash[1], hash[2], hash[3]])
}
