// SHA-256 hashing utilities

use sha2::{Digest, Sha256};

/// Computes the SHA-256 hash of the input bytes and returns it as a lowercase hex string.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let result = hasher.finalize();
    hex::encode(result)
}
