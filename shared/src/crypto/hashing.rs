//! Hashing helpers for sample identity

use sha2::{Digest, Sha256};

/// Hash data using SHA-256, lowercase hex
pub fn sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
