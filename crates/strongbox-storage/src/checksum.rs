//! SHA-256 digests for detecting corruption of stored artifacts.
//!
//! This only guards the outer container bytes. Authenticity of the contents
//! comes from the GCM tag inside the payload, not from these digests.

use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Recompute the digest of `data` and compare it to `expected` verbatim.
pub fn verify(data: &[u8], expected: &str) -> bool {
    sha256_hex(data) == expected
}
