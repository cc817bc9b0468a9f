//! Stable hashing utilities.
//!
//! Rollout bucketing requires a hash that is stable across processes,
//! restarts and architectures, so `std::hash` (randomly seeded) is not
//! usable here. SHA-256 is overkill for distribution quality but is
//! already in the dependency tree and trivially stable.

use sha2::{Digest, Sha256};

/// Computes a stable 64-bit fingerprint of the input.
///
/// Takes the first 8 bytes of the SHA-256 digest, big-endian. The same
/// input always produces the same value, on every host.
pub fn stable_hash64(input: &str) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}
