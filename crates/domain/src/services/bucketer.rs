//! Deterministic rollout bucketing.
//!
//! Assigns an identity to a bucket in [0, 100) as a pure function of
//! (flag key, identity). The flag key is part of the hash input so the
//! same user lands in independent buckets for different flags; without
//! it, every 10% rollout would hit the same 10% of users.

use shared::hashing::stable_hash64;

/// Bucket for `identity` under `flag_key`, in [0, 100).
pub fn bucket(flag_key: &str, identity: &str) -> u8 {
    (stable_hash64(&format!("{}:{}", flag_key, identity)) % 100) as u8
}

/// Whether `identity` is inside a `percentage` rollout of `flag_key`.
///
/// `percentage` 0 never includes; 100 always includes.
pub fn included(flag_key: &str, identity: &str, percentage: u8) -> bool {
    bucket(flag_key, identity) < percentage
}
