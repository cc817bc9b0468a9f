//! Shared utilities and common types for the Flagship backend.
//!
//! This crate provides common functionality used across all other crates:
//! - Stable hashing (rollout bucketing, key fingerprints)
//! - Common validation logic

pub mod hashing;
pub mod validation;
