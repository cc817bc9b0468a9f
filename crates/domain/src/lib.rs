//! Domain layer for the Flagship backend.
//!
//! This crate contains:
//! - Domain models (flags, targeting rules, overrides, protection state)
//! - The flag evaluation engine and registration protection services
//! - Store traits implemented by the persistence crate
//! - Domain error types

pub mod error;
pub mod models;
pub mod services;
pub mod stores;

pub use error::DomainError;
