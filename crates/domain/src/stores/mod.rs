//! Store traits (ports) implemented by the persistence crate and by the
//! in-memory implementations used for tests and single-instance
//! deployments.
//!
//! The protection logic deliberately talks to an abstract counter store
//! so the same code defends a single process or a fleet of instances
//! sharing an external store.

mod memory;

pub use memory::{InMemoryAuditSink, InMemoryCounterStore, InMemoryFlagStore};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::DomainError;
use crate::models::{
    CreateAuditRecordInput, FlagDefinition, FlagHistoryEntry, FlagOverride, RegistrationAttempt,
};

/// Authoritative, versioned store of flag definitions, overrides and
/// history.
#[async_trait]
pub trait FlagStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<FlagDefinition>, DomainError>;

    async fn list(&self, category: Option<&str>) -> Result<Vec<FlagDefinition>, DomainError>;

    /// Inserts a new flag; fails with `Validation` on duplicate key.
    async fn insert(&self, flag: &FlagDefinition) -> Result<(), DomainError>;

    /// Replaces an existing flag definition; fails with `NotFound` when
    /// the key does not exist.
    async fn put(&self, flag: &FlagDefinition) -> Result<(), DomainError>;

    async fn set_override(&self, ovr: &FlagOverride) -> Result<(), DomainError>;

    async fn remove_override(&self, flag_id: Uuid, override_id: Uuid) -> Result<(), DomainError>;

    async fn overrides_for(&self, flag_id: Uuid) -> Result<Vec<FlagOverride>, DomainError>;

    /// Appends a history entry. History is append-only.
    async fn record_history(&self, entry: &FlagHistoryEntry) -> Result<(), DomainError>;

    /// History entries for a flag, newest first.
    async fn history(&self, flag_id: Uuid) -> Result<Vec<FlagHistoryEntry>, DomainError>;

    async fn get_history_entry(&self, id: Uuid) -> Result<Option<FlagHistoryEntry>, DomainError>;
}

/// Domain-level allow/deny policy for email domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainPolicy {
    Allow,
    Deny,
}

/// Sliding-window counters, block lists and attempt records backing
/// registration protection. All counter operations must be atomic under
/// concurrent bursts from the same IP.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically records an attempt timestamp for `ip` and returns the
    /// number of attempts at or after `window_start`, including this one.
    /// Entries older than the window may be pruned.
    async fn record_and_count(
        &self,
        ip: &str,
        at: DateTime<Utc>,
        window_start: DateTime<Utc>,
    ) -> Result<u32, DomainError>;

    async fn block_ip(&self, ip: &str, until: DateTime<Utc>) -> Result<(), DomainError>;

    /// Expiry of an active block on `ip`, if any. Expired blocks are
    /// treated as absent.
    async fn blocked_until(&self, ip: &str, now: DateTime<Utc>)
        -> Result<Option<DateTime<Utc>>, DomainError>;

    async fn unblock_ip(&self, ip: &str) -> Result<(), DomainError>;

    async fn domain_policy(&self, domain: &str) -> Result<Option<DomainPolicy>, DomainError>;

    async fn set_domain_policy(
        &self,
        domain: &str,
        policy: DomainPolicy,
    ) -> Result<(), DomainError>;

    async fn remove_domain_policy(&self, domain: &str) -> Result<(), DomainError>;

    /// Records a finished attempt (with outcome) for metrics.
    async fn log_attempt(&self, attempt: &RegistrationAttempt) -> Result<(), DomainError>;

    /// Attempts recorded at or after `since`, for on-demand metrics.
    async fn attempts_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<RegistrationAttempt>, DomainError>;
}

/// Structured audit sink. Failures are the caller's to handle; mutating
/// flows treat a failed audit write as non-fatal but logged.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, input: CreateAuditRecordInput) -> Result<(), DomainError>;
}
