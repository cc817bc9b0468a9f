//! In-memory store implementations.
//!
//! Used by tests and by single-instance deployments that do not need a
//! shared external store. All state is owned by the instance; nothing
//! is module-level.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::error::DomainError;
use crate::models::{
    CreateAuditRecordInput, FlagDefinition, FlagHistoryEntry, FlagOverride, RegistrationAttempt,
};
use crate::stores::{AuditSink, CounterStore, DomainPolicy, FlagStore};

/// In-memory `FlagStore`.
#[derive(Default)]
pub struct InMemoryFlagStore {
    inner: Mutex<FlagStoreState>,
}

#[derive(Default)]
struct FlagStoreState {
    flags: HashMap<String, FlagDefinition>,
    overrides: HashMap<Uuid, Vec<FlagOverride>>,
    history: Vec<FlagHistoryEntry>,
}

impl InMemoryFlagStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FlagStoreState> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl FlagStore for InMemoryFlagStore {
    async fn get(&self, key: &str) -> Result<Option<FlagDefinition>, DomainError> {
        Ok(self.lock().flags.get(key).cloned())
    }

    async fn list(&self, category: Option<&str>) -> Result<Vec<FlagDefinition>, DomainError> {
        let state = self.lock();
        let mut flags: Vec<_> = state
            .flags
            .values()
            .filter(|f| category.is_none() || f.category.as_deref() == category)
            .cloned()
            .collect();
        flags.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(flags)
    }

    async fn insert(&self, flag: &FlagDefinition) -> Result<(), DomainError> {
        let mut state = self.lock();
        if state.flags.contains_key(&flag.key) {
            return Err(DomainError::validation(format!(
                "Flag '{}' already exists",
                flag.key
            )));
        }
        state.flags.insert(flag.key.clone(), flag.clone());
        Ok(())
    }

    async fn put(&self, flag: &FlagDefinition) -> Result<(), DomainError> {
        let mut state = self.lock();
        if !state.flags.contains_key(&flag.key) {
            return Err(DomainError::not_found(format!("flag '{}'", flag.key)));
        }
        state.flags.insert(flag.key.clone(), flag.clone());
        Ok(())
    }

    async fn set_override(&self, ovr: &FlagOverride) -> Result<(), DomainError> {
        let mut state = self.lock();
        let overrides = state.overrides.entry(ovr.flag_id).or_default();
        // One override per (target_type, target_id); replace on repeat.
        overrides
            .retain(|o| !(o.target_type == ovr.target_type && o.target_id == ovr.target_id));
        overrides.push(ovr.clone());
        Ok(())
    }

    async fn remove_override(&self, flag_id: Uuid, override_id: Uuid) -> Result<(), DomainError> {
        let mut state = self.lock();
        let overrides = state
            .overrides
            .get_mut(&flag_id)
            .ok_or_else(|| DomainError::not_found(format!("override {}", override_id)))?;
        let before = overrides.len();
        overrides.retain(|o| o.id != override_id);
        if overrides.len() == before {
            return Err(DomainError::not_found(format!("override {}", override_id)));
        }
        Ok(())
    }

    async fn overrides_for(&self, flag_id: Uuid) -> Result<Vec<FlagOverride>, DomainError> {
        Ok(self.lock().overrides.get(&flag_id).cloned().unwrap_or_default())
    }

    async fn record_history(&self, entry: &FlagHistoryEntry) -> Result<(), DomainError> {
        self.lock().history.push(entry.clone());
        Ok(())
    }

    async fn history(&self, flag_id: Uuid) -> Result<Vec<FlagHistoryEntry>, DomainError> {
        let state = self.lock();
        let mut entries: Vec<_> = state
            .history
            .iter()
            .filter(|e| e.flag_id == flag_id)
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.version.cmp(&a.version));
        Ok(entries)
    }

    async fn get_history_entry(&self, id: Uuid) -> Result<Option<FlagHistoryEntry>, DomainError> {
        Ok(self.lock().history.iter().find(|e| e.id == id).cloned())
    }
}

/// In-memory `CounterStore` with a true rolling window per IP.
#[derive(Default)]
pub struct InMemoryCounterStore {
    inner: Mutex<CounterState>,
}

#[derive(Default)]
struct CounterState {
    windows: HashMap<String, Vec<DateTime<Utc>>>,
    blocks: HashMap<String, DateTime<Utc>>,
    domain_policies: HashMap<String, DomainPolicy>,
    attempts: Vec<RegistrationAttempt>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CounterState> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn record_and_count(
        &self,
        ip: &str,
        at: DateTime<Utc>,
        window_start: DateTime<Utc>,
    ) -> Result<u32, DomainError> {
        let mut state = self.lock();
        let window = state.windows.entry(ip.to_string()).or_default();
        window.push(at);
        // Continuous aging: drop entries that fell out of the window.
        window.retain(|ts| *ts >= window_start);
        let count = window.len() as u32;
        // Sweep fully aged-out windows so the map does not grow with
        // every ip ever seen.
        state.windows.retain(|_, window| {
            window.retain(|ts| *ts >= window_start);
            !window.is_empty()
        });
        Ok(count)
    }

    async fn block_ip(&self, ip: &str, until: DateTime<Utc>) -> Result<(), DomainError> {
        self.lock().blocks.insert(ip.to_string(), until);
        Ok(())
    }

    async fn blocked_until(
        &self,
        ip: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, DomainError> {
        let mut state = self.lock();
        match state.blocks.get(ip).copied() {
            Some(until) if until > now => Ok(Some(until)),
            Some(_) => {
                state.blocks.remove(ip);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn unblock_ip(&self, ip: &str) -> Result<(), DomainError> {
        self.lock().blocks.remove(ip);
        Ok(())
    }

    async fn domain_policy(&self, domain: &str) -> Result<Option<DomainPolicy>, DomainError> {
        Ok(self.lock().domain_policies.get(domain).copied())
    }

    async fn set_domain_policy(
        &self,
        domain: &str,
        policy: DomainPolicy,
    ) -> Result<(), DomainError> {
        self.lock()
            .domain_policies
            .insert(domain.to_ascii_lowercase(), policy);
        Ok(())
    }

    async fn remove_domain_policy(&self, domain: &str) -> Result<(), DomainError> {
        self.lock().domain_policies.remove(domain);
        Ok(())
    }

    async fn log_attempt(&self, attempt: &RegistrationAttempt) -> Result<(), DomainError> {
        self.lock().attempts.push(attempt.clone());
        Ok(())
    }

    async fn attempts_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<RegistrationAttempt>, DomainError> {
        Ok(self
            .lock()
            .attempts
            .iter()
            .filter(|a| a.timestamp >= since)
            .cloned()
            .collect())
    }
}

/// In-memory audit sink; tests inspect recorded entries.
#[derive(Default)]
pub struct InMemoryAuditSink {
    records: Mutex<Vec<CreateAuditRecordInput>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<CreateAuditRecordInput> {
        match self.records.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn record(&self, input: CreateAuditRecordInput) -> Result<(), DomainError> {
        match self.records.lock() {
            Ok(mut guard) => guard.push(input),
            Err(poisoned) => poisoned.into_inner().push(input),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FlagType, FlagValue};
    use chrono::Duration;

    fn sample_flag(key: &str) -> FlagDefinition {
        let now = Utc::now();
        FlagDefinition {
            id: Uuid::new_v4(),
            key: key.to_string(),
            name: key.to_string(),
            description: None,
            flag_type: FlagType::Boolean,
            default_value: FlagValue::Bool(false),
            enabled: true,
            is_system_wide: false,
            category: Some("test".to_string()),
            rollout_percentage: None,
            targeting_rules: vec![],
            start_date: None,
            end_date: None,
            archived: false,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_flag_store_insert_and_get() {
        let store = InMemoryFlagStore::new();
        let flag = sample_flag("flag-a");
        store.insert(&flag).await.unwrap();

        let loaded = store.get("flag-a").await.unwrap().unwrap();
        assert_eq!(loaded.id, flag.id);
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_flag_store_duplicate_key_rejected() {
        let store = InMemoryFlagStore::new();
        store.insert(&sample_flag("dup")).await.unwrap();
        assert!(store.insert(&sample_flag("dup")).await.is_err());
    }

    #[tokio::test]
    async fn test_flag_store_put_requires_existing() {
        let store = InMemoryFlagStore::new();
        assert!(store.put(&sample_flag("ghost")).await.is_err());
    }

    #[tokio::test]
    async fn test_flag_store_list_by_category() {
        let store = InMemoryFlagStore::new();
        let mut a = sample_flag("a-flag");
        a.category = Some("billing".to_string());
        store.insert(&a).await.unwrap();
        store.insert(&sample_flag("b-flag")).await.unwrap();

        let billing = store.list(Some("billing")).await.unwrap();
        assert_eq!(billing.len(), 1);
        assert_eq!(billing[0].key, "a-flag");

        let all = store.list(None).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_override_replaces_same_target() {
        let store = InMemoryFlagStore::new();
        let flag_id = Uuid::new_v4();
        let mut ovr = FlagOverride {
            id: Uuid::new_v4(),
            flag_id,
            target_type: crate::models::OverrideTargetType::User,
            target_id: "user-1".to_string(),
            enabled: true,
            reason: "r".to_string(),
            created_by: "a".to_string(),
            created_at: Utc::now(),
        };
        store.set_override(&ovr).await.unwrap();

        ovr.id = Uuid::new_v4();
        ovr.enabled = false;
        store.set_override(&ovr).await.unwrap();

        let overrides = store.overrides_for(flag_id).await.unwrap();
        assert_eq!(overrides.len(), 1);
        assert!(!overrides[0].enabled);
    }

    #[tokio::test]
    async fn test_history_newest_first() {
        let store = InMemoryFlagStore::new();
        let mut flag = sample_flag("hist");
        let e1 = FlagHistoryEntry::record(&flag, "v1", "a", Utc::now());
        flag.version = 2;
        let e2 = FlagHistoryEntry::record(&flag, "v2", "a", Utc::now());
        store.record_history(&e1).await.unwrap();
        store.record_history(&e2).await.unwrap();

        let history = store.history(flag.id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].version, 2);

        let fetched = store.get_history_entry(e1.id).await.unwrap().unwrap();
        assert_eq!(fetched.version, 1);
    }

    #[tokio::test]
    async fn test_rolling_window_count() {
        let store = InMemoryCounterStore::new();
        let now = Utc::now();
        let window_start = now - Duration::minutes(15);

        for i in 0..3 {
            let at = now - Duration::minutes(i);
            let count = store.record_and_count("1.2.3.4", at, window_start).await.unwrap();
            assert_eq!(count, i as u32 + 1);
        }

        // An attempt far in the past ages out immediately.
        let stale = now - Duration::minutes(30);
        let count = store.record_and_count("1.2.3.4", stale, window_start).await.unwrap();
        assert_eq!(count, 3);
    }

    #[tokio::test]
    async fn test_aged_out_ips_leave_the_window_map() {
        let store = InMemoryCounterStore::new();
        let now = Utc::now();

        // Many distinct ips, all older than the current window.
        let old_window_start = now - Duration::minutes(45);
        for i in 0..50u8 {
            let at = now - Duration::minutes(30);
            store
                .record_and_count(&format!("10.0.0.{}", i), at, old_window_start)
                .await
                .unwrap();
        }
        assert_eq!(store.lock().windows.len(), 50);

        // One fresh attempt sweeps every stale ip out of the map.
        let window_start = now - Duration::minutes(15);
        let count = store
            .record_and_count("192.0.2.1", now, window_start)
            .await
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(store.lock().windows.len(), 1);
    }

    #[tokio::test]
    async fn test_block_expiry() {
        let store = InMemoryCounterStore::new();
        let now = Utc::now();
        store
            .block_ip("9.9.9.9", now + Duration::minutes(5))
            .await
            .unwrap();
        assert!(store.blocked_until("9.9.9.9", now).await.unwrap().is_some());
        // After expiry the block is gone.
        assert!(store
            .blocked_until("9.9.9.9", now + Duration::minutes(6))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_unblock() {
        let store = InMemoryCounterStore::new();
        let now = Utc::now();
        store
            .block_ip("8.8.8.8", now + Duration::hours(1))
            .await
            .unwrap();
        store.unblock_ip("8.8.8.8").await.unwrap();
        assert!(store.blocked_until("8.8.8.8", now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_domain_policies() {
        let store = InMemoryCounterStore::new();
        store
            .set_domain_policy("mailinator.com", DomainPolicy::Deny)
            .await
            .unwrap();
        assert_eq!(
            store.domain_policy("mailinator.com").await.unwrap(),
            Some(DomainPolicy::Deny)
        );
        store.remove_domain_policy("mailinator.com").await.unwrap();
        assert_eq!(store.domain_policy("mailinator.com").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_attempts_since_filters_by_time() {
        let store = InMemoryCounterStore::new();
        let now = Utc::now();
        let old = RegistrationAttempt {
            ip: "1.1.1.1".to_string(),
            email_domain: None,
            timestamp: now - Duration::days(2),
            outcome: crate::models::AttemptOutcome::Allowed,
            suspicion_score: 0.0,
        };
        let recent = RegistrationAttempt {
            timestamp: now,
            ..old.clone()
        };
        store.log_attempt(&old).await.unwrap();
        store.log_attempt(&recent).await.unwrap();

        let attempts = store
            .attempts_since(now - Duration::hours(24))
            .await
            .unwrap();
        assert_eq!(attempts.len(), 1);
    }
}
