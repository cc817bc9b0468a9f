//! Flag evaluation engine.
//!
//! One instance owns the cache and the per-flag evaluation stats. The
//! read path (`evaluate`) is infallible: a missing flag or an
//! unavailable store degrades to the caller's fallback instead of
//! erroring. The write path is strict: every mutation requires a
//! reason, records a history snapshot, and invalidates the cache
//! before returning.

use chrono::{DateTime, Utc};
use metrics::counter;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::DomainError;
use crate::models::{
    AuditAction, CreateFlagInput, EvaluationContext, EvaluationReason, EvaluationResult,
    FlagChanges, FlagDefinition, FlagHistoryEntry, FlagOverride, FlagValue, RuleOutcome,
    SetOverrideInput,
};
use crate::services::audit::AuditRecordBuilder;
use crate::services::cache::{CachedFlag, CategoryListing, FlagCache};
use crate::services::{bucketer, rules};
use crate::stores::{AuditSink, FlagStore};

/// Per-flag evaluation counters, grouped by reason.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct FlagStats {
    pub evaluations: u64,
    pub by_reason: HashMap<String, u64>,
    pub last_evaluated_at: Option<DateTime<Utc>>,
}

pub struct FlagEvaluationEngine {
    store: Arc<dyn FlagStore>,
    audit: Arc<dyn AuditSink>,
    cache: FlagCache,
    stats: Mutex<HashMap<String, FlagStats>>,
}

impl FlagEvaluationEngine {
    pub fn new(store: Arc<dyn FlagStore>, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            store,
            audit,
            cache: FlagCache::new(),
            stats: Mutex::new(HashMap::new()),
        }
    }

    // --- read path ---

    /// Evaluates `flag_key` for `ctx`. Never errors: an unknown flag
    /// returns `fallback` (default `false`) with reason `not_found`, and
    /// a store failure degrades to `fallback` with reason `default`.
    pub async fn evaluate(
        &self,
        flag_key: &str,
        ctx: &EvaluationContext,
        fallback: Option<FlagValue>,
    ) -> EvaluationResult {
        let fallback = fallback.unwrap_or(FlagValue::Bool(false));

        let cached = match self.load(flag_key).await {
            Ok(Some(cached)) => cached,
            Ok(None) => {
                let result = EvaluationResult::not_found(flag_key, fallback);
                self.note_evaluation(flag_key, result.reason);
                return result;
            }
            Err(err) => {
                warn!(flag_key, error = %err, "flag store unavailable, serving fallback");
                // `enabled` follows the fallback's truthiness, same as
                // the not-found path.
                let result =
                    EvaluationResult::new(flag_key, fallback, EvaluationReason::Default, None);
                self.note_evaluation(flag_key, result.reason);
                return result;
            }
        };

        let result = decide(&cached, ctx);
        self.note_evaluation(flag_key, result.reason);
        result
    }

    /// Evaluates several flags for the same context.
    pub async fn evaluate_many(
        &self,
        flag_keys: &[String],
        ctx: &EvaluationContext,
    ) -> Vec<EvaluationResult> {
        let mut results = Vec::with_capacity(flag_keys.len());
        for key in flag_keys {
            results.push(self.evaluate(key, ctx, None).await);
        }
        results
    }

    /// All non-archived flags grouped by category, served from the
    /// listing cache.
    pub async fn flags_by_category(&self) -> Result<Arc<CategoryListing>, DomainError> {
        if let Some(listing) = self.cache.listing() {
            return Ok(listing);
        }
        let flags = self.store.list(None).await?;
        let active = flags.into_iter().filter(|f| !f.archived).collect();
        Ok(self.cache.put_listing(active))
    }

    pub async fn list_flags(
        &self,
        category: Option<&str>,
    ) -> Result<Vec<FlagDefinition>, DomainError> {
        self.store.list(category).await
    }

    /// Authoritative read, straight from the store.
    pub async fn get_flag(&self, flag_key: &str) -> Result<FlagDefinition, DomainError> {
        self.store
            .get(flag_key)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("flag '{}'", flag_key)))
    }

    pub async fn overrides(&self, flag_key: &str) -> Result<Vec<FlagOverride>, DomainError> {
        let flag = self.get_flag(flag_key).await?;
        self.store.overrides_for(flag.id).await
    }

    pub async fn history(&self, flag_key: &str) -> Result<Vec<FlagHistoryEntry>, DomainError> {
        let flag = self.get_flag(flag_key).await?;
        self.store.history(flag.id).await
    }

    // --- write path ---

    pub async fn create_flag(
        &self,
        input: CreateFlagInput,
        reason: &str,
        actor: &str,
    ) -> Result<FlagDefinition, DomainError> {
        let reason = required_reason(reason)?;
        let now = Utc::now();
        let flag = input.into_definition(now)?;

        self.store.insert(&flag).await?;
        self.store
            .record_history(&FlagHistoryEntry::record(&flag, &reason, actor, now))
            .await?;
        self.cache.invalidate_listing();

        self.record_audit(
            AuditRecordBuilder::actor(actor, AuditAction::FlagCreate)
                .on_resource(&flag.key)
                .with_reason(&reason)
                .build(),
        )
        .await;
        debug!(flag_key = %flag.key, actor, "flag created");
        Ok(flag)
    }

    pub async fn update_flag(
        &self,
        flag_key: &str,
        changes: FlagChanges,
        reason: &str,
        actor: &str,
    ) -> Result<FlagDefinition, DomainError> {
        let reason = required_reason(reason)?;
        if changes.is_empty() {
            return Err(DomainError::validation("No changes supplied"));
        }

        let current = self.get_flag(flag_key).await?;
        if current.archived {
            return Err(DomainError::validation(
                "Archived flags cannot be updated; roll back to a prior version instead",
            ));
        }

        let now = Utc::now();
        let updated = changes.apply_to(&current, now)?;
        self.store.put(&updated).await?;
        self.store
            .record_history(&FlagHistoryEntry::record(&updated, &reason, actor, now))
            .await?;
        self.cache.invalidate(flag_key);
        self.cache.invalidate_listing();

        self.record_audit(
            AuditRecordBuilder::actor(actor, AuditAction::FlagUpdate)
                .on_resource(flag_key)
                .with_reason(&reason)
                .with_change(
                    "version",
                    json!(current.version),
                    json!(updated.version),
                )
                .build(),
        )
        .await;
        Ok(updated)
    }

    pub async fn archive_flag(
        &self,
        flag_key: &str,
        reason: &str,
        actor: &str,
    ) -> Result<FlagDefinition, DomainError> {
        let reason = required_reason(reason)?;
        let current = self.get_flag(flag_key).await?;
        if current.archived {
            return Err(DomainError::validation("Flag is already archived"));
        }

        let now = Utc::now();
        let mut archived = current;
        archived.archived = true;
        archived.version += 1;
        archived.updated_at = now;

        self.store.put(&archived).await?;
        self.store
            .record_history(&FlagHistoryEntry::record(&archived, &reason, actor, now))
            .await?;
        self.cache.invalidate(flag_key);
        self.cache.invalidate_listing();

        self.record_audit(
            AuditRecordBuilder::actor(actor, AuditAction::FlagArchive)
                .on_resource(flag_key)
                .with_reason(&reason)
                .build(),
        )
        .await;
        Ok(archived)
    }

    pub async fn set_override(
        &self,
        flag_key: &str,
        input: SetOverrideInput,
        actor: &str,
    ) -> Result<FlagOverride, DomainError> {
        input.validate()?;
        let flag = self.get_flag(flag_key).await?;

        let ovr = FlagOverride {
            id: Uuid::new_v4(),
            flag_id: flag.id,
            target_type: input.target_type,
            target_id: input.target_id,
            enabled: input.enabled,
            reason: input.reason.clone(),
            created_by: actor.to_string(),
            created_at: Utc::now(),
        };
        self.store.set_override(&ovr).await?;
        self.cache.invalidate(flag_key);

        self.record_audit(
            AuditRecordBuilder::actor(actor, AuditAction::OverrideSet)
                .on_resource(flag_key)
                .with_reason(&input.reason)
                .with_details(json!({
                    "target_type": ovr.target_type.as_str(),
                    "target_id": ovr.target_id,
                    "enabled": ovr.enabled,
                }))
                .build(),
        )
        .await;
        Ok(ovr)
    }

    pub async fn remove_override(
        &self,
        flag_key: &str,
        override_id: Uuid,
        reason: &str,
        actor: &str,
    ) -> Result<(), DomainError> {
        let reason = required_reason(reason)?;
        let flag = self.get_flag(flag_key).await?;

        self.store.remove_override(flag.id, override_id).await?;
        self.cache.invalidate(flag_key);

        self.record_audit(
            AuditRecordBuilder::actor(actor, AuditAction::OverrideRemove)
                .on_resource(flag_key)
                .with_reason(&reason)
                .with_details(json!({ "override_id": override_id }))
                .build(),
        )
        .await;
        Ok(())
    }

    /// Restores a flag to the definition captured in a history entry.
    /// The rollback itself is a new version with its own history entry,
    /// so history stays strictly append-only.
    pub async fn rollback_flag(
        &self,
        flag_key: &str,
        history_id: Uuid,
        reason: &str,
        actor: &str,
    ) -> Result<FlagDefinition, DomainError> {
        let reason = required_reason(reason)?;
        let current = self.get_flag(flag_key).await?;

        let entry = self
            .store
            .get_history_entry(history_id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("history entry '{}'", history_id)))?;
        if entry.flag_id != current.id {
            return Err(DomainError::validation(
                "History entry belongs to a different flag",
            ));
        }

        let now = Utc::now();
        let mut restored = entry.snapshot.clone();
        restored.id = current.id;
        restored.key = current.key.clone();
        restored.created_at = current.created_at;
        restored.version = current.version + 1;
        restored.updated_at = now;
        restored.validate()?;

        self.store.put(&restored).await?;
        let history_reason = format!("{} (rollback to version {})", reason, entry.version);
        self.store
            .record_history(&FlagHistoryEntry::record(&restored, &history_reason, actor, now))
            .await?;
        self.cache.invalidate(flag_key);
        self.cache.invalidate_listing();

        self.record_audit(
            AuditRecordBuilder::actor(actor, AuditAction::FlagRollback)
                .on_resource(flag_key)
                .with_reason(&reason)
                .with_details(json!({
                    "history_id": history_id,
                    "restored_version": entry.version,
                }))
                .build(),
        )
        .await;
        Ok(restored)
    }

    /// Hard-disables a flag, bypassing partial updates. Idempotent on an
    /// already-disabled flag. Used by emergency control only.
    pub(crate) async fn force_disable(
        &self,
        flag_key: &str,
        reason: &str,
        actor: &str,
    ) -> Result<FlagDefinition, DomainError> {
        let reason = required_reason(reason)?;
        let current = self.get_flag(flag_key).await?;

        let now = Utc::now();
        let mut disabled = current;
        disabled.enabled = false;
        disabled.version += 1;
        disabled.updated_at = now;

        self.store.put(&disabled).await?;
        self.store
            .record_history(&FlagHistoryEntry::record(&disabled, &reason, actor, now))
            .await?;
        self.cache.invalidate(flag_key);
        self.cache.invalidate_listing();

        self.record_audit(
            AuditRecordBuilder::actor(actor, AuditAction::FlagEmergencyDisable)
                .on_resource(flag_key)
                .with_reason(&reason)
                .build(),
        )
        .await;
        warn!(flag_key, actor, "flag emergency-disabled");
        Ok(disabled)
    }

    // --- observability ---

    /// Evaluation counters per flag key.
    pub fn stats(&self) -> HashMap<String, FlagStats> {
        match self.stats.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn cache_hit_rate(&self) -> f64 {
        self.cache.hit_rate()
    }

    // --- internals ---

    async fn load(&self, flag_key: &str) -> Result<Option<Arc<CachedFlag>>, DomainError> {
        if let Some(cached) = self.cache.get(flag_key) {
            return Ok(Some(cached));
        }
        let Some(definition) = self.store.get(flag_key).await? else {
            return Ok(None);
        };
        let overrides = self.store.overrides_for(definition.id).await?;
        Ok(Some(self.cache.put(definition, overrides)))
    }

    fn note_evaluation(&self, flag_key: &str, reason: EvaluationReason) {
        let reason_label = match reason {
            EvaluationReason::Override => "override",
            EvaluationReason::RuleMatch => "rule_match",
            EvaluationReason::RolloutIncluded => "rollout_included",
            EvaluationReason::RolloutExcluded => "rollout_excluded",
            EvaluationReason::Default => "default",
            EvaluationReason::Archived => "archived",
            EvaluationReason::Disabled => "disabled",
            EvaluationReason::NotFound => "not_found",
        };
        counter!(
            "flag_evaluations_total",
            "flag" => flag_key.to_string(),
            "reason" => reason_label,
        )
        .increment(1);

        let mut stats = match self.stats.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let entry = stats.entry(flag_key.to_string()).or_default();
        entry.evaluations += 1;
        entry.last_evaluated_at = Some(Utc::now());
        *entry.by_reason.entry(reason_label.to_string()).or_insert(0) += 1;
    }

    /// Audit failures must not fail the mutation that already committed.
    async fn record_audit(&self, input: crate::models::CreateAuditRecordInput) {
        if let Err(err) = self.audit.record(input).await {
            warn!(error = %err, "failed to write audit record");
        }
    }
}

fn required_reason(reason: &str) -> Result<String, DomainError> {
    shared::validation::validate_reason(reason)
        .map_err(|e| {
            DomainError::validation(
                e.message
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| "A change reason is required".to_string()),
            )
        })
        .map(|_| reason.trim().to_string())
}

/// The decision procedure over a cached snapshot. Precedence:
/// archived > disabled/out-of-schedule > override > rule > rollout >
/// default. Archived and disabled flags report `enabled: false` even
/// when the default value is truthy.
fn decide(cached: &CachedFlag, ctx: &EvaluationContext) -> EvaluationResult {
    let flag = &cached.definition;
    let version = Some(flag.version);

    if flag.archived {
        return off_result(flag, EvaluationReason::Archived);
    }
    if !flag.enabled || !flag.within_schedule(Utc::now()) {
        return off_result(flag, EvaluationReason::Disabled);
    }

    // User overrides take precedence over group overrides.
    let matching = |target| {
        cached
            .overrides
            .iter()
            .find(|o| o.target_type == target && o.matches(ctx))
    };
    if let Some(ovr) = matching(crate::models::OverrideTargetType::User)
        .or_else(|| matching(crate::models::OverrideTargetType::Group))
    {
        return EvaluationResult::new(
            &flag.key,
            FlagValue::Bool(ovr.enabled),
            EvaluationReason::Override,
            version,
        );
    }

    if let Some(outcome) = rules::evaluate_rules(&flag.targeting_rules, ctx) {
        return match outcome {
            RuleOutcome::Value(value) => EvaluationResult::new(
                &flag.key,
                value.clone(),
                EvaluationReason::RuleMatch,
                version,
            ),
            RuleOutcome::Rollout => rollout_result(flag, ctx),
        };
    }

    if flag.flag_type.requires_rollout() {
        return rollout_result(flag, ctx);
    }

    EvaluationResult::new(
        &flag.key,
        flag.default_value.clone(),
        EvaluationReason::Default,
        version,
    )
}

fn rollout_result(flag: &FlagDefinition, ctx: &EvaluationContext) -> EvaluationResult {
    let percentage = flag.rollout_percentage.unwrap_or(0);
    match ctx.bucketing_identity() {
        Some(identity) if bucketer::included(&flag.key, &identity, percentage) => {
            EvaluationResult::new(
                &flag.key,
                FlagValue::Bool(true),
                EvaluationReason::RolloutIncluded,
                Some(flag.version),
            )
        }
        _ => EvaluationResult::new(
            &flag.key,
            FlagValue::Bool(false),
            EvaluationReason::RolloutExcluded,
            Some(flag.version),
        ),
    }
}

fn off_result(flag: &FlagDefinition, reason: EvaluationReason) -> EvaluationResult {
    let mut result = EvaluationResult::new(
        &flag.key,
        flag.default_value.clone(),
        reason,
        Some(flag.version),
    );
    result.enabled = false;
    result
}
