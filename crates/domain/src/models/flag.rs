//! Feature flag definition models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;
use crate::models::rule::{RuleOutcome, TargetingRule};

/// The kind of value a flag resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagType {
    Boolean,
    Percentage,
    Variant,
    Numeric,
    String,
}

impl FlagType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlagType::Boolean => "boolean",
            FlagType::Percentage => "percentage",
            FlagType::Variant => "variant",
            FlagType::Numeric => "numeric",
            FlagType::String => "string",
        }
    }

    /// Percentage flags are the only type resolved through rollout bucketing.
    pub fn requires_rollout(&self) -> bool {
        matches!(self, FlagType::Percentage)
    }
}

/// A typed flag value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FlagValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl FlagValue {
    /// Whether this value is valid for the given flag type.
    pub fn matches_type(&self, flag_type: FlagType) -> bool {
        matches!(
            (self, flag_type),
            (FlagValue::Bool(_), FlagType::Boolean)
                | (FlagValue::Bool(_), FlagType::Percentage)
                | (FlagValue::Number(_), FlagType::Numeric)
                | (FlagValue::Text(_), FlagType::Variant)
                | (FlagValue::Text(_), FlagType::String)
        )
    }

    /// Truthiness of the value, used for the `enabled` field of results.
    pub fn is_truthy(&self) -> bool {
        match self {
            FlagValue::Bool(b) => *b,
            FlagValue::Number(n) => *n != 0.0,
            FlagValue::Text(s) => !s.is_empty(),
        }
    }
}

/// The authoritative definition of a feature flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlagDefinition {
    pub id: Uuid,
    /// Unique key, immutable after creation.
    pub key: String,
    pub name: String,
    pub description: Option<String>,
    pub flag_type: FlagType,
    pub default_value: FlagValue,
    pub enabled: bool,
    pub is_system_wide: bool,
    pub category: Option<String>,
    /// Defined iff `flag_type` requires partial rollout.
    pub rollout_percentage: Option<u8>,
    /// Ordered; first matching rule wins.
    pub targeting_rules: Vec<TargetingRule>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    /// An archived flag never evaluates to enabled.
    pub archived: bool,
    /// Bumped on every mutation; cache entries carry it.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FlagDefinition {
    /// Validates the full definition. Targeting rules are validated here so
    /// malformed rules fail on write, not silently on every evaluation.
    pub fn validate(&self) -> Result<(), DomainError> {
        shared::validation::validate_flag_key(&self.key)
            .map_err(|e| DomainError::validation(message_of(e, "invalid flag key")))?;

        if self.name.trim().is_empty() {
            return Err(DomainError::validation("Flag name must not be empty"));
        }

        if !self.default_value.matches_type(self.flag_type) {
            return Err(DomainError::validation(format!(
                "Default value does not match flag type '{}'",
                self.flag_type.as_str()
            )));
        }

        match (self.flag_type.requires_rollout(), self.rollout_percentage) {
            (true, None) => {
                return Err(DomainError::validation(
                    "Percentage flags require rollout_percentage",
                ));
            }
            (false, Some(_)) => {
                return Err(DomainError::validation(
                    "rollout_percentage is only valid for percentage flags",
                ));
            }
            (_, Some(pct)) if pct > 100 => {
                return Err(DomainError::validation(
                    "Rollout percentage must be between 0 and 100",
                ));
            }
            _ => {}
        }

        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if end <= start {
                return Err(DomainError::validation("end_date must be after start_date"));
            }
        }

        for (i, rule) in self.targeting_rules.iter().enumerate() {
            rule.validate()
                .map_err(|e| DomainError::validation(format!("Rule {}: {}", i, e)))?;
            if let RuleOutcome::Value(value) = &rule.outcome {
                if !value.matches_type(self.flag_type) {
                    return Err(DomainError::validation(format!(
                        "Rule {} outcome does not match flag type '{}'",
                        i,
                        self.flag_type.as_str()
                    )));
                }
            }
            if matches!(rule.outcome, RuleOutcome::Rollout) && !self.flag_type.requires_rollout() {
                return Err(DomainError::validation(format!(
                    "Rule {} routes to rollout but the flag has no rollout",
                    i
                )));
            }
        }

        Ok(())
    }

    /// Whether `now` falls inside the flag's validity window.
    pub fn within_schedule(&self, now: DateTime<Utc>) -> bool {
        if let Some(start) = self.start_date {
            if now < start {
                return false;
            }
        }
        if let Some(end) = self.end_date {
            if now > end {
                return false;
            }
        }
        true
    }
}

fn message_of(err: validator::ValidationError, fallback: &str) -> String {
    err.message
        .map(|m| m.to_string())
        .unwrap_or_else(|| fallback.to_string())
}

/// Input for creating a flag.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateFlagInput {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub flag_type: FlagType,
    pub default_value: FlagValue,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub is_system_wide: bool,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub rollout_percentage: Option<u8>,
    #[serde(default)]
    pub targeting_rules: Vec<TargetingRule>,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
}

impl CreateFlagInput {
    /// Materializes a validated definition at version 1.
    pub fn into_definition(self, now: DateTime<Utc>) -> Result<FlagDefinition, DomainError> {
        let definition = FlagDefinition {
            id: Uuid::new_v4(),
            key: self.key,
            name: self.name,
            description: self.description,
            flag_type: self.flag_type,
            default_value: self.default_value,
            enabled: self.enabled,
            is_system_wide: self.is_system_wide,
            category: self.category,
            rollout_percentage: self.rollout_percentage,
            targeting_rules: self.targeting_rules,
            start_date: self.start_date,
            end_date: self.end_date,
            archived: false,
            version: 1,
            created_at: now,
            updated_at: now,
        };
        definition.validate()?;
        Ok(definition)
    }
}

/// Partial update to a flag; `None` fields are left untouched.
/// The key is immutable and therefore absent here.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FlagChanges {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<Option<String>>,
    #[serde(default)]
    pub default_value: Option<FlagValue>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub is_system_wide: Option<bool>,
    #[serde(default)]
    pub category: Option<Option<String>>,
    #[serde(default)]
    pub rollout_percentage: Option<Option<u8>>,
    #[serde(default)]
    pub targeting_rules: Option<Vec<TargetingRule>>,
    #[serde(default)]
    pub start_date: Option<Option<DateTime<Utc>>>,
    #[serde(default)]
    pub end_date: Option<Option<DateTime<Utc>>>,
}

impl FlagChanges {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.default_value.is_none()
            && self.enabled.is_none()
            && self.is_system_wide.is_none()
            && self.category.is_none()
            && self.rollout_percentage.is_none()
            && self.targeting_rules.is_none()
            && self.start_date.is_none()
            && self.end_date.is_none()
    }

    /// Applies the changes to a copy of `flag`, bumping version and
    /// `updated_at`. The result is re-validated before being returned.
    pub fn apply_to(
        &self,
        flag: &FlagDefinition,
        now: DateTime<Utc>,
    ) -> Result<FlagDefinition, DomainError> {
        let mut updated = flag.clone();
        if let Some(name) = &self.name {
            updated.name = name.clone();
        }
        if let Some(description) = &self.description {
            updated.description = description.clone();
        }
        if let Some(value) = &self.default_value {
            updated.default_value = value.clone();
        }
        if let Some(enabled) = self.enabled {
            updated.enabled = enabled;
        }
        if let Some(system_wide) = self.is_system_wide {
            updated.is_system_wide = system_wide;
        }
        if let Some(category) = &self.category {
            updated.category = category.clone();
        }
        if let Some(pct) = self.rollout_percentage {
            updated.rollout_percentage = pct;
        }
        if let Some(rules) = &self.targeting_rules {
            updated.targeting_rules = rules.clone();
        }
        if let Some(start) = self.start_date {
            updated.start_date = start;
        }
        if let Some(end) = self.end_date {
            updated.end_date = end;
        }
        updated.version = flag.version + 1;
        updated.updated_at = now;
        updated.validate()?;
        Ok(updated)
    }
}

/// An append-only snapshot of a flag at a given version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlagHistoryEntry {
    pub id: Uuid,
    pub flag_id: Uuid,
    pub version: i64,
    /// Full definition as recorded at this version.
    pub snapshot: FlagDefinition,
    pub change_reason: String,
    pub changed_by: String,
    pub created_at: DateTime<Utc>,
}

impl FlagHistoryEntry {
    pub fn record(
        flag: &FlagDefinition,
        reason: impl Into<String>,
        actor: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            flag_id: flag.id,
            version: flag.version,
            snapshot: flag.clone(),
            change_reason: reason.into(),
            changed_by: actor.into(),
            created_at: now,
        }
    }
}
