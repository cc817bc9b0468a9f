//! Per-user and per-group flag overrides.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;
use crate::models::evaluation::EvaluationContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideTargetType {
    User,
    Group,
}

impl OverrideTargetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverrideTargetType::User => "user",
            OverrideTargetType::Group => "group",
        }
    }
}

/// A forced outcome for a specific user or group. Overrides take
/// precedence over targeting rules and rollout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlagOverride {
    pub id: Uuid,
    pub flag_id: Uuid,
    pub target_type: OverrideTargetType,
    pub target_id: String,
    pub enabled: bool,
    pub reason: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl FlagOverride {
    pub fn matches(&self, ctx: &EvaluationContext) -> bool {
        match self.target_type {
            OverrideTargetType::User => ctx.user_id.as_deref() == Some(self.target_id.as_str()),
            OverrideTargetType::Group => ctx.group_id.as_deref() == Some(self.target_id.as_str()),
        }
    }
}

/// Input for creating an override.
#[derive(Debug, Clone, Deserialize)]
pub struct SetOverrideInput {
    pub target_type: OverrideTargetType,
    pub target_id: String,
    pub enabled: bool,
    pub reason: String,
}

impl SetOverrideInput {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.target_id.trim().is_empty() {
            return Err(DomainError::validation("Override target_id is required"));
        }
        shared::validation::validate_reason(&self.reason).map_err(|e| {
            DomainError::validation(
                e.message
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| "invalid reason".to_string()),
            )
        })
    }
}
