//! Evaluation context and result models.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::net::IpAddr;

use crate::models::flag::FlagValue;

/// Everything known about the subject of a flag evaluation. Supplied by
/// the HTTP layer (authenticated identity, request metadata) plus
/// arbitrary caller attributes.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EvaluationContext {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub environment: Option<String>,
    #[serde(default)]
    pub ip: Option<IpAddr>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl EvaluationContext {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Default::default()
        }
    }

    /// Identity used for rollout bucketing: the user id when present,
    /// otherwise the client IP. Anonymous contexts without an IP have no
    /// bucketing identity and are excluded from rollout by policy.
    pub fn bucketing_identity(&self) -> Option<String> {
        if let Some(user_id) = &self.user_id {
            return Some(user_id.clone());
        }
        self.ip.map(|ip| ip.to_string())
    }

    /// Resolves a dot-separated attribute path. Well-known fields take
    /// precedence over the free-form attribute map. Unknown paths resolve
    /// to `None` so malformed targeting never errors.
    pub fn attribute(&self, path: &str) -> Option<Value> {
        match path {
            "user_id" => return self.user_id.clone().map(Value::String),
            "group_id" => return self.group_id.clone().map(Value::String),
            "environment" => return self.environment.clone().map(Value::String),
            "ip" => return self.ip.map(|ip| Value::String(ip.to_string())),
            "user_agent" => return self.user_agent.clone().map(Value::String),
            "roles" => {
                return Some(Value::Array(
                    self.roles.iter().cloned().map(Value::String).collect(),
                ));
            }
            _ => {}
        }

        let mut current = self.attributes.get(path.split('.').next()?)?;
        for segment in path.split('.').skip(1) {
            current = current.as_object()?.get(segment)?;
        }
        Some(current.clone())
    }
}

/// Why an evaluation produced its value. Mandatory and reproducible for
/// the same (flag, context, flag version).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationReason {
    Override,
    RuleMatch,
    RolloutIncluded,
    RolloutExcluded,
    Default,
    Archived,
    Disabled,
    NotFound,
}

/// The outcome of evaluating one flag for one context.
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationResult {
    pub flag_key: String,
    pub value: FlagValue,
    pub enabled: bool,
    pub reason: EvaluationReason,
    /// Version of the definition the decision was made against;
    /// `None` when the flag was not found.
    pub flag_version: Option<i64>,
}

impl EvaluationResult {
    pub fn new(
        flag_key: impl Into<String>,
        value: FlagValue,
        reason: EvaluationReason,
        flag_version: Option<i64>,
    ) -> Self {
        let enabled = value.is_truthy();
        Self {
            flag_key: flag_key.into(),
            value,
            enabled,
            reason,
            flag_version,
        }
    }

    pub fn not_found(flag_key: impl Into<String>, fallback: FlagValue) -> Self {
        Self::new(flag_key, fallback, EvaluationReason::NotFound, None)
    }
}
