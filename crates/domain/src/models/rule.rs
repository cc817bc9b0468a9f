//! Targeting rule models.
//!
//! Rules are parsed and validated when a flag is written, over a closed
//! operator set. Evaluation can then assume well-formed rules and treat
//! any remaining mismatch (unknown attribute, type confusion) as
//! "does not match" instead of an error.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DomainError;
use crate::models::flag::FlagValue;

/// Closed set of comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    In,
    NotIn,
    GreaterThan,
    LessThan,
    Contains,
}

/// One predicate over the evaluation context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    /// Dot-separated path into the evaluation context.
    pub attribute: String,
    pub operator: ConditionOperator,
    pub value: Value,
}

impl Condition {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.attribute.trim().is_empty() {
            return Err(DomainError::validation(
                "Condition attribute must not be empty",
            ));
        }
        match self.operator {
            ConditionOperator::In | ConditionOperator::NotIn => {
                if !self.value.is_array() {
                    return Err(DomainError::validation(
                        "'in'/'not_in' conditions require an array value",
                    ));
                }
            }
            ConditionOperator::GreaterThan | ConditionOperator::LessThan => {
                if !self.value.is_number() {
                    return Err(DomainError::validation(
                        "'greater_than'/'less_than' conditions require a numeric value",
                    ));
                }
            }
            ConditionOperator::Contains => {
                if !self.value.is_string() {
                    return Err(DomainError::validation(
                        "'contains' conditions require a string value",
                    ));
                }
            }
            ConditionOperator::Equals | ConditionOperator::NotEquals => {}
        }
        Ok(())
    }
}

/// What a matching rule resolves to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum RuleOutcome {
    /// A fixed value of the flag's type.
    Value(FlagValue),
    /// Continue to percentage rollout for matching contexts.
    Rollout,
}

/// An ordered condition set with an outcome. All conditions must match
/// (logical AND); across rules, first match wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetingRule {
    pub conditions: Vec<Condition>,
    pub outcome: RuleOutcome,
}

impl TargetingRule {
    pub fn validate(&self) -> Result<(), DomainError> {
        for condition in &self.conditions {
            condition.validate()?;
        }
        Ok(())
    }
}
