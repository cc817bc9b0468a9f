//! Targeting rule evaluation.
//!
//! Pure functions over validated rules. Anything that does not cleanly
//! match (unknown attribute, type mismatch) counts as "does not match";
//! evaluation is on the hot path and must never error.

use serde_json::Value;

use crate::models::{Condition, ConditionOperator, EvaluationContext, RuleOutcome, TargetingRule};

/// Evaluates `rules` in order; the first rule whose conditions all match
/// wins. Returns `None` when no rule matches.
pub fn evaluate_rules<'a>(
    rules: &'a [TargetingRule],
    ctx: &EvaluationContext,
) -> Option<&'a RuleOutcome> {
    rules
        .iter()
        .find(|rule| rule.conditions.iter().all(|c| condition_matches(c, ctx)))
        .map(|rule| &rule.outcome)
}

fn condition_matches(condition: &Condition, ctx: &EvaluationContext) -> bool {
    let Some(actual) = ctx.attribute(&condition.attribute) else {
        return false;
    };

    match condition.operator {
        ConditionOperator::Equals => values_equal(&actual, &condition.value),
        ConditionOperator::NotEquals => !values_equal(&actual, &condition.value),
        ConditionOperator::In => condition
            .value
            .as_array()
            .is_some_and(|set| set.iter().any(|v| values_equal(&actual, v))),
        ConditionOperator::NotIn => condition
            .value
            .as_array()
            .is_some_and(|set| !set.iter().any(|v| values_equal(&actual, v))),
        ConditionOperator::GreaterThan => match (actual.as_f64(), condition.value.as_f64()) {
            (Some(a), Some(b)) => a > b,
            _ => false,
        },
        ConditionOperator::LessThan => match (actual.as_f64(), condition.value.as_f64()) {
            (Some(a), Some(b)) => a < b,
            _ => false,
        },
        ConditionOperator::Contains => contains(&actual, &condition.value),
    }
}

/// Loose equality: numbers compare as f64 so `5` equals `5.0`; other
/// types use strict JSON equality.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// `contains` over a string (substring) or an array (membership).
fn contains(actual: &Value, needle: &Value) -> bool {
    match actual {
        Value::String(s) => needle.as_str().is_some_and(|n| s.contains(n)),
        Value::Array(items) => items.iter().any(|item| values_equal(item, needle)),
        _ => false,
    }
}
