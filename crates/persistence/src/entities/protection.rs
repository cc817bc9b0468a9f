//! Registration protection database entities.

use chrono::{DateTime, Utc};
use domain::models::{AttemptOutcome, RegistrationAttempt};
use domain::stores::DomainPolicy;
use domain::DomainError;
use sqlx::FromRow;

/// Row of the `domain_policies` table; policy is `allow` or `deny`.
#[derive(Debug, Clone, FromRow)]
pub struct DomainPolicyEntity {
    pub domain: String,
    pub policy: String,
}

impl DomainPolicyEntity {
    pub fn into_domain(self) -> Result<DomainPolicy, DomainError> {
        match self.policy.as_str() {
            "allow" => Ok(DomainPolicy::Allow),
            "deny" => Ok(DomainPolicy::Deny),
            other => Err(DomainError::store(format!(
                "unknown domain policy '{}'",
                other
            ))),
        }
    }
}

pub fn policy_as_str(policy: DomainPolicy) -> &'static str {
    match policy {
        DomainPolicy::Allow => "allow",
        DomainPolicy::Deny => "deny",
    }
}

/// Row of the `registration_attempts` log.
#[derive(Debug, Clone, FromRow)]
pub struct RegistrationAttemptEntity {
    pub ip: String,
    pub email_domain: Option<String>,
    pub attempted_at: DateTime<Utc>,
    pub outcome: String,
    pub suspicion_score: f64,
}

impl RegistrationAttemptEntity {
    pub fn into_domain(self) -> Result<RegistrationAttempt, DomainError> {
        let outcome = match self.outcome.as_str() {
            "allowed" => AttemptOutcome::Allowed,
            "captcha_required" => AttemptOutcome::CaptchaRequired,
            "blocked" => AttemptOutcome::Blocked,
            "succeeded" => AttemptOutcome::Succeeded,
            other => {
                return Err(DomainError::store(format!(
                    "unknown attempt outcome '{}'",
                    other
                )))
            }
        };
        Ok(RegistrationAttempt {
            ip: self.ip,
            email_domain: self.email_domain,
            timestamp: self.attempted_at,
            outcome,
            suspicion_score: self.suspicion_score,
        })
    }
}

pub fn outcome_as_str(outcome: AttemptOutcome) -> &'static str {
    match outcome {
        AttemptOutcome::Allowed => "allowed",
        AttemptOutcome::CaptchaRequired => "captcha_required",
        AttemptOutcome::Blocked => "blocked",
        AttemptOutcome::Succeeded => "succeeded",
    }
}
