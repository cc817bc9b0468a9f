//! Registration DDoS protection.
//!
//! Guards the public registration endpoint with a per-IP rolling-window
//! rate limit, an IP block list with expiry, email-domain allow/deny
//! policies and a suspicion heuristic. The decision runs before any
//! account-creation logic.
//!
//! Failure semantics are asymmetric on purpose: when the counter store
//! is unreachable, the block and rate-limit checks fail closed (deny on
//! uncertainty), while the domain-reputation lookup feeding the
//! suspicion heuristic fails open (a non-critical signal being
//! unavailable must not block a legitimate user by itself).

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use metrics::counter;
use regex::Regex;
use serde_json::json;
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

use crate::error::DomainError;
use crate::models::{
    AttemptOutcome, AuditAction, MetricsRange, ProtectionMetrics, ProtectionThresholds,
    RegistrationAttempt, RegistrationDecision, ThresholdUpdate,
};
use crate::services::audit::AuditRecordBuilder;
use crate::stores::{AuditSink, CounterStore, DomainPolicy};

lazy_static! {
    // No leading word boundary: crawler names are usually suffixed
    // ("Googlebot", "Bingbot"), so "bot" must match mid-word.
    static ref BOT_UA_RE: Regex =
        Regex::new(r"(?i)(bot|crawler|spider|curl|wget|python-requests|scrapy|httpclient)\b")
            .expect("bot UA regex is valid");
}

/// Known throwaway email providers. Domain policies in the store take
/// precedence; this list only feeds the suspicion score.
const DISPOSABLE_DOMAINS: &[&str] = &[
    "mailinator.com",
    "guerrillamail.com",
    "10minutemail.com",
    "tempmail.com",
    "temp-mail.org",
    "yopmail.com",
    "trashmail.com",
    "discard.email",
    "sharklasers.com",
];

/// Signals available when scoring a single attempt.
#[derive(Debug, Clone, Copy, Default)]
pub struct SuspicionSignals {
    /// Attempts from this IP inside the current window, this one included.
    pub attempts_in_window: u32,
    /// Attempts allowed per window before blocking.
    pub rate_limit: u32,
    pub disposable_domain: bool,
    pub missing_user_agent: bool,
    pub bot_user_agent: bool,
}

/// Pure, deterministic suspicion score in [0, 1].
///
/// Velocity ramps from 0 at the first attempt to 0.4 at the rate limit;
/// a disposable email domain adds 0.35; a missing or bot-like user
/// agent adds 0.25.
pub fn suspicion_score(signals: &SuspicionSignals) -> f64 {
    let velocity = if signals.rate_limit == 0 {
        0.0
    } else {
        let prior = signals.attempts_in_window.saturating_sub(1) as f64;
        (prior / signals.rate_limit as f64).min(1.0)
    };
    let domain = if signals.disposable_domain { 1.0 } else { 0.0 };
    let headers = if signals.missing_user_agent || signals.bot_user_agent {
        1.0
    } else {
        0.0
    };
    (velocity * 0.4 + domain * 0.35 + headers * 0.25).clamp(0.0, 1.0)
}

pub struct RegistrationProtection {
    counters: Arc<dyn CounterStore>,
    thresholds: RwLock<ProtectionThresholds>,
}

impl RegistrationProtection {
    pub fn new(counters: Arc<dyn CounterStore>, thresholds: ProtectionThresholds) -> Self {
        Self {
            counters,
            thresholds: RwLock::new(thresholds),
        }
    }

    pub fn thresholds(&self) -> ProtectionThresholds {
        match self.thresholds.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn replace_thresholds(&self, thresholds: ProtectionThresholds) {
        let mut guard = match self.thresholds.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = thresholds;
    }

    /// Runs the decision pipeline for one registration attempt. Never
    /// errors; store failures resolve per the documented asymmetry.
    pub async fn check_attempt(
        &self,
        ip: IpAddr,
        email: Option<&str>,
        user_agent: Option<&str>,
    ) -> RegistrationDecision {
        let thresholds = self.thresholds();
        let now = Utc::now();
        let ip_key = ip.to_string();
        let email_domain = email.and_then(shared::validation::email_domain);

        if !thresholds.registration_enabled {
            return self
                .resolve(&ip_key, &email_domain, now, RegistrationDecision::Blocked, 0.0)
                .await;
        }

        // Active block? Store failure denies: this check exists to stop
        // an attack in progress.
        match self.counters.blocked_until(&ip_key, now).await {
            Ok(Some(until)) => {
                info!(ip = %ip_key, until = %until, "registration attempt from blocked ip");
                return self
                    .resolve(&ip_key, &email_domain, now, RegistrationDecision::Blocked, 0.0)
                    .await;
            }
            Ok(None) => {}
            Err(err) => {
                warn!(error = %err, "counter store unreachable during block check, denying");
                return self
                    .resolve(&ip_key, &email_domain, now, RegistrationDecision::Blocked, 0.0)
                    .await;
            }
        }

        // Domain policy: an explicit deny blocks before the attempt is
        // counted, so denied-domain traffic cannot spend the ip's rate
        // budget. The lookup failing is a missing reputation signal,
        // not a reason to deny.
        let policy = match &email_domain {
            Some(domain) => match self.counters.domain_policy(domain).await {
                Ok(policy) => policy,
                Err(err) => {
                    warn!(error = %err, "domain policy lookup failed, continuing without it");
                    None
                }
            },
            None => None,
        };
        if policy == Some(DomainPolicy::Deny) {
            return self
                .resolve(&ip_key, &email_domain, now, RegistrationDecision::Blocked, 0.0)
                .await;
        }

        // Rolling-window count, this attempt included. Same fail-closed
        // posture as the block check.
        let window_start = now - thresholds.window();
        let count = match self.counters.record_and_count(&ip_key, now, window_start).await {
            Ok(count) => count,
            Err(err) => {
                warn!(error = %err, "counter store unreachable during rate check, denying");
                return self
                    .resolve(&ip_key, &email_domain, now, RegistrationDecision::Blocked, 0.0)
                    .await;
            }
        };

        if count > thresholds.rate_limit {
            let until = now + thresholds.block_duration();
            if let Err(err) = self.counters.block_ip(&ip_key, until).await {
                warn!(error = %err, ip = %ip_key, "failed to persist ip block");
            }
            info!(ip = %ip_key, count, until = %until, "rate limit exceeded, ip blocked");
            return self
                .resolve(&ip_key, &email_domain, now, RegistrationDecision::Blocked, 0.0)
                .await;
        }

        let disposable = policy != Some(DomainPolicy::Allow)
            && email_domain
                .as_deref()
                .is_some_and(|d| DISPOSABLE_DOMAINS.contains(&d));
        let signals = SuspicionSignals {
            attempts_in_window: count,
            rate_limit: thresholds.rate_limit,
            disposable_domain: disposable,
            missing_user_agent: user_agent.is_none(),
            bot_user_agent: user_agent.is_some_and(|ua| BOT_UA_RE.is_match(ua)),
        };
        let score = suspicion_score(&signals);

        let decision = if score >= thresholds.suspicion_threshold {
            info!(ip = %ip_key, score, "attempt blocked on suspicion");
            RegistrationDecision::Blocked
        } else if count >= thresholds.captcha_threshold {
            RegistrationDecision::CaptchaRequired
        } else {
            RegistrationDecision::Allowed
        };
        self.resolve(&ip_key, &email_domain, now, decision, score).await
    }

    /// Records a completed registration, for metrics. Called by the
    /// route layer once account creation succeeds.
    pub async fn record_success(&self, ip: IpAddr, email: Option<&str>) {
        let attempt = RegistrationAttempt {
            ip: ip.to_string(),
            email_domain: email.and_then(shared::validation::email_domain),
            timestamp: Utc::now(),
            outcome: AttemptOutcome::Succeeded,
            suspicion_score: 0.0,
        };
        if let Err(err) = self.counters.log_attempt(&attempt).await {
            warn!(error = %err, "failed to record successful registration");
        }
        counter!("registration_attempts_total", "outcome" => "succeeded").increment(1);
    }

    /// Recomputes metrics over the attempt log for `range`.
    pub async fn metrics(&self, range: MetricsRange) -> Result<ProtectionMetrics, DomainError> {
        let since = Utc::now() - range.duration();
        let attempts = self.counters.attempts_since(since).await?;
        let threshold = self.thresholds().suspicion_threshold;

        let mut unique_ips = HashSet::new();
        let mut suspicious_ips = HashSet::new();
        let mut successful = 0u64;
        let mut blocked = 0u64;
        let mut challenges = 0u64;
        for attempt in &attempts {
            unique_ips.insert(attempt.ip.as_str());
            if attempt.suspicion_score >= threshold {
                suspicious_ips.insert(attempt.ip.as_str());
            }
            match attempt.outcome {
                AttemptOutcome::Succeeded => successful += 1,
                AttemptOutcome::Blocked => blocked += 1,
                AttemptOutcome::CaptchaRequired => challenges += 1,
                AttemptOutcome::Allowed => {}
            }
        }

        let captcha_solve_rate = if challenges == 0 {
            1.0
        } else {
            (successful as f64 / challenges as f64).min(1.0)
        };

        Ok(ProtectionMetrics {
            range,
            total_attempts: attempts.len() as u64,
            successful_registrations: successful,
            blocked_attempts: blocked,
            captcha_challenges: challenges,
            unique_ips: unique_ips.len() as u64,
            suspicious_ips: suspicious_ips.len() as u64,
            captcha_solve_rate,
        })
    }

    async fn resolve(
        &self,
        ip: &str,
        email_domain: &Option<String>,
        now: DateTime<Utc>,
        decision: RegistrationDecision,
        score: f64,
    ) -> RegistrationDecision {
        let outcome = match decision {
            RegistrationDecision::Allowed => AttemptOutcome::Allowed,
            RegistrationDecision::CaptchaRequired => AttemptOutcome::CaptchaRequired,
            RegistrationDecision::Blocked => AttemptOutcome::Blocked,
        };
        let attempt = RegistrationAttempt {
            ip: ip.to_string(),
            email_domain: email_domain.clone(),
            timestamp: now,
            outcome,
            suspicion_score: score,
        };
        if let Err(err) = self.counters.log_attempt(&attempt).await {
            warn!(error = %err, "failed to record registration attempt");
        }
        let outcome_label = match outcome {
            AttemptOutcome::Allowed => "allowed",
            AttemptOutcome::CaptchaRequired => "captcha_required",
            AttemptOutcome::Blocked => "blocked",
            AttemptOutcome::Succeeded => "succeeded",
        };
        counter!("registration_attempts_total", "outcome" => outcome_label).increment(1);
        decision
    }
}

/// Admin surface over [`RegistrationProtection`]: threshold tuning, the
/// registration kill switch and manual IP blocks. Every mutation needs
/// a reason and lands in the audit log.
pub struct ProtectionAdmin {
    protection: Arc<RegistrationProtection>,
    audit: Arc<dyn AuditSink>,
}

impl ProtectionAdmin {
    pub fn new(protection: Arc<RegistrationProtection>, audit: Arc<dyn AuditSink>) -> Self {
        Self { protection, audit }
    }

    pub fn thresholds(&self) -> ProtectionThresholds {
        self.protection.thresholds()
    }

    pub async fn metrics(&self, range: MetricsRange) -> Result<ProtectionMetrics, DomainError> {
        self.protection.metrics(range).await
    }

    /// Applies a partial threshold update. Takes effect on the next
    /// `check_attempt`; existing blocks are not re-evaluated.
    pub async fn update_thresholds(
        &self,
        update: ThresholdUpdate,
        reason: &str,
        actor: &str,
    ) -> Result<ProtectionThresholds, DomainError> {
        validate_reason(reason)?;
        if update.is_empty() {
            return Err(DomainError::validation("No threshold changes supplied"));
        }
        let current = self.protection.thresholds();
        let updated = update.apply_to(&current)?;
        self.protection.replace_thresholds(updated.clone());

        self.record_audit(
            AuditRecordBuilder::actor(actor, AuditAction::ProtectionThresholdsUpdate)
                .with_reason(reason)
                .with_details(json!({
                    "old": current,
                    "new": updated,
                }))
                .build(),
        )
        .await;
        Ok(updated)
    }

    /// The admin registration kill switch. Distinct from emergency flag
    /// disable: a deliberate action with a reason, no special rate limit.
    pub async fn toggle_self_registration(
        &self,
        enabled: bool,
        reason: &str,
        actor: &str,
    ) -> Result<ProtectionThresholds, DomainError> {
        validate_reason(reason)?;
        let mut thresholds = self.protection.thresholds();
        thresholds.registration_enabled = enabled;
        self.protection.replace_thresholds(thresholds.clone());
        info!(enabled, actor, "self-registration toggled");

        self.record_audit(
            AuditRecordBuilder::actor(actor, AuditAction::RegistrationToggle)
                .with_reason(reason)
                .with_details(json!({ "enabled": enabled }))
                .build(),
        )
        .await;
        Ok(thresholds)
    }

    /// Manually blocks an IP for the configured block duration.
    pub async fn block_ip(
        &self,
        ip: IpAddr,
        reason: &str,
        actor: &str,
    ) -> Result<DateTime<Utc>, DomainError> {
        validate_reason(reason)?;
        let until = Utc::now() + self.protection.thresholds().block_duration();
        self.protection
            .counters
            .block_ip(&ip.to_string(), until)
            .await?;

        self.record_audit(
            AuditRecordBuilder::actor(actor, AuditAction::IpBlock)
                .on_resource(ip.to_string())
                .with_reason(reason)
                .with_details(json!({ "until": until }))
                .build(),
        )
        .await;
        Ok(until)
    }

    pub async fn unblock_ip(&self, ip: IpAddr, reason: &str, actor: &str) -> Result<(), DomainError> {
        validate_reason(reason)?;
        self.protection.counters.unblock_ip(&ip.to_string()).await?;

        self.record_audit(
            AuditRecordBuilder::actor(actor, AuditAction::IpUnblock)
                .on_resource(ip.to_string())
                .with_reason(reason)
                .build(),
        )
        .await;
        Ok(())
    }

    pub async fn set_domain_policy(
        &self,
        domain: &str,
        policy: DomainPolicy,
        reason: &str,
        actor: &str,
    ) -> Result<(), DomainError> {
        validate_reason(reason)?;
        let domain = domain.trim().to_ascii_lowercase();
        if domain.is_empty() || !domain.contains('.') {
            return Err(DomainError::validation("A valid email domain is required"));
        }
        self.protection
            .counters
            .set_domain_policy(&domain, policy)
            .await?;

        self.record_audit(
            AuditRecordBuilder::actor(actor, AuditAction::DomainPolicySet)
                .on_resource(&domain)
                .with_reason(reason)
                .with_details(json!({
                    "policy": match policy {
                        DomainPolicy::Allow => "allow",
                        DomainPolicy::Deny => "deny",
                    },
                }))
                .build(),
        )
        .await;
        Ok(())
    }

    async fn record_audit(&self, input: crate::models::CreateAuditRecordInput) {
        if let Err(err) = self.audit.record(input).await {
            warn!(error = %err, "failed to write audit record");
        }
    }
}

fn validate_reason(reason: &str) -> Result<(), DomainError> {
    shared::validation::validate_reason(reason).map_err(|e| {
        DomainError::validation(
            e.message
                .map(|m| m.to_string())
                .unwrap_or_else(|| "A change reason is required".to_string()),
        )
    })
}
