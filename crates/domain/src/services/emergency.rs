//! Emergency flag disable.
//!
//! A deliberately narrow control: one operation that hard-disables a
//! flag, takes effect on the next evaluation, and is rate limited per
//! actor so a runaway script cannot mass-disable the system. The limit
//! is charged on invocation, before the flag is even looked up.

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::error::DomainError;
use crate::models::FlagDefinition;
use crate::services::engine::FlagEvaluationEngine;

type ActorLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// 10 invocations per 5 minutes per actor, available as a burst.
fn actor_quota() -> Quota {
    let burst = NonZeroU32::new(10).unwrap_or(NonZeroU32::MIN);
    match Quota::with_period(Duration::from_secs(30)) {
        Some(quota) => quota.allow_burst(burst),
        None => Quota::per_minute(burst),
    }
}

pub struct EmergencyControl {
    engine: Arc<FlagEvaluationEngine>,
    limiters: RwLock<HashMap<String, Arc<ActorLimiter>>>,
}

impl EmergencyControl {
    pub fn new(engine: Arc<FlagEvaluationEngine>) -> Self {
        Self {
            engine,
            limiters: RwLock::new(HashMap::new()),
        }
    }

    /// Hard-disables `flag_key` immediately. Requires a reason and an
    /// identified actor; both end up in history and the audit log.
    pub async fn disable_flag(
        &self,
        flag_key: &str,
        reason: &str,
        actor: &str,
    ) -> Result<FlagDefinition, DomainError> {
        if actor.trim().is_empty() {
            return Err(DomainError::validation(
                "Emergency disable requires an identified actor",
            ));
        }
        self.check_actor(actor)?;
        self.engine.force_disable(flag_key, reason, actor).await
    }

    fn check_actor(&self, actor: &str) -> Result<(), DomainError> {
        let limiter = self.limiter_for(actor);
        limiter.check().map_err(|not_until| {
            let wait = not_until
                .wait_time_from(governor::clock::Clock::now(&DefaultClock::default()));
            DomainError::RateLimited {
                retry_after_secs: wait.as_secs().max(1),
            }
        })
    }

    fn limiter_for(&self, actor: &str) -> Arc<ActorLimiter> {
        {
            let limiters = match self.limiters.read() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if let Some(limiter) = limiters.get(actor) {
                return limiter.clone();
            }
        }

        let mut limiters = match self.limiters.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        // Double-check in case another thread created it.
        if let Some(limiter) = limiters.get(actor) {
            return limiter.clone();
        }
        let limiter = Arc::new(RateLimiter::direct(actor_quota()));
        limiters.insert(actor.to_string(), limiter.clone());
        limiter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CreateFlagInput, EvaluationContext, EvaluationReason, FlagType, FlagValue};
    use crate::stores::{InMemoryAuditSink, InMemoryFlagStore};

    async fn setup() -> (Arc<FlagEvaluationEngine>, EmergencyControl) {
        let engine = Arc::new(FlagEvaluationEngine::new(
            Arc::new(InMemoryFlagStore::new()),
            Arc::new(InMemoryAuditSink::new()),
        ));
        let input = CreateFlagInput {
            key: "payments".to_string(),
            name: "Payments".to_string(),
            description: None,
            flag_type: FlagType::Boolean,
            default_value: FlagValue::Bool(true),
            enabled: true,
            is_system_wide: true,
            category: None,
            rollout_percentage: None,
            targeting_rules: vec![],
            start_date: None,
            end_date: None,
        };
        engine.create_flag(input, "initial", "admin-1").await.unwrap();
        let control = EmergencyControl::new(engine.clone());
        (engine, control)
    }

    #[tokio::test]
    async fn test_disable_takes_effect_on_next_evaluation() {
        let (engine, control) = setup().await;

        let ctx = EvaluationContext::for_user("u1");
        assert!(engine.evaluate("payments", &ctx, None).await.enabled);

        let disabled = control
            .disable_flag("payments", "provider outage", "oncall-1")
            .await
            .unwrap();
        assert!(!disabled.enabled);
        assert_eq!(disabled.version, 2);

        let result = engine.evaluate("payments", &ctx, None).await;
        assert_eq!(result.reason, EvaluationReason::Disabled);
        assert!(!result.enabled);
    }

    #[tokio::test]
    async fn test_requires_reason_and_actor() {
        let (_, control) = setup().await;

        assert!(control
            .disable_flag("payments", "  ", "oncall-1")
            .await
            .is_err());
        assert!(control
            .disable_flag("payments", "outage", "")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_unknown_flag_is_not_found() {
        let (_, control) = setup().await;
        let err = control
            .disable_flag("ghost", "outage", "oncall-1")
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_actor_rate_limited_after_burst() {
        let (_, control) = setup().await;

        for _ in 0..10 {
            control
                .disable_flag("payments", "repeated incident", "oncall-2")
                .await
                .unwrap();
        }
        let err = control
            .disable_flag("payments", "one too many", "oncall-2")
            .await
            .unwrap_err();
        match err {
            DomainError::RateLimited { retry_after_secs } => assert!(retry_after_secs >= 1),
            other => panic!("expected RateLimited, got {:?}", other),
        }

        // A different actor has their own budget.
        control
            .disable_flag("payments", "fresh responder", "oncall-3")
            .await
            .unwrap();
    }
}
