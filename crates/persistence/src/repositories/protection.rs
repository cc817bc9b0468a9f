//! Protection repository: the Postgres `CounterStore`.
//!
//! Window counting runs INSERT + prune + COUNT inside one transaction
//! so concurrent bursts from the same IP each observe their own attempt
//! in the count. This is the store to deploy behind multiple instances;
//! the in-memory counter store is single-process only.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::models::RegistrationAttempt;
use domain::stores::{CounterStore, DomainPolicy};
use domain::DomainError;
use sqlx::PgPool;

use crate::entities::{outcome_as_str, policy_as_str, DomainPolicyEntity, RegistrationAttemptEntity};
use crate::metrics::QueryTimer;
use crate::repositories::map_sqlx;

#[derive(Clone)]
pub struct ProtectionRepository {
    pool: PgPool,
}

impl ProtectionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CounterStore for ProtectionRepository {
    async fn record_and_count(
        &self,
        ip: &str,
        at: DateTime<Utc>,
        window_start: DateTime<Utc>,
    ) -> Result<u32, DomainError> {
        let timer = QueryTimer::new("record_and_count");
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx("begin window tx", e))?;

        sqlx::query("INSERT INTO registration_window_events (ip, attempted_at) VALUES ($1, $2)")
            .bind(ip)
            .bind(at)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx("record window event", e))?;

        // Aged-out events are dead weight; prune them while we hold the row.
        sqlx::query("DELETE FROM registration_window_events WHERE ip = $1 AND attempted_at < $2")
            .bind(ip)
            .bind(window_start)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx("prune window events", e))?;

        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM registration_window_events \
             WHERE ip = $1 AND attempted_at >= $2",
        )
        .bind(ip)
        .bind(window_start)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx("count window events", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx("commit window tx", e))?;
        timer.record();
        Ok(count.max(0) as u32)
    }

    async fn block_ip(&self, ip: &str, until: DateTime<Utc>) -> Result<(), DomainError> {
        let timer = QueryTimer::new("block_ip");
        sqlx::query(
            "INSERT INTO blocked_ips (ip, blocked_until) VALUES ($1, $2) \
             ON CONFLICT (ip) DO UPDATE SET blocked_until = EXCLUDED.blocked_until",
        )
        .bind(ip)
        .bind(until)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx("block ip", e))?;
        timer.record();
        Ok(())
    }

    async fn blocked_until(
        &self,
        ip: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, DomainError> {
        let timer = QueryTimer::new("blocked_until");
        let until: Option<DateTime<Utc>> = sqlx::query_scalar(
            "SELECT blocked_until FROM blocked_ips WHERE ip = $1 AND blocked_until > $2",
        )
        .bind(ip)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx("check block", e))?;
        timer.record();
        Ok(until)
    }

    async fn unblock_ip(&self, ip: &str) -> Result<(), DomainError> {
        sqlx::query("DELETE FROM blocked_ips WHERE ip = $1")
            .bind(ip)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx("unblock ip", e))?;
        Ok(())
    }

    async fn domain_policy(&self, domain: &str) -> Result<Option<DomainPolicy>, DomainError> {
        let timer = QueryTimer::new("domain_policy");
        let entity = sqlx::query_as::<_, DomainPolicyEntity>(
            "SELECT domain, policy FROM domain_policies WHERE domain = $1",
        )
        .bind(domain)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx("get domain policy", e))?;
        timer.record();
        entity.map(DomainPolicyEntity::into_domain).transpose()
    }

    async fn set_domain_policy(
        &self,
        domain: &str,
        policy: DomainPolicy,
    ) -> Result<(), DomainError> {
        sqlx::query(
            "INSERT INTO domain_policies (domain, policy) VALUES ($1, $2) \
             ON CONFLICT (domain) DO UPDATE SET policy = EXCLUDED.policy",
        )
        .bind(domain)
        .bind(policy_as_str(policy))
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx("set domain policy", e))?;
        Ok(())
    }

    async fn remove_domain_policy(&self, domain: &str) -> Result<(), DomainError> {
        sqlx::query("DELETE FROM domain_policies WHERE domain = $1")
            .bind(domain)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx("remove domain policy", e))?;
        Ok(())
    }

    async fn log_attempt(&self, attempt: &RegistrationAttempt) -> Result<(), DomainError> {
        sqlx::query(
            "INSERT INTO registration_attempts \
             (ip, email_domain, attempted_at, outcome, suspicion_score) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&attempt.ip)
        .bind(&attempt.email_domain)
        .bind(attempt.timestamp)
        .bind(outcome_as_str(attempt.outcome))
        .bind(attempt.suspicion_score)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx("log attempt", e))?;
        Ok(())
    }

    async fn attempts_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<RegistrationAttempt>, DomainError> {
        let timer = QueryTimer::new("attempts_since");
        let entities = sqlx::query_as::<_, RegistrationAttemptEntity>(
            "SELECT ip, email_domain, attempted_at, outcome, suspicion_score \
             FROM registration_attempts WHERE attempted_at >= $1 ORDER BY attempted_at",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx("list attempts", e))?;
        timer.record();
        entities
            .into_iter()
            .map(RegistrationAttemptEntity::into_domain)
            .collect()
    }
}
