//! Audit log repository: the Postgres `AuditSink`.

use async_trait::async_trait;
use domain::models::CreateAuditRecordInput;
use domain::stores::AuditSink;
use domain::DomainError;
use sqlx::PgPool;

use crate::repositories::map_sqlx;

#[derive(Clone)]
pub struct AuditLogRepository {
    pool: PgPool,
}

impl AuditLogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditSink for AuditLogRepository {
    async fn record(&self, input: CreateAuditRecordInput) -> Result<(), DomainError> {
        sqlx::query(
            "INSERT INTO audit_log \
             (id, actor_id, action, resource_type, resource_id, reason, details, \
              ip_address, user_agent, timestamp) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(input.id)
        .bind(&input.actor_id)
        .bind(input.action.as_str())
        .bind(&input.resource_type)
        .bind(&input.resource_id)
        .bind(&input.reason)
        .bind(&input.details)
        .bind(input.ip_address.map(|ip| ip.to_string()))
        .bind(&input.user_agent)
        .bind(input.timestamp)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx("record audit entry", e))?;
        Ok(())
    }
}
